use super::Qhy9Controller;
use crate::host::HostSurface;
use crate::sdk::CameraSdk;
use tokio::time::Instant;
use tracing::{debug, trace};

impl<S: CameraSdk, H: HostSurface> Qhy9Controller<S, H> {
    /// Periodic work: exposure progress and readout, cooler regulation, temperature report.
    ///
    /// Re-arms the timer while a session is open. Without a session the tick is a no-op and
    /// the timer is left unarmed.
    pub fn tick(&mut self) {
        if self.session.is_none() {
            trace!("Tick without a camera session");
            self.timer_id = None;
            return;
        }

        let tick_started = std::time::Instant::now();

        self.poll_exposure(Instant::now());
        self.regulate_temperature();
        self.report_temperature();

        debug!("Tick took {} ms", tick_started.elapsed().as_millis());

        self.timer_id = Some(self.host.set_timer(self.config.timing.tick()));
    }
}
