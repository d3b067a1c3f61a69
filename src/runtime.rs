use crate::controller::{Dispatch, Qhy9Controller};
use crate::error::Result;
use crate::events::{DriverEvent, EventBus};
use crate::host::{parse_command, EventHost, HostCommand};
use crate::sdk::CameraSdk;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Why the runtime loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Quit,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "signal {}", name),
            ShutdownReason::Quit => write!(f, "quit command"),
        }
    }
}

/// Single-threaded host loop driving one controller.
///
/// Timer expiry, operator commands and shutdown signals are served one at a time, so the
/// controller is never entered concurrently.
pub struct DriverRuntime<S: CameraSdk> {
    controller: Qhy9Controller<S, EventHost>,
    event_bus: EventBus,
    deadline: Option<Instant>,
}

impl<S: CameraSdk> DriverRuntime<S> {
    pub fn new(controller: Qhy9Controller<S, EventHost>) -> Self {
        let event_bus = controller.host().event_bus().clone();
        Self {
            controller,
            event_bus,
            deadline: None,
        }
    }

    pub fn controller(&self) -> &Qhy9Controller<S, EventHost> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Qhy9Controller<S, EventHost> {
        &mut self.controller
    }

    /// Run until Ctrl-C, SIGTERM or a `quit` command
    pub async fn run<R>(&mut self, input: R) -> Result<ShutdownReason>
    where
        R: AsyncBufRead + Unpin,
    {
        self.run_until(input, shutdown_signal()).await
    }

    /// Run until `shutdown` resolves or a `quit` command arrives, then disconnect
    pub async fn run_until<R, F>(&mut self, input: R, shutdown: F) -> Result<ShutdownReason>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ShutdownReason>,
    {
        info!("QHY9 driver is running");

        let mut lines = input.lines();
        let mut input_open = true;
        tokio::pin!(shutdown);

        let reason = loop {
            self.arm_timer();
            let deadline = self.deadline;

            tokio::select! {
                reason = &mut shutdown => break reason,
                _ = wait_for(deadline) => {
                    self.deadline = None;
                    self.controller.tick();
                }
                line = lines.next_line(), if input_open => match line {
                    Ok(Some(line)) => {
                        if let Some(reason) = self.handle_line(&line)? {
                            break reason;
                        }
                    }
                    Ok(None) => {
                        debug!("Command input closed");
                        input_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read command input: {}", e);
                        input_open = false;
                    }
                },
            }
        };

        info!("Shutdown initiated: {}", reason);
        self.shutdown(&reason);
        Ok(reason)
    }

    fn arm_timer(&mut self) {
        if let Some((id, delay)) = self.controller.host_mut().take_timer() {
            debug!("Timer {:?} armed for {} ms", id, delay.as_millis());
            self.deadline = Some(Instant::now() + delay);
        }
        if self.controller.timer_id().is_none() {
            self.deadline = None;
        }
    }

    fn handle_line(&mut self, line: &str) -> Result<Option<ShutdownReason>> {
        let device = self.controller.config().device.name.clone();

        let command = match parse_command(line, &device) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("{}", e);
                return Ok(None);
            }
        };

        match command {
            HostCommand::Quit => return Ok(Some(ShutdownReason::Quit)),
            HostCommand::Status => self.print_status()?,
            HostCommand::Requests(requests) => {
                for request in &requests {
                    match self.controller.handle_request(request) {
                        Ok(Dispatch::Claimed) => debug!("{} applied", request.name()),
                        Ok(Dispatch::Ignored) => warn!("{} was not handled", request.name()),
                        Err(e) => error!("{} failed: {}", request.name(), e),
                    }
                }
            }
        }

        Ok(None)
    }

    fn print_status(&self) -> Result<()> {
        let status = serde_json::json!({
            "driver": self.controller.status(),
            "published": self.controller.host().published(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        Ok(())
    }

    fn shutdown(&mut self, reason: &ShutdownReason) {
        self.controller.disconnect();
        self.deadline = None;

        if let Err(e) = self.event_bus.publish(DriverEvent::ShutdownRequested {
            reason: reason.to_string(),
        }) {
            debug!("Shutdown event not delivered: {}", e);
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM
pub async fn shutdown_signal() -> ShutdownReason {
    let (sender, receiver) = oneshot::channel();
    setup_signal_handlers(sender);

    receiver
        .await
        .unwrap_or_else(|_| ShutdownReason::Signal("unknown".to_string()))
}

fn setup_signal_handlers(sender: oneshot::Sender<ShutdownReason>) {
    let sender = Arc::new(Mutex::new(Some(sender)));

    #[cfg(unix)]
    {
        let sender_sigterm = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to register SIGTERM handler: {}", e);
                    return;
                }
            };
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM signal");
                if let Some(sender) = sender_sigterm.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                }
            }
        });
    }

    let sender_sigint = Arc::clone(&sender);
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received SIGINT signal (Ctrl+C)");
            if let Some(sender) = sender_sigint.lock().await.take() {
                let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
            }
        }
    });
}
