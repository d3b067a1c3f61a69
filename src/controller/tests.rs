use super::properties::{names, BlobElement};
use super::*;
use crate::error::DriverError;
use crate::frame::{CapturedFrame, ShutterState};
use crate::host::CoolingStatus;
use crate::sdk::SimulatedSdk;
use crate::settings::ReadoutSpeed;
use std::time::Duration;

/// Host surface that records every call
#[derive(Debug, Default)]
struct RecordingHost {
    capabilities: Vec<Capabilities>,
    timers: Vec<Duration>,
    temperatures: Vec<TemperatureReading>,
    exposure_left: Vec<f64>,
    geometries: Vec<FrameGeometry>,
    ccd_settings: Vec<(u32, u32, PropertyState)>,
    readout_speeds: Vec<ReadoutSpeed>,
    frames: Vec<CapturedFrame>,
    saved: Vec<DriverSettings>,
    fail_save: bool,
}

impl HostSurface for RecordingHost {
    fn declare_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities.push(capabilities);
    }

    fn set_timer(&mut self, delay: Duration) -> TimerId {
        self.timers.push(delay);
        TimerId(self.timers.len() as u64)
    }

    fn publish_temperature(&mut self, reading: TemperatureReading) {
        self.temperatures.push(reading);
    }

    fn publish_exposure_left(&mut self, seconds: f64) {
        self.exposure_left.push(seconds);
    }

    fn publish_geometry(&mut self, geometry: FrameGeometry) {
        self.geometries.push(geometry);
    }

    fn publish_ccd_settings(&mut self, gain: u32, offset: u32, state: PropertyState) {
        self.ccd_settings.push((gain, offset, state));
    }

    fn publish_readout_speed(&mut self, speed: ReadoutSpeed, _state: PropertyState) {
        self.readout_speeds.push(speed);
    }

    fn exposure_complete(&mut self, frame: CapturedFrame) {
        self.frames.push(frame);
    }

    fn save_config(&mut self, settings: &DriverSettings) -> crate::error::Result<()> {
        if self.fail_save {
            return Err(DriverError::system("settings storage unavailable"));
        }
        self.saved.push(*settings);
        Ok(())
    }
}

type TestController = Qhy9Controller<SimulatedSdk, RecordingHost>;

fn controller_with(config: DriverConfig, sdk: &SimulatedSdk) -> TestController {
    let settings = DriverSettings::from_sensor(&config.sensor);
    Qhy9Controller::new(config, sdk.clone(), RecordingHost::default(), settings)
}

fn controller() -> (TestController, SimulatedSdk) {
    let sdk = SimulatedSdk::new();
    (controller_with(DriverConfig::default(), &sdk), sdk)
}

/// Small sensor so readouts stay cheap
fn small_controller() -> (TestController, SimulatedSdk) {
    let mut config = DriverConfig::default();
    config.sensor.width = 64;
    config.sensor.height = 48;

    let sdk = SimulatedSdk::new();
    sdk.update(|s| s.mem_length = 64 * 48 * 2);
    (controller_with(config, &sdk), sdk)
}

fn connected() -> (TestController, SimulatedSdk) {
    let (mut controller, sdk) = controller();
    controller.connect().unwrap();
    (controller, sdk)
}

fn small_connected() -> (TestController, SimulatedSdk) {
    let (mut controller, sdk) = small_controller();
    controller.connect().unwrap();
    (controller, sdk)
}

#[test]
fn test_new_declares_capabilities() {
    let (controller, _sdk) = controller();

    assert_eq!(controller.host().capabilities, vec![Capabilities::QHY9]);
    assert!(!controller.is_connected());
}

#[test]
fn test_connect_configures_camera() {
    let (controller, sdk) = connected();
    let state = sdk.state();
    let host = controller.host();

    assert!(controller.is_connected());
    assert!(state.resource_claimed);
    assert_eq!(state.open_sessions, 1);
    assert_eq!(state.bin, (1, 1));
    assert_eq!(state.resolution, (3584, 2574));
    assert_eq!(state.params.get(&Control::Gain), Some(&14.0));
    assert_eq!(state.params.get(&Control::Offset), Some(&107.0));
    assert_eq!(state.params.get(&Control::Speed), Some(&0.0));

    assert_eq!(controller.buffer_len(), 3584 * 2574 * 2);
    assert_eq!(host.timers, vec![Duration::from_millis(500)]);
    assert_eq!(host.geometries.last().map(|g| (g.width, g.height)), Some((3584, 2574)));
    assert_eq!(host.temperatures.len(), 1);
    assert_eq!(host.temperatures[0].state, PropertyState::Busy);
}

#[test]
fn test_connect_twice_is_a_no_op() {
    let (mut controller, sdk) = connected();

    controller.connect().unwrap();

    assert_eq!(sdk.state().open_sessions, 1);
    assert_eq!(controller.host().timers.len(), 1);
}

#[test]
fn test_connect_without_matching_device() {
    let sdk = SimulatedSdk::with_devices(["QHY8L-1234", "QHY5-9999"]);
    let mut controller = controller_with(DriverConfig::default(), &sdk);

    let err = controller.connect().unwrap_err();

    assert_eq!(
        err,
        CameraError::DeviceNotFound {
            prefix: "QHY9".to_string()
        }
    );
    assert!(!controller.is_connected());
    assert!(!sdk.state().resource_claimed);
}

#[test]
fn test_connect_scan_failure_is_device_not_found() {
    let (mut controller, sdk) = controller();
    sdk.update(|s| s.failures.scan = true);

    assert!(matches!(
        controller.connect(),
        Err(CameraError::DeviceNotFound { .. })
    ));
}

#[test]
fn test_connect_resource_failure() {
    let (mut controller, sdk) = controller();
    sdk.update(|s| s.failures.init_resource = true);

    assert!(matches!(
        controller.connect(),
        Err(CameraError::InitializationFailed { .. })
    ));
    assert!(!controller.is_connected());
}

#[test]
fn test_connect_skips_candidate_that_fails_init() {
    let sdk = SimulatedSdk::with_devices(["QHY9-broken", "QHY8L-1", "QHY9-good"]);
    sdk.update(|s| {
        s.failures.init.insert("QHY9-broken".to_string());
    });
    let mut controller = controller_with(DriverConfig::default(), &sdk);

    controller.connect().unwrap();

    assert!(controller.is_connected());
    assert_eq!(sdk.state().open_sessions, 1);
}

#[test]
fn test_connect_continues_when_close_after_failed_init_fails() {
    let sdk = SimulatedSdk::with_devices(["QHY9-broken", "QHY9-good"]);
    sdk.update(|s| {
        s.failures.init.insert("QHY9-broken".to_string());
        s.failures.close = true;
    });
    let mut controller = controller_with(DriverConfig::default(), &sdk);

    controller.connect().unwrap();

    assert!(controller.is_connected());
    assert_eq!(sdk.state().open_sessions, 1);
}

#[test]
fn test_connect_skips_unreadable_ids() {
    let sdk = SimulatedSdk::with_devices(["QHY9-first", "QHY9-second"]);
    sdk.update(|s| {
        s.failures.device_id.insert(0);
    });
    let mut controller = controller_with(DriverConfig::default(), &sdk);

    controller.connect().unwrap();

    assert!(controller.is_connected());
}

#[test]
fn test_connect_fails_when_every_candidate_fails() {
    let sdk = SimulatedSdk::with_devices(["QHY9-a"]);
    sdk.update(|s| {
        s.failures.open.insert("QHY9-a".to_string());
    });
    let mut controller = controller_with(DriverConfig::default(), &sdk);

    assert!(matches!(
        controller.connect(),
        Err(CameraError::InitializationFailed { .. })
    ));
    assert!(!sdk.state().resource_claimed);
}

#[test]
fn test_connect_tolerates_gain_and_buffer_query_failures() {
    let (mut controller, sdk) = controller();
    sdk.update(|s| {
        s.failures.param_range.insert(Control::Gain);
        s.failures.set_param.insert(Control::Offset);
        s.failures.mem_length = true;
    });

    controller.connect().unwrap();

    assert!(controller.is_connected());
    assert_eq!(sdk.state().params.get(&Control::Gain), None);
    assert_eq!(controller.buffer_len(), 3584 * 2574 * 2);
}

#[test]
fn test_connect_applies_saved_settings() {
    let sdk = SimulatedSdk::new();
    let settings = DriverSettings {
        gain: 40,
        offset: 90,
        readout_speed: ReadoutSpeed::High,
    };
    let mut controller = Qhy9Controller::new(
        DriverConfig::default(),
        sdk.clone(),
        RecordingHost::default(),
        settings,
    );

    controller.connect().unwrap();

    let params = sdk.state().params;
    assert_eq!(params.get(&Control::Gain), Some(&40.0));
    assert_eq!(params.get(&Control::Offset), Some(&90.0));
    assert_eq!(params.get(&Control::Speed), Some(&1.0));
}

#[test]
fn test_connect_ignores_out_of_range_saved_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, "gain = 500\noffset = 0\n").unwrap();
    let config = DriverConfig::default();
    let settings =
        crate::SettingsStore::new(&path).load_or(DriverSettings::from_sensor(&config.sensor));

    let sdk = SimulatedSdk::new();
    let mut controller =
        Qhy9Controller::new(config, sdk.clone(), RecordingHost::default(), settings);
    controller.connect().unwrap();

    let params = sdk.state().params;
    assert_eq!(params.get(&Control::Gain), Some(&14.0));
    assert_eq!(params.get(&Control::Offset), Some(&107.0));
}

#[test]
fn test_disconnect_twice() {
    let (mut controller, sdk) = connected();

    controller.disconnect();
    controller.disconnect();

    assert!(!controller.is_connected());
    let state = sdk.state();
    assert_eq!(state.open_sessions, 0);
    assert!(!state.resource_claimed);
}

#[test]
fn test_disconnect_swallows_close_failure() {
    let (mut controller, sdk) = connected();
    sdk.update(|s| {
        s.failures.close = true;
        s.failures.release_resource = true;
    });

    controller.disconnect();

    assert!(!controller.is_connected());
}

#[test]
fn test_disconnect_without_connect() {
    let (mut controller, sdk) = controller();

    controller.disconnect();

    assert!(!controller.is_connected());
    assert_eq!(sdk.state().open_sessions, 0);
}

#[test]
fn test_binning_geometry() {
    let (mut controller, sdk) = connected();

    for factor in 1..=4 {
        controller.update_ccd_bin(factor, factor).unwrap();

        let geometry = controller.geometry();
        assert_eq!(geometry.width, 3584 / factor as u32);
        assert_eq!(geometry.height, 2574 / factor as u32);
        assert!((geometry.pixel_size_x - 5.4 * factor as f64).abs() < 1e-9);
        assert!((geometry.pixel_size_y - 5.4 * factor as f64).abs() < 1e-9);
        assert_eq!(sdk.state().bin, (factor as u32, factor as u32));
    }
}

#[test]
fn test_invalid_binning_leaves_geometry_unchanged() {
    let (mut controller, sdk) = connected();
    controller.update_ccd_bin(2, 2).unwrap();
    let before = controller.geometry();

    for (hor, ver) in [(1, 2), (3, 1), (5, 5), (0, 0), (-1, -1)] {
        assert!(matches!(
            controller.update_ccd_bin(hor, ver),
            Err(CameraError::InvalidParameter { .. })
        ));
        assert_eq!(controller.geometry(), before);
    }

    sdk.update(|s| s.failures.bin_mode = true);
    assert!(matches!(
        controller.update_ccd_bin(3, 3),
        Err(CameraError::ParameterRejected { .. })
    ));
    assert_eq!(controller.geometry(), before);
}

#[test]
fn test_binning_requires_session() {
    let (mut controller, _sdk) = controller();

    assert_eq!(controller.update_ccd_bin(2, 2), Err(CameraError::NotConnected));
}

#[test]
fn test_binning_grows_buffer_to_vendor_size() {
    let (mut controller, sdk) = connected();
    let initial = controller.buffer_len();

    sdk.update(|s| s.mem_length = initial + 4096);
    controller.update_ccd_bin(2, 2).unwrap();
    assert_eq!(controller.buffer_len(), initial + 4096);

    sdk.update(|s| s.mem_length = 16);
    controller.update_ccd_bin(4, 4).unwrap();
    assert_eq!(controller.buffer_len(), initial + 4096);
}

#[test]
fn test_temperature_below_minimum_is_rejected() {
    let (mut controller, _sdk) = connected();
    controller.set_temperature(-10.0).unwrap();

    let err = controller.set_temperature(-40.5).unwrap_err();

    assert!(matches!(err, CameraError::OutOfRange { .. }));
    assert_eq!(controller.target_temperature(), Some(-10.0));
}

#[test]
fn test_next_tick_commands_requested_temperature() {
    let (mut controller, sdk) = connected();

    controller.set_temperature(-40.0).unwrap();
    assert!(sdk.state().temperature_commands.is_empty());

    controller.tick();
    assert_eq!(sdk.state().temperature_commands, vec![-40.0]);

    controller.set_temperature(-15.0).unwrap();
    controller.tick();
    assert_eq!(sdk.state().temperature_commands, vec![-40.0, -15.0]);
}

#[test]
fn test_nan_clears_temperature_target() {
    let (mut controller, sdk) = connected();
    controller.set_temperature(-5.0).unwrap();

    controller.set_temperature(f64::NAN).unwrap();
    controller.tick();

    assert_eq!(controller.target_temperature(), None);
    assert!(sdk.state().temperature_commands.is_empty());
    assert_eq!(
        controller.host().temperatures.last().map(|r| r.state),
        Some(PropertyState::Idle)
    );
}

#[test]
fn test_tick_publishes_cooling_state() {
    let (mut controller, sdk) = connected();
    sdk.update(|s| s.cooling_step = 0.0);

    controller.set_temperature(18.0).unwrap();
    controller.tick();
    let reading = *controller.host().temperatures.last().unwrap();
    assert_eq!(reading.celsius, 20.0);
    assert_eq!(reading.target, Some(18.0));
    assert_eq!(reading.state, CoolingStatus::Converging.property_state());
    assert!(reading.cooler_duty.is_some());

    controller.set_temperature(10.0).unwrap();
    controller.tick();
    assert_eq!(
        controller.host().temperatures.last().unwrap().state,
        PropertyState::Alert
    );

    controller.set_temperature(19.5).unwrap();
    controller.tick();
    assert_eq!(
        controller.host().temperatures.last().unwrap().state,
        PropertyState::Ok
    );
}

#[test]
fn test_tick_survives_temperature_failures() {
    let (mut controller, sdk) = connected();
    sdk.update(|s| {
        s.failures.temperature_control = true;
        s.failures.get_param.insert(Control::CurrentTemperature);
    });
    controller.set_temperature(-10.0).unwrap();
    let published = controller.host().temperatures.len();

    controller.tick();

    assert_eq!(controller.host().temperatures.len(), published);
    assert_eq!(controller.host().timers.last(), Some(&Duration::from_millis(1000)));
}

#[test]
fn test_tick_without_session_does_not_rearm() {
    let (mut controller, _sdk) = controller();

    controller.tick();

    assert!(controller.host().timers.is_empty());
    assert_eq!(controller.timer_id(), None);
}

#[test]
fn test_tick_rearms_at_cadence() {
    let (mut controller, _sdk) = connected();

    controller.tick();
    controller.tick();

    assert_eq!(
        controller.host().timers,
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1000),
            Duration::from_millis(1000)
        ]
    );
}

#[test]
fn test_exposure_requires_session() {
    let (mut controller, _sdk) = controller();

    assert_eq!(controller.start_exposure(1.0), Err(CameraError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_exposure_sets_shutter_and_duration() {
    let (mut controller, sdk) = small_connected();

    controller.set_frame_type(FrameType::Dark);
    controller.start_exposure(2.5).unwrap();

    let state = sdk.state();
    assert_eq!(state.shutter, Some(ShutterState::Closed));
    assert_eq!(state.params.get(&Control::Exposure), Some(&2_500_000.0));
    assert_eq!(state.exposure_starts, 1);
    assert!(controller.is_exposing());

    assert_eq!(controller.start_exposure(1.0), Err(CameraError::ExposureInProgress));
}

#[tokio::test(start_paused = true)]
async fn test_light_exposure_opens_shutter() {
    let (mut controller, sdk) = small_connected();

    controller.start_exposure(0.001).unwrap();

    assert_eq!(sdk.state().shutter, Some(ShutterState::Open));
    assert_eq!(sdk.state().params.get(&Control::Exposure), Some(&1000.0));
}

#[tokio::test(start_paused = true)]
async fn test_exposure_start_failure() {
    let (mut controller, sdk) = small_connected();
    sdk.update(|s| s.failures.exposure_start = true);

    assert!(matches!(
        controller.start_exposure(1.0),
        Err(CameraError::ExposureStartFailed { .. })
    ));
    assert!(!controller.is_exposing());
    assert_eq!(sdk.state().shutter, Some(ShutterState::Free));

    sdk.update(|s| {
        s.failures.exposure_start = false;
        s.failures.set_param.insert(Control::Exposure);
    });
    assert!(matches!(
        controller.start_exposure(1.0),
        Err(CameraError::ParameterRejected { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_exposure_duration() {
    let (mut controller, _sdk) = small_connected();

    for duration in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            controller.start_exposure(duration),
            Err(CameraError::InvalidParameter { .. })
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_readout_before_margin() {
    let (mut controller, sdk) = small_connected();
    controller.start_exposure(5.0).unwrap();

    tokio::time::advance(Duration::from_millis(3999)).await;
    controller.tick();
    assert_eq!(sdk.state().readouts, 0);
    assert!(controller.is_exposing());

    tokio::time::advance(Duration::from_millis(1)).await;
    controller.tick();
    assert_eq!(sdk.state().readouts, 1);
    assert!(!controller.is_exposing());

    controller.tick();
    assert_eq!(sdk.state().readouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_eleven_ticks_read_out_once() {
    let (mut controller, sdk) = small_connected();
    controller.start_exposure(2.0).unwrap();

    let mut readout_tick = None;
    for tick in 0..11 {
        tokio::time::advance(Duration::from_millis(1000)).await;
        controller.tick();
        if readout_tick.is_none() && sdk.state().readouts == 1 {
            readout_tick = Some(tick);
        }
    }

    assert!(readout_tick.is_some_and(|tick| tick <= 9));
    assert_eq!(sdk.state().readouts, 1);
    assert!(!controller.is_exposing());
    assert_eq!(controller.host().frames.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_completed_frame_and_shutter_release() {
    let (mut controller, sdk) = small_connected();
    controller.set_frame_type(FrameType::Flat);
    controller.start_exposure(1.0).unwrap();

    controller.tick();

    let frame = &controller.host().frames[0];
    assert_eq!(frame.frame_type, FrameType::Flat);
    assert_eq!((frame.info.width, frame.info.height), (64, 48));
    assert_eq!(frame.data.len(), 64 * 48 * 2);
    assert_eq!(frame.duration_secs, 1.0);
    assert_eq!(sdk.state().shutter, Some(ShutterState::Free));
    assert_eq!(controller.host().exposure_left.last(), Some(&1.0));
}

#[tokio::test(start_paused = true)]
async fn test_failed_readout_still_clears_exposure() {
    let (mut controller, sdk) = small_connected();
    sdk.update(|s| s.failures.readout = true);
    controller.start_exposure(1.0).unwrap();

    controller.tick();

    assert_eq!(sdk.state().readouts, 1);
    assert!(!controller.is_exposing());
    assert!(controller.host().frames.is_empty());
    assert_eq!(sdk.state().shutter, Some(ShutterState::Free));
}

#[tokio::test(start_paused = true)]
async fn test_abort_clears_exposure() {
    let (mut controller, sdk) = small_connected();
    controller.start_exposure(30.0).unwrap();

    controller.abort_exposure().unwrap();

    assert!(!controller.is_exposing());
    assert_eq!(sdk.state().exposure_stops, 1);
    assert_eq!(sdk.state().shutter, Some(ShutterState::Free));

    tokio::time::advance(Duration::from_secs(30)).await;
    controller.tick();
    assert_eq!(sdk.state().readouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_failure_keeps_exposure() {
    let (mut controller, sdk) = small_connected();
    controller.start_exposure(30.0).unwrap();
    sdk.update(|s| s.failures.exposure_stop = true);

    assert!(matches!(
        controller.abort_exposure(),
        Err(CameraError::AbortFailed { .. })
    ));
    assert!(controller.is_exposing());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_drops_exposure() {
    let (mut controller, _sdk) = small_connected();
    controller.start_exposure(10.0).unwrap();

    controller.disconnect();

    assert!(!controller.is_exposing());
}

fn switch(name: &str, on: &str) -> PropertyRequest {
    PropertyRequest::switch("QHY9", name, vec![(on.to_string(), SwitchState::On)])
}

fn number(name: &str, values: &[(&str, f64)]) -> PropertyRequest {
    PropertyRequest::number(
        "QHY9",
        name,
        values.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
    )
}

#[test]
fn test_requests_for_other_devices_are_ignored() {
    let (mut controller, _sdk) = controller();
    let request = PropertyRequest::switch(
        "Telescope Simulator",
        names::CONNECTION,
        vec![(names::CONNECT.to_string(), SwitchState::On)],
    );

    assert_eq!(controller.handle_request(&request), Ok(Dispatch::Ignored));
    assert!(!controller.is_connected());
}

#[test]
fn test_text_and_blob_requests_are_never_claimed() {
    let (mut controller, _sdk) = connected();
    let text = PropertyRequest::Text {
        device: "QHY9".to_string(),
        name: "UPLOAD_SETTINGS".to_string(),
        texts: vec![("UPLOAD_DIR".to_string(), "/tmp".to_string())],
    };
    let blob = PropertyRequest::Blob {
        device: "QHY9".to_string(),
        name: "CCD1".to_string(),
        blobs: vec![BlobElement {
            name: "CCD1".to_string(),
            format: ".fits".to_string(),
            data: vec![0; 4],
        }],
    };

    assert_eq!(controller.handle_request(&text), Ok(Dispatch::Ignored));
    assert_eq!(controller.handle_request(&blob), Ok(Dispatch::Ignored));
}

#[test]
fn test_unknown_properties_are_ignored() {
    let (mut controller, _sdk) = connected();

    assert_eq!(
        controller.handle_request(&number("CCD_FRAME", &[("X", 0.0)])),
        Ok(Dispatch::Ignored)
    );
}

#[test]
fn test_connection_switch() {
    let (mut controller, _sdk) = controller();

    assert_eq!(
        controller.handle_request(&switch(names::CONNECTION, names::CONNECT)),
        Ok(Dispatch::Claimed)
    );
    assert!(controller.is_connected());

    controller
        .handle_request(&switch(names::CONNECTION, names::DISCONNECT))
        .unwrap();
    assert!(!controller.is_connected());
}

#[test]
fn test_ccd_settings_request() {
    let (mut controller, sdk) = connected();

    let request = number(names::CCD_SETTINGS, &[(names::GAIN, 50.0), (names::OFFSET, 120.0)]);
    assert_eq!(controller.handle_request(&request), Ok(Dispatch::Claimed));

    let params = sdk.state().params;
    assert_eq!(params.get(&Control::Gain), Some(&50.0));
    assert_eq!(params.get(&Control::Offset), Some(&120.0));
    assert_eq!(controller.settings().gain, 50);
    assert_eq!(
        controller.host().ccd_settings.last(),
        Some(&(50, 120, PropertyState::Ok))
    );
}

#[test]
fn test_ccd_settings_out_of_range() {
    let (mut controller, sdk) = connected();

    for request in [
        number(names::CCD_SETTINGS, &[(names::GAIN, 0.0)]),
        number(names::CCD_SETTINGS, &[(names::GAIN, 101.0)]),
        number(names::CCD_SETTINGS, &[(names::OFFSET, 256.0)]),
    ] {
        assert!(matches!(
            controller.handle_request(&request),
            Err(CameraError::OutOfRange { .. })
        ));
    }
    assert_eq!(controller.settings().gain, 14);
    assert_eq!(sdk.state().params.get(&Control::Gain), Some(&14.0));
}

#[test]
fn test_ccd_settings_rejected_by_camera() {
    let (mut controller, sdk) = connected();
    sdk.update(|s| {
        s.failures.set_param.insert(Control::Offset);
    });

    let result = controller.handle_request(&number(names::CCD_SETTINGS, &[(names::OFFSET, 90.0)]));

    assert!(matches!(result, Err(CameraError::ParameterRejected { .. })));
    assert_eq!(controller.settings().offset, 107);
    assert_eq!(
        controller.host().ccd_settings.last().map(|s| s.2),
        Some(PropertyState::Alert)
    );
}

#[test]
fn test_ccd_settings_keep_gain_when_offset_is_rejected() {
    let (mut controller, sdk) = connected();
    sdk.update(|s| {
        s.failures.set_param.insert(Control::Offset);
    });

    let request = number(names::CCD_SETTINGS, &[(names::GAIN, 60.0), (names::OFFSET, 90.0)]);
    let result = controller.handle_request(&request);

    assert!(matches!(result, Err(CameraError::ParameterRejected { .. })));
    assert_eq!(controller.settings().gain, 14);
    assert_eq!(sdk.state().params.get(&Control::Gain), Some(&14.0));
    assert_eq!(
        controller.host().ccd_settings.last(),
        Some(&(14, 107, PropertyState::Alert))
    );
}

#[test]
fn test_readout_speed_saves_settings() {
    let (mut controller, sdk) = connected();

    controller
        .handle_request(&switch(names::READOUT_SPEED, names::SPEED_HIGH))
        .unwrap();

    assert_eq!(sdk.state().params.get(&Control::Speed), Some(&1.0));
    assert_eq!(controller.host().readout_speeds.last(), Some(&ReadoutSpeed::High));
    assert_eq!(
        controller.host().saved.last().map(|s| s.readout_speed),
        Some(ReadoutSpeed::High)
    );
}

#[test]
fn test_readout_speed_save_failure_is_not_fatal() {
    let (mut controller, _sdk) = connected();
    controller.host_mut().fail_save = true;

    assert_eq!(
        controller.handle_request(&switch(names::READOUT_SPEED, names::SPEED_LOW)),
        Ok(Dispatch::Claimed)
    );
    assert_eq!(controller.settings().readout_speed, ReadoutSpeed::Low);
}

#[test]
fn test_binning_request_with_fractional_factor() {
    let (mut controller, _sdk) = connected();

    assert!(matches!(
        controller.handle_request(&number(
            names::CCD_BINNING,
            &[(names::HOR_BIN, 1.5), (names::VER_BIN, 1.5)]
        )),
        Err(CameraError::InvalidParameter { .. })
    ));

    controller
        .handle_request(&number(
            names::CCD_BINNING,
            &[(names::HOR_BIN, 2.0), (names::VER_BIN, 2.0)],
        ))
        .unwrap();
    assert_eq!(controller.geometry().bin, 2);
}

#[test]
fn test_frame_type_and_temperature_requests() {
    let (mut controller, _sdk) = connected();

    controller
        .handle_request(&switch(names::CCD_FRAME_TYPE, names::FRAME_BIAS))
        .unwrap();
    controller
        .handle_request(&number(
            names::CCD_TEMPERATURE,
            &[(names::CCD_TEMPERATURE_VALUE, -25.0)],
        ))
        .unwrap();

    assert_eq!(controller.frame_type(), FrameType::Bias);
    assert_eq!(controller.target_temperature(), Some(-25.0));
}

#[tokio::test(start_paused = true)]
async fn test_exposure_and_abort_requests() {
    let (mut controller, sdk) = small_connected();

    controller
        .handle_request(&number(names::CCD_EXPOSURE, &[(names::CCD_EXPOSURE_VALUE, 3.0)]))
        .unwrap();
    assert!(controller.is_exposing());

    controller
        .handle_request(&switch(names::CCD_ABORT_EXPOSURE, names::ABORT))
        .unwrap();
    assert!(!controller.is_exposing());
    assert_eq!(sdk.state().exposure_stops, 1);
}

#[test]
fn test_status_snapshot_serializes() {
    let (controller, _sdk) = connected();

    let status = serde_json::to_value(controller.status()).unwrap();

    assert_eq!(status["connected"], true);
    assert_eq!(status["exposing"], false);
    assert_eq!(status["geometry"]["width"], 3584);
}
