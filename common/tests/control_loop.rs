mod support;

use jacuzzi_common::{ControlLoop, TubConfig, DISCONNECT_SENTINEL_C, PROBE_DISCONNECTED_MESSAGE};
use support::{FakeRemote, FakeSensors, RecordingRelays, RelayCall};

type TestLoop = ControlLoop<FakeSensors, RecordingRelays, FakeRemote>;

fn control_loop(water_present: bool, temperature_c: f32) -> TestLoop {
    ControlLoop::new(
        TubConfig::default(),
        FakeSensors::new(water_present, temperature_c),
        RecordingRelays::default(),
        FakeRemote::connected(),
    )
}

fn request_full_session(control: &mut TestLoop, target: &str) {
    let remote = control.remote_mut();
    remote.push("active", "true");
    remote.push("bubbles", "true");
    remote.push("heater", "1");
    remote.push("temp_target", target);
}

#[test]
fn construction_de_energizes_relays() {
    let control = control_loop(true, 20.0);

    assert_eq!(control.actuators().calls, vec![RelayCall::AllOff]);
}

#[test]
fn full_session_energizes_both_relays() {
    let mut control = control_loop(true, 20.0);
    request_full_session(&mut control, "30");

    let report = control.tick(10);

    assert!(report.connected);
    assert!(report.permissions.bubbles_energized);
    assert!(report.permissions.heater_energized);
    assert!(control.actuators().bubbles);
    assert!(control.actuators().heater);
}

#[test]
fn water_transition_is_published_once() {
    let mut control = control_loop(true, 20.0);

    for now_ms in [10, 20, 30, 40] {
        control.tick(now_ms);
    }

    assert_eq!(control.remote().values_for("level_sensor"), vec!["1"]);
    assert_eq!(control.remote().values_for("millis"), vec!["10"]);
}

#[test]
fn water_loss_resets_relays_and_publishes() {
    let mut control = control_loop(true, 20.0);
    request_full_session(&mut control, "30");
    control.tick(10);
    assert!(control.actuators().heater);

    control.sensors_mut().water_present = false;
    let all_off_before = control.actuators().all_off_count();
    let report = control.tick(20);

    assert!(report.water_transition);
    assert_eq!(control.actuators().all_off_count(), all_off_before + 1);
    assert!(!control.actuators().bubbles);
    assert!(!control.actuators().heater);
    assert_eq!(control.remote().values_for("level_sensor"), vec!["1", "0"]);

    control.tick(30);
    assert_eq!(control.remote().values_for("level_sensor"), vec!["1", "0"]);
}

#[test]
fn lost_session_fails_safe_until_reconnected() {
    let mut control = control_loop(true, 20.0);
    request_full_session(&mut control, "30");
    control.tick(10);
    assert!(control.actuators().bubbles);

    control.remote_mut().connected = false;
    control.remote_mut().reconnect_succeeds = false;
    let reads_before = control.sensors_mut().reads;
    let report = control.tick(20);

    assert!(!report.connected);
    assert!(report.sensed.is_none());
    assert!(!control.actuators().bubbles);
    assert!(!control.actuators().heater);
    assert_eq!(control.remote().reconnect_calls, 1);
    assert_eq!(control.sensors_mut().reads, reads_before);

    control.tick(30);
    assert!(!control.actuators().bubbles);
    assert_eq!(control.remote().reconnect_calls, 2);

    control.remote_mut().reconnect_succeeds = true;
    let report = control.tick(40);

    assert!(report.connected);
    assert!(control.actuators().bubbles);
    assert!(control.actuators().heater);
}

#[test]
fn probe_disconnect_is_reported_on_entry_and_per_snapshot() {
    let mut control = control_loop(true, DISCONNECT_SENTINEL_C);
    request_full_session(&mut control, "30");

    let report = control.tick(100);
    control.tick(200);

    assert_eq!(control.remote().errors, vec![PROBE_DISCONNECTED_MESSAGE]);
    assert!(!report.permissions.heater_allowed);
    assert!(report.permissions.bubbles_energized);

    control.tick(5_200);
    assert_eq!(control.remote().errors.len(), 2);

    control.sensors_mut().temperature_c = 21.0;
    control.tick(5_300);
    control.sensors_mut().temperature_c = DISCONNECT_SENTINEL_C;
    control.tick(5_400);
    assert_eq!(control.remote().errors.len(), 3);
}

#[test]
fn snapshot_follows_wall_clock_cadence() {
    let mut control = control_loop(true, 20.0);
    request_full_session(&mut control, "30");

    let mut published = 0;
    for now_ms in (0..=12_000).step_by(100) {
        if control.tick(now_ms).telemetry_published {
            published += 1;
        }
    }

    assert_eq!(published, 2);
    assert_eq!(control.counter(), 2);
    assert_eq!(control.remote().values_for("counter"), vec!["1", "2"]);
    assert_eq!(control.remote().values_for("temp"), vec!["20.00", "20.00"]);
    assert_eq!(
        control.remote().values_for("can_active_bubbles"),
        vec!["1", "1"]
    );
    assert_eq!(control.remote().values_for("can_active_heater"), vec!["1", "1"]);
}

#[test]
fn relays_are_written_every_tick() {
    let mut control = control_loop(true, 20.0);

    for now_ms in 1..=5 {
        control.tick(now_ms);
    }

    let bubble_writes = control
        .actuators()
        .calls
        .iter()
        .filter(|call| matches!(call, RelayCall::Bubbles(_)))
        .count();
    assert_eq!(bubble_writes, 5);
}

#[test]
fn malformed_target_keeps_heater_off() {
    let mut control = control_loop(true, 20.0);
    request_full_session(&mut control, "30");
    control.tick(10);
    assert!(control.actuators().heater);

    control.remote_mut().push("temp_target", "very hot");
    control.tick(20);

    assert_eq!(control.desired().target_temperature_c, 0.0);
    assert!(!control.actuators().heater);
    assert!(control.actuators().bubbles);
}

#[test]
fn cleaning_cycle_runs_bubbles_only() {
    let mut control = control_loop(true, 20.0);
    request_full_session(&mut control, "30");
    control.remote_mut().push("active", "false");
    control.remote_mut().push("clean", "true");

    control.tick(10);

    assert!(control.actuators().bubbles);
    assert!(!control.actuators().heater);
}

#[test]
fn publish_failures_do_not_stop_control() {
    let mut control = control_loop(true, 20.0);
    control.remote_mut().fail_publish = true;
    request_full_session(&mut control, "30");

    let report = control.tick(6_000);

    assert!(report.telemetry_published);
    assert!(control.actuators().bubbles);
    assert!(control.actuators().heater);
    assert!(control.remote().published.is_empty());
}

#[test]
fn status_reflects_last_tick() {
    let mut control = control_loop(true, 25.0);
    request_full_session(&mut control, "30");
    control.tick(6_000);

    let status = control.status(6_050);

    assert!(status.connected);
    assert_eq!(status.uptime_ms, 6_050);
    assert_eq!(status.counter, 1);
    assert!(status.sensed.water_present);
    assert_eq!(status.sensed.temperature_c, 25.0);
    assert!(status.permissions.heater_energized);
    assert!(status.desired.active);
}

#[test]
fn config_is_sanitized_once_and_read_only() {
    let control = ControlLoop::new(
        TubConfig {
            telemetry_interval_ms: 10,
            reconnect_delay_ms: 600_000,
            ..TubConfig::default()
        },
        FakeSensors::new(true, 20.0),
        RecordingRelays::default(),
        FakeRemote::connected(),
    );

    assert_eq!(control.config().telemetry_interval_ms, 500);
    assert_eq!(control.config().reconnect_delay_ms, 10_000);
}
