use crate::{
    config::TubConfig,
    types::{DerivedPermissions, DesiredState, SensedState, DISCONNECT_SENTINEL_C},
};

/// True for the probe's "no device" reading or anything non-finite.
pub fn is_probe_disconnected(temperature_c: f32) -> bool {
    !temperature_c.is_finite() || temperature_c <= DISCONNECT_SENTINEL_C + 0.1
}

pub fn evaluate(
    desired: &DesiredState,
    sensed: &SensedState,
    config: &TubConfig,
) -> DerivedPermissions {
    let water = sensed.water_present;
    let temp = sensed.temperature_c;

    let bubbles_allowed = (desired.active || desired.cleaning) && desired.bubbles_requested && water;

    // Gated on the bubbles request, not on the pump actually running. Energizing
    // still requires `active`, which makes `bubbles_allowed` true as well.
    let heater_allowed = desired.bubbles_requested
        && water
        && temp < desired.target_temperature_c
        && temp > config.min_temp_c
        && temp <= config.max_temp_c;

    DerivedPermissions {
        bubbles_allowed,
        heater_allowed,
        bubbles_energized: bubbles_allowed,
        heater_energized: desired.active
            && !desired.cleaning
            && desired.heater_requested
            && heater_allowed,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn scenario_a() -> (DesiredState, SensedState) {
        (
            DesiredState {
                active: true,
                cleaning: false,
                bubbles_requested: true,
                heater_requested: true,
                target_temperature_c: 30.0,
            },
            SensedState {
                water_present: true,
                water_present_previous: true,
                temperature_c: 20.0,
            },
        )
    }

    fn run(desired: &DesiredState, sensed: &SensedState) -> DerivedPermissions {
        evaluate(desired, sensed, &TubConfig::default())
    }

    #[test]
    fn everything_requested_with_water_energizes_both() {
        let (desired, sensed) = scenario_a();

        assert_eq!(
            run(&desired, &sensed),
            DerivedPermissions {
                bubbles_allowed: true,
                heater_allowed: true,
                bubbles_energized: true,
                heater_energized: true,
            }
        );
    }

    #[test]
    fn no_water_energizes_nothing() {
        let (desired, mut sensed) = scenario_a();
        sensed.water_present = false;

        let permissions = run(&desired, &sensed);

        assert!(!permissions.bubbles_energized);
        assert!(!permissions.heater_energized);
    }

    #[test]
    fn above_target_keeps_bubbles_only() {
        let (desired, mut sensed) = scenario_a();
        sensed.temperature_c = 35.0;

        let permissions = run(&desired, &sensed);

        assert!(permissions.bubbles_energized);
        assert!(!permissions.heater_energized);
    }

    #[test]
    fn cleaning_runs_bubbles_without_heat() {
        let (mut desired, sensed) = scenario_a();
        desired.cleaning = true;
        desired.active = false;

        let permissions = run(&desired, &sensed);

        assert!(permissions.bubbles_energized);
        assert!(!permissions.heater_energized);
    }

    #[test]
    fn disconnect_sentinel_closes_heater_gate() {
        let (desired, mut sensed) = scenario_a();
        sensed.temperature_c = DISCONNECT_SENTINEL_C;

        let permissions = run(&desired, &sensed);

        assert!(is_probe_disconnected(sensed.temperature_c));
        assert!(!permissions.heater_allowed);
        assert!(!permissions.heater_energized);
        assert!(permissions.bubbles_energized);
    }

    #[test]
    fn bounds_are_exclusive_low_inclusive_high() {
        let (mut desired, mut sensed) = scenario_a();
        desired.target_temperature_c = 60.0;

        sensed.temperature_c = 5.0;
        assert!(!run(&desired, &sensed).heater_allowed);

        sensed.temperature_c = 5.1;
        assert!(run(&desired, &sensed).heater_allowed);

        sensed.temperature_c = 40.0;
        assert!(run(&desired, &sensed).heater_allowed);

        sensed.temperature_c = 40.1;
        assert!(!run(&desired, &sensed).heater_allowed);
    }

    #[test]
    fn heater_allowed_without_session_but_not_energized() {
        let (mut desired, sensed) = scenario_a();
        desired.active = false;

        let permissions = run(&desired, &sensed);

        assert!(permissions.heater_allowed);
        assert!(!permissions.bubbles_allowed);
        assert!(!permissions.heater_energized);
    }

    #[test]
    fn probe_disconnect_detection() {
        assert!(is_probe_disconnected(-127.0));
        assert!(is_probe_disconnected(-126.95));
        assert!(is_probe_disconnected(f32::NAN));
        assert!(!is_probe_disconnected(-55.0));
        assert!(!is_probe_disconnected(25.0));
    }
}
