use crate::{
    error::CommandError,
    topics::{PATH_ACTIVE, PATH_BUBBLES, PATH_CLEAN, PATH_HEATER, PATH_TEMP_TARGET},
    types::DesiredState,
};

/// `"true"` or `"1"` is true; anything else is false.
pub fn parse_bool_payload(payload: &str) -> bool {
    matches!(payload.trim(), "true" | "1")
}

pub fn parse_float_payload(payload: &str) -> Option<f32> {
    payload
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
}

impl DesiredState {
    /// Apply one inbound path update.
    ///
    /// A malformed `temp_target` still resets the target to 0.0 so that the
    /// heater gate closes; the error is returned for logging only.
    pub fn apply(&mut self, path: &str, payload: &str) -> Result<(), CommandError> {
        match path {
            PATH_ACTIVE => self.active = parse_bool_payload(payload),
            PATH_CLEAN => self.cleaning = parse_bool_payload(payload),
            PATH_BUBBLES => self.bubbles_requested = parse_bool_payload(payload),
            PATH_HEATER => self.heater_requested = parse_bool_payload(payload),
            PATH_TEMP_TARGET => match parse_float_payload(payload) {
                Some(target) => self.target_temperature_c = target,
                None => {
                    self.target_temperature_c = 0.0;
                    return Err(CommandError::MalformedPayload {
                        path: path.to_string(),
                        payload: payload.to_string(),
                    });
                }
            },
            other => return Err(CommandError::UnknownPath(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn bool_payload_accepts_true_and_one() {
        assert!(parse_bool_payload("true"));
        assert!(parse_bool_payload("1"));
        assert!(parse_bool_payload(" true\n"));
    }

    #[test]
    fn bool_payload_rejects_everything_else() {
        assert!(!parse_bool_payload("false"));
        assert!(!parse_bool_payload("0"));
        assert!(!parse_bool_payload("TRUE"));
        assert!(!parse_bool_payload("yes"));
        assert!(!parse_bool_payload(""));
    }

    #[test]
    fn float_payload_parses_finite_values() {
        assert_eq!(parse_float_payload("37.5"), Some(37.5));
        assert_eq!(parse_float_payload(" 30 "), Some(30.0));
        assert_eq!(parse_float_payload("-2"), Some(-2.0));
        assert_eq!(parse_float_payload("warm"), None);
        assert_eq!(parse_float_payload("NaN"), None);
        assert_eq!(parse_float_payload("inf"), None);
    }

    #[test]
    fn each_path_maps_to_its_field() {
        let mut desired = DesiredState::default();

        desired.apply("active", "true").unwrap();
        desired.apply("clean", "1").unwrap();
        desired.apply("bubbles", "true").unwrap();
        desired.apply("heater", "1").unwrap();
        desired.apply("temp_target", "36.6").unwrap();

        assert_eq!(
            desired,
            DesiredState {
                active: true,
                cleaning: true,
                bubbles_requested: true,
                heater_requested: true,
                target_temperature_c: 36.6,
            }
        );
    }

    #[test]
    fn later_update_wins() {
        let mut desired = DesiredState::default();

        desired.apply("heater", "true").unwrap();
        desired.apply("heater", "false").unwrap();

        assert!(!desired.heater_requested);
    }

    #[test]
    fn unknown_path_leaves_state_untouched() {
        let mut desired = DesiredState {
            active: true,
            ..DesiredState::default()
        };

        let err = desired.apply("lights", "true").unwrap_err();

        assert_eq!(err, CommandError::UnknownPath("lights".to_string()));
        assert!(desired.active);
    }

    #[test]
    fn malformed_target_resets_to_zero() {
        let mut desired = DesiredState {
            target_temperature_c: 38.0,
            ..DesiredState::default()
        };

        let err = desired.apply("temp_target", "hot").unwrap_err();

        assert!(matches!(err, CommandError::MalformedPayload { .. }));
        assert_eq!(desired.target_temperature_c, 0.0);
    }
}
