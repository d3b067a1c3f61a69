use crate::controller::properties::{names, PropertyRequest, SwitchState};
use crate::error::{DriverError, Result};
use crate::frame::FrameType;

/// One line of operator input, translated into property change requests
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Requests(Vec<PropertyRequest>),
    Status,
    Quit,
}

fn parse_error(message: String) -> DriverError {
    DriverError::component("command".to_string(), message)
}

fn number(token: Option<&str>, what: &str) -> Result<f64> {
    let token = token.ok_or_else(|| parse_error(format!("missing {}", what)))?;
    token
        .parse::<f64>()
        .map_err(|_| parse_error(format!("invalid {} '{}'", what, token)))
}

fn frame_type_request(device: &str, frame_type: FrameType) -> PropertyRequest {
    let states = [
        (names::FRAME_LIGHT, FrameType::Light),
        (names::FRAME_BIAS, FrameType::Bias),
        (names::FRAME_DARK, FrameType::Dark),
        (names::FRAME_FLAT, FrameType::Flat),
    ]
    .into_iter()
    .map(|(name, ft)| (name.to_string(), SwitchState::from(ft == frame_type)))
    .collect();

    PropertyRequest::switch(device, names::CCD_FRAME_TYPE, states)
}

fn parse_frame_type(token: &str) -> Result<FrameType> {
    FrameType::parse(token).ok_or_else(|| parse_error(format!("unknown frame type '{}'", token)))
}

/// Parse an operator command addressed to `device`. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str, device: &str) -> Result<Option<HostCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = line.split_whitespace();
    let verb = tokens.next().unwrap_or_default().to_ascii_lowercase();

    let requests = match verb.as_str() {
        "status" => return Ok(Some(HostCommand::Status)),
        "quit" | "exit" => return Ok(Some(HostCommand::Quit)),
        "connect" | "disconnect" => {
            let connect = verb == "connect";
            vec![PropertyRequest::switch(
                device,
                names::CONNECTION,
                vec![
                    (names::CONNECT.to_string(), SwitchState::from(connect)),
                    (names::DISCONNECT.to_string(), SwitchState::from(!connect)),
                ],
            )]
        }
        "expose" => {
            let duration = number(tokens.next(), "exposure duration")?;
            let mut requests = Vec::new();
            if let Some(token) = tokens.next() {
                requests.push(frame_type_request(device, parse_frame_type(token)?));
            }
            requests.push(PropertyRequest::number(
                device,
                names::CCD_EXPOSURE,
                vec![(names::CCD_EXPOSURE_VALUE.to_string(), duration)],
            ));
            requests
        }
        "abort" => vec![PropertyRequest::switch(
            device,
            names::CCD_ABORT_EXPOSURE,
            vec![(names::ABORT.to_string(), SwitchState::On)],
        )],
        "bin" => {
            let hor = number(tokens.next(), "binning")?;
            let ver = match tokens.next() {
                Some(token) => number(Some(token), "binning")?,
                None => hor,
            };
            vec![PropertyRequest::number(
                device,
                names::CCD_BINNING,
                vec![
                    (names::HOR_BIN.to_string(), hor),
                    (names::VER_BIN.to_string(), ver),
                ],
            )]
        }
        "temp" => {
            let target = match tokens.next() {
                Some(token) if token.eq_ignore_ascii_case("off") => f64::NAN,
                token => number(token, "temperature")?,
            };
            vec![PropertyRequest::number(
                device,
                names::CCD_TEMPERATURE,
                vec![(names::CCD_TEMPERATURE_VALUE.to_string(), target)],
            )]
        }
        "gain" | "offset" => {
            let value = number(tokens.next(), &verb)?;
            let member = if verb == "gain" { names::GAIN } else { names::OFFSET };
            vec![PropertyRequest::number(
                device,
                names::CCD_SETTINGS,
                vec![(member.to_string(), value)],
            )]
        }
        "speed" => {
            let high = match tokens.next().map(|t| t.to_ascii_lowercase()) {
                Some(t) if t == "low" => false,
                Some(t) if t == "high" => true,
                other => {
                    return Err(parse_error(format!(
                        "readout speed must be low or high, got {:?}",
                        other
                    )))
                }
            };
            vec![PropertyRequest::switch(
                device,
                names::READOUT_SPEED,
                vec![
                    (names::SPEED_LOW.to_string(), SwitchState::from(!high)),
                    (names::SPEED_HIGH.to_string(), SwitchState::from(high)),
                ],
            )]
        }
        "frame" => {
            let token = tokens
                .next()
                .ok_or_else(|| parse_error("missing frame type".to_string()))?;
            vec![frame_type_request(device, parse_frame_type(token)?)]
        }
        other => return Err(parse_error(format!("unknown command '{}'", other))),
    };

    Ok(Some(HostCommand::Requests(requests)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        assert_eq!(parse_command("   ", "QHY9").unwrap(), None);
        assert_eq!(parse_command("# calibrate", "QHY9").unwrap(), None);
    }

    #[test]
    fn test_expose_with_frame_type() {
        let command = parse_command("expose 2.5 dark", "QHY9").unwrap().unwrap();

        let HostCommand::Requests(requests) = command else {
            panic!("Expected requests");
        };
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].name(), names::CCD_FRAME_TYPE);
        assert_eq!(
            requests[1],
            PropertyRequest::number(
                "QHY9",
                names::CCD_EXPOSURE,
                vec![(names::CCD_EXPOSURE_VALUE.to_string(), 2.5)]
            )
        );
    }

    #[test]
    fn test_temp_off_sends_undefined_target() {
        let command = parse_command("temp off", "QHY9").unwrap().unwrap();

        let HostCommand::Requests(requests) = command else {
            panic!("Expected requests");
        };
        match &requests[0] {
            PropertyRequest::Number { values, .. } => assert!(values[0].1.is_nan()),
            other => panic!("Unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_bin_defaults_to_square() {
        let command = parse_command("bin 2", "QHY9").unwrap().unwrap();

        assert_eq!(
            command,
            HostCommand::Requests(vec![PropertyRequest::number(
                "QHY9",
                names::CCD_BINNING,
                vec![
                    (names::HOR_BIN.to_string(), 2.0),
                    (names::VER_BIN.to_string(), 2.0)
                ]
            )])
        );
    }

    #[test]
    fn test_invalid_commands() {
        assert!(parse_command("expose", "QHY9").is_err());
        assert!(parse_command("expose soon", "QHY9").is_err());
        assert!(parse_command("speed medium", "QHY9").is_err());
        assert!(parse_command("frame sky", "QHY9").is_err());
        assert!(parse_command("focus 100", "QHY9").is_err());
    }

    #[test]
    fn test_control_commands() {
        assert_eq!(parse_command("status", "QHY9").unwrap(), Some(HostCommand::Status));
        assert_eq!(parse_command("QUIT", "QHY9").unwrap(), Some(HostCommand::Quit));
    }
}
