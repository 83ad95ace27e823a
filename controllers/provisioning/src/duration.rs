//! Parsing of timeout strings such as `90m`, `1h30m` or `45s`

use std::time::Duration;

use crate::error::ControllerError;

/// Parse a duration string with [`humantime`]
///
/// A bare `0` is accepted as zero.
pub fn parse_duration(input: &str) -> Result<Duration, ControllerError> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(s).map_err(|e| ControllerError::Input(format!("invalid duration \"{}\": {}", input, e)))
}
