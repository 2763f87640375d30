//! Line protocol spoken by `redshift -v` on stdout
//!
//! The verbose daemon reports its state as `Key: Value` lines:
//!
//! ```text
//! Status: Enabled
//! Period: Night
//! Color temperature: 4500K
//! Location: 42.00 N, 91.50 W
//! ```
//!
//! Anything else on stdout (blank lines, banners) is ignored.

use std::sync::LazyLock;

use regex::Regex;

use redtray_core::prelude::*;
use redtray_core::Location;

static KEY_VALUE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w ]+): (.+)").expect("Invalid key/value line regex"));

/// A state report decoded from one stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum KeyChange {
    /// `Status`: anything other than `Enabled` means inhibited
    Status { inhibited: bool },
    /// `Color temperature`, in Kelvin
    Temperature(u32),
    /// `Period`, verbatim
    Period(String),
    /// `Location`, signed degrees
    Location(Location),
}

/// Split a stdout line into its key and value.
///
/// Returns `None` for lines that are not shaped like `<key>: <value>`.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let caps = KEY_VALUE_LINE.captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2)?.as_str();
    Some((key, value))
}

/// Parse a coordinate such as `42.0 N` or `91.5 W` into signed degrees.
///
/// North and east are positive, every other hemisphere letter is negative.
pub fn parse_coordinate(token: &str) -> Result<f64> {
    let mut parts = token.split(' ');
    let (number, hemisphere) = match (parts.next(), parts.next(), parts.next()) {
        (Some(number), Some(hemisphere), None) if !hemisphere.is_empty() => (number, hemisphere),
        _ => {
            return Err(Error::protocol(format!(
                "malformed coordinate '{}'",
                token
            )))
        }
    };

    let magnitude: f64 = number
        .parse()
        .map_err(|e| Error::protocol(format!("bad coordinate value '{}': {}", number, e)))?;

    let sign = if matches!(hemisphere, "N" | "E") {
        1.0
    } else {
        -1.0
    };
    Ok(magnitude * sign)
}

fn parse_temperature(value: &str) -> Result<u32> {
    let digits = value.trim().trim_end_matches('K');
    digits
        .parse()
        .map_err(|e| Error::protocol(format!("bad color temperature '{}': {}", value, e)))
}

fn parse_location(value: &str) -> Result<Location> {
    let mut tokens = value.split(", ");
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(lat), Some(lon), None) => {
            Ok(Location::new(parse_coordinate(lat)?, parse_coordinate(lon)?))
        }
        _ => Err(Error::protocol(format!("malformed location '{}'", value))),
    }
}

/// Decode a known key into a typed change.
///
/// Unknown keys yield `Ok(None)`; a known key with a malformed value is an error.
pub fn decode_key_change(key: &str, value: &str) -> Result<Option<KeyChange>> {
    let change = match key {
        "Status" => KeyChange::Status {
            inhibited: value != "Enabled",
        },
        "Color temperature" => KeyChange::Temperature(parse_temperature(value)?),
        "Period" => KeyChange::Period(value.to_string()),
        "Location" => KeyChange::Location(parse_location(value)?),
        _ => return Ok(None),
    };
    Ok(Some(change))
}

/// Per-stream accumulator that turns arbitrary byte chunks into complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes received after the last newline
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flush the unterminated tail at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}
