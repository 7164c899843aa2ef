//! Pulls load-cell weight values out of device log lines.
//!
//! The device interleaves measurements with free-form diagnostics. Only lines
//! carrying [`MEASUREMENT_MARKER`] are considered; everything else is inert.

use serde::Serialize;

/// Exact, case-sensitive prefix the firmware prints before each reading.
pub const MEASUREMENT_MARKER: &str = "Load_cell output val:";

/// A weight value parsed from a device line. Always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    value: f64,
    valid: bool,
}

impl Measurement {
    /// Returns `None` for NaN or infinite values.
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then_some(Self { value, valid: true })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Outcome of looking at one line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineKind {
    Measurement(Measurement),
    /// No marker: diagnostics, banners, blank lines.
    Ignored,
    /// Marker present but no usable number after it.
    Malformed,
}

pub fn classify(line: &str) -> LineKind {
    let line = line.trim();
    if !line.contains(MEASUREMENT_MARKER) {
        return LineKind::Ignored;
    }

    line.match_indices(MEASUREMENT_MARKER)
        .find_map(|(idx, marker)| parse_leading_number(&line[idx + marker.len()..]))
        .and_then(Measurement::new)
        .map_or(LineKind::Malformed, LineKind::Measurement)
}

pub fn extract(line: &str) -> Option<Measurement> {
    match classify(line) {
        LineKind::Measurement(measurement) => Some(measurement),
        LineKind::Ignored | LineKind::Malformed => None,
    }
}

/// Parses `[+-]?digits[.digits]` (at least one digit somewhere) after optional
/// leading whitespace. Anything following the number is ignored.
fn parse_leading_number(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }

    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let int_digits = end - int_start;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
            frac_digits += 1;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    text[..end].parse::<f64>().ok()
}
