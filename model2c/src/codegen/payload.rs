//! Weight payload files: one value per line, `%.8e` formatted, read back by
//! `k2c_read_array`.

use std::fs;
use std::num::ParseFloatError;
use std::path::Path;

use crate::error::{CompileError, Result};

pub fn format_payload(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * 16);
    for v in values {
        out.push_str(&format!("{v:.8e}\n"));
    }
    out
}

/// Parse a payload. Values may be separated by newlines, commas or both.
pub fn parse_payload(text: &str) -> std::result::Result<Vec<f32>, ParseFloatError> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

pub fn write_payload(path: &Path, values: &[f32]) -> Result<()> {
    fs::write(path, format_payload(values)).map_err(|e| CompileError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_tolerance() {
        let values = [0.0, 1.0, -1.5, 3.1415927, 1e-12, -6.02e23, f32::MIN_POSITIVE];
        let text = format_payload(&values);
        assert_eq!(text.lines().count(), values.len());
        let parsed = parse_payload(&text).unwrap();
        for (a, b) in values.iter().zip(&parsed) {
            assert!((a - b).abs() <= 1e-7 * a.abs().max(1.0), "{a} vs {b}");
        }
    }

    #[test]
    fn accepts_comma_separated() {
        assert_eq!(parse_payload("1.0,2.5e0,\n-3").unwrap(), vec![1.0, 2.5, -3.0]);
        assert!(parse_payload("1.0,abc").is_err());
    }

    #[test]
    fn writes_file() {
        let dir = crate::test_util::scratch_dir("payload");
        let path = dir.join("Fdense_1_bias.csv");
        write_payload(&path, &[0.5, -0.5]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(parse_payload(&text).unwrap(), vec![0.5, -0.5]);
    }
}
