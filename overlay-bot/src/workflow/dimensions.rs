//! Parsing of `width x height` replies.

use crate::session::Dimensions;
use overlay_common::ImageConfig;
use thiserror::Error;

/// Inclusive bounds for both sides of the output box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionLimits {
    pub min: u32,
    pub max: u32,
}

impl DimensionLimits {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(config.min_dimension, config.max_dimension)
    }

    const fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Default for DimensionLimits {
    fn default() -> Self {
        Self::new(50, 2048)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DimensionError {
    #[error("expected two numbers separated by 'x' or whitespace")]
    Format,
    #[error("dimensions out of range")]
    OutOfRange,
}

/// Parse `"400 x 600"`, `"400X600"` or `"400 600"`.
///
/// Numbers too large for `u32` are out of range, not malformed.
pub fn parse_dimensions(text: &str, limits: &DimensionLimits) -> Result<Dimensions, DimensionError> {
    let normalized = text.to_lowercase().replace('x', " ");
    let parts: Vec<&str> = normalized.split_whitespace().collect();

    let [width, height] = parts.as_slice() else {
        return Err(DimensionError::Format);
    };
    if !is_number(width) || !is_number(height) {
        return Err(DimensionError::Format);
    }

    let width: u32 = width.parse().map_err(|_| DimensionError::OutOfRange)?;
    let height: u32 = height.parse().map_err(|_| DimensionError::OutOfRange)?;
    if !limits.contains(width) || !limits.contains(height) {
        return Err(DimensionError::OutOfRange);
    }

    Ok(Dimensions::new(width, height))
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Dimensions, DimensionError> {
        parse_dimensions(text, &DimensionLimits::default())
    }

    #[test]
    fn accepts_all_separator_forms() {
        for (w, h) in [(50, 50), (400, 600), (2048, 2048), (50, 2048), (1234, 77)] {
            let expected = Ok(Dimensions::new(w, h));
            assert_eq!(parse(&format!("{w} x {h}")), expected);
            assert_eq!(parse(&format!("{w} X {h}")), expected);
            assert_eq!(parse(&format!("{w}x{h}")), expected);
            assert_eq!(parse(&format!("{w}X{h}")), expected);
            assert_eq!(parse(&format!("  {w}   {h} ")), expected);
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(parse("49 x 500"), Err(DimensionError::OutOfRange));
        assert_eq!(parse("500 x 2049"), Err(DimensionError::OutOfRange));
        assert_eq!(parse("0x0"), Err(DimensionError::OutOfRange));
        assert_eq!(parse("99999999999999999999 x 100"), Err(DimensionError::OutOfRange));
    }

    #[test]
    fn rejects_malformed_input() {
        for text in [
            "", "done", "500", "500 x", "x 500", "500 x 500 x 500", "500 by 500", "-500 x 500",
            "500.5 x 500", "+500 x 500", "５００ x ５００",
        ] {
            assert_eq!(parse(text), Err(DimensionError::Format), "input: {text:?}");
        }
    }

    #[test]
    fn doubled_separator_still_yields_two_tokens() {
        assert_eq!(parse("500xx500"), Ok(Dimensions::new(500, 500)));
    }

    #[test]
    fn honours_configured_limits() {
        let limits = DimensionLimits::new(10, 20);
        assert_eq!(parse_dimensions("10x20", &limits), Ok(Dimensions::new(10, 20)));
        assert_eq!(parse_dimensions("9x20", &limits), Err(DimensionError::OutOfRange));
    }
}
