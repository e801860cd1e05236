//! Display formatting for reported numbers.
//!
//! Reported figures are cut, not rounded: the value is written as plain
//! decimal text and only the first [`DISPLAY_WIDTH`] characters are kept.
//! Clients compare these strings verbatim, so `33.456` must stay `"33.4"`.

/// Sentinel for a figure that is disabled or could not be computed.
pub const NOT_AVAILABLE: &str = "N/A";

/// Characters kept from the decimal rendering.
pub const DISPLAY_WIDTH: usize = 4;

/// Renders `value` truncated to [`DISPLAY_WIDTH`] characters.
/// Non-finite values (0/0, x/0) become [`NOT_AVAILABLE`].
pub fn truncate_display(value: f64) -> String {
    if !value.is_finite() {
        return NOT_AVAILABLE.to_string();
    }
    // -0.0 would otherwise print as "-0"
    let value = if value == 0.0 { 0.0 } else { value };
    let mut text = value.to_string();
    // Decimal text is ASCII, so a byte cut is a char cut.
    text.truncate(DISPLAY_WIDTH);
    text
}

/// Like [`truncate_display`], with `None` meaning "not measured".
pub fn display_or_na(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), truncate_display)
}
