//! Canonical benchmark scores from free-form benchmark strings.
//!
//! Model output describes benchmarks loosely ("Cinebench R23: ~15,200",
//! "3DMark Time Spy: ~8500 (v2)"). The canonical score is the largest digit
//! run in the string: version labels and model suffixes are small compared
//! to genuine scores.

use once_cell::sync::Lazy;
use regex::Regex;

/// A run of ASCII digits, optionally grouped with thousands separators in
/// groups of exactly three ("15,200"). Ungrouped runs ("15200") match the
/// second alternative.
static DIGIT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]{1,3}(?:,[0-9]{3})+|[0-9]+").expect("static regex"));

/// Extract the canonical integer score from a benchmark description.
///
/// Returns `None` for absent or empty input and for input without digits.
/// Never panics; runs that overflow `u64` are ignored.
pub fn extract_score(text: Option<&str>) -> Option<u64> {
    let text = text?;
    if text.trim().is_empty() {
        return None;
    }

    DIGIT_RUN
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<u64>().ok())
        .max()
}
