//! Currency text parsing and the grand-total sanity band.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

static AMOUNT_RE: OnceLock<Regex> = OnceLock::new();

/// Pull the first decimal amount out of free-form currency text.
///
/// Matches `digits(,digits)*(.digits)?`, strips thousands separators, and
/// parses the result. `"$1,234.56"` → `1234.56`, `"Free"` → `None`,
/// `"$19.99 / item"` → `19.99` (first match only).
pub fn extract_amount(text: &str) -> Option<f64> {
    let re = AMOUNT_RE
        .get_or_init(|| Regex::new(r"\d+(?:,\d+)*(?:\.\d+)?").unwrap());
    let m = re.find(text)?;
    m.as_str().replace(',', "").parse::<f64>().ok()
}

/// Verdict of the grand-total arithmetic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalVerdict {
    /// Total sits between the bare subtotal and `subtotal × tolerance`
    /// (room for taxes and shipping).
    Valid,
    /// Total is above the tolerance band.
    SuspiciouslyHigh,
    /// Total is below the bare subtotal.
    Invalid,
}

impl fmt::Display for TotalVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("valid"),
            Self::SuspiciouslyHigh => f.write_str("suspiciously high"),
            Self::Invalid => f.write_str("invalid"),
        }
    }
}

/// Compare a displayed grand total against `unit_price × quantity`.
pub fn classify_total(
    unit_price: f64,
    quantity: u32,
    total: f64,
    tolerance: f64,
) -> TotalVerdict {
    let subtotal = unit_price * f64::from(quantity);
    if total < subtotal {
        TotalVerdict::Invalid
    } else if total <= subtotal * tolerance {
        TotalVerdict::Valid
    } else {
        TotalVerdict::SuspiciouslyHigh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_with_thousands_separator() {
        assert_eq!(extract_amount("$1,234.56"), Some(1234.56));
    }

    #[test]
    fn extract_no_digits() {
        assert_eq!(extract_amount("Free"), None);
        assert_eq!(extract_amount(""), None);
    }

    #[test]
    fn extract_first_match_only() {
        assert_eq!(extract_amount("$19.99 / item"), Some(19.99));
        assert_eq!(extract_amount("2 items at $19.99"), Some(2.0));
    }

    #[test]
    fn extract_whole_number() {
        assert_eq!(extract_amount("$549"), Some(549.0));
        assert_eq!(extract_amount("1,234"), Some(1234.0));
    }

    #[test]
    fn extract_unseparated_digits() {
        assert_eq!(extract_amount("1234.56"), Some(1234.56));
    }

    #[test]
    fn classify_within_band() {
        assert_eq!(classify_total(19.99, 2, 42.50, 1.5), TotalVerdict::Valid);
    }

    #[test]
    fn classify_above_band() {
        assert_eq!(
            classify_total(19.99, 2, 65.00, 1.5),
            TotalVerdict::SuspiciouslyHigh
        );
    }

    #[test]
    fn classify_below_subtotal() {
        assert_eq!(classify_total(19.99, 2, 35.00, 1.5), TotalVerdict::Invalid);
    }

    #[test]
    fn classify_band_edges() {
        // Exact subtotal and exact tolerance bound both count as valid.
        assert_eq!(classify_total(10.0, 2, 20.0, 1.5), TotalVerdict::Valid);
        assert_eq!(classify_total(10.0, 2, 30.0, 1.5), TotalVerdict::Valid);
        assert_eq!(
            classify_total(10.0, 2, 30.01, 1.5),
            TotalVerdict::SuspiciouslyHigh
        );
    }

    #[test]
    fn classify_respects_configured_tolerance() {
        assert_eq!(
            classify_total(10.0, 2, 25.0, 1.2),
            TotalVerdict::SuspiciouslyHigh
        );
        assert_eq!(classify_total(10.0, 2, 25.0, 1.3), TotalVerdict::Valid);
    }
}
