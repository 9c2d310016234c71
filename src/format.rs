//! Display formatting for decimal token balances.

/// Format a decimal-string balance for display: trims trailing zeros from the
/// fraction and applies compact suffixes at thousand/million/billion.
///
/// `"1234.5600"` -> `"1.23k"`, `"10.5000"` -> `"10.5"`.
pub fn format_decimal_balance(dec: &str, digits: usize) -> String {
    if dec.is_empty() {
        return "0".to_string();
    }
    let neg = dec.starts_with('-');
    let s = if neg { &dec[1..] } else { dec };
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    let Ok(n_whole) = whole.parse::<f64>() else {
        return dec.to_string();
    };
    if !n_whole.is_finite() {
        return dec.to_string();
    }
    let sign = if neg { "-" } else { "" };
    let abs = n_whole.abs();
    let (suffix, base) = if abs >= 1_000_000_000.0 {
        ("B", abs / 1_000_000_000.0)
    } else if abs >= 1_000_000.0 {
        ("M", abs / 1_000_000.0)
    } else if abs >= 1_000.0 {
        ("k", abs / 1_000.0)
    } else {
        ("", abs)
    };
    if suffix.is_empty() {
        let trimmed: &str = &frac[..frac.len().min(digits)];
        let trimmed = trimmed.trim_end_matches('0');
        if trimmed.is_empty() {
            format!("{}{}", sign, whole)
        } else {
            format!("{}{}.{}", sign, whole, trimmed)
        }
    } else {
        format!("{}{:.2}{}", sign, base, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_suffix_above_thousand() {
        assert_eq!(format_decimal_balance("1234.5600", 4), "1.23k");
        assert_eq!(format_decimal_balance("2500000", 4), "2.50M");
        assert_eq!(format_decimal_balance("7100000000.9", 4), "7.10B");
    }

    #[test]
    fn trailing_zero_trimming_below_thousand() {
        assert_eq!(format_decimal_balance("10.5000", 4), "10.5");
        assert_eq!(format_decimal_balance("10.0000", 4), "10");
        assert_eq!(format_decimal_balance("0.123456", 4), "0.1234");
    }

    #[test]
    fn sign_and_degenerate_inputs() {
        assert_eq!(format_decimal_balance("-1234.56", 4), "-1.23k");
        assert_eq!(format_decimal_balance("-10.500", 4), "-10.5");
        assert_eq!(format_decimal_balance("", 4), "0");
        assert_eq!(format_decimal_balance("abc", 4), "abc");
    }
}
