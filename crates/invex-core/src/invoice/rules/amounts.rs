//! Lenient parsing of model-formatted amounts and quantities.

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

lazy_static! {
    /// First number in a value, allowing grouping separators inside it.
    static ref NUMBER_TOKEN: Regex =
        Regex::new(r"(-)?\s*(\d(?:[\d,.'\u{00a0} ]*\d)?)").unwrap();
}

/// Parse an amount such as `"1,234.56"`, `"1 234,56 zł"`, `"$30"` or `"3 pcs"`.
///
/// Separator handling:
/// - both `,` and `.` present: the last one is the decimal separator
/// - one kind repeated (`1.234.567`): grouping
/// - a single `,` or `.` followed by exactly three digits: grouping
/// - otherwise: decimal separator
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let caps = NUMBER_TOKEN.captures(s)?;
    let negative = caps.get(1).is_some();

    let cleaned: String = caps[2]
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();

    let normalized = normalize_separators(&cleaned)?;
    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

fn normalize_separators(cleaned: &str) -> Option<String> {
    let commas = cleaned.matches(',').count();
    let dots = cleaned.matches('.').count();

    let normalized = match (commas, dots) {
        (0, 0) => cleaned.to_string(),
        (_, 0) => single_kind(cleaned, ',', commas),
        (0, _) => single_kind(cleaned, '.', dots),
        _ => {
            let comma_pos = cleaned.rfind(',')?;
            let dot_pos = cleaned.rfind('.')?;
            if comma_pos > dot_pos {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
    };

    Some(normalized)
}

fn single_kind(cleaned: &str, sep: char, count: usize) -> String {
    if count > 1 {
        return cleaned.replace(sep, "");
    }
    let fraction_len = cleaned.rsplit(sep).next().map(str::len).unwrap_or(0);
    if fraction_len == 3 {
        cleaned.replace(sep, "")
    } else {
        cleaned.replace(sep, ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_plain_and_grouped() {
        assert_eq!(parse_amount("30.00"), Some(dec("30.00")));
        assert_eq!(parse_amount("1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1 234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("12 345 678,90"), Some(dec("12345678.90")));
        assert_eq!(parse_amount("1,200"), Some(dec("1200")));
        assert_eq!(parse_amount("1.234.567"), Some(dec("1234567")));
        assert_eq!(parse_amount("2,5"), Some(dec("2.5")));
    }

    #[test]
    fn test_symbols_and_units() {
        assert_eq!(parse_amount("$30"), Some(dec("30")));
        assert_eq!(parse_amount("USD 1,200.00"), Some(dec("1200.00")));
        assert_eq!(parse_amount("1 234,56 zł"), Some(dec("1234.56")));
        assert_eq!(parse_amount("3 pcs"), Some(dec("3")));
        assert_eq!(parse_amount("-15.50"), Some(dec("-15.50")));
    }

    #[test]
    fn test_non_numeric() {
        assert_eq!(parse_amount("three"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("n/a"), None);
    }
}
