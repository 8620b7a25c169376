//! Raw field access and value parsers shared by the entity transforms

use canon_common::Payload;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use super::TransformError;

/// Canonical field name with the normalized header spellings it accepts
pub type AliasTable = &'static [(&'static str, &'static [&'static str])];

/// `"Alpha-2 code"` -> `"alpha2code"`
pub fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Payload view keyed by canonical field name
#[derive(Debug)]
pub struct RawFields<'a> {
    values: HashMap<&'static str, &'a str>,
}

impl<'a> RawFields<'a> {
    pub fn new(payload: &'a Payload, aliases: AliasTable) -> Self {
        let mut lookup: HashMap<String, &'static str> = HashMap::new();
        for &(canonical, spellings) in aliases {
            lookup.insert(normalize_header(canonical), canonical);
            for spelling in spellings {
                lookup.insert(normalize_header(spelling), canonical);
            }
        }

        let mut values: HashMap<&'static str, &'a str> = HashMap::new();
        for (header, value) in payload {
            if let Some(&canonical) = lookup.get(&normalize_header(header)) {
                // First non-blank column wins when two headers alias the same field
                let keep = values.get(canonical).is_some_and(|v| !v.trim().is_empty());
                if !keep {
                    values.insert(canonical, value.as_str());
                }
            }
        }

        Self { values }
    }

    /// Value exactly as received
    pub fn raw(&self, field: &str) -> Option<&'a str> {
        self.values.get(field).copied()
    }

    /// Trimmed value, `None` when absent or blank
    pub fn get(&self, field: &str) -> Option<&'a str> {
        self.raw(field).map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Uppercase alphabetic code of a fixed width
pub fn code(field: &'static str, value: &str, width: usize) -> Result<String, TransformError> {
    let code = value.trim().to_uppercase();
    if code.len() != width || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(TransformError::InvalidCode {
            field,
            value: value.to_string(),
            width,
        });
    }
    Ok(code)
}

/// Digits zero-padded to `width`: `"4"` -> `"004"`
pub fn numeric(field: &'static str, value: &str, width: usize) -> Result<String, TransformError> {
    let digits = value.trim();
    if digits.is_empty() || digits.len() > width || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(TransformError::InvalidNumeric {
            field,
            value: value.to_string(),
            width,
        });
    }
    Ok(format!("{:0>width$}", digits, width = width))
}

/// Date with the precision it was given at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum DateValue {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Year(i32),
    YearRange { from: i32, to: i32 },
}

impl DateValue {
    /// Accepts `YYYY-MM-DD`, `YYYY-MM`, `YYYY`, `YYYY-YYYY` and `YYYY to YYYY`
    pub fn parse(field: &'static str, value: &str) -> Result<Self, TransformError> {
        let invalid = || TransformError::InvalidDate {
            field,
            value: value.to_string(),
        };
        let v = value.trim();

        let lower = v.to_lowercase();
        if let Some((from, to)) = lower.split_once(" to ") {
            return year_range(from.trim(), to.trim()).ok_or_else(invalid);
        }

        let parts: Vec<&str> = v.split('-').collect();
        match parts.as_slice() {
            [year] => year_of(year).map(DateValue::Year).ok_or_else(invalid),
            [year, month] if month.len() == 2 => {
                let year = year_of(year).ok_or_else(invalid)?;
                let month: u32 = month.parse().map_err(|_| invalid())?;
                if !(1..=12).contains(&month) {
                    return Err(invalid());
                }
                Ok(DateValue::Month { year, month })
            },
            [from, to] if to.len() == 4 => year_range(from, to).ok_or_else(invalid),
            [_, _, _] => NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .map(DateValue::Day)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

fn year_of(s: &str) -> Option<i32> {
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

fn year_range(from: &str, to: &str) -> Option<DateValue> {
    let (from, to) = (year_of(from)?, year_of(to)?);
    (from <= to).then_some(DateValue::YearRange { from, to })
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateValue::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            DateValue::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
            DateValue::Year(year) => write!(f, "{:04}", year),
            DateValue::YearRange { from, to } => write!(f, "{:04}-{:04}", from, to),
        }
    }
}

impl From<DateValue> for String {
    fn from(value: DateValue) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALIASES: AliasTable = &[("alpha2", &["alpha2code", "iso2"]), ("name_en", &["englishshortname"])];

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_headers_resolve_through_aliases() {
        let payload = payload(&[
            ("Alpha-2 code", " af "),
            ("English short name", "Afghanistan"),
            ("Unrelated", "x"),
        ]);
        let fields = RawFields::new(&payload, ALIASES);

        assert_eq!(fields.raw("alpha2"), Some(" af "));
        assert_eq!(fields.get("alpha2"), Some("af"));
        assert_eq!(fields.get("name_en"), Some("Afghanistan"));
        assert_eq!(fields.get("Unrelated"), None);
    }

    #[test]
    fn test_blank_values_are_absent() {
        let payload = payload(&[("alpha2", "   ")]);
        assert_eq!(RawFields::new(&payload, ALIASES).get("alpha2"), None);
    }

    #[test]
    fn test_code_and_numeric() {
        assert_eq!(code("alpha2", "af", 2).unwrap(), "AF");
        assert!(code("alpha2", "AFG", 2).is_err());
        assert!(code("alpha3", "A1G", 3).is_err());

        assert_eq!(numeric("numeric", "4", 3).unwrap(), "004");
        assert_eq!(numeric("numeric", " 040", 3).unwrap(), "040");
        assert!(numeric("numeric", "1234", 3).is_err());
        assert!(numeric("numeric", "4a", 3).is_err());
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(
            DateValue::parse("valid_from", "1974-05-12").unwrap().to_string(),
            "1974-05-12"
        );
        assert_eq!(
            DateValue::parse("valid_from", "1974-05").unwrap(),
            DateValue::Month { year: 1974, month: 5 }
        );
        assert_eq!(DateValue::parse("valid_from", "1974").unwrap(), DateValue::Year(1974));
        assert_eq!(
            DateValue::parse("valid_from", "1974-1993").unwrap(),
            DateValue::YearRange { from: 1974, to: 1993 }
        );
        assert_eq!(
            DateValue::parse("valid_from", "1974 to 1993").unwrap().to_string(),
            "1974-1993"
        );

        for bad in ["1974-13", "1993-1974", "74", "1974-02-30", "soon", "1974 to"] {
            assert!(DateValue::parse("valid_from", bad).is_err(), "{}", bad);
        }
    }
}
