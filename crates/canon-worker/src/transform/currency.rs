//! Currency codes (ISO 4217)
//!
//! | Status | Required | Optional |
//! |---|---|---|
//! | active | code, name, numeric | minor_units, countries |
//! | fund | code, name | numeric, minor_units |
//! | withdrawn | - | never persisted |

use canon_common::Payload;
use serde::Serialize;

use super::fields::{code, numeric, AliasTable, RawFields};
use super::status::{Disposition, StatusProfile, StatusTable};
use super::{Outcome, TransformError};

const ALIASES: AliasTable = &[
    ("code", &["alphabeticcode", "currencycode", "ccy"]),
    ("name", &["currency", "currencyname", "ccynm"]),
    ("numeric", &["numericcode", "ccynbr"]),
    ("minor_units", &["minorunit", "ccymnrunts"]),
    ("countries", &["entity", "ctrynm"]),
    ("status", &[]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyField {
    Code,
    Name,
    Numeric,
    MinorUnits,
    Countries,
}

impl CurrencyField {
    pub fn key(&self) -> &'static str {
        match self {
            CurrencyField::Code => "code",
            CurrencyField::Name => "name",
            CurrencyField::Numeric => "numeric",
            CurrencyField::MinorUnits => "minor_units",
            CurrencyField::Countries => "countries",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyStatus {
    Active,
    Fund,
    Withdrawn,
}

impl StatusTable for CurrencyStatus {
    type Field = CurrencyField;

    const ALL: &'static [Self] = &[
        CurrencyStatus::Active,
        CurrencyStatus::Fund,
        CurrencyStatus::Withdrawn,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            CurrencyStatus::Active => "active",
            CurrencyStatus::Fund => "fund",
            CurrencyStatus::Withdrawn => "withdrawn",
        }
    }

    fn profile(&self) -> StatusProfile<CurrencyField> {
        use CurrencyField::*;

        match self {
            CurrencyStatus::Active => StatusProfile {
                required: &[Code, Name, Numeric],
                optional: &[MinorUnits, Countries],
                disposition: Disposition::Persist,
            },
            CurrencyStatus::Fund => StatusProfile {
                required: &[Code, Name],
                optional: &[Numeric, MinorUnits],
                disposition: Disposition::Persist,
            },
            CurrencyStatus::Withdrawn => StatusProfile {
                required: &[],
                optional: &[],
                disposition: Disposition::Skip("withdrawn currencies are never persisted"),
            },
        }
    }
}

/// Canonical currency record keyed by `code`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Currency {
    pub code: String,
    pub name: String,
    pub numeric: Option<String>,
    /// `None` when the currency has no minor unit (`N.A.`)
    pub minor_units: Option<u8>,
    pub countries: Option<String>,
    pub status: CurrencyStatus,
}

pub fn transform(payload: &Payload) -> Outcome<Currency> {
    let fields = RawFields::new(payload, ALIASES);

    let raw = match fields.raw("status") {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Outcome::Rejected(TransformError::MissingStatus),
    };
    let status = match CurrencyStatus::resolve(raw) {
        Some(status) => status,
        None => {
            return Outcome::Rejected(TransformError::InvalidStatus {
                value: raw.to_string(),
            })
        },
    };

    if let Disposition::Skip(reason) = status.profile().disposition {
        return Outcome::Skipped {
            key: fields.get("code").map(str::to_uppercase).unwrap_or_default(),
            reason: reason.to_string(),
        };
    }

    build(status, &fields).into()
}

fn build(status: CurrencyStatus, fields: &RawFields<'_>) -> Result<Currency, TransformError> {
    let profile = status.profile();
    let missing = |field: CurrencyField| TransformError::MissingField {
        field: field.key(),
        status: status.as_str(),
    };

    for field in profile.required {
        if fields.get(field.key()).is_none() {
            return Err(missing(*field));
        }
    }

    let take = |field: CurrencyField| {
        if profile.allows(&field) {
            fields.get(field.key())
        } else {
            None
        }
    };

    let code_value = take(CurrencyField::Code).ok_or_else(|| missing(CurrencyField::Code))?;
    let name = take(CurrencyField::Name).ok_or_else(|| missing(CurrencyField::Name))?;

    Ok(Currency {
        code: code(CurrencyField::Code.key(), code_value, 3)?,
        name: name.to_string(),
        numeric: take(CurrencyField::Numeric)
            .map(|v| numeric(CurrencyField::Numeric.key(), v, 3))
            .transpose()?,
        minor_units: take(CurrencyField::MinorUnits)
            .map(minor_units)
            .transpose()?
            .flatten(),
        countries: take(CurrencyField::Countries).map(String::from),
        status,
    })
}

/// `"2"` -> `Some(2)`, `"N.A."` -> `None`
fn minor_units(value: &str) -> Result<Option<u8>, TransformError> {
    let normalized: String = value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    if normalized == "NA" {
        return Ok(None);
    }
    match normalized.parse::<u8>() {
        Ok(units) if units <= 9 && normalized.len() == 1 => Ok(Some(units)),
        _ => Err(TransformError::InvalidMinorUnits {
            value: value.to_string(),
        }),
    }
}
