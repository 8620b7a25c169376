//! Country codes (ISO 3166-1)
//!
//! | Status | Required | Optional |
//! |---|---|---|
//! | officially_assigned | alpha2, alpha3, name_en, name_fr | alpha4, numeric, valid_from, valid_until, remarks |
//! | exceptionally_reserved | alpha2, remarks | name_en, valid_from, valid_until |
//! | indeterminately_reserved | alpha2, name_en, remarks | valid_from, valid_until |
//! | transitionally_reserved | alpha2, name_en, remarks | valid_from, valid_until |
//! | formerly_used | every field | never persisted |
//! | unassigned | alpha2 | remarks |

use canon_common::Payload;
use serde::Serialize;

use super::fields::{code, numeric, AliasTable, DateValue, RawFields};
use super::status::{Disposition, StatusProfile, StatusTable};
use super::{Outcome, TransformError};

const ALIASES: AliasTable = &[
    ("alpha2", &["alpha2code", "iso2", "iso31661alpha2"]),
    ("alpha3", &["alpha3code", "iso3", "iso31661alpha3"]),
    ("alpha4", &["alpha4code", "iso31663"]),
    ("numeric", &["numericcode", "isonumeric", "numeric3"]),
    ("name_en", &["englishshortname", "englishname", "name"]),
    ("name_fr", &["frenchshortname", "frenchname"]),
    ("status", &["assignmentstatus", "statut"]),
    ("valid_from", &["from", "datefrom"]),
    ("valid_until", &["until", "validto", "dateto"]),
    ("remarks", &["remark", "notes", "note"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryField {
    Alpha2,
    Alpha3,
    Alpha4,
    Numeric,
    NameEn,
    NameFr,
    ValidFrom,
    ValidUntil,
    Remarks,
}

impl CountryField {
    pub fn key(&self) -> &'static str {
        match self {
            CountryField::Alpha2 => "alpha2",
            CountryField::Alpha3 => "alpha3",
            CountryField::Alpha4 => "alpha4",
            CountryField::Numeric => "numeric",
            CountryField::NameEn => "name_en",
            CountryField::NameFr => "name_fr",
            CountryField::ValidFrom => "valid_from",
            CountryField::ValidUntil => "valid_until",
            CountryField::Remarks => "remarks",
        }
    }
}

use CountryField::*;

const DATES: &[CountryField] = &[ValidFrom, ValidUntil];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountryStatus {
    OfficiallyAssigned,
    ExceptionallyReserved,
    IndeterminatelyReserved,
    TransitionallyReserved,
    FormerlyUsed,
    Unassigned,
}

impl StatusTable for CountryStatus {
    type Field = CountryField;

    const ALL: &'static [Self] = &[
        CountryStatus::OfficiallyAssigned,
        CountryStatus::ExceptionallyReserved,
        CountryStatus::IndeterminatelyReserved,
        CountryStatus::TransitionallyReserved,
        CountryStatus::FormerlyUsed,
        CountryStatus::Unassigned,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            CountryStatus::OfficiallyAssigned => "officially_assigned",
            CountryStatus::ExceptionallyReserved => "exceptionally_reserved",
            CountryStatus::IndeterminatelyReserved => "indeterminately_reserved",
            CountryStatus::TransitionallyReserved => "transitionally_reserved",
            CountryStatus::FormerlyUsed => "formerly_used",
            CountryStatus::Unassigned => "unassigned",
        }
    }

    fn profile(&self) -> StatusProfile<CountryField> {
        match self {
            CountryStatus::OfficiallyAssigned => StatusProfile {
                required: &[Alpha2, Alpha3, NameEn, NameFr],
                optional: &[Alpha4, Numeric, ValidFrom, ValidUntil, Remarks],
                disposition: Disposition::Persist,
            },
            CountryStatus::ExceptionallyReserved => StatusProfile {
                required: &[Alpha2, Remarks],
                optional: &[NameEn, ValidFrom, ValidUntil],
                disposition: Disposition::Persist,
            },
            CountryStatus::IndeterminatelyReserved | CountryStatus::TransitionallyReserved => {
                StatusProfile {
                    required: &[Alpha2, NameEn, Remarks],
                    optional: DATES,
                    disposition: Disposition::Persist,
                }
            },
            CountryStatus::FormerlyUsed => StatusProfile {
                required: &[
                    Alpha2, Alpha3, Alpha4, Numeric, NameEn, NameFr, ValidFrom, ValidUntil, Remarks,
                ],
                optional: &[],
                disposition: Disposition::Skip("formerly used codes are never persisted"),
            },
            CountryStatus::Unassigned => StatusProfile {
                required: &[Alpha2],
                optional: &[Remarks],
                disposition: Disposition::Persist,
            },
        }
    }
}

/// Canonical country record keyed by `alpha2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Country {
    pub alpha2: String,
    pub alpha3: Option<String>,
    pub alpha4: Option<String>,
    pub numeric: Option<String>,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub status: CountryStatus,
    pub valid_from: Option<DateValue>,
    pub valid_until: Option<DateValue>,
    pub remarks: Option<String>,
}

pub fn transform(payload: &Payload) -> Outcome<Country> {
    let fields = RawFields::new(payload, ALIASES);

    let status = match resolve_status(&fields) {
        Ok(status) => status,
        Err(error) => return Outcome::Rejected(error),
    };

    if let Disposition::Skip(reason) = status.profile().disposition {
        return Outcome::Skipped {
            key: fields
                .get(Alpha2.key())
                .map(str::to_uppercase)
                .unwrap_or_default(),
            reason: reason.to_string(),
        };
    }

    build(status, &fields).into()
}

fn resolve_status(fields: &RawFields<'_>) -> Result<CountryStatus, TransformError> {
    let raw = match fields.raw("status") {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Err(TransformError::MissingStatus),
    };
    CountryStatus::resolve(raw).ok_or_else(|| TransformError::InvalidStatus {
        value: raw.to_string(),
    })
}

fn build(status: CountryStatus, fields: &RawFields<'_>) -> Result<Country, TransformError> {
    let profile = status.profile();

    for field in profile.required {
        if fields.get(field.key()).is_none() {
            return Err(TransformError::MissingField {
                field: field.key(),
                status: status.as_str(),
            });
        }
    }

    // Fields outside the status profile are not carried over
    let take = |field: CountryField| {
        if profile.allows(&field) {
            fields.get(field.key())
        } else {
            None
        }
    };
    let text = |field: CountryField| take(field).map(String::from);
    let date = |field: CountryField| {
        take(field)
            .map(|v| DateValue::parse(field.key(), v))
            .transpose()
    };

    let alpha2 = take(Alpha2).ok_or(TransformError::MissingField {
        field: Alpha2.key(),
        status: status.as_str(),
    })?;

    Ok(Country {
        alpha2: code(Alpha2.key(), alpha2, 2)?,
        alpha3: take(Alpha3).map(|v| code(Alpha3.key(), v, 3)).transpose()?,
        alpha4: take(Alpha4).map(|v| code(Alpha4.key(), v, 4)).transpose()?,
        numeric: take(Numeric).map(|v| numeric(Numeric.key(), v, 3)).transpose()?,
        name_en: text(NameEn),
        name_fr: text(NameFr),
        status,
        valid_from: date(ValidFrom)?,
        valid_until: date(ValidUntil)?,
        remarks: text(Remarks),
    })
}
