//! Transformation engine
//!
//! Pure functions from a raw row to exactly one [`Outcome`]. No I/O happens
//! here: the consumer decides what to do with the outcome.
//!
//! Every entity follows the same steps:
//!
//! 1. resolve the status (never defaulted)
//! 2. return `Skipped` for statuses that are never persisted
//! 3. enforce the status's required fields
//! 4. normalize codes, numeric codes, dates and free text
//! 5. build the entity from the fields the status allows

pub mod country;
pub mod currency;
pub mod fields;
pub mod status;

use canon_common::Payload;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

pub use country::{Country, CountryStatus};
pub use currency::{Currency, CurrencyStatus};
pub use status::StatusTable;

/// Why a record was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("status is missing or empty")]
    MissingStatus,

    #[error("invalid status '{value}'")]
    InvalidStatus { value: String },

    #[error("missing required field '{field}' for status {status}")]
    MissingField {
        field: &'static str,
        status: &'static str,
    },

    #[error("{field} must be {width} ASCII letters, got '{value}'")]
    InvalidCode {
        field: &'static str,
        value: String,
        width: usize,
    },

    #[error("{field} must be at most {width} digits, got '{value}'")]
    InvalidNumeric {
        field: &'static str,
        value: String,
        width: usize,
    },

    #[error("{field} is not a recognised date, got '{value}'")]
    InvalidDate { field: &'static str, value: String },

    #[error("minor_units must be 0-9 or N.A., got '{value}'")]
    InvalidMinorUnits { value: String },

    #[error("envelope rejected: {0}")]
    Envelope(String),
}

/// Result of transforming one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<E> {
    Accepted(E),
    /// Deliberately not persisted
    Skipped { key: String, reason: String },
    Rejected(TransformError),
}

impl<E> Outcome<E> {
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> Outcome<F> {
        match self {
            Outcome::Accepted(entity) => Outcome::Accepted(f(entity)),
            Outcome::Skipped { key, reason } => Outcome::Skipped { key, reason },
            Outcome::Rejected(error) => Outcome::Rejected(error),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }
}

impl<E> From<Result<E, TransformError>> for Outcome<E> {
    fn from(result: Result<E, TransformError>) -> Self {
        match result {
            Ok(entity) => Outcome::Accepted(entity),
            Err(error) => Outcome::Rejected(error),
        }
    }
}

/// Entity types the worker knows how to canonicalize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Countries,
    Currencies,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Countries, EntityKind::Currencies];

    /// Entity segment of the routing key
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Countries => "countries",
            EntityKind::Currencies => "currencies",
        }
    }

    pub fn transform(&self, payload: &Payload) -> Outcome<CanonicalEntity> {
        match self {
            EntityKind::Countries => country::transform(payload).map(CanonicalEntity::Country),
            EntityKind::Currencies => currency::transform(payload).map(CanonicalEntity::Currency),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "countries" | "country" => Ok(EntityKind::Countries),
            "currencies" | "currency" => Ok(EntityKind::Currencies),
            other => Err(format!("unknown entity: {}", other)),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated record ready for the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum CanonicalEntity {
    Country(Country),
    Currency(Currency),
}

impl CanonicalEntity {
    pub fn natural_key(&self) -> &str {
        match self {
            CanonicalEntity::Country(c) => &c.alpha2,
            CanonicalEntity::Currency(c) => &c.code,
        }
    }
}
