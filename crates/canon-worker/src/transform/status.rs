//! Status lookup tables
//!
//! Each entity's status decides which fields a record must carry, which it
//! may carry, and whether it is persisted at all. The tables are plain data so
//! every status can be tested on its own.

/// What happens to a record once its status is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Validate against the profile and persist
    Persist,
    /// Never persisted; the reason is logged
    Skip(&'static str),
}

/// Field requirements of one status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusProfile<F: 'static> {
    pub required: &'static [F],
    pub optional: &'static [F],
    pub disposition: Disposition,
}

impl<F: PartialEq> StatusProfile<F> {
    /// Fields carried onto the entity
    pub fn allows(&self, field: &F) -> bool {
        self.required.contains(field) || self.optional.contains(field)
    }
}

/// A closed set of statuses with one profile each
pub trait StatusTable: Sized + Copy + 'static {
    type Field: PartialEq + 'static;

    const ALL: &'static [Self];

    /// Canonical snake_case name
    fn as_str(&self) -> &'static str;

    fn profile(&self) -> StatusProfile<Self::Field>;

    /// Resolve a raw status value
    ///
    /// The value is trimmed, lowercased and spaces or hyphens become
    /// underscores, so `"Officially assigned"` resolves like
    /// `"officially_assigned"`. Nothing resolves to a default.
    fn resolve(raw: &str) -> Option<Self> {
        let normalized = normalize_status(raw);
        if normalized.is_empty() {
            return None;
        }
        Self::ALL.iter().copied().find(|s| s.as_str() == normalized)
    }
}

pub fn normalize_status(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
