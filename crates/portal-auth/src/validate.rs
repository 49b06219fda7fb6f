//! Completeness checks for a `CredentialSet`
//!
//! Validation never short-circuits: every empty field in the checked set is
//! reported, in the order the set lists them.

use std::fmt;

use crate::credentials::CredentialSet;
use crate::params::Field;

/// A required field that is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingField(pub Field);

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is empty", self.0)
    }
}

/// Empty fields among `fields`, in order.
pub fn missing(credentials: &CredentialSet, fields: &[Field]) -> Vec<MissingField> {
    fields
        .iter()
        .filter(|field| credentials.field(**field).is_empty())
        .map(|field| MissingField(*field))
        .collect()
}

/// Run the full readiness check, updating `credentials.is_ready()`.
pub fn validate(credentials: &mut CredentialSet) -> (bool, Vec<MissingField>) {
    credentials.validate()
}
