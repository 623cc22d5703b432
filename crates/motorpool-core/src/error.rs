use crate::types::{EntityKind, PersonId, VehicleId};
use thiserror::Error;

/// Motorpool core errors.
///
/// Business-rule rejections are not errors; they come back as guard outcomes.
#[derive(Debug, Error)]
pub enum MotorpoolError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("person {person} is already linked to vehicle {vehicle}")]
    AlreadyLinked { person: PersonId, vehicle: VehicleId },

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl MotorpoolError {
    pub fn not_found(kind: EntityKind, id: impl Into<i64>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Failures worth another attempt after a short pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
