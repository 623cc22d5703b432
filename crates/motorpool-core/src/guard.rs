//! Assignment guard: the pure decision over the current edge state and a requested
//! transition.
//!
//! The same [`decide`] function serves both perspectives. From the person's side the
//! subject is a [`PersonId`] and the target a [`VehicleId`]; from the vehicle's side the
//! roles swap. Both read the same edge set, so for one underlying state the two sides
//! reach the same allow/reject verdict.

use crate::types::{PersonId, VehicleId};
use serde::{Deserialize, Serialize};

/// Requested state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Assign,
    Unassign,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Unassign => "unassign",
        }
    }
}

/// Which side of the relationship initiated the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    Person,
    Vehicle,
}

/// Edge state observed for one request, from the subject's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot<S, T> {
    pub subject: S,
    /// Target the subject currently holds, if any.
    pub subject_target: Option<T>,
    pub requested: T,
    /// Subject currently holding the requested target, if any.
    pub requested_holder: Option<S>,
}

/// Guard verdict. Only [`Outcome::Allowed`] permits a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<S, T> {
    Allowed,
    /// Unassign requested but the subject holds nothing.
    NoCurrentAssignment,
    /// The subject holds a different target than the requested one.
    AlreadyAssignedToOther { current: T },
    /// Assign requested for the pair that already exists.
    AlreadyAssignedToSame,
    /// The subject is free but the requested target is held by another subject.
    TargetHeldByOther { holder: S },
}

/// Payload-free outcome tag, comparable across perspectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Allowed,
    NoCurrentAssignment,
    AlreadyAssignedToOther,
    AlreadyAssignedToSame,
    TargetHeldByOther,
}

impl<S, T> Outcome<S, T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Allowed => OutcomeKind::Allowed,
            Self::NoCurrentAssignment => OutcomeKind::NoCurrentAssignment,
            Self::AlreadyAssignedToOther { .. } => OutcomeKind::AlreadyAssignedToOther,
            Self::AlreadyAssignedToSame => OutcomeKind::AlreadyAssignedToSame,
            Self::TargetHeldByOther { .. } => OutcomeKind::TargetHeldByOther,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Classify a request. Checks run in a fixed precedence:
/// no current assignment, assigned to another, assigned to the same, target taken.
pub fn decide<S, T>(action: Action, snapshot: &Snapshot<S, T>) -> Outcome<S, T>
where
    S: Copy + Eq,
    T: Copy + Eq,
{
    match (action, snapshot.subject_target) {
        (Action::Unassign, None) => Outcome::NoCurrentAssignment,
        (_, Some(current)) if current != snapshot.requested => {
            Outcome::AlreadyAssignedToOther { current }
        }
        (Action::Unassign, Some(_)) => Outcome::Allowed,
        (Action::Assign, Some(_)) => Outcome::AlreadyAssignedToSame,
        (Action::Assign, None) => match snapshot.requested_holder {
            Some(holder) if holder != snapshot.subject => Outcome::TargetHeldByOther { holder },
            _ => Outcome::Allowed,
        },
    }
}

/// A guard verdict tagged with the perspective that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ruling {
    Person(Outcome<PersonId, VehicleId>),
    Vehicle(Outcome<VehicleId, PersonId>),
}

impl Ruling {
    /// Run the guard for `perspective` over the state of both endpoints.
    pub fn evaluate(
        perspective: Perspective,
        action: Action,
        person: PersonId,
        vehicle: VehicleId,
        vehicle_of_person: Option<VehicleId>,
        driver_of_vehicle: Option<PersonId>,
    ) -> Self {
        match perspective {
            Perspective::Person => Self::Person(decide(
                action,
                &Snapshot {
                    subject: person,
                    subject_target: vehicle_of_person,
                    requested: vehicle,
                    requested_holder: driver_of_vehicle,
                },
            )),
            Perspective::Vehicle => Self::Vehicle(decide(
                action,
                &Snapshot {
                    subject: vehicle,
                    subject_target: driver_of_vehicle,
                    requested: person,
                    requested_holder: vehicle_of_person,
                },
            )),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Person(outcome) => outcome.kind(),
            Self::Vehicle(outcome) => outcome.kind(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.kind() == OutcomeKind::Allowed
    }
}
