//! User-facing wording for assignment verdicts and record operations.
//!
//! Callers and tests compare these strings verbatim.

use crate::guard::{Action, Outcome};
use crate::types::{Person, PersonId, Vehicle, VehicleId};

/// Message for a verdict reached from the person's side.
///
/// `counterpart` names the other party in a conflict: the person's current vehicle for
/// [`Outcome::AlreadyAssignedToOther`] on assign, or the vehicle's current driver for
/// [`Outcome::TargetHeldByOther`].
pub fn person_side(
    action: Action,
    outcome: &Outcome<PersonId, VehicleId>,
    person: &Person,
    vehicle: &Vehicle,
    counterpart: Option<&str>,
) -> String {
    let name = person.label();
    let requested = vehicle.label();
    match (action, outcome) {
        (Action::Assign, Outcome::Allowed) => {
            format!("{name} has been assigned to drive {requested}.")
        }
        (Action::Assign, Outcome::AlreadyAssignedToOther { .. }) => format!(
            "{name} has already been assigned to drive {}.",
            counterpart.unwrap_or("another vehicle")
        ),
        (_, Outcome::AlreadyAssignedToSame) => {
            format!("{name} is already assigned to drive {requested}.")
        }
        (_, Outcome::TargetHeldByOther { .. }) => format!(
            "{requested} has already been assigned to {}.",
            counterpart.unwrap_or("another driver")
        ),
        (_, Outcome::NoCurrentAssignment) => format!("{name} does not have an assigned vehicle."),
        (Action::Unassign, Outcome::AlreadyAssignedToOther { .. }) => {
            format!("The vehicle: {requested} is not assigned to {name}.")
        }
        (Action::Unassign, Outcome::Allowed) => {
            format!("The vehicle: {requested} has been unassigned from {name}.")
        }
    }
}

/// Message for a verdict reached from the vehicle's side.
///
/// `counterpart` names the vehicle's current driver for
/// [`Outcome::AlreadyAssignedToOther`] on assign, or the person's current vehicle for
/// [`Outcome::TargetHeldByOther`].
pub fn vehicle_side(
    action: Action,
    outcome: &Outcome<VehicleId, PersonId>,
    vehicle: &Vehicle,
    person: &Person,
    counterpart: Option<&str>,
) -> String {
    let label = vehicle.label();
    let requested = person.label();
    match (action, outcome) {
        (Action::Assign, Outcome::Allowed) => format!("{label} has been assigned to {requested}."),
        (Action::Assign, Outcome::AlreadyAssignedToOther { .. }) => format!(
            "{label} has already been assigned to {}.",
            counterpart.unwrap_or("another driver")
        ),
        (_, Outcome::AlreadyAssignedToSame) => {
            format!("{label} is already assigned to {requested}.")
        }
        (_, Outcome::TargetHeldByOther { .. }) => format!(
            "{requested} has already been assigned to drive {}.",
            counterpart.unwrap_or("another vehicle")
        ),
        (_, Outcome::NoCurrentAssignment) => format!("{label} does not have an assigned user."),
        (Action::Unassign, Outcome::AlreadyAssignedToOther { .. }) => {
            format!("The vehicle: {label} is not assigned to {requested}.")
        }
        (Action::Unassign, Outcome::Allowed) => {
            format!("The vehicle: {label} has been unassigned from {requested}.")
        }
    }
}

pub fn person_saved(person: &Person) -> String {
    format!("{} has been saved.", person.label())
}

pub fn person_updated(person: &Person) -> String {
    format!("{} has been updated.", person.label())
}

pub fn person_deleted(person: &Person) -> String {
    format!("{} has been deleted.", person.label())
}

pub fn vehicle_saved(vehicle: &Vehicle) -> String {
    format!("{} has been saved.", vehicle.label())
}

pub fn vehicle_updated(vehicle: &Vehicle) -> String {
    format!("{} has been updated.", vehicle.label())
}

pub fn vehicle_deleted(vehicle: &Vehicle) -> String {
    format!("{} has been deleted.", vehicle.label())
}
