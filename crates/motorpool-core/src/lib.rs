//! Motorpool core: people, vehicles, and the exclusive driver assignment between them.
//!
//! A person drives at most one vehicle and a vehicle has at most one driver. The
//! association store is the single source of truth for who drives what; every
//! assign/unassign request is decided by the guard inside a store transaction that
//! locks both endpoints before the edge set changes.

#![deny(unsafe_code)]

pub mod association;
pub mod engine;
pub mod error;
pub mod guard;
pub mod messages;
pub mod postgres;
pub mod records;
pub mod seed;
pub mod storage;
pub mod types;

pub use association::{
    current_driver_of, current_vehicle_of, has_driver, has_vehicle, AssociationMutator,
    AssociationStore, AssociationTxn, MemoryAssociationStore,
};
pub use engine::{AssignmentVerdict, EngineConfig, MotorpoolEngine};
pub use error::MotorpoolError;
pub use guard::{decide, Action, Outcome, OutcomeKind, Perspective, Ruling, Snapshot};
pub use postgres::PostgresStore;
pub use records::{MemoryRecordStore, Record, RecordStore};
pub use storage::StorageConfig;
pub use types::{
    Edge, EntityKind, Person, PersonDraft, PersonId, PersonView, Vehicle, VehicleDraft,
    VehicleId, VehicleView,
};
