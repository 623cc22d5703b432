use crate::error::MotorpoolError;
use crate::types::{Edge, PersonId, VehicleId};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::error;

/// Source of truth for (person, vehicle) edges.
///
/// Every read or write goes through an [`AssociationTxn`]; opening one is the
/// serialization point that keeps check-then-act sequences race free.
#[async_trait]
pub trait AssociationStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    /// Whether [`AssociationTxn::lock_endpoints`] also proves both endpoint records
    /// still exist. Callers re-read the records themselves when it does not.
    fn locks_endpoint_records(&self) -> bool {
        false
    }

    async fn begin(&self) -> Result<Box<dyn AssociationTxn>, MotorpoolError>;
}

/// An open unit of work over the edge set.
///
/// Dropping a transaction without calling [`AssociationTxn::commit`] discards its writes.
#[async_trait]
pub trait AssociationTxn: Send {
    /// Lock both endpoint rows, person first, for the rest of the transaction.
    async fn lock_endpoints(
        &mut self,
        person: PersonId,
        vehicle: VehicleId,
    ) -> Result<(), MotorpoolError>;

    async fn vehicles_of(&mut self, person: PersonId) -> Result<Vec<VehicleId>, MotorpoolError>;

    async fn people_of(&mut self, vehicle: VehicleId) -> Result<Vec<PersonId>, MotorpoolError>;

    async fn contains(&mut self, edge: Edge) -> Result<bool, MotorpoolError>;

    async fn insert(&mut self, edge: Edge) -> Result<(), MotorpoolError>;

    /// Returns whether the edge existed.
    async fn remove(&mut self, edge: Edge) -> Result<bool, MotorpoolError>;

    async fn remove_person(&mut self, person: PersonId) -> Result<usize, MotorpoolError>;

    async fn remove_vehicle(&mut self, vehicle: VehicleId) -> Result<usize, MotorpoolError>;

    async fn edge_count(&mut self) -> Result<usize, MotorpoolError>;

    async fn commit(self: Box<Self>) -> Result<(), MotorpoolError>;

    async fn rollback(self: Box<Self>) -> Result<(), MotorpoolError>;
}

/// Applies guard-approved edge changes inside an open transaction.
pub struct AssociationMutator<'a> {
    txn: &'a mut dyn AssociationTxn,
}

impl<'a> AssociationMutator<'a> {
    pub fn new(txn: &'a mut dyn AssociationTxn) -> Self {
        Self { txn }
    }

    /// Create exactly one edge. An existing pair is [`MotorpoolError::AlreadyLinked`].
    pub async fn attach(
        &mut self,
        person: PersonId,
        vehicle: VehicleId,
    ) -> Result<(), MotorpoolError> {
        let edge = Edge::new(person, vehicle);
        if self.txn.contains(edge).await? {
            return Err(MotorpoolError::AlreadyLinked { person, vehicle });
        }
        self.txn.insert(edge).await
    }

    /// Remove the edge if present. Removing a missing edge is not an error.
    pub async fn detach(
        &mut self,
        person: PersonId,
        vehicle: VehicleId,
    ) -> Result<bool, MotorpoolError> {
        self.txn.remove(Edge::new(person, vehicle)).await
    }
}

fn at_most_one<T: Copy + std::fmt::Display>(
    found: Vec<T>,
    subject: &str,
) -> Result<Option<T>, MotorpoolError> {
    match found.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        many => {
            let listed = many
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            error!(subject, edges = %listed, "association store holds more than one edge");
            Err(MotorpoolError::ConsistencyViolation(format!(
                "{subject} has {} assignments ({listed})",
                many.len()
            )))
        }
    }
}

/// The vehicle a person currently drives.
pub async fn current_vehicle_of(
    txn: &mut dyn AssociationTxn,
    person: PersonId,
) -> Result<Option<VehicleId>, MotorpoolError> {
    let found = txn.vehicles_of(person).await?;
    at_most_one(found, &format!("person {person}"))
}

/// The person currently driving a vehicle.
pub async fn current_driver_of(
    txn: &mut dyn AssociationTxn,
    vehicle: VehicleId,
) -> Result<Option<PersonId>, MotorpoolError> {
    let found = txn.people_of(vehicle).await?;
    at_most_one(found, &format!("vehicle {vehicle}"))
}

pub async fn has_vehicle(
    txn: &mut dyn AssociationTxn,
    person: PersonId,
) -> Result<bool, MotorpoolError> {
    Ok(!txn.vehicles_of(person).await?.is_empty())
}

pub async fn has_driver(
    txn: &mut dyn AssociationTxn,
    vehicle: VehicleId,
) -> Result<bool, MotorpoolError> {
    Ok(!txn.people_of(vehicle).await?.is_empty())
}

/// In-process edge set.
///
/// The set itself is plain many-to-many; the one-edge-per-endpoint rule is kept by the
/// guard, which runs while a transaction owns the store-wide lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssociationStore {
    edges: Arc<Mutex<BTreeSet<Edge>>>,
}

impl MemoryAssociationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrate from existing edges without validating them.
    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        Self {
            edges: Arc::new(Mutex::new(edges.into_iter().collect())),
        }
    }

    pub async fn edges(&self) -> Vec<Edge> {
        self.edges.lock().await.iter().copied().collect()
    }
}

#[async_trait]
impl AssociationStore for MemoryAssociationStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn AssociationTxn>, MotorpoolError> {
        let guard = self.edges.clone().lock_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryAssociationTxn { guard, staged }))
    }
}

struct MemoryAssociationTxn {
    guard: OwnedMutexGuard<BTreeSet<Edge>>,
    staged: BTreeSet<Edge>,
}

#[async_trait]
impl AssociationTxn for MemoryAssociationTxn {
    async fn lock_endpoints(
        &mut self,
        _person: PersonId,
        _vehicle: VehicleId,
    ) -> Result<(), MotorpoolError> {
        // The store-wide guard is already held.
        Ok(())
    }

    async fn vehicles_of(&mut self, person: PersonId) -> Result<Vec<VehicleId>, MotorpoolError> {
        Ok(self
            .staged
            .iter()
            .filter(|edge| edge.person == person)
            .map(|edge| edge.vehicle)
            .collect())
    }

    async fn people_of(&mut self, vehicle: VehicleId) -> Result<Vec<PersonId>, MotorpoolError> {
        Ok(self
            .staged
            .iter()
            .filter(|edge| edge.vehicle == vehicle)
            .map(|edge| edge.person)
            .collect())
    }

    async fn contains(&mut self, edge: Edge) -> Result<bool, MotorpoolError> {
        Ok(self.staged.contains(&edge))
    }

    async fn insert(&mut self, edge: Edge) -> Result<(), MotorpoolError> {
        self.staged.insert(edge);
        Ok(())
    }

    async fn remove(&mut self, edge: Edge) -> Result<bool, MotorpoolError> {
        Ok(self.staged.remove(&edge))
    }

    async fn remove_person(&mut self, person: PersonId) -> Result<usize, MotorpoolError> {
        let before = self.staged.len();
        self.staged.retain(|edge| edge.person != person);
        Ok(before - self.staged.len())
    }

    async fn remove_vehicle(&mut self, vehicle: VehicleId) -> Result<usize, MotorpoolError> {
        let before = self.staged.len();
        self.staged.retain(|edge| edge.vehicle != vehicle);
        Ok(before - self.staged.len())
    }

    async fn edge_count(&mut self) -> Result<usize, MotorpoolError> {
        Ok(self.staged.len())
    }

    async fn commit(self: Box<Self>) -> Result<(), MotorpoolError> {
        let MemoryAssociationTxn { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), MotorpoolError> {
        Ok(())
    }
}
