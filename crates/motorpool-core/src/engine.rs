use crate::association::{
    current_driver_of, current_vehicle_of, AssociationMutator, AssociationStore,
    MemoryAssociationStore,
};
use crate::error::MotorpoolError;
use crate::guard::{Action, Outcome, OutcomeKind, Perspective, Ruling};
use crate::messages;
use crate::postgres::PostgresStore;
use crate::records::{MemoryRecordStore, Record, RecordStore};
use crate::seed;
use crate::storage::StorageConfig;
use crate::types::{
    Person, PersonDraft, PersonId, PersonView, Vehicle, VehicleDraft, VehicleId, VehicleView,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Assignment engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts per assign/unassign before a transient store failure is surfaced.
    pub max_attempts: u32,
    /// Backoff grows linearly with the attempt number.
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 25,
        }
    }
}

/// Result of an assign/unassign request that reached the guard.
///
/// `person` and `vehicle` are the endpoint records resolved for the request. On an
/// allowed assign they are exactly the pair the committed edge links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentVerdict {
    pub trace_id: String,
    pub perspective: Perspective,
    pub action: Action,
    pub person: Person,
    pub vehicle: Vehicle,
    pub outcome: OutcomeKind,
    pub message: String,
}

impl AssignmentVerdict {
    pub fn is_allowed(&self) -> bool {
        self.outcome == OutcomeKind::Allowed
    }
}

/// Orchestrates record stores and the association store.
///
/// Assign/unassign requests run guard-then-mutate inside a single association
/// transaction that has locked both endpoints, so two concurrent requests touching the
/// same person or vehicle cannot both observe a free slot.
pub struct MotorpoolEngine {
    people: Arc<dyn RecordStore<Person>>,
    vehicles: Arc<dyn RecordStore<Vehicle>>,
    associations: Arc<dyn AssociationStore>,
    config: EngineConfig,
}

impl MotorpoolEngine {
    pub async fn bootstrap(
        storage: StorageConfig,
        config: EngineConfig,
    ) -> Result<Self, MotorpoolError> {
        match storage {
            StorageConfig::Memory => Ok(Self::from_stores(
                Arc::new(MemoryRecordStore::<Person>::new()),
                Arc::new(MemoryRecordStore::<Vehicle>::new()),
                Arc::new(MemoryAssociationStore::new()),
                config,
            )),
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = Arc::new(PostgresStore::connect(&database_url, max_connections).await?);
                store.ensure_schema().await?;
                Ok(Self::from_stores(
                    store.clone(),
                    store.clone(),
                    store,
                    config,
                ))
            }
        }
    }

    pub fn from_stores(
        people: Arc<dyn RecordStore<Person>>,
        vehicles: Arc<dyn RecordStore<Vehicle>>,
        associations: Arc<dyn AssociationStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            people,
            vehicles,
            associations,
            config,
        }
    }

    pub fn storage_label(&self) -> &'static str {
        self.associations.backend_label()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn list_people(&self) -> Result<Vec<Person>, MotorpoolError> {
        self.people.list().await
    }

    pub async fn create_person(&self, draft: PersonDraft) -> Result<Person, MotorpoolError> {
        let person = self.people.create(draft).await?;
        info!(person = %person.id, "person created");
        Ok(person)
    }

    pub async fn person_view(&self, id: PersonId) -> Result<PersonView, MotorpoolError> {
        let person = self.people.get(id).await?;
        let vehicle = match self.current_vehicle_of(id).await? {
            Some(vehicle_id) => existing(self.vehicles.get(vehicle_id).await)?,
            None => None,
        };
        Ok(PersonView { person, vehicle })
    }

    pub async fn update_person(
        &self,
        id: PersonId,
        draft: PersonDraft,
    ) -> Result<PersonView, MotorpoolError> {
        self.people.update(id, draft).await?;
        info!(person = %id, "person updated");
        self.person_view(id).await
    }

    /// Delete a person and every edge that touches them.
    pub async fn delete_person(&self, id: PersonId) -> Result<Person, MotorpoolError> {
        let person = self.people.delete(id).await?;
        let mut txn = self.associations.begin().await?;
        let detached = txn.remove_person(id).await?;
        txn.commit().await?;
        info!(person = %id, detached, "person deleted");
        Ok(person)
    }

    pub async fn list_vehicles(&self) -> Result<Vec<Vehicle>, MotorpoolError> {
        self.vehicles.list().await
    }

    pub async fn create_vehicle(&self, draft: VehicleDraft) -> Result<Vehicle, MotorpoolError> {
        let vehicle = self.vehicles.create(draft).await?;
        info!(vehicle = %vehicle.id, "vehicle created");
        Ok(vehicle)
    }

    pub async fn vehicle_view(&self, id: VehicleId) -> Result<VehicleView, MotorpoolError> {
        let vehicle = self.vehicles.get(id).await?;
        let driver = match self.current_driver_of(id).await? {
            Some(person_id) => existing(self.people.get(person_id).await)?,
            None => None,
        };
        Ok(VehicleView { vehicle, driver })
    }

    pub async fn update_vehicle(
        &self,
        id: VehicleId,
        draft: VehicleDraft,
    ) -> Result<VehicleView, MotorpoolError> {
        self.vehicles.update(id, draft).await?;
        info!(vehicle = %id, "vehicle updated");
        self.vehicle_view(id).await
    }

    /// Delete a vehicle and every edge that touches it.
    pub async fn delete_vehicle(&self, id: VehicleId) -> Result<Vehicle, MotorpoolError> {
        let vehicle = self.vehicles.delete(id).await?;
        let mut txn = self.associations.begin().await?;
        let detached = txn.remove_vehicle(id).await?;
        txn.commit().await?;
        info!(vehicle = %id, detached, "vehicle deleted");
        Ok(vehicle)
    }

    pub async fn current_vehicle_of(
        &self,
        person: PersonId,
    ) -> Result<Option<VehicleId>, MotorpoolError> {
        let mut txn = self.associations.begin().await?;
        let current = current_vehicle_of(txn.as_mut(), person).await?;
        txn.rollback().await?;
        Ok(current)
    }

    pub async fn current_driver_of(
        &self,
        vehicle: VehicleId,
    ) -> Result<Option<PersonId>, MotorpoolError> {
        let mut txn = self.associations.begin().await?;
        let current = current_driver_of(txn.as_mut(), vehicle).await?;
        txn.rollback().await?;
        Ok(current)
    }

    pub async fn edge_count(&self) -> Result<usize, MotorpoolError> {
        let mut txn = self.associations.begin().await?;
        let count = txn.edge_count().await?;
        txn.rollback().await?;
        Ok(count)
    }

    pub async fn assign_vehicle_to_person(
        &self,
        person: PersonId,
        vehicle: VehicleId,
    ) -> Result<AssignmentVerdict, MotorpoolError> {
        self.transition(Perspective::Person, Action::Assign, person, vehicle)
            .await
    }

    pub async fn unassign_vehicle_from_person(
        &self,
        person: PersonId,
        vehicle: VehicleId,
    ) -> Result<AssignmentVerdict, MotorpoolError> {
        self.transition(Perspective::Person, Action::Unassign, person, vehicle)
            .await
    }

    pub async fn assign_driver_to_vehicle(
        &self,
        vehicle: VehicleId,
        person: PersonId,
    ) -> Result<AssignmentVerdict, MotorpoolError> {
        self.transition(Perspective::Vehicle, Action::Assign, person, vehicle)
            .await
    }

    pub async fn unassign_driver_from_vehicle(
        &self,
        vehicle: VehicleId,
        person: PersonId,
    ) -> Result<AssignmentVerdict, MotorpoolError> {
        self.transition(Perspective::Vehicle, Action::Unassign, person, vehicle)
            .await
    }

    /// Insert the demo vehicle fleet unless vehicles already exist.
    pub async fn seed_demo(&self) -> Result<Vec<Vehicle>, MotorpoolError> {
        let existing = self.vehicles.list().await?.len();
        if existing > 0 {
            info!(vehicles = existing, "vehicles already present; demo fleet skipped");
            return Ok(Vec::new());
        }

        let mut created = Vec::new();
        for draft in seed::demo_vehicles() {
            created.push(self.vehicles.create(draft).await?);
        }
        info!(vehicles = created.len(), "demo fleet seeded");
        Ok(created)
    }

    async fn transition(
        &self,
        perspective: Perspective,
        action: Action,
        person_id: PersonId,
        vehicle_id: VehicleId,
    ) -> Result<AssignmentVerdict, MotorpoolError> {
        let trace_id = Uuid::new_v4().to_string();
        let person = self.people.get(person_id).await?;
        let vehicle = self.vehicles.get(vehicle_id).await?;

        let ruling = self
            .transition_with_retry(&trace_id, perspective, action, person_id, vehicle_id)
            .await?;
        let message = self.describe(action, &ruling, &person, &vehicle).await?;

        info!(
            trace_id = %trace_id,
            perspective = ?perspective,
            action = action.name(),
            person = %person_id,
            vehicle = %vehicle_id,
            outcome = ?ruling.kind(),
            "assignment decided"
        );

        Ok(AssignmentVerdict {
            trace_id,
            perspective,
            action,
            person,
            vehicle,
            outcome: ruling.kind(),
            message,
        })
    }

    async fn transition_with_retry(
        &self,
        trace_id: &str,
        perspective: Perspective,
        action: Action,
        person: PersonId,
        vehicle: VehicleId,
    ) -> Result<Ruling, MotorpoolError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .transition_once(perspective, action, person, vehicle)
                .await
            {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        trace_id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "assignment transaction failed; retrying"
                    );
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn transition_once(
        &self,
        perspective: Perspective,
        action: Action,
        person: PersonId,
        vehicle: VehicleId,
    ) -> Result<Ruling, MotorpoolError> {
        let mut txn = self.associations.begin().await?;
        txn.lock_endpoints(person, vehicle).await?;
        if !self.associations.locks_endpoint_records() {
            // Either endpoint may have been deleted after it was first resolved.
            self.people.get(person).await?;
            self.vehicles.get(vehicle).await?;
        }

        let vehicle_of_person = current_vehicle_of(txn.as_mut(), person).await?;
        let driver_of_vehicle = current_driver_of(txn.as_mut(), vehicle).await?;
        let ruling = Ruling::evaluate(
            perspective,
            action,
            person,
            vehicle,
            vehicle_of_person,
            driver_of_vehicle,
        );

        if !ruling.is_allowed() {
            txn.rollback().await?;
            return Ok(ruling);
        }

        let mut mutator = AssociationMutator::new(txn.as_mut());
        match action {
            Action::Assign => mutator.attach(person, vehicle).await?,
            Action::Unassign => {
                mutator.detach(person, vehicle).await?;
            }
        }
        txn.commit().await?;
        Ok(ruling)
    }

    async fn describe(
        &self,
        action: Action,
        ruling: &Ruling,
        person: &Person,
        vehicle: &Vehicle,
    ) -> Result<String, MotorpoolError> {
        match ruling {
            Ruling::Person(outcome) => {
                let counterpart = match (action, outcome) {
                    (Action::Assign, Outcome::AlreadyAssignedToOther { current }) => {
                        self.vehicle_label(*current).await?
                    }
                    (_, Outcome::TargetHeldByOther { holder }) => self.person_label(*holder).await?,
                    _ => None,
                };
                Ok(messages::person_side(
                    action,
                    outcome,
                    person,
                    vehicle,
                    counterpart.as_deref(),
                ))
            }
            Ruling::Vehicle(outcome) => {
                let counterpart = match (action, outcome) {
                    (Action::Assign, Outcome::AlreadyAssignedToOther { current }) => {
                        self.person_label(*current).await?
                    }
                    (_, Outcome::TargetHeldByOther { holder }) => {
                        self.vehicle_label(*holder).await?
                    }
                    _ => None,
                };
                Ok(messages::vehicle_side(
                    action,
                    outcome,
                    vehicle,
                    person,
                    counterpart.as_deref(),
                ))
            }
        }
    }

    async fn person_label(&self, id: PersonId) -> Result<Option<String>, MotorpoolError> {
        Ok(existing(self.people.get(id).await)?.map(|person| person.name))
    }

    async fn vehicle_label(&self, id: VehicleId) -> Result<Option<String>, MotorpoolError> {
        Ok(existing(self.vehicles.get(id).await)?.map(|vehicle| vehicle.label()))
    }
}

/// A record referenced by an edge may vanish while its deletion is still detaching
/// edges; treat that as absent rather than failing the read.
fn existing<R: Record>(found: Result<R, MotorpoolError>) -> Result<Option<R>, MotorpoolError> {
    match found {
        Ok(record) => Ok(Some(record)),
        Err(MotorpoolError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::AssociationTxn;
    use crate::types::{Edge, EntityKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn memory_engine() -> MotorpoolEngine {
        MotorpoolEngine::bootstrap(StorageConfig::memory(), EngineConfig::default())
            .await
            .unwrap()
    }

    async fn chuck_and_charger(engine: &MotorpoolEngine) -> (Person, Vehicle) {
        let person = engine
            .create_person(PersonDraft::new("Chuck Norris", "chuck.norris@punch.kick"))
            .await
            .unwrap();
        let vehicle = engine
            .create_vehicle(VehicleDraft::new("Dodge", "Charger R/T", 1970))
            .await
            .unwrap();
        (person, vehicle)
    }

    #[tokio::test]
    async fn literal_scenario_from_person_side() {
        let engine = memory_engine().await;
        let (chuck, charger) = chuck_and_charger(&engine).await;
        assert_eq!(chuck.id, PersonId(1));
        assert_eq!(charger.id, VehicleId(1));
        let skyline = engine
            .create_vehicle(VehicleDraft::new("Nissan", "Skyline GT-R", 2002))
            .await
            .unwrap();

        let first = engine
            .assign_vehicle_to_person(chuck.id, charger.id)
            .await
            .unwrap();
        assert!(first.is_allowed());
        assert_eq!(
            first.message,
            "Chuck Norris has been assigned to drive 1970 Dodge Charger R/T."
        );

        let second = engine
            .assign_vehicle_to_person(chuck.id, charger.id)
            .await
            .unwrap();
        assert_eq!(second.outcome, OutcomeKind::AlreadyAssignedToSame);
        assert_eq!(
            second.message,
            "Chuck Norris is already assigned to drive 1970 Dodge Charger R/T."
        );
        assert_eq!(engine.edge_count().await.unwrap(), 1);

        let mismatch = engine
            .unassign_vehicle_from_person(chuck.id, skyline.id)
            .await
            .unwrap();
        assert_eq!(mismatch.outcome, OutcomeKind::AlreadyAssignedToOther);
        assert_eq!(
            mismatch.message,
            "The vehicle: 2002 Nissan Skyline GT-R is not assigned to Chuck Norris."
        );
        assert_eq!(
            engine.current_vehicle_of(chuck.id).await.unwrap(),
            Some(charger.id)
        );
    }

    #[tokio::test]
    async fn conflicting_assign_keeps_existing_edge() {
        let engine = memory_engine().await;
        let (chuck, charger) = chuck_and_charger(&engine).await;
        let skyline = engine
            .create_vehicle(VehicleDraft::new("Nissan", "Skyline GT-R", 2002))
            .await
            .unwrap();

        engine
            .assign_vehicle_to_person(chuck.id, charger.id)
            .await
            .unwrap();
        let verdict = engine
            .assign_vehicle_to_person(chuck.id, skyline.id)
            .await
            .unwrap();

        assert_eq!(verdict.outcome, OutcomeKind::AlreadyAssignedToOther);
        assert_eq!(
            verdict.message,
            "Chuck Norris has already been assigned to drive 1970 Dodge Charger R/T."
        );
        assert_eq!(
            engine.current_vehicle_of(chuck.id).await.unwrap(),
            Some(charger.id)
        );
        assert_eq!(engine.current_driver_of(skyline.id).await.unwrap(), None);
        assert_eq!(engine.edge_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn person_side_rejects_vehicle_driven_by_someone_else() {
        let engine = memory_engine().await;
        let (chuck, charger) = chuck_and_charger(&engine).await;
        let bruce = engine
            .create_person(PersonDraft::new("Bruce Lee", "bruce@dragon.hk"))
            .await
            .unwrap();

        engine
            .assign_vehicle_to_person(bruce.id, charger.id)
            .await
            .unwrap();
        let verdict = engine
            .assign_vehicle_to_person(chuck.id, charger.id)
            .await
            .unwrap();

        assert_eq!(verdict.outcome, OutcomeKind::TargetHeldByOther);
        assert_eq!(
            verdict.message,
            "1970 Dodge Charger R/T has already been assigned to Bruce Lee."
        );
        assert_eq!(engine.current_driver_of(charger.id).await.unwrap(), Some(bruce.id));
    }

    #[tokio::test]
    async fn both_sides_reach_the_same_store_outcome() {
        for seed_edge in [false, true] {
            let by_person = memory_engine().await;
            let by_vehicle = memory_engine().await;
            let mut verdicts = Vec::new();

            for engine in [&by_person, &by_vehicle] {
                let (_, charger) = chuck_and_charger(engine).await;
                let bruce = engine
                    .create_person(PersonDraft::new("Bruce Lee", "bruce@dragon.hk"))
                    .await
                    .unwrap();
                if seed_edge {
                    engine
                        .assign_vehicle_to_person(bruce.id, charger.id)
                        .await
                        .unwrap();
                }
            }

            verdicts.push(
                by_person
                    .assign_vehicle_to_person(PersonId(1), VehicleId(1))
                    .await
                    .unwrap(),
            );
            verdicts.push(
                by_vehicle
                    .assign_driver_to_vehicle(VehicleId(1), PersonId(1))
                    .await
                    .unwrap(),
            );

            assert_eq!(verdicts[0].is_allowed(), !seed_edge);
            assert_eq!(verdicts[0].is_allowed(), verdicts[1].is_allowed());
            assert_eq!(
                by_person.current_driver_of(VehicleId(1)).await.unwrap(),
                by_vehicle.current_driver_of(VehicleId(1)).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn vehicle_side_wording_and_unassign() {
        let engine = memory_engine().await;
        let (chuck, charger) = chuck_and_charger(&engine).await;

        let empty = engine
            .unassign_driver_from_vehicle(charger.id, chuck.id)
            .await
            .unwrap();
        assert_eq!(empty.outcome, OutcomeKind::NoCurrentAssignment);
        assert_eq!(
            empty.message,
            "1970 Dodge Charger R/T does not have an assigned user."
        );

        let assigned = engine
            .assign_driver_to_vehicle(charger.id, chuck.id)
            .await
            .unwrap();
        assert_eq!(
            assigned.message,
            "1970 Dodge Charger R/T has been assigned to Chuck Norris."
        );

        let removed = engine
            .unassign_driver_from_vehicle(charger.id, chuck.id)
            .await
            .unwrap();
        assert!(removed.is_allowed());
        assert_eq!(
            removed.message,
            "The vehicle: 1970 Dodge Charger R/T has been unassigned from Chuck Norris."
        );
        assert_eq!(engine.edge_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unassign_removes_only_the_matching_edge() {
        let engine = memory_engine().await;
        let (chuck, charger) = chuck_and_charger(&engine).await;
        let bruce = engine
            .create_person(PersonDraft::new("Bruce Lee", "bruce@dragon.hk"))
            .await
            .unwrap();
        let skyline = engine
            .create_vehicle(VehicleDraft::new("Nissan", "Skyline GT-R", 2002))
            .await
            .unwrap();

        engine
            .assign_vehicle_to_person(chuck.id, charger.id)
            .await
            .unwrap();
        engine
            .assign_vehicle_to_person(bruce.id, skyline.id)
            .await
            .unwrap();

        let verdict = engine
            .unassign_vehicle_from_person(chuck.id, charger.id)
            .await
            .unwrap();
        assert!(verdict.is_allowed());
        assert_eq!(engine.current_vehicle_of(chuck.id).await.unwrap(), None);
        assert_eq!(
            engine.current_vehicle_of(bruce.id).await.unwrap(),
            Some(skyline.id)
        );

        let again = engine
            .unassign_vehicle_from_person(chuck.id, charger.id)
            .await
            .unwrap();
        assert_eq!(again.outcome, OutcomeKind::NoCurrentAssignment);
        assert_eq!(again.message, "Chuck Norris does not have an assigned vehicle.");
    }

    #[tokio::test]
    async fn unknown_endpoints_fail_before_the_guard() {
        let engine = memory_engine().await;
        let (chuck, _) = chuck_and_charger(&engine).await;

        let err = engine
            .assign_vehicle_to_person(chuck.id, VehicleId(99))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MotorpoolError::NotFound {
                kind: EntityKind::Vehicle,
                id: 99
            }
        ));
        assert_eq!(engine.edge_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_edges_surface_as_consistency_violation() {
        let people = Arc::new(MemoryRecordStore::<Person>::new());
        let vehicles = Arc::new(MemoryRecordStore::<Vehicle>::new());
        let chuck = people
            .create(PersonDraft::new("Chuck Norris", "chuck.norris@punch.kick"))
            .await
            .unwrap();
        let charger = vehicles
            .create(VehicleDraft::new("Dodge", "Charger R/T", 1970))
            .await
            .unwrap();
        let skyline = vehicles
            .create(VehicleDraft::new("Nissan", "Skyline GT-R", 2002))
            .await
            .unwrap();
        let associations = Arc::new(MemoryAssociationStore::from_edges([
            Edge::new(chuck.id, charger.id),
            Edge::new(chuck.id, skyline.id),
        ]));
        let engine = MotorpoolEngine::from_stores(
            people,
            vehicles,
            associations.clone(),
            EngineConfig::default(),
        );

        let err = engine
            .unassign_vehicle_from_person(chuck.id, charger.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MotorpoolError::ConsistencyViolation(_)));
        assert_eq!(associations.edges().await.len(), 2);
        assert!(engine.person_view(chuck.id).await.is_err());
    }

    #[tokio::test]
    async fn deleting_an_endpoint_removes_its_edge() {
        let engine = memory_engine().await;
        let (chuck, charger) = chuck_and_charger(&engine).await;
        engine
            .assign_vehicle_to_person(chuck.id, charger.id)
            .await
            .unwrap();

        let deleted = engine.delete_vehicle(charger.id).await.unwrap();
        assert_eq!(deleted.label(), "1970 Dodge Charger R/T");
        assert_eq!(engine.edge_count().await.unwrap(), 0);

        let view = engine.person_view(chuck.id).await.unwrap();
        assert!(view.vehicle.is_none());
    }

    #[tokio::test]
    async fn views_resolve_current_assignment() {
        let engine = memory_engine().await;
        let (chuck, charger) = chuck_and_charger(&engine).await;
        engine
            .assign_driver_to_vehicle(charger.id, chuck.id)
            .await
            .unwrap();

        let person = engine.person_view(chuck.id).await.unwrap();
        assert_eq!(person.vehicle.map(|v| v.id), Some(charger.id));

        let vehicle = engine
            .update_vehicle(charger.id, VehicleDraft::new("Dodge", "Challenger", 1971))
            .await
            .unwrap();
        assert_eq!(vehicle.vehicle.label(), "1971 Dodge Challenger");
        assert_eq!(vehicle.driver.map(|p| p.id), Some(chuck.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_assigns_for_one_person_admit_exactly_one() {
        let engine = Arc::new(memory_engine().await);
        let chuck = engine
            .create_person(PersonDraft::new("Chuck Norris", "chuck.norris@punch.kick"))
            .await
            .unwrap()
            .id;
        let mut vehicle_ids = Vec::new();
        for draft in seed::demo_vehicles() {
            vehicle_ids.push(engine.create_vehicle(draft).await.unwrap().id);
        }

        let mut handles = Vec::new();
        for vehicle_id in vehicle_ids {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .assign_vehicle_to_person(chuck, vehicle_id)
                    .await
                    .unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 1);
        assert_eq!(engine.edge_count().await.unwrap(), 1);
    }

    /// Association store whose first `failures` transactions fail to open.
    struct FlakyStore {
        inner: MemoryAssociationStore,
        failures: AtomicU32,
        begins: AtomicU32,
    }

    #[async_trait]
    impl AssociationStore for FlakyStore {
        fn backend_label(&self) -> &'static str {
            "flaky"
        }

        async fn begin(&self) -> Result<Box<dyn AssociationTxn>, MotorpoolError> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(MotorpoolError::Transient("serialization failure".to_string()));
            }
            self.inner.begin().await
        }
    }

    async fn flaky_engine(
        failures: u32,
    ) -> (MotorpoolEngine, Arc<FlakyStore>, PersonId, VehicleId) {
        let people = Arc::new(MemoryRecordStore::<Person>::new());
        let vehicles = Arc::new(MemoryRecordStore::<Vehicle>::new());
        let chuck = people
            .create(PersonDraft::new("Chuck Norris", "chuck.norris@punch.kick"))
            .await
            .unwrap();
        let charger = vehicles
            .create(VehicleDraft::new("Dodge", "Charger R/T", 1970))
            .await
            .unwrap();
        let store = Arc::new(FlakyStore {
            inner: MemoryAssociationStore::new(),
            failures: AtomicU32::new(failures),
            begins: AtomicU32::new(0),
        });
        let engine = MotorpoolEngine::from_stores(
            people,
            vehicles,
            store.clone(),
            EngineConfig {
                max_attempts: 3,
                retry_backoff_ms: 1,
            },
        );
        (engine, store, chuck.id, charger.id)
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_budget() {
        let (engine, store, chuck, charger) = flaky_engine(2).await;

        let verdict = engine.assign_vehicle_to_person(chuck, charger).await.unwrap();
        assert!(verdict.is_allowed());
        assert_eq!(store.begins.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.edges().await, vec![Edge::new(chuck, charger)]);
    }

    #[tokio::test]
    async fn transient_failures_beyond_budget_are_surfaced() {
        let (engine, store, chuck, charger) = flaky_engine(5).await;

        let err = engine
            .assign_vehicle_to_person(chuck, charger)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.begins.load(Ordering::SeqCst), 3);
        assert!(store.inner.edges().await.is_empty());
    }

    #[tokio::test]
    async fn seed_demo_inserts_fleet_once() {
        let engine = memory_engine().await;
        let fleet = engine.seed_demo().await.unwrap();
        assert_eq!(fleet.len(), 5);
        assert_eq!(fleet[0].label(), "1970 Dodge Charger R/T");

        assert!(engine.seed_demo().await.unwrap().is_empty());
        assert_eq!(engine.list_vehicles().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn allowed_assign_verdict_carries_the_linked_pair() {
        let engine = memory_engine().await;
        let (chuck, charger) = chuck_and_charger(&engine).await;

        let verdict = engine
            .assign_vehicle_to_person(chuck.id, charger.id)
            .await
            .unwrap();
        engine
            .unassign_driver_from_vehicle(charger.id, chuck.id)
            .await
            .unwrap();

        assert!(verdict.is_allowed());
        assert_eq!(verdict.person.id, chuck.id);
        assert_eq!(verdict.vehicle.label(), "1970 Dodge Charger R/T");
        assert_eq!(engine.current_vehicle_of(chuck.id).await.unwrap(), None);
    }
}
