use crate::error::MotorpoolError;
use crate::types::{EntityKind, Person, PersonDraft, PersonId, Vehicle, VehicleDraft, VehicleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// An entity that a [`RecordStore`] can persist.
pub trait Record: Clone + Send + Sync + 'static {
    type Id: Copy + Ord + Send + Sync + From<i64> + Into<i64>;
    type Draft: Send + 'static;

    const KIND: EntityKind;

    fn id(&self) -> Self::Id;

    fn from_draft(id: Self::Id, draft: Self::Draft, now: DateTime<Utc>) -> Self;

    fn apply_draft(&mut self, draft: Self::Draft, now: DateTime<Utc>);
}

impl Record for Person {
    type Id = PersonId;
    type Draft = PersonDraft;

    const KIND: EntityKind = EntityKind::Person;

    fn id(&self) -> PersonId {
        self.id
    }

    fn from_draft(id: PersonId, draft: PersonDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            email: draft.email,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_draft(&mut self, draft: PersonDraft, now: DateTime<Utc>) {
        self.name = draft.name;
        self.email = draft.email;
        self.updated_at = now;
    }
}

impl Record for Vehicle {
    type Id = VehicleId;
    type Draft = VehicleDraft;

    const KIND: EntityKind = EntityKind::Vehicle;

    fn id(&self) -> VehicleId {
        self.id
    }

    fn from_draft(id: VehicleId, draft: VehicleDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            make: draft.make,
            model: draft.model,
            year: draft.year,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_draft(&mut self, draft: VehicleDraft, now: DateTime<Utc>) {
        self.make = draft.make;
        self.model = draft.model;
        self.year = draft.year;
        self.updated_at = now;
    }
}

/// CRUD persistence for one record kind.
///
/// Unknown ids surface as [`MotorpoolError::NotFound`].
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    async fn get(&self, id: R::Id) -> Result<R, MotorpoolError>;

    async fn create(&self, draft: R::Draft) -> Result<R, MotorpoolError>;

    async fn update(&self, id: R::Id, draft: R::Draft) -> Result<R, MotorpoolError>;

    /// Remove a record and hand it back so callers can still name it.
    async fn delete(&self, id: R::Id) -> Result<R, MotorpoolError>;

    /// All records in ascending id order.
    async fn list(&self) -> Result<Vec<R>, MotorpoolError>;
}

#[derive(Debug)]
struct Table<R> {
    next_id: i64,
    rows: BTreeMap<i64, R>,
}

/// Process-local record store. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct MemoryRecordStore<R> {
    table: RwLock<Table<R>>,
}

impl<R: Record> MemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table {
                next_id: 1,
                rows: BTreeMap::new(),
            }),
        }
    }
}

impl<R: Record> Default for MemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for MemoryRecordStore<R> {
    async fn get(&self, id: R::Id) -> Result<R, MotorpoolError> {
        let key: i64 = id.into();
        self.table
            .read()
            .await
            .rows
            .get(&key)
            .cloned()
            .ok_or_else(|| MotorpoolError::not_found(R::KIND, key))
    }

    async fn create(&self, draft: R::Draft) -> Result<R, MotorpoolError> {
        let mut table = self.table.write().await;
        let key = table.next_id;
        table.next_id += 1;
        let record = R::from_draft(key.into(), draft, Utc::now());
        table.rows.insert(key, record.clone());
        Ok(record)
    }

    async fn update(&self, id: R::Id, draft: R::Draft) -> Result<R, MotorpoolError> {
        let key: i64 = id.into();
        let mut table = self.table.write().await;
        let record = table
            .rows
            .get_mut(&key)
            .ok_or_else(|| MotorpoolError::not_found(R::KIND, key))?;
        record.apply_draft(draft, Utc::now());
        Ok(record.clone())
    }

    async fn delete(&self, id: R::Id) -> Result<R, MotorpoolError> {
        let key: i64 = id.into();
        self.table
            .write()
            .await
            .rows
            .remove(&key)
            .ok_or_else(|| MotorpoolError::not_found(R::KIND, key))
    }

    async fn list(&self) -> Result<Vec<R>, MotorpoolError> {
        Ok(self.table.read().await.rows.values().cloned().collect())
    }
}
