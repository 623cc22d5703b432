use crate::association::{AssociationStore, AssociationTxn};
use crate::error::MotorpoolError;
use crate::records::RecordStore;
use crate::types::{
    Edge, EntityKind, Person, PersonDraft, PersonId, Vehicle, VehicleDraft, VehicleId,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

/// SQLSTATE codes worth retrying: serialization failure, deadlock, lock not
/// available, and unique violations raced past the row locks.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "23505"];

fn store_error(context: &str, err: sqlx::Error) -> MotorpoolError {
    let transient = match &err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref()))
            .unwrap_or(false),
        _ => false,
    };

    if transient {
        MotorpoolError::Transient(format!("postgres {context} failed: {err}"))
    } else {
        MotorpoolError::Store(format!("postgres {context} failed: {err}"))
    }
}

fn decode<'r, T>(row: &'r PgRow, column: &str) -> Result<T, MotorpoolError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| MotorpoolError::Store(format!("postgres decode {column} failed: {e}")))
}

fn person_from_row(row: &PgRow) -> Result<Person, MotorpoolError> {
    Ok(Person {
        id: PersonId(decode(row, "id")?),
        name: decode(row, "name")?,
        email: decode(row, "email")?,
        created_at: decode(row, "created_at")?,
        updated_at: decode(row, "updated_at")?,
    })
}

fn vehicle_from_row(row: &PgRow) -> Result<Vehicle, MotorpoolError> {
    Ok(Vehicle {
        id: VehicleId(decode(row, "id")?),
        make: decode(row, "make")?,
        model: decode(row, "model")?,
        year: decode(row, "year")?,
        created_at: decode(row, "created_at")?,
        updated_at: decode(row, "updated_at")?,
    })
}

/// PostgreSQL-backed record and association store.
///
/// Assignment rows cascade with their endpoints, and the unique indexes on each
/// endpoint column keep the edge set one-to-one even if application checks are bypassed.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, MotorpoolError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| store_error("connect", e))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), MotorpoolError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS motorpool_people (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS motorpool_vehicles (
                id BIGSERIAL PRIMARY KEY,
                make TEXT NOT NULL,
                model TEXT NOT NULL,
                year INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS motorpool_assignments (
                person_id BIGINT NOT NULL REFERENCES motorpool_people (id) ON DELETE CASCADE,
                vehicle_id BIGINT NOT NULL REFERENCES motorpool_vehicles (id) ON DELETE CASCADE,
                assigned_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (person_id, vehicle_id)
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_motorpool_assignments_person ON motorpool_assignments (person_id)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_motorpool_assignments_vehicle ON motorpool_assignments (vehicle_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("schema create", e))?;
        }

        Ok(())
    }
}

#[async_trait]
impl RecordStore<Person> for PostgresStore {
    async fn get(&self, id: PersonId) -> Result<Person, MotorpoolError> {
        let row = sqlx::query(
            "SELECT id, name, email, created_at, updated_at FROM motorpool_people WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("person select", e))?
        .ok_or_else(|| MotorpoolError::not_found(EntityKind::Person, id))?;
        person_from_row(&row)
    }

    async fn create(&self, draft: PersonDraft) -> Result<Person, MotorpoolError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO motorpool_people (name, email, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING id, name, email, created_at, updated_at
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.email)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("person insert", e))?;
        person_from_row(&row)
    }

    async fn update(&self, id: PersonId, draft: PersonDraft) -> Result<Person, MotorpoolError> {
        let row = sqlx::query(
            r#"
            UPDATE motorpool_people
            SET name = $2, email = $3, updated_at = $4
            WHERE id = $1
            RETURNING id, name, email, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .bind(&draft.name)
        .bind(&draft.email)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("person update", e))?
        .ok_or_else(|| MotorpoolError::not_found(EntityKind::Person, id))?;
        person_from_row(&row)
    }

    async fn delete(&self, id: PersonId) -> Result<Person, MotorpoolError> {
        let row = sqlx::query(
            r#"
            DELETE FROM motorpool_people
            WHERE id = $1
            RETURNING id, name, email, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("person delete", e))?
        .ok_or_else(|| MotorpoolError::not_found(EntityKind::Person, id))?;
        person_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Person>, MotorpoolError> {
        let rows = sqlx::query(
            "SELECT id, name, email, created_at, updated_at FROM motorpool_people ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("person list", e))?;
        rows.iter().map(person_from_row).collect()
    }
}

#[async_trait]
impl RecordStore<Vehicle> for PostgresStore {
    async fn get(&self, id: VehicleId) -> Result<Vehicle, MotorpoolError> {
        let row = sqlx::query(
            r#"
            SELECT id, make, model, year, created_at, updated_at
            FROM motorpool_vehicles
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("vehicle select", e))?
        .ok_or_else(|| MotorpoolError::not_found(EntityKind::Vehicle, id))?;
        vehicle_from_row(&row)
    }

    async fn create(&self, draft: VehicleDraft) -> Result<Vehicle, MotorpoolError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO motorpool_vehicles (make, model, year, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id, make, model, year, created_at, updated_at
            "#,
        )
        .bind(&draft.make)
        .bind(&draft.model)
        .bind(draft.year)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("vehicle insert", e))?;
        vehicle_from_row(&row)
    }

    async fn update(&self, id: VehicleId, draft: VehicleDraft) -> Result<Vehicle, MotorpoolError> {
        let row = sqlx::query(
            r#"
            UPDATE motorpool_vehicles
            SET make = $2, model = $3, year = $4, updated_at = $5
            WHERE id = $1
            RETURNING id, make, model, year, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .bind(&draft.make)
        .bind(&draft.model)
        .bind(draft.year)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("vehicle update", e))?
        .ok_or_else(|| MotorpoolError::not_found(EntityKind::Vehicle, id))?;
        vehicle_from_row(&row)
    }

    async fn delete(&self, id: VehicleId) -> Result<Vehicle, MotorpoolError> {
        let row = sqlx::query(
            r#"
            DELETE FROM motorpool_vehicles
            WHERE id = $1
            RETURNING id, make, model, year, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("vehicle delete", e))?
        .ok_or_else(|| MotorpoolError::not_found(EntityKind::Vehicle, id))?;
        vehicle_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Vehicle>, MotorpoolError> {
        let rows = sqlx::query(
            r#"
            SELECT id, make, model, year, created_at, updated_at
            FROM motorpool_vehicles
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("vehicle list", e))?;
        rows.iter().map(vehicle_from_row).collect()
    }
}

#[async_trait]
impl AssociationStore for PostgresStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    fn locks_endpoint_records(&self) -> bool {
        true
    }

    async fn begin(&self) -> Result<Box<dyn AssociationTxn>, MotorpoolError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin", e))?;
        Ok(Box::new(PostgresAssociationTxn { tx }))
    }
}

struct PostgresAssociationTxn {
    tx: Transaction<'static, Postgres>,
}

impl PostgresAssociationTxn {
    async fn lock_row(
        &mut self,
        table: &'static str,
        kind: EntityKind,
        id: i64,
    ) -> Result<(), MotorpoolError> {
        let locked = sqlx::query(&format!("SELECT id FROM {table} WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| store_error("row lock", e))?;
        match locked {
            Some(_) => Ok(()),
            None => Err(MotorpoolError::not_found(kind, id)),
        }
    }

    async fn delete_where(
        &mut self,
        column: &'static str,
        id: i64,
    ) -> Result<usize, MotorpoolError> {
        let result = sqlx::query(&format!(
            "DELETE FROM motorpool_assignments WHERE {column} = $1"
        ))
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_error("assignment delete", e))?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl AssociationTxn for PostgresAssociationTxn {
    async fn lock_endpoints(
        &mut self,
        person: PersonId,
        vehicle: VehicleId,
    ) -> Result<(), MotorpoolError> {
        self.lock_row("motorpool_people", EntityKind::Person, person.get())
            .await?;
        self.lock_row("motorpool_vehicles", EntityKind::Vehicle, vehicle.get())
            .await
    }

    async fn vehicles_of(&mut self, person: PersonId) -> Result<Vec<VehicleId>, MotorpoolError> {
        let rows = sqlx::query(
            "SELECT vehicle_id FROM motorpool_assignments WHERE person_id = $1 ORDER BY vehicle_id",
        )
        .bind(person.get())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| store_error("assignment select", e))?;
        rows.iter()
            .map(|row| decode(row, "vehicle_id").map(VehicleId))
            .collect()
    }

    async fn people_of(&mut self, vehicle: VehicleId) -> Result<Vec<PersonId>, MotorpoolError> {
        let rows = sqlx::query(
            "SELECT person_id FROM motorpool_assignments WHERE vehicle_id = $1 ORDER BY person_id",
        )
        .bind(vehicle.get())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| store_error("assignment select", e))?;
        rows.iter()
            .map(|row| decode(row, "person_id").map(PersonId))
            .collect()
    }

    async fn contains(&mut self, edge: Edge) -> Result<bool, MotorpoolError> {
        let row = sqlx::query(
            "SELECT 1 FROM motorpool_assignments WHERE person_id = $1 AND vehicle_id = $2",
        )
        .bind(edge.person.get())
        .bind(edge.vehicle.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error("assignment select", e))?;
        Ok(row.is_some())
    }

    async fn insert(&mut self, edge: Edge) -> Result<(), MotorpoolError> {
        sqlx::query(
            "INSERT INTO motorpool_assignments (person_id, vehicle_id, assigned_at) VALUES ($1, $2, $3)",
        )
        .bind(edge.person.get())
        .bind(edge.vehicle.get())
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_error("assignment insert", e))?;
        Ok(())
    }

    async fn remove(&mut self, edge: Edge) -> Result<bool, MotorpoolError> {
        let result = sqlx::query(
            "DELETE FROM motorpool_assignments WHERE person_id = $1 AND vehicle_id = $2",
        )
        .bind(edge.person.get())
        .bind(edge.vehicle.get())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_error("assignment delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_person(&mut self, person: PersonId) -> Result<usize, MotorpoolError> {
        self.delete_where("person_id", person.get()).await
    }

    async fn remove_vehicle(&mut self, vehicle: VehicleId) -> Result<usize, MotorpoolError> {
        self.delete_where("vehicle_id", vehicle.get()).await
    }

    async fn edge_count(&mut self) -> Result<usize, MotorpoolError> {
        let row = sqlx::query("SELECT COUNT(*) AS edges FROM motorpool_assignments")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| store_error("assignment count", e))?;
        let edges: i64 = decode(&row, "edges")?;
        Ok(edges.max(0) as usize)
    }

    async fn commit(self: Box<Self>) -> Result<(), MotorpoolError> {
        let Self { tx } = *self;
        tx.commit().await.map_err(|e| store_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), MotorpoolError> {
        let Self { tx } = *self;
        tx.rollback().await.map_err(|e| store_error("rollback", e))
    }
}
