use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a person record.
    PersonId
);
entity_id!(
    /// Identifier of a vehicle record.
    VehicleId
);

/// The two record kinds tracked by the motorpool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Vehicle,
}

impl EntityKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Person {
    /// Human-readable label used in every assignment message.
    pub fn label(&self) -> &str {
        &self.name
    }
}

/// Field set accepted when creating or replacing a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDraft {
    pub name: String,
    pub email: String,
}

impl PersonDraft {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    /// `"{year} {make} {model}"`, e.g. `1970 Dodge Charger R/T`.
    pub fn label(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }
}

/// Field set accepted when creating or replacing a vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleDraft {
    pub make: String,
    pub model: String,
    pub year: i32,
}

impl VehicleDraft {
    pub fn new(make: impl Into<String>, model: impl Into<String>, year: i32) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
            year,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }
}

/// A recorded (person, vehicle) association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub person: PersonId,
    pub vehicle: VehicleId,
}

impl Edge {
    pub fn new(person: PersonId, vehicle: VehicleId) -> Self {
        Self { person, vehicle }
    }
}

/// Person with the vehicle they currently drive, resolved from the association store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonView {
    #[serde(flatten)]
    pub person: Person,
    pub vehicle: Option<Vehicle>,
}

/// Vehicle with its current driver, resolved from the association store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleView {
    #[serde(flatten)]
    pub vehicle: Vehicle,
    pub driver: Option<Person>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_label_is_year_make_model() {
        let now = Utc::now();
        let vehicle = Vehicle {
            id: VehicleId(1),
            make: "Dodge".to_string(),
            model: "Charger R/T".to_string(),
            year: 1970,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(vehicle.label(), "1970 Dodge Charger R/T");
        assert_eq!(
            VehicleDraft::new("Dodge", "Charger R/T", 1970).label(),
            vehicle.label()
        );
    }

    #[test]
    fn person_view_flattens_record_fields() {
        let now = Utc::now();
        let view = PersonView {
            person: Person {
                id: PersonId(7),
                name: "Chuck Norris".to_string(),
                email: "chuck.norris@punch.kick".to_string(),
                created_at: now,
                updated_at: now,
            },
            vehicle: None,
        };

        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value.get("id").and_then(|v| v.as_i64()), Some(7));
        assert_eq!(
            value.get("name").and_then(|v| v.as_str()),
            Some("Chuck Norris")
        );
        assert!(value.get("vehicle").map(|v| v.is_null()).unwrap_or(false));
    }
}
