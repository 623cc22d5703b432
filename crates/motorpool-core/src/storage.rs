/// Persistence backend configuration shared by record and association stores.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// Keep people, vehicles, and assignments in process memory only.
    #[default]
    Memory,
    /// Persist everything in PostgreSQL; the schema is created on bootstrap.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_backend() {
        assert_eq!(StorageConfig::default().label(), "memory");
        assert_eq!(
            StorageConfig::postgres("postgres://localhost/motorpool", 5).label(),
            "postgres"
        );
    }
}
