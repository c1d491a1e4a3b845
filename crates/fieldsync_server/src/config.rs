//! Server configuration.

/// An entity kind the server stores: the singular object name used on the
/// changeset path and the table name used on the generic path and in pulls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKind {
    /// Object name ("job").
    pub object_name: String,
    /// Table name ("jobs").
    pub table: String,
}

impl EntityKind {
    /// Creates an entity kind.
    pub fn new(object_name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            table: table.into(),
        }
    }
}

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum items in one push.
    pub max_push_batch: usize,
    /// Entity kinds accepted by push and returned by pull.
    pub entity_kinds: Vec<EntityKind>,
    /// Reject changesets from actors not registered for the tenant.
    pub require_registered_actors: bool,
}

impl ServerConfig {
    /// Creates a configuration with no entity kinds.
    pub fn new() -> Self {
        Self {
            max_push_batch: 100,
            entity_kinds: Vec::new(),
            require_registered_actors: true,
        }
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Adds an entity kind.
    pub fn with_entity_kind(mut self, object_name: &str, table: &str) -> Self {
        self.entity_kinds.push(EntityKind::new(object_name, table));
        self
    }

    /// Enables or disables the actor registry check.
    pub fn with_registered_actors(mut self, required: bool) -> Self {
        self.require_registered_actors = required;
        self
    }

    /// Looks up a kind by object name.
    pub fn kind_for_object(&self, object_name: &str) -> Option<&EntityKind> {
        self.entity_kinds
            .iter()
            .find(|k| k.object_name == object_name)
    }

    /// Looks up a kind by table name.
    pub fn kind_for_table(&self, table: &str) -> Option<&EntityKind> {
        self.entity_kinds.iter().find(|k| k.table == table)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
            .with_entity_kind("job", "jobs")
            .with_entity_kind("customer", "customers")
            .with_entity_kind("site", "sites")
            .with_entity_kind("asset", "assets")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_push_batch, 100);
        assert!(config.require_registered_actors);
        assert_eq!(config.kind_for_object("job").unwrap().table, "jobs");
        assert_eq!(config.kind_for_table("customers").unwrap().object_name, "customer");
        assert!(config.kind_for_object("invoice").is_none());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_push_batch(5)
            .with_entity_kind("invoice", "invoices")
            .with_registered_actors(false);

        assert_eq!(config.max_push_batch, 5);
        assert_eq!(config.entity_kinds.len(), 1);
        assert!(!config.require_registered_actors);
    }
}
