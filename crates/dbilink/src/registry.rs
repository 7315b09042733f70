//! Named registry of connected interfaces.
//!
//! Applications talking to several databases keep one [`Dbi`] per
//! connection string. The registry is explicit: the caller constructs
//! it, registers engines under names of its choosing, and owns its
//! lifetime. Nothing global, nothing created at import time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::dispatch::Dbi;

/// Explicit name-to-interface registry.
#[derive(Default)]
pub struct DbiRegistry {
    engines: HashMap<String, Arc<Dbi>>,
}

impl DbiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interface under a name, returning a shared handle.
    /// Re-registering a name replaces the previous entry.
    pub fn register(&mut self, name: impl Into<String>, dbi: Dbi) -> Arc<Dbi> {
        let name = name.into();
        let dbi = Arc::new(dbi);
        info!(name = %name, family = %dbi.family(), "registered database interface");
        self.engines.insert(name, Arc::clone(&dbi));
        dbi
    }

    /// Look up a registered interface by name.
    pub fn get(&self, name: &str) -> Option<Arc<Dbi>> {
        self.engines.get(name).cloned()
    }

    /// Remove an interface from the registry. Existing handles stay
    /// usable until dropped.
    pub fn remove(&mut self, name: &str) -> Option<Arc<Dbi>> {
        self.engines.remove(name)
    }

    /// Registered names, unordered.
    pub fn names(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Close every registered pool and clear the registry.
    pub async fn close_all(&mut self) {
        for (name, dbi) in self.engines.drain() {
            info!(name = %name, "closing database interface");
            dbi.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Backend, QueryOptions};
    use crate::descriptor::BackendFamily;
    use crate::error::Result;
    use crate::frame::QueryOutput;
    use crate::value::Params;
    use async_trait::async_trait;

    struct StubBackend;

    #[async_trait]
    impl Backend for StubBackend {
        fn family(&self) -> BackendFamily {
            BackendFamily::Sqlite
        }

        fn database_name(&self) -> &str {
            "stub.db"
        }

        async fn execute_query(
            &self,
            _stmt: &str,
            _params: Option<&Params>,
            _opts: QueryOptions,
        ) -> Result<QueryOutput> {
            Ok(QueryOutput::Absent)
        }

        async fn table_exists(
            &self,
            _table: &str,
            _database: Option<&str>,
            _verbose: bool,
        ) -> Result<bool> {
            Ok(false)
        }

        async fn close(&self) {}
    }

    fn stub_dbi() -> Dbi {
        Dbi::from_backend(Box::new(StubBackend))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let mut registry = DbiRegistry::new();
        registry.register("stores", stub_dbi());

        let handle = registry.get("stores").expect("registered engine");
        assert_eq!(handle.database_name(), "stub.db");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), ["stores"]);
    }

    #[tokio::test]
    async fn test_reregister_replaces() {
        let mut registry = DbiRegistry::new();
        registry.register("db", stub_dbi());
        registry.register("db", stub_dbi());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_clears() {
        let mut registry = DbiRegistry::new();
        registry.register("a", stub_dbi());
        registry.register("b", stub_dbi());
        registry.close_all().await;
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dbi_debug_names_family_and_database() {
        let rendered = format!("{:?}", stub_dbi());
        assert!(rendered.contains("Sqlite"), "{}", rendered);
        assert!(rendered.contains("stub.db"), "{}", rendered);
    }

    #[test]
    fn test_engine_accessor_exposes_backend() {
        let dbi = stub_dbi();
        assert_eq!(dbi.engine().family(), BackendFamily::Sqlite);
        assert_eq!(dbi.engine().database_name(), dbi.database_name());
    }

    #[tokio::test]
    async fn test_default_operations_are_tagged_unsupported() {
        let dbi = stub_dbi();
        let err = dbi.get_parameter_names("sp_whatever").await.unwrap_err();
        assert!(err.to_string().contains("get_parameter_names"));
        let err = dbi.backup("guitars", false).await.unwrap_err();
        assert!(err.to_string().contains("backup"));
    }
}
