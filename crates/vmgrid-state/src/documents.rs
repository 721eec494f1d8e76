//! Namespace and metadata documents.
//!
//! Both are opaque JSON owned by the caller. Neither cascades: deleting a
//! namespace leaves its instances alone, and metadata outlives its object
//! unless the object is hard deleted through this crate.

use tracing::debug;

use crate::db::ClusterDb;
use crate::error::StateResult;

const NAMESPACE: &str = "namespace";
const METADATA: &str = "metadata";

impl ClusterDb {
    // ── Namespaces ─────────────────────────────────────────────────

    pub fn get_namespaces(&self) -> StateResult<Vec<(String, serde_json::Value)>> {
        Ok(self.store().get_all(NAMESPACE, None)?)
    }

    pub fn get_namespace(&self, namespace: &str) -> StateResult<Option<serde_json::Value>> {
        self.read(NAMESPACE, None, namespace)
    }

    pub fn persist_namespace(&self, namespace: &str, data: &serde_json::Value) -> StateResult<()> {
        self.write(NAMESPACE, None, namespace, data, None)?;
        debug!(%namespace, "namespace persisted");
        Ok(())
    }

    pub fn delete_namespace(&self, namespace: &str) -> StateResult<bool> {
        self.remove(NAMESPACE, None, namespace)
    }

    // ── Metadata ───────────────────────────────────────────────────

    pub fn get_metadata(&self, object_type: &str, name: &str) -> StateResult<Option<serde_json::Value>> {
        self.read(METADATA, Some(object_type), name)
    }

    pub fn persist_metadata(&self, object_type: &str, name: &str, data: &serde_json::Value) -> StateResult<()> {
        self.write(METADATA, Some(object_type), name, data, None)?;
        debug!(%object_type, %name, "metadata persisted");
        Ok(())
    }

    pub fn delete_metadata(&self, object_type: &str, name: &str) -> StateResult<bool> {
        self.remove(METADATA, Some(object_type), name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use vmgrid_core::ClusterConfig;
    use vmgrid_store::RedbStore;

    use super::*;

    fn test_db() -> ClusterDb {
        let store = RedbStore::open_in_memory().unwrap();
        ClusterDb::new(Arc::new(store), ClusterConfig::default())
    }

    #[test]
    fn namespace_crud() {
        let db = test_db();
        db.persist_namespace("prod", &json!({"keys": {"ci": "hash"}})).unwrap();
        db.persist_namespace("dev", &json!({})).unwrap();

        assert_eq!(db.get_namespace("prod").unwrap(), Some(json!({"keys": {"ci": "hash"}})));
        let names: Vec<String> = db.get_namespaces().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["dev", "prod"]);

        assert!(db.delete_namespace("prod").unwrap());
        assert!(db.get_namespace("prod").unwrap().is_none());
    }

    #[test]
    fn metadata_is_scoped_by_object_type() {
        let db = test_db();
        db.persist_metadata("instance", "abc", &json!({"role": "web"})).unwrap();
        db.persist_metadata("network", "abc", &json!({"role": "mgmt"})).unwrap();

        assert_eq!(db.get_metadata("instance", "abc").unwrap(), Some(json!({"role": "web"})));
        assert!(db.delete_metadata("instance", "abc").unwrap());
        assert_eq!(db.get_metadata("network", "abc").unwrap(), Some(json!({"role": "mgmt"})));
    }
}
