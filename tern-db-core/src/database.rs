//! Database registry
//!
//! Owns named namespaces behind shared handles and the optional storage
//! root. The leader syncer drives it through create-temporary /
//! apply-chunks / rename-over-live; queries resolve read snapshots through
//! it.

use crate::error::{Error, Result};
use crate::namespace::{Namespace, NamespaceHandle, ReplicationState};
use crate::storage::{self, ReplicationConf, DEFAULT_ENGINE};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Database-level options
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// When set, namespaces materialize their directory layout here
    pub storage_root: Option<PathBuf>,
    pub replication: ReplicationConf,
}

/// Registry of namespaces
#[derive(Debug, Default)]
pub struct Database {
    config: DatabaseConfig,
    namespaces: RwLock<FxHashMap<String, Arc<NamespaceHandle>>>,
    ns_version_counter: AtomicI64,
    tmp_counter: AtomicI64,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            namespaces: RwLock::new(FxHashMap::default()),
            ns_version_counter: AtomicI64::new(1),
            tmp_counter: AtomicI64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(DatabaseConfig::default())
    }

    fn next_ns_version(&self) -> i64 {
        self.ns_version_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a namespace; existing name is a conflict
    pub fn create_namespace(&self, name: &str) -> Result<Arc<NamespaceHandle>> {
        let mut map = self.namespaces.write();
        if map.contains_key(name) {
            return Err(Error::conflict(format!("namespace '{}' already exists", name)));
        }
        if let Some(root) = &self.config.storage_root {
            storage::create_namespace_dir(root, name, DEFAULT_ENGINE, &self.config.replication)?;
        }
        let ns = Namespace::new(name, self.next_ns_version());
        let handle = Arc::new(NamespaceHandle::new(ns));
        map.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Create with a caller-chosen version epoch (leader sync path)
    pub fn create_namespace_with_version(
        &self,
        name: &str,
        ns_version: i64,
    ) -> Result<Arc<NamespaceHandle>> {
        let handle = self.create_namespace(name)?;
        handle.write(|ns| {
            let mut repl = ns.repl_state();
            repl.ns_version = ns_version;
            ns.set_repl_state(repl);
            Ok(())
        })?;
        Ok(handle)
    }

    /// Fetch an existing namespace handle
    pub fn namespace(&self, name: &str) -> Result<Arc<NamespaceHandle>> {
        self.namespaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("namespace '{}' not found", name)))
    }

    /// Fetch or create
    pub fn open_namespace(&self, name: &str) -> Result<Arc<NamespaceHandle>> {
        if let Ok(h) = self.namespace(name) {
            return Ok(h);
        }
        self.create_namespace(name)
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.read().keys().cloned().collect()
    }

    pub fn get_repl_state(&self, name: &str) -> Result<ReplicationState> {
        Ok(self.namespace(name)?.read().repl_state())
    }

    /// Create a temporary namespace shadowing `base`, named uniquely.
    /// Used by forced leader sync; renamed over the live one on success.
    pub fn create_temporary_namespace(&self, base: &str, ns_version: i64) -> Result<String> {
        let tmp_name = format!(
            "@{}_tmp_{}",
            base,
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        );
        let handle = self.create_namespace_with_version(&tmp_name, ns_version)?;
        handle.write(|ns| {
            ns.set_temporary(true);
            Ok(())
        })?;
        Ok(tmp_name)
    }

    /// Drop a namespace and its storage directory
    pub fn drop_namespace(&self, name: &str) -> Result<()> {
        let removed = self.namespaces.write().remove(name);
        if removed.is_none() {
            return Err(Error::not_found(format!("namespace '{}' not found", name)));
        }
        if let Some(root) = &self.config.storage_root {
            storage::remove_namespace_dir(root, name)?;
        }
        info!(ns = name, "namespace dropped");
        Ok(())
    }

    /// Rename `from` over `to`, atomically replacing the destination handle.
    /// The renamed namespace sheds its temporary flag.
    pub fn rename_namespace(&self, from: &str, to: &str) -> Result<()> {
        let mut map = self.namespaces.write();
        let handle = map
            .remove(from)
            .ok_or_else(|| Error::not_found(format!("namespace '{}' not found", from)))?;
        handle.write(|ns| {
            ns.set_name(to.to_string());
            ns.set_temporary(false);
            Ok(())
        })?;
        map.insert(to.to_string(), handle);
        drop(map);
        if let Some(root) = &self.config.storage_root {
            storage::rename_namespace_dir(root, from, to)?;
        }
        info!(from, to, "namespace renamed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::payload::PayloadField;
    use crate::index::{IndexDef, IndexKind};
    use crate::value::ValueType;

    #[test]
    fn create_conflict_and_drop() {
        let db = Database::in_memory();
        db.create_namespace("books").unwrap();
        assert!(matches!(
            db.create_namespace("books"),
            Err(Error::Conflict(_))
        ));
        db.drop_namespace("books").unwrap();
        assert!(matches!(db.namespace("books"), Err(Error::NotFound(_))));
    }

    #[test]
    fn temporary_rename_over_live() {
        let db = Database::in_memory();
        let live = db.create_namespace("books").unwrap();
        live.write(|ns| {
            ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
            let f = ns.payload_type().field_id("id").unwrap();
            ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![f]))?;
            ns.upsert(&json!({"id": 1}))?;
            Ok(())
        })
        .unwrap();

        let tmp = db.create_temporary_namespace("books", 42).unwrap();
        let tmp_handle = db.namespace(&tmp).unwrap();
        assert!(tmp_handle.read().is_temporary());
        tmp_handle
            .write(|ns| {
                ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
                let f = ns.payload_type().field_id("id").unwrap();
                ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![f]))?;
                ns.upsert(&json!({"id": 7}))?;
                ns.upsert(&json!({"id": 8}))?;
                Ok(())
            })
            .unwrap();

        db.rename_namespace(&tmp, "books").unwrap();
        let ns = db.namespace("books").unwrap().read();
        assert_eq!(ns.total_rows(), 2);
        assert_eq!(ns.name(), "books");
        assert!(!ns.is_temporary());
        assert!(db.namespace(&tmp).is_err());
    }

    #[test]
    fn storage_layout_side_effects() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::new(DatabaseConfig {
            storage_root: Some(tmp.path().to_path_buf()),
            replication: ReplicationConf {
                cluster_id: 1,
                server_id: 2,
            },
        });
        db.create_namespace("books").unwrap();
        assert!(tmp.path().join("books").join(".terndb.storage").exists());
        db.drop_namespace("books").unwrap();
        assert!(!tmp.path().join("books").exists());
    }
}
