//! On-disk namespace layout
//!
//! Each namespace gets a directory under the database root holding a
//! `.terndb.storage` placeholder naming the key/value engine, and a
//! `replication.conf` with the node's replication coordinates. The actual
//! LSM store behind the placeholder is an external collaborator; this module
//! only owns the layout.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const STORAGE_PLACEHOLDER: &str = ".terndb.storage";
pub const REPLICATION_CONF: &str = "replication.conf";
pub const DEFAULT_ENGINE: &str = "leveldb";

/// Replication settings persisted next to the data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationConf {
    pub cluster_id: i32,
    pub server_id: i32,
}

impl ReplicationConf {
    /// Minimal YAML subset: `key: value` lines
    fn to_yaml(&self) -> String {
        format!(
            "cluster_id: {}\nserver_id: {}\n",
            self.cluster_id, self.server_id
        )
    }

    fn from_yaml(text: &str) -> Result<Self> {
        let mut conf = ReplicationConf::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(Error::storage(format!("malformed conf line '{}'", line)));
            };
            let value = value.trim();
            match key.trim() {
                "cluster_id" => {
                    conf.cluster_id = value
                        .parse()
                        .map_err(|_| Error::storage(format!("bad cluster_id '{}'", value)))?;
                }
                "server_id" => {
                    conf.server_id = value
                        .parse()
                        .map_err(|_| Error::storage(format!("bad server_id '{}'", value)))?;
                }
                _ => {}
            }
        }
        Ok(conf)
    }
}

fn ns_dir(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// Create the namespace directory with its placeholder and conf files.
/// Idempotent for an existing directory with a matching engine.
pub fn create_namespace_dir(
    root: &Path,
    name: &str,
    engine: &str,
    conf: &ReplicationConf,
) -> Result<PathBuf> {
    let dir = ns_dir(root, name);
    fs::create_dir_all(&dir)?;
    let placeholder = dir.join(STORAGE_PLACEHOLDER);
    if placeholder.exists() {
        let existing = fs::read_to_string(&placeholder)?;
        if existing.trim() != engine {
            return Err(Error::storage(format!(
                "namespace '{}' was created with engine '{}', requested '{}'",
                name,
                existing.trim(),
                engine
            )));
        }
    } else {
        fs::write(&placeholder, engine)?;
    }
    fs::write(dir.join(REPLICATION_CONF), conf.to_yaml())?;
    Ok(dir)
}

/// Read the engine name from the placeholder
pub fn read_engine(root: &Path, name: &str) -> Result<String> {
    let text = fs::read_to_string(ns_dir(root, name).join(STORAGE_PLACEHOLDER))?;
    Ok(text.trim().to_string())
}

/// Read replication.conf
pub fn read_replication_conf(root: &Path, name: &str) -> Result<ReplicationConf> {
    let text = fs::read_to_string(ns_dir(root, name).join(REPLICATION_CONF))?;
    ReplicationConf::from_yaml(&text)
}

/// Drop the namespace directory and everything in it
pub fn remove_namespace_dir(root: &Path, name: &str) -> Result<()> {
    let dir = ns_dir(root, name);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

/// Rename a namespace directory, replacing the destination
pub fn rename_namespace_dir(root: &Path, from: &str, to: &str) -> Result<()> {
    let src = ns_dir(root, from);
    if !src.exists() {
        return Ok(());
    }
    let dst = ns_dir(root, to);
    if dst.exists() {
        fs::remove_dir_all(&dst)?;
    }
    fs::rename(src, dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let conf = ReplicationConf {
            cluster_id: 3,
            server_id: 7,
        };
        create_namespace_dir(tmp.path(), "books", DEFAULT_ENGINE, &conf).unwrap();
        assert_eq!(read_engine(tmp.path(), "books").unwrap(), "leveldb");
        assert_eq!(read_replication_conf(tmp.path(), "books").unwrap(), conf);
    }

    #[test]
    fn engine_mismatch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let conf = ReplicationConf::default();
        create_namespace_dir(tmp.path(), "books", "leveldb", &conf).unwrap();
        assert!(create_namespace_dir(tmp.path(), "books", "rocksdb", &conf).is_err());
    }

    #[test]
    fn drop_and_rename() {
        let tmp = tempfile::tempdir().unwrap();
        let conf = ReplicationConf::default();
        create_namespace_dir(tmp.path(), "books_tmp", DEFAULT_ENGINE, &conf).unwrap();
        create_namespace_dir(tmp.path(), "books", DEFAULT_ENGINE, &conf).unwrap();
        rename_namespace_dir(tmp.path(), "books_tmp", "books").unwrap();
        assert!(!tmp.path().join("books_tmp").exists());
        assert!(tmp.path().join("books").exists());
        remove_namespace_dir(tmp.path(), "books").unwrap();
        assert!(!tmp.path().join("books").exists());
    }
}
