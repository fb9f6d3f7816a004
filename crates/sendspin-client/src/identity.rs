//! Persistent client identity
//!
//! The server recognises returning clients by id, so the id is generated once
//! and stored in the platform data directory.

use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CLIENT_ID_FILE: &str = "client_id";

/// Platform data directory for the client
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("io", "sendspin", "sendspin-client")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| {
            directories::BaseDirs::new()
                .map(|d| d.home_dir().join(".sendspin"))
                .unwrap_or_else(|| PathBuf::from(".").join(".sendspin"))
        })
}

/// Read the persisted client id from `dir`, creating one if absent
pub fn load_or_create_client_id(dir: &Path) -> Result<String> {
    let path = dir.join(CLIENT_ID_FILE);

    if path.exists() {
        let id = std::fs::read_to_string(&path)?.trim().to_string();
        if !id.is_empty() {
            debug!("Loaded client id from {}", path.display());
            return Ok(id);
        }
    }

    std::fs::create_dir_all(dir)?;
    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &id)?;
    info!(client_id = %id, "Generated new client id");

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_client_id(dir.path()).unwrap();
        let second = load_or_create_client_id(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_empty_id_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CLIENT_ID_FILE), "  \n").unwrap();
        let id = load_or_create_client_id(dir.path()).unwrap();
        assert!(!id.is_empty());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let id = load_or_create_client_id(&nested).unwrap();
        assert_eq!(
            std::fs::read_to_string(nested.join(CLIENT_ID_FILE)).unwrap(),
            id
        );
    }
}
