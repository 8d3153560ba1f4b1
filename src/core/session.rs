/// Local key/value store and the user session kept in it
///
/// The store is a single JSON object on disk. Values are strings, the same
/// shape browser local storage would hold, so JSON payloads are stored
/// serialized.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use crate::utils::{CONSULTATIONS_DATA_KEY, USER_METADATA_KEY};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize store file {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "doctor" => Ok(Role::Doctor),
            "patient" => Ok(Role::Patient),
            other => Err(format!("unknown role `{}` (expected doctor or patient)", other)),
        }
    }
}

/// Cached identity of the signed-in user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(default)]
    pub onboarding_completed: bool,
}

impl UserMetadata {
    /// Onboarded with a known role
    pub fn is_complete(&self) -> bool {
        self.onboarding_completed && self.role.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(entries).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, content).map_err(io_err)
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), Value::String(value.to_string()));
        self.write_all(&entries)
    }

    /// Remove a key; returns whether it was present
    pub fn remove_item(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.read_all()?;
        let removed = entries.remove(key).is_some();
        if removed {
            self.write_all(&entries)?;
        }
        Ok(removed)
    }

    /// Read a serialized JSON value; malformed content reads as absent
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.get_item(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "ignoring malformed stored value");
                Ok(None)
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set_item(key, &raw)
    }

    /// Stored session, or an empty one when nothing is stored
    pub fn user_metadata(&self) -> Result<UserMetadata, StoreError> {
        Ok(self.get_json(USER_METADATA_KEY)?.unwrap_or_default())
    }

    pub fn save_user_metadata(&self, metadata: &UserMetadata) -> Result<(), StoreError> {
        self.set_json(USER_METADATA_KEY, metadata)
    }

    /// Session of a fully onboarded user, if any
    pub fn current_user(&self) -> Result<Option<UserMetadata>, StoreError> {
        let metadata = self.user_metadata()?;
        Ok(metadata.is_complete().then_some(metadata))
    }

    pub fn sign_out(&self) -> Result<bool, StoreError> {
        self.remove_item(USER_METADATA_KEY)
    }

    /// Hand a fetched consultations payload to the list view
    pub fn stage_consultations(&self, payload: &Value) -> Result<(), StoreError> {
        self.set_json(CONSULTATIONS_DATA_KEY, payload)
    }

    /// Consume the staged consultations; the key is cleared whenever present
    pub fn take_consultations(&self) -> Result<Option<Value>, StoreError> {
        let Some(raw) = self.get_item(CONSULTATIONS_DATA_KEY)? else {
            return Ok(None);
        };
        self.remove_item(CONSULTATIONS_DATA_KEY)?;

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(error = %e, "staged consultations were malformed, treating as empty");
                Ok(Some(Value::Array(Vec::new())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path().join("nested").join("storage.json"));
        (dir, store)
    }

    fn doctor() -> UserMetadata {
        UserMetadata {
            id: "d-1".to_string(),
            name: "Dr. Ada".to_string(),
            role: Some(Role::Doctor),
            language: "en".to_string(),
            specialization: Some("Cardiology".to_string()),
            onboarding_completed: true,
        }
    }

    #[test]
    fn test_items_round_trip_through_file() {
        let (_dir, store) = store();
        assert_eq!(store.get_item("missing").unwrap(), None);

        store.set_item("a", "1").unwrap();
        store.set_item("b", "two").unwrap();
        assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));

        let reopened = LocalStore::open(store.path().to_path_buf());
        assert_eq!(reopened.get_item("b").unwrap().as_deref(), Some("two"));
        assert!(reopened.remove_item("a").unwrap());
        assert!(!reopened.remove_item("a").unwrap());
    }

    #[test]
    fn test_user_metadata_stored_as_json() {
        let (_dir, store) = store();
        store.save_user_metadata(&doctor()).unwrap();

        let raw = store.get_item(USER_METADATA_KEY).unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["onboarding_completed"], json!(true));
        assert_eq!(value["role"], json!("doctor"));

        assert_eq!(store.current_user().unwrap(), Some(doctor()));
    }

    #[test]
    fn test_incomplete_session_is_not_current() {
        let (_dir, store) = store();
        assert_eq!(store.user_metadata().unwrap(), UserMetadata::default());

        let mut metadata = doctor();
        metadata.onboarding_completed = false;
        store.save_user_metadata(&metadata).unwrap();
        assert_eq!(store.current_user().unwrap(), None);
    }

    #[test]
    fn test_sign_out_clears_session() {
        let (_dir, store) = store();
        store.save_user_metadata(&doctor()).unwrap();
        assert!(store.sign_out().unwrap());
        assert_eq!(store.current_user().unwrap(), None);
    }

    #[test]
    fn test_staged_consultations_cleared_exactly_once() {
        let (_dir, store) = store();
        store.stage_consultations(&json!(["c-1", "c-2"])).unwrap();

        assert_eq!(store.take_consultations().unwrap(), Some(json!(["c-1", "c-2"])));
        assert_eq!(store.get_item(CONSULTATIONS_DATA_KEY).unwrap(), None);
        assert_eq!(store.take_consultations().unwrap(), None);
    }

    #[test]
    fn test_malformed_staged_consultations_still_cleared() {
        let (_dir, store) = store();
        store.set_item(CONSULTATIONS_DATA_KEY, "{not json").unwrap();

        assert_eq!(store.take_consultations().unwrap(), Some(json!([])));
        assert_eq!(store.get_item(CONSULTATIONS_DATA_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_store_file_is_an_error() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "[1, 2").unwrap();
        assert!(matches!(store.get_item("a"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_write_failures_are_not_reported_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = LocalStore::open(blocker.join("storage.json"));

        let err = store.set_item("a", "1").unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!err.to_string().contains("not valid JSON"));

        let source = serde_json::from_str::<Value>("{").unwrap_err();
        let err = StoreError::Serialize {
            path: PathBuf::from("storage.json"),
            source,
        };
        assert!(err.to_string().starts_with("failed to serialize store file storage.json"));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Doctor".parse::<Role>().unwrap(), Role::Doctor);
        assert_eq!(" patient ".parse::<Role>().unwrap(), Role::Patient);
        assert!("nurse".parse::<Role>().is_err());
        assert_eq!(Role::Patient.to_string(), "patient");
    }
}
