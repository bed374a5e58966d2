//! Session persistence and the device identity sent during the handshake.
//!
//! The engine touches the store only at connect time and after a completed
//! sign-in, so the trait is synchronous and implementations stay simple.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Device identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Device descriptor presented to the service in the opening handshake.
///
/// Defaults mirror the official web client. The per-installation `deviceId`
/// is not part of this struct; it is minted once and kept in the
/// [`StoredSession`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: String,
    pub locale: String,
    pub os_version: String,
    pub device_name: String,
    pub header_user_agent: String,
    pub app_version: String,
    pub screen: String,
    pub timezone: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_type: "WEB".into(),
            locale: "ru".into(),
            os_version: "Linux".into(),
            device_name: "Chrome".into(),
            header_user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36"
                .into(),
            app_version: "25.10.13".into(),
            screen: "1080x1920 1.0x".into(),
            timezone: "Europe/Moscow".into(),
        }
    }
}

impl DeviceInfo {
    /// The `userAgent` object of the handshake payload.
    pub(crate) fn to_payload(&self) -> Value {
        json!({
            "deviceType": self.device_type,
            "locale": self.locale,
            "deviceLocale": self.locale,
            "osVersion": self.os_version,
            "deviceName": self.device_name,
            "headerUserAgent": self.header_user_agent,
            "appVersion": self.app_version,
            "screen": self.screen,
            "timezone": self.timezone,
        })
    }
}

/// Own profile, decoded from the login response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub names: Vec<ProfileName>,
}

/// One display-name record of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileName {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session state persisted between runs.
///
/// Holding a `token` skips the interactive login on the next connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub device_id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            token: None,
            phone: None,
            updated_at: Utc::now(),
        }
    }
}

/// Where session state lives between runs.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> io::Result<Option<StoredSession>>;
    fn save(&self, session: &StoredSession) -> io::Result<()>;
}

/// Keeps the session for the process lifetime only. The default store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: RwLock<Option<StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> io::Result<Option<StoredSession>> {
        Ok(self.session.read().clone())
    }

    fn save(&self, session: &StoredSession) -> io::Result<()> {
        *self.session.write() = Some(session.clone());
        Ok(())
    }
}

/// JSON-file store: `session.json` under the given directory.
pub struct FileSessionStore {
    path: PathBuf,
    cache: RwLock<Option<StoredSession>>,
}

impl FileSessionStore {
    /// Open or create the store under `dir`.
    pub fn new(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("session.json");

        let cache = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            // A corrupt file means a fresh interactive login, not a crash.
            serde_json::from_str(&raw).ok()
        } else {
            None
        };

        tracing::info!(
            path = %path.display(),
            resumable = cache.as_ref().is_some_and(|s: &StoredSession| s.token.is_some()),
            "session store loaded"
        );

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> io::Result<Option<StoredSession>> {
        Ok(self.cache.read().clone())
    }

    fn save(&self, session: &StoredSession) -> io::Result<()> {
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, json)?;
        *self.cache.write() = Some(session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_payload_uses_wire_field_names() {
        let payload = DeviceInfo::default().to_payload();
        assert_eq!(payload["deviceType"], "WEB");
        assert_eq!(payload["deviceLocale"], "ru");
        assert_eq!(payload["appVersion"], "25.10.13");
        assert_eq!(payload["timezone"], "Europe/Moscow");
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySessionStore::new();
        assert!(store.load().unwrap().is_none());

        let mut session = StoredSession::new("dev-1");
        session.token = Some("tok".into());
        store.save(&session).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.device_id, "dev-1");
        assert_eq!(loaded.token.as_deref(), Some("tok"));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileSessionStore::new(dir.path()).unwrap();
        let mut session = StoredSession::new("dev-2");
        session.token = Some("tok".into());
        session.phone = Some("+79991234567".into());
        store.save(&session).unwrap();
        drop(store);

        let reopened = FileSessionStore::new(dir.path()).unwrap();
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded.device_id, "dev-2");
        assert_eq!(loaded.token.as_deref(), Some("tok"));
        assert_eq!(loaded.phone.as_deref(), Some("+79991234567"));
    }

    #[test]
    fn corrupt_file_starts_clean() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session.json"), "not json").unwrap();

        let store = FileSessionStore::new(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn profile_decodes_from_login_shape() {
        let value = json!({
            "id": 7,
            "phone": "+79991234567",
            "names": [{"name": "Test User", "firstName": "Test"}],
        });
        let profile: Profile = serde_json::from_value(value).unwrap();
        assert_eq!(profile.id, 7);
        assert_eq!(profile.names[0].name.as_deref(), Some("Test User"));
    }
}
