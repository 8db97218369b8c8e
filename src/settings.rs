use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;
use url::Url;

use crate::domain::Settings;

pub const STORAGE_DIR_NAME: &str = ".guest-letter";
const SETTINGS_FILE: &str = "settings.json";
const RAW_TOKEN_FILE: &str = "login_token";
const TOKEN_PARAM: &str = "token";

/// Persistence seam for the settings record.
pub trait SettingsRepository {
    /// Returns the stored record, or defaults when nothing usable is stored.
    fn load(&self) -> Settings;

    /// Replaces the stored record.
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;

    /// A login token provisioned outside the settings editor, if any.
    fn raw_token(&self) -> Option<String> {
        None
    }
}

pub struct FileSettingsStore {
    dir: PathBuf,
}

impl FileSettingsStore {
    pub fn initialize() -> Result<Self, SettingsError> {
        let home = env::var("HOME").map_err(|_| SettingsError::HomeDirMissing)?;
        Self::at(PathBuf::from(home).join(STORAGE_DIR_NAME))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    fn read_record(&self) -> Result<Option<Settings>, SettingsError> {
        match fs::read_to_string(self.settings_path()) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl SettingsRepository for FileSettingsStore {
    fn load(&self) -> Settings {
        match self.read_record() {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(err) => {
                log::warn!("Stored settings are unreadable, using defaults: {err}");
                Settings::default()
            }
        }
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let data = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(), data)?;
        Ok(())
    }

    fn raw_token(&self) -> Option<String> {
        let contents = fs::read_to_string(self.dir.join(RAW_TOKEN_FILE)).ok()?;
        let token = contents.trim();
        (!token.is_empty()).then(|| token.to_owned())
    }
}

/// In-process repository; the stored form is still JSON so parse failures
/// can be exercised the same way as on disk.
#[derive(Default)]
pub struct MemorySettingsStore {
    stored: Mutex<Option<String>>,
    raw_token: Option<String>,
}

impl MemorySettingsStore {
    #[cfg(test)]
    pub fn with_raw_token(token: impl Into<String>) -> Self {
        Self {
            stored: Mutex::new(None),
            raw_token: Some(token.into()),
        }
    }

    #[cfg(test)]
    pub fn with_stored_json(json: impl Into<String>) -> Self {
        Self {
            stored: Mutex::new(Some(json.into())),
            raw_token: None,
        }
    }
}

impl SettingsRepository for MemorySettingsStore {
    fn load(&self) -> Settings {
        let stored = match self.stored.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(json) = stored else {
            return Settings::default();
        };
        serde_json::from_str(&json).unwrap_or_else(|err| {
            log::warn!("Stored settings are unreadable, using defaults: {err}");
            Settings::default()
        })
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let data = serde_json::to_string(settings)?;
        let mut guard = self.stored.lock().map_err(|_| SettingsError::Poisoned)?;
        *guard = Some(data);
        Ok(())
    }

    fn raw_token(&self) -> Option<String> {
        self.raw_token.clone()
    }
}

/// The address the app was opened with, e.g. `guestletter://open?token=...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchLocation {
    url: Url,
}

impl LaunchLocation {
    pub fn parse(raw: &str) -> Option<Self> {
        match Url::parse(raw) {
            Ok(url) => Some(Self { url }),
            Err(err) => {
                log::debug!("Ignoring launch argument that is not a URL: {err}");
                None
            }
        }
    }

    pub fn from_args(mut args: impl Iterator<Item = String>) -> Option<Self> {
        args.nth(1).and_then(|raw| Self::parse(&raw))
    }

    pub fn token(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, value)| key == TOKEN_PARAM && !value.trim().is_empty())
            .map(|(_, value)| value.trim().to_owned())
    }

    #[cfg(test)]
    pub fn has_query(&self) -> bool {
        self.url.query().is_some()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    fn scrub_query(&mut self) {
        self.url.set_query(None);
    }
}

/// Merges a `token` query parameter into the stored settings, then removes the
/// query string from the location so the token is neither reapplied nor shown.
///
/// Returns `true` when a token was applied.
pub fn apply_token_from_location(
    repo: &dyn SettingsRepository,
    location: &mut LaunchLocation,
) -> Result<bool, SettingsError> {
    let Some(token) = location.token() else {
        return Ok(false);
    };

    let mut settings = repo.load();
    settings.login_token = token;
    repo.save(&settings)?;
    location.scrub_query();
    log::info!("Login token taken from launch URL; address is now {}", location.as_str());
    Ok(true)
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("HOME environment variable is not set; cannot store settings under ~/.guest-letter")]
    HomeDirMissing,
    #[error("I/O error while handling stored settings: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize settings: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Settings store lock was poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DEFAULT_ACTION, DEFAULT_OBJECT_NAME};

    fn sample() -> Settings {
        Settings {
            base_url: "https://4001.hoteladvisor.net".into(),
            login_token: "tok-1".into(),
            hotel_id: "21390".into(),
            action: "Select".into(),
            object_name: "QA_HOTEL_GUEST_COMMENT".into(),
        }
    }

    #[test]
    fn load_without_record_returns_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSettingsStore::at(dir.path()).expect("store");
        let settings = store.load();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.action, DEFAULT_ACTION);
        assert_eq!(settings.object_name, DEFAULT_OBJECT_NAME);
    }

    #[test]
    fn save_then_load_returns_same_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSettingsStore::at(dir.path()).expect("store");
        let record = Settings {
            action: String::new(),
            ..sample()
        };
        store.save(&record).expect("save");
        assert_eq!(store.load(), record);

        let memory = MemorySettingsStore::default();
        memory.save(&record).expect("save");
        assert_eq!(memory.load(), record);
    }

    #[test]
    fn save_overwrites_whole_record() {
        let store = MemorySettingsStore::default();
        store.save(&sample()).expect("save");
        let replacement = Settings {
            hotel_id: "777".into(),
            ..Settings::default()
        };
        store.save(&replacement).expect("save");
        assert_eq!(store.load(), replacement);
    }

    #[test]
    fn unparseable_record_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(SETTINGS_FILE), "{not json").expect("write");
        let store = FileSettingsStore::at(dir.path()).expect("store");
        assert_eq!(store.load(), Settings::default());

        let memory = MemorySettingsStore::with_stored_json("[1,2,3]");
        assert_eq!(memory.load(), Settings::default());
    }

    #[test]
    fn raw_token_file_is_trimmed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSettingsStore::at(dir.path()).expect("store");
        assert_eq!(store.raw_token(), None);
        fs::write(dir.path().join(RAW_TOKEN_FILE), "  raw-123\n").expect("write");
        assert_eq!(store.raw_token().as_deref(), Some("raw-123"));
    }

    #[test]
    fn raw_token_is_separate_from_record() {
        let store = MemorySettingsStore::with_raw_token("raw-9");
        store.save(&sample()).expect("save");
        assert_eq!(store.raw_token().as_deref(), Some("raw-9"));
        assert_eq!(store.load().login_token, "tok-1");
    }

    #[test]
    fn token_from_location_merges_and_scrubs() {
        let store = MemorySettingsStore::default();
        store.save(&sample()).expect("save");
        let mut location =
            LaunchLocation::parse("guestletter://open?token=fresh-token&x=1").expect("url");

        let applied = apply_token_from_location(&store, &mut location).expect("apply");

        assert!(applied);
        assert!(!location.has_query());
        assert_eq!(location.as_str(), "guestletter://open");
        let settings = store.load();
        assert_eq!(settings.login_token, "fresh-token");
        assert_eq!(settings.hotel_id, "21390");
        assert_eq!(settings.base_url, sample().base_url);
    }

    #[test]
    fn token_from_location_is_idempotent() {
        let store = MemorySettingsStore::default();
        store.save(&sample()).expect("save");
        let mut location = LaunchLocation::parse("guestletter://open?token=abc").expect("url");

        assert!(apply_token_from_location(&store, &mut location).expect("first"));
        let after_first = store.load();
        let address_after_first = location.clone();

        assert!(!apply_token_from_location(&store, &mut location).expect("second"));
        assert_eq!(store.load(), after_first);
        assert_eq!(location, address_after_first);
    }

    #[test]
    fn location_without_token_is_untouched() {
        let store = MemorySettingsStore::default();
        let mut location = LaunchLocation::parse("guestletter://open?lang=tr").expect("url");
        assert!(!apply_token_from_location(&store, &mut location).expect("apply"));
        assert!(location.has_query());
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn launch_location_reads_first_argument() {
        let args = ["guest-letter", "guestletter://open?token=t"].map(String::from);
        let location = LaunchLocation::from_args(args.into_iter()).expect("location");
        assert_eq!(location.token().as_deref(), Some("t"));
        assert!(LaunchLocation::from_args(["guest-letter".to_owned()].into_iter()).is_none());
        assert!(LaunchLocation::parse("not a url").is_none());
    }
}
