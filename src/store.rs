//! Content-addressed persistence of request configs in a directory tree.
//!
//! Layout under a base directory:
//!
//! ```text
//! <base>/
//!   <sha256>/                 one directory per distinct config
//!     config.json             every field except messages
//!     messages/
//!       0_system.txt          "<position>_<role>.txt", raw message text
//!       1_user.txt
//!   default/                  optional; preferred by `load` when present
//! ```

use crate::error::{PromptError, Result};
use crate::messages::{ChatMessage, Role};
use crate::request::RequestConfig;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const CONFIG_FILE: &str = "config.json";
const MESSAGES_DIR: &str = "messages";
const DEFAULT_DIR: &str = "default";

/// Result of a save: a new directory, or an existing one with the same hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The config was written to this new directory.
    Created(PathBuf),
    /// A config with the same hash was already stored here; nothing was written.
    AlreadyExists(PathBuf),
}

impl SaveOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SaveOutcome::Created(p) | SaveOutcome::AlreadyExists(p) => p,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SaveOutcome::Created(_))
    }
}

/// Somewhere a [`RequestConfig`] can be saved and loaded back.
pub trait Persister: Send + Sync {
    /// Store `config`, deduplicated by its hash.
    fn save(&self, config: &RequestConfig) -> Result<SaveOutcome>;

    /// Load the preferred stored config.
    fn load(&self) -> Result<RequestConfig>;
}

/// [`Persister`] backed by a local directory.
///
/// # Example
///
/// ```no_run
/// use llm_prompt_batch::store::{DirectoryStore, Persister};
/// use llm_prompt_batch::RequestConfig;
///
/// let store = DirectoryStore::new("prompts/summarize");
/// let outcome = store.save(&RequestConfig::new("gpt-4o")).unwrap();
/// let loaded = store.load().unwrap();
/// assert_eq!(loaded.unique_hash().unwrap(), RequestConfig::new("gpt-4o").unique_hash().unwrap());
/// # let _ = outcome;
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    base: PathBuf,
}

impl DirectoryStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory a config with this hash lives in.
    pub fn path_for(&self, config: &RequestConfig) -> Result<PathBuf> {
        Ok(self.base.join(config.unique_hash()?))
    }

    /// Pick the directory `load` reads from: `default/` if present, else the
    /// most recently modified subdirectory, else the base itself when it
    /// directly holds a `config.json`.
    pub fn resolve(&self) -> Result<PathBuf> {
        let default = self.base.join(DEFAULT_DIR);
        if default.is_dir() {
            return Ok(default);
        }

        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PromptError::NotFound(self.base.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            // staging directories are hidden
            if !meta.is_dir() || entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let candidate = (meta.modified()?, entry.path());
            // ties broken by name so the choice is deterministic
            if latest.as_ref().map_or(true, |best| candidate > *best) {
                latest = Some(candidate);
            }
        }

        match latest {
            Some((_, path)) if path.join(CONFIG_FILE).is_file() => Ok(path),
            _ if self.base.join(CONFIG_FILE).is_file() => Ok(self.base.clone()),
            Some((_, path)) => Err(PromptError::NotFound(path)),
            None => Err(PromptError::NotFound(self.base.clone())),
        }
    }
}

impl Persister for DirectoryStore {
    fn save(&self, config: &RequestConfig) -> Result<SaveOutcome> {
        let hash = config.unique_hash()?;
        let dir = self.base.join(&hash);

        if dir.exists() {
            tracing::warn!(hash = %hash, path = %dir.display(), "configuration already exists");
            return Ok(SaveOutcome::AlreadyExists(dir));
        }

        match write_config_dir(&dir, config) {
            Ok(()) => {
                tracing::debug!(hash = %hash, path = %dir.display(), "configuration saved");
                Ok(SaveOutcome::Created(dir))
            }
            // another writer renamed the same hash directory into place first
            Err(_) if dir.join(CONFIG_FILE).is_file() => {
                tracing::warn!(hash = %hash, path = %dir.display(), "configuration already exists");
                Ok(SaveOutcome::AlreadyExists(dir))
            }
            Err(e) => Err(e),
        }
    }

    fn load(&self) -> Result<RequestConfig> {
        load_config_dir(&self.resolve()?)
    }
}

/// Write one config directory. Files go to a uniquely named hidden sibling
/// first and are renamed into place, so a crash never leaves a half-written
/// hash directory behind and concurrent writers never share staging files.
fn write_config_dir(dir: &Path, config: &RequestConfig) -> Result<()> {
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    // removed on drop unless renamed away
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)?;
    let root = staging.path();
    fs::create_dir(root.join(MESSAGES_DIR))?;

    let mut record = config.to_request_body()?;
    if let Value::Object(ref mut map) = record {
        map.remove("messages");
    }
    fs::write(root.join(CONFIG_FILE), serde_json::to_string_pretty(&record)?)?;

    for (idx, message) in config.messages.iter().enumerate() {
        let file = format!("{}_{}.txt", idx, message.role);
        fs::write(root.join(MESSAGES_DIR).join(file), &message.content)?;
    }

    fs::rename(root, dir)?;
    Ok(())
}

/// Read a single config directory (one holding `config.json`).
pub fn load_config_dir(dir: &Path) -> Result<RequestConfig> {
    let config_path = dir.join(CONFIG_FILE);
    let text = match fs::read_to_string(&config_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PromptError::NotFound(config_path))
        }
        Err(e) => return Err(e.into()),
    };

    let mut record: Value = serde_json::from_str(&text).map_err(|e| PromptError::CorruptStore {
        path: config_path.clone(),
        reason: e.to_string(),
    })?;
    let messages = read_messages(&dir.join(MESSAGES_DIR))?;
    if let Value::Object(ref mut map) = record {
        map.insert("messages".to_string(), serde_json::to_value(messages)?);
    }

    serde_json::from_value(record).map_err(|e| PromptError::CorruptStore {
        path: config_path,
        reason: e.to_string(),
    })
}

fn read_messages(dir: &Path) -> Result<Vec<ChatMessage>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut indexed: Vec<(usize, ChatMessage)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let (position, role) = parse_message_file_name(&path)?;
        if indexed.iter().any(|(p, _)| *p == position) {
            return Err(corrupt(&path, format!("duplicate message position {}", position)));
        }
        let content = fs::read_to_string(&path)?;
        indexed.push((position, ChatMessage::new(role, content)));
    }

    indexed.sort_by_key(|(position, _)| *position);
    for (expected, (position, _)) in indexed.iter().enumerate() {
        if *position != expected {
            return Err(corrupt(dir, format!("message position {} is missing", expected)));
        }
    }
    Ok(indexed.into_iter().map(|(_, m)| m).collect())
}

/// Split `"<position>_<role>.txt"`.
fn parse_message_file_name(path: &Path) -> Result<(usize, Role)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| corrupt(path, "message file name is not valid UTF-8"))?;
    let stem = name
        .strip_suffix(".txt")
        .ok_or_else(|| corrupt(path, "message file must end in .txt"))?;
    let (position, role) = stem
        .split_once('_')
        .ok_or_else(|| corrupt(path, "message file name must be <position>_<role>.txt"))?;
    let position = position
        .parse::<usize>()
        .map_err(|_| corrupt(path, format!("invalid message position '{}'", position)))?;
    let role = role
        .parse::<Role>()
        .map_err(|_| corrupt(path, format!("unknown message role '{}'", role)))?;
    Ok((position, role))
}

fn corrupt(path: &Path, reason: impl Into<String>) -> PromptError {
    PromptError::CorruptStore {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
