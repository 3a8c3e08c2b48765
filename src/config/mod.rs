use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde_json::{json, Map, Value};

pub mod locking;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "CardFile";
const APP_NAME: &str = "cardfile";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// Loads the settings document, creating it with defaults on first run.
    pub fn load_or_init(&self) -> Result<Settings> {
        self.paths.ensure_directories()?;
        Settings::load_or_init(self.paths.config_file.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("CARDFILE_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("CARDFILE_DATA").ok().map(PathBuf::from);
        let portable = env::var("CARDFILE_PORTABLE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let data_root = match override_data {
            Some(path) => path,
            None => resolve_data_dir(portable)?,
        };

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| data_root.clone());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.json"));

        let database_path = data_root.join("cardfile.db");
        let state_dir = data_root.join("state");
        let log_dir = state_dir.join("logs");

        Ok(Self {
            config_dir,
            config_file,
            data_dir: data_root,
            database_path,
            log_dir,
            state_dir,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.state_dir,
            &self.log_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Platform-specific data directory: APPDATA on Windows, a mounted volume
/// under Docker, XDG data home elsewhere. Portable mode keeps everything
/// next to the executable.
fn resolve_data_dir(portable: bool) -> Result<PathBuf> {
    if portable {
        let exe = env::current_exe().context("resolving executable path for portable mode")?;
        return exe
            .parent()
            .map(Path::to_path_buf)
            .context("executable has no parent directory");
    }

    if Path::new("/.dockerenv").exists() {
        let mounted = Path::new("/app/data");
        if mounted.exists() {
            return Ok(mounted.to_path_buf());
        }
        return Ok(PathBuf::from("/app"));
    }

    if cfg!(windows) {
        if let Ok(appdata) = env::var("APPDATA") {
            return Ok(PathBuf::from(appdata).join(APP_ORG));
        }
    }

    let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
        .context("resolving XDG project directories")?;
    Ok(project_dirs.data_dir().to_path_buf())
}

/// JSON settings document with dotted-key access. Every `set` writes the
/// document back to disk, so the file is always the source of truth.
#[derive(Debug)]
pub struct Settings {
    path: PathBuf,
    document: Value,
}

impl Settings {
    pub fn load_or_init(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            let settings = Self {
                path,
                document: default_document(),
            };
            settings.save()?;
            return Ok(settings);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let document: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut node = &self.document;
        for part in key.split('.') {
            node = node.as_object()?.get(part)?;
        }
        Some(node)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Sets a dotted key, creating intermediate objects as needed, and
    /// persists the whole document.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let mut node = &mut self.document;
        let parts: Vec<&str> = key.split('.').collect();
        for part in &parts[..parts.len() - 1] {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let map = node.as_object_mut().expect("object ensured above");
            node = map.entry(part.to_string()).or_insert(Value::Object(Map::new()));
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node.as_object_mut()
            .expect("object ensured above")
            .insert(parts[parts.len() - 1].to_string(), value);
        self.save()
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        let mut node = &mut self.document;
        for part in &parts[..parts.len() - 1] {
            match node.as_object_mut().and_then(|map| map.get_mut(*part)) {
                Some(next) => node = next,
                None => return Ok(()),
            }
        }
        if let Some(map) = node.as_object_mut() {
            map.remove(parts[parts.len() - 1]);
        }
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let rendered =
            serde_json::to_string_pretty(&self.document).context("serialising settings")?;
        fs::write(&self.path, rendered)
            .with_context(|| format!("writing config {}", self.path.display()))?;
        Ok(())
    }

    // ---- typed accessors for the recognised keys ----

    pub fn language(&self) -> String {
        self.get_str("app.language.default", "en")
    }

    pub fn theme(&self) -> String {
        self.get_str("app.theme", "dark")
    }

    pub fn require_login(&self) -> bool {
        self.get_bool("app.auth.require_login", true)
    }

    pub fn session_expiry_days(&self) -> u64 {
        self.get_u64("app.auth.session_expiry_days", 30)
    }

    pub fn debug(&self) -> bool {
        self.get_bool("app.debug", false)
    }

    pub fn allowed_ips(&self) -> Vec<String> {
        match self.get("app.web.allowed_ips") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(raw)) => vec![raw.clone()],
            _ => vec!["0.0.0.0".to_string()],
        }
    }

    pub fn setup_complete(&self) -> bool {
        self.get_bool("app.setup_complete", false)
    }

    pub fn mark_setup_complete(&mut self) -> Result<()> {
        self.set("app.setup_complete", json!(true))
    }

    pub fn last_selected_card(&self) -> Option<i64> {
        self.get_i64("app.state.last_selected_card")
    }

    pub fn set_last_selected_card(&mut self, card_id: Option<i64>) -> Result<()> {
        match card_id {
            Some(id) => self.set("app.state.last_selected_card", json!(id)),
            None => self.remove("app.state.last_selected_card"),
        }
    }
}

fn default_document() -> Value {
    json!({
        "app": {
            "language": { "default": "en" },
            "theme": "dark",
            "debug": false,
            "setup_complete": false,
            "auth": {
                "require_login": true,
                "session_expiry_days": 30
            },
            "web": {
                "allowed_ips": ["0.0.0.0"]
            },
            "locking": {
                "enabled": false,
                "auto_lock_seconds": 30,
                "mask_visible_chars": 5,
                "password_hash": ""
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn dotted_set_persists_to_disk() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("config.json");
        let mut settings = Settings::load_or_init(path.clone())?;
        settings.set("app.auth.require_login", json!(false))?;
        settings.set("app.web.allowed_ips", json!(["10.0.0.1"]))?;

        let reloaded = Settings::load_or_init(path)?;
        assert!(!reloaded.require_login());
        assert_eq!(reloaded.allowed_ips(), vec!["10.0.0.1".to_string()]);
        Ok(())
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let settings = Settings::load_or_init(temp.path().join("config.json"))?;
        assert!(settings.require_login());
        assert_eq!(settings.session_expiry_days(), 30);
        assert_eq!(settings.language(), "en");
        assert_eq!(settings.theme(), "dark");
        assert!(settings.last_selected_card().is_none());
        Ok(())
    }

    #[test]
    fn set_creates_intermediate_objects() -> Result<()> {
        let temp = TempDir::new()?;
        let mut settings = Settings::load_or_init(temp.path().join("config.json"))?;
        settings.set("app.state.last_selected_card", json!(7))?;
        assert_eq!(settings.last_selected_card(), Some(7));
        settings.set_last_selected_card(None)?;
        assert_eq!(settings.last_selected_card(), None);
        Ok(())
    }
}
