use crate::buttons::Buttons;
use crate::error::{Result, TurboPadError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const AUTOFIRE: &str = "AUTOFIRE";
pub const MAPPING: &str = "MAPPING";
pub const MACRO: &str = "MACRO";
pub const WHITELIST: &str = "whitelist";
pub const COMMAND: &str = "COMMAND";

/// Default TCP port of the command channel.
pub const DEFAULT_COMMAND_PORT: u16 = 47520;

/// Section + key + string value persistence with typed accessors.
pub trait ConfigStore: Send + Sync {
    fn get(&self, section: &str, key: &str) -> Option<String>;
    fn set(&self, section: &str, key: &str, value: &str) -> Result<()>;
    fn keys(&self, section: &str) -> Vec<String>;

    fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or_else(|| default.to_string())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        parse_or(self.get(section, key), section, key, default, |v| v.parse().ok())
    }

    fn get_u64(&self, section: &str, key: &str, default: u64) -> u64 {
        parse_or(self.get(section, key), section, key, default, |v| v.parse().ok())
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        parse_or(self.get(section, key), section, key, default, parse_bool)
    }
}

fn parse_or<T>(
    raw: Option<String>,
    section: &str,
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match parse(raw.trim()) {
        Some(value) => value,
        None => {
            log::warn!("Ignoring malformed {}.{} = '{}'", section, key, raw);
            default
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Values as they may appear in a hand-edited file. Stored as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigValue {
    Text(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl From<ConfigValue> for String {
    fn from(value: ConfigValue) -> Self {
        match value {
            ConfigValue::Text(s) => s,
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::UInt(u) => u.to_string(),
            ConfigValue::Float(f) => f.to_string(),
        }
    }
}

fn parse_sections(data: &str) -> Result<Sections> {
    let raw: BTreeMap<String, BTreeMap<String, ConfigValue>> = serde_json::from_str(data)?;
    Ok(raw
        .into_iter()
        .map(|(section, keys)| {
            let keys = keys.into_iter().map(|(k, v)| (k, v.into())).collect();
            (section, keys)
        })
        .collect())
}

/// JSON-backed store: `{ "SECTION": { "key": "value" } }`.
///
/// Every `set` is written through to disk. In-memory stores never touch the
/// filesystem.
pub struct JsonConfigStore {
    path: Option<PathBuf>,
    sections: Mutex<Sections>,
}

impl JsonConfigStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sections = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            parse_sections(&data)?
        } else {
            Sections::new()
        };
        Ok(Self {
            path: Some(path),
            sections: Mutex::new(sections),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            sections: Mutex::new(Sections::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Sections> {
        self.sections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, sections: &Sections) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(sections)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        self.lock().get(section)?.get(key).cloned()
    }

    fn set(&self, section: &str, key: &str, value: &str) -> Result<()> {
        let mut sections = self.lock();
        sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.save(&sections)
    }

    fn keys(&self, section: &str) -> Vec<String> {
        self.lock()
            .get(section)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// On-disk layout:
///
/// ```text
/// <root>/config.json                  global store
/// <root>/games/<TID:016X>.json        per-game store
/// <root>/macros/<TID:016X>/*.macro    recorded macros
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$TURBOPAD_CONFIG_DIR`, else the user config directory.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = std::env::var_os("TURBOPAD_CONFIG_DIR") {
            return Ok(Self::new(dir));
        }
        let dir = dirs::config_dir()
            .ok_or_else(|| TurboPadError::Config("Cannot find config directory".into()))?
            .join("turbopad");
        Ok(Self::new(dir))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn global_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn game_path(&self, title_id: u64) -> PathBuf {
        self.root.join("games").join(format!("{:016X}.json", title_id))
    }

    pub fn macro_dir(&self, title_id: u64) -> PathBuf {
        self.root.join("macros").join(format!("{:016X}", title_id))
    }

    pub fn open_global(&self) -> Result<JsonConfigStore> {
        JsonConfigStore::open(self.global_path())
    }

    /// The per-game store, or `None` if the game has no own config.
    pub fn open_game(&self, title_id: u64) -> Result<Option<JsonConfigStore>> {
        let path = self.game_path(title_id);
        if !path.exists() {
            return Ok(None);
        }
        JsonConfigStore::open(path).map(Some)
    }
}

/// Global + per-game stores for one title, with the lookup rules for
/// feature switches and feature parameters.
pub struct GameStores {
    pub global: JsonConfigStore,
    pub game: Option<JsonConfigStore>,
}

impl GameStores {
    pub fn open(dir: &ConfigDir, title_id: u64) -> Result<Self> {
        Ok(Self {
            global: dir.open_global()?,
            game: dir.open_game(title_id)?,
        })
    }

    /// Where `autoenable` switches are read: the game's own file if present.
    pub fn switches(&self) -> &dyn ConfigStore {
        match &self.game {
            Some(game) => game,
            None => &self.global,
        }
    }

    /// Whether feature parameters come from the global store.
    pub fn params_from_global(&self) -> bool {
        self.game
            .as_ref()
            .map_or(true, |game| game.get_bool(AUTOFIRE, "globconfig", true))
    }

    /// Where feature parameters (autofire timing, mapping) are read.
    pub fn params(&self) -> &dyn ConfigStore {
        match &self.game {
            Some(game) if !self.params_from_global() => game,
            _ => &self.global,
        }
    }
}

/// Per-title feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSwitches {
    pub turbo: bool,
    pub remap: bool,
    pub macros: bool,
}

impl FeatureSwitches {
    pub fn load(stores: &GameStores) -> Self {
        let switches = stores.switches();
        Self {
            turbo: switches.get_bool(AUTOFIRE, "autoenable", false),
            remap: switches.get_bool(MAPPING, "autoenable", false),
            macros: switches.get_bool(MACRO, "autoenable", false),
        }
    }
}

/// Title ids of non-game applications to treat as games. Keys of the
/// `whitelist` section, hexadecimal with or without `0x`.
pub fn load_whitelist(global: &dyn ConfigStore) -> HashSet<u64> {
    global
        .keys(WHITELIST)
        .into_iter()
        .filter(|key| global.get_bool(WHITELIST, key, true))
        .filter_map(|key| {
            let hex = key.trim_start_matches("0x").trim_start_matches("0X");
            match u64::from_str_radix(hex, 16) {
                Ok(tid) => Some(tid),
                Err(_) => {
                    log::warn!("Ignoring whitelist entry '{}'", key);
                    None
                }
            }
        })
        .collect()
}

/// Combination that ends a recording.
pub fn record_stop_combo(global: &dyn ConfigStore) -> Buttons {
    let default = Buttons::MINUS | Buttons::PLUS;
    let combo = Buttons::mask(global.get_u64(MACRO, "record_combo", default.bits()));
    if combo.is_empty() {
        default
    } else {
        combo
    }
}

pub fn command_port(global: &dyn ConfigStore) -> u16 {
    let port = global.get_int(COMMAND, "port", DEFAULT_COMMAND_PORT as i64);
    u16::try_from(port).unwrap_or_else(|_| {
        log::warn!("Command port {} out of range; using {}", port, DEFAULT_COMMAND_PORT);
        DEFAULT_COMMAND_PORT
    })
}
