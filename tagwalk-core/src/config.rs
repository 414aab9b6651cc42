//! Configuration for tagwalk
//!
//! Two layers:
//! - [`DbConfig`]: per-database settings stored next to the index in
//!   `.tagwalk.cfg`, using plain `Key = Value` lines so it stays editable
//!   by hand and readable by older front-ends.
//! - [`Settings`]: global TOML settings (tool location, search defaults and
//!   the generic [`DbConfig`] applied to databases without their own file).

use crate::TagwalkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the per-database config, written into the index root
pub const DB_CONFIG_FILE: &str = ".tagwalk.cfg";

const PARSER_KEY: &str = "Parser";
const AUTO_UPDATE_KEY: &str = "AutoUpdate";
const USE_LIB_DB_KEY: &str = "UseLibraryDb";
const LIB_DB_PATHS_KEY: &str = "LibraryDbPaths";
const USE_PATH_FILTER_KEY: &str = "UsePathFilter";
const PATH_FILTERS_KEY: &str = "PathFilters";

/// Source parser GTags uses when building the index (`--gtagslabel`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserLabel {
    #[default]
    Default,
    Ctags,
    Pygments,
}

impl ParserLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Ctags => "ctags",
            Self::Pygments => "pygments",
        }
    }
}

impl FromStr for ParserLabel {
    type Err = TagwalkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "ctags" => Ok(Self::Ctags),
            "pygments" => Ok(Self::Pygments),
            other => Err(TagwalkError::ConfigParse(format!(
                "unknown parser '{}'",
                other
            ))),
        }
    }
}

/// Per-database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub parser: ParserLabel,
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,
    #[serde(default)]
    pub use_lib_db: bool,
    #[serde(default)]
    pub lib_db_paths: Vec<PathBuf>,
    #[serde(default)]
    pub use_path_filter: bool,
    #[serde(default)]
    pub path_filters: Vec<PathBuf>,
}

fn default_auto_update() -> bool {
    true
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            parser: ParserLabel::Default,
            auto_update: default_auto_update(),
            use_lib_db: false,
            lib_db_paths: Vec::new(),
            use_path_filter: false,
            path_filters: Vec::new(),
        }
    }
}

/// List-valued key currently collecting continuation lines
#[derive(Clone, Copy)]
enum ListKey {
    LibDbPaths,
    PathFilters,
}

impl DbConfig {
    /// Load the config stored in `folder`, or `None` if the folder has none
    pub fn load_from_folder(folder: &Path) -> crate::Result<Option<Self>> {
        let path = folder.join(DB_CONFIG_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        content.parse().map(Some)
    }

    /// Write the config into `folder`, replacing any previous file
    pub fn save_to_folder(&self, folder: &Path) -> crate::Result<()> {
        fs::write(folder.join(DB_CONFIG_FILE), self.to_string())?;
        Ok(())
    }

    /// Library databases joined for the `GTAGSLIBPATH` variable
    pub fn lib_path_env(&self) -> Option<std::ffi::OsString> {
        if !self.use_lib_db || self.lib_db_paths.is_empty() {
            return None;
        }
        std::env::join_paths(&self.lib_db_paths).ok()
    }

    /// Active path filters, empty when filtering is switched off
    pub fn active_path_filters(&self) -> &[PathBuf] {
        if self.use_path_filter {
            &self.path_filters
        } else {
            &[]
        }
    }
}

fn parse_flag(key: &str, value: &str) -> crate::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" => Ok(false),
        other => Err(TagwalkError::ConfigParse(format!(
            "{} expects yes/no, got '{}'",
            key, other
        ))),
    }
}

fn flag_str(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

impl FromStr for DbConfig {
    type Err = TagwalkError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut config = DbConfig::default();
        let mut list: Option<ListKey> = None;

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let key_value = line
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, _)| is_key_name(k));

            if let Some((key, _)) = key_value {
                if !is_known_key(key) {
                    return Err(TagwalkError::ConfigParse(format!(
                        "line {}: unknown key '{}'",
                        idx + 1,
                        key
                    )));
                }
            }

            let Some((key, value)) = key_value else {
                match list {
                    Some(ListKey::LibDbPaths) => config.lib_db_paths.push(PathBuf::from(line)),
                    Some(ListKey::PathFilters) => config.path_filters.push(PathBuf::from(line)),
                    None => {
                        return Err(TagwalkError::ConfigParse(format!(
                            "line {}: expected 'Key = Value', got '{}'",
                            idx + 1,
                            line
                        )))
                    }
                }
                continue;
            };

            list = None;
            match key {
                PARSER_KEY => config.parser = value.parse()?,
                AUTO_UPDATE_KEY => config.auto_update = parse_flag(key, value)?,
                USE_LIB_DB_KEY => config.use_lib_db = parse_flag(key, value)?,
                USE_PATH_FILTER_KEY => config.use_path_filter = parse_flag(key, value)?,
                LIB_DB_PATHS_KEY => {
                    config.lib_db_paths.clear();
                    if !value.is_empty() {
                        config.lib_db_paths.push(PathBuf::from(value));
                    }
                    list = Some(ListKey::LibDbPaths);
                }
                PATH_FILTERS_KEY => {
                    config.path_filters.clear();
                    if !value.is_empty() {
                        config.path_filters.push(PathBuf::from(value));
                    }
                    list = Some(ListKey::PathFilters);
                }
                _ => {}
            }
        }

        Ok(config)
    }
}

/// Keys are bare identifiers; anything else (paths included) is a value line
fn is_key_name(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn is_known_key(key: &str) -> bool {
    matches!(
        key,
        PARSER_KEY
            | AUTO_UPDATE_KEY
            | USE_LIB_DB_KEY
            | LIB_DB_PATHS_KEY
            | USE_PATH_FILTER_KEY
            | PATH_FILTERS_KEY
    )
}

impl fmt::Display for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# tagwalk database config")?;
        writeln!(f, "{} = {}", PARSER_KEY, self.parser.as_str())?;
        writeln!(f, "{} = {}", AUTO_UPDATE_KEY, flag_str(self.auto_update))?;
        writeln!(f, "{} = {}", USE_LIB_DB_KEY, flag_str(self.use_lib_db))?;
        writeln!(f, "{} =", LIB_DB_PATHS_KEY)?;
        for path in &self.lib_db_paths {
            writeln!(f, "{}", path.display())?;
        }
        writeln!(f, "{} = {}", USE_PATH_FILTER_KEY, flag_str(self.use_path_filter))?;
        writeln!(f, "{} =", PATH_FILTERS_KEY)?;
        for filter in &self.path_filters {
            writeln!(f, "{}", filter.display())?;
        }
        Ok(())
    }
}

/// Default settings as TOML
pub const DEFAULT_SETTINGS: &str = r#"# tagwalk settings

[tools]
# Directory holding gtags, global and ctags (default: <tagwalk dir>/bin)
# dir = "/usr/local/bin"

[search]
# Treat search tags as regular expressions
regex = false
# Case sensitive matching
match_case = true

[database]
# Use default_db when the current file is not under any database
use_default_db = false
# default_db = "/path/to/project"

# Generic config for databases without their own .tagwalk.cfg
[database.defaults]
parser = "default"
auto_update = true
use_lib_db = false
lib_db_paths = []
use_path_filter = false
path_filters = []
"#;

/// Global tagwalk settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub tools: ToolsSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsSettings {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub regex: bool,
    #[serde(default = "default_match_case")]
    pub match_case: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub use_default_db: bool,
    #[serde(default)]
    pub default_db: Option<PathBuf>,
    #[serde(default)]
    pub defaults: DbConfig,
}

fn default_match_case() -> bool {
    true
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            regex: false,
            match_case: default_match_case(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| TagwalkError::SettingsParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load from `path` (or the default location); defaults when absent
    pub fn load_or_default(path: Option<&Path>) -> crate::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// `$XDG_CONFIG_HOME/tagwalk/settings.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tagwalk").join("settings.toml"))
    }

    /// Default database root, if enabled
    pub fn default_db(&self) -> Option<&Path> {
        if self.database.use_default_db {
            self.database.default_db.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_parse() {
        let settings: Settings = toml::from_str(DEFAULT_SETTINGS).unwrap();
        assert!(!settings.search.regex);
        assert!(settings.search.match_case);
        assert!(settings.tools.dir.is_none());
        assert_eq!(settings.database.defaults, DbConfig::default());
    }

    #[test]
    fn test_settings_default_db_requires_flag() {
        let mut settings = Settings::default();
        settings.database.default_db = Some(PathBuf::from("/proj"));
        assert!(settings.default_db().is_none());
        settings.database.use_default_db = true;
        assert_eq!(settings.default_db(), Some(Path::new("/proj")));
    }

    #[test]
    fn test_db_config_parses_lists() {
        let text = "\
# comment
Parser = ctags
AutoUpdate = no
UseLibraryDb = yes
LibraryDbPaths =
/opt/libs/a
/opt/libs/b
UsePathFilter = yes
PathFilters = vendor
third_party
";
        let config: DbConfig = text.parse().unwrap();
        assert_eq!(config.parser, ParserLabel::Ctags);
        assert!(!config.auto_update);
        assert!(config.use_lib_db);
        assert_eq!(
            config.lib_db_paths,
            vec![PathBuf::from("/opt/libs/a"), PathBuf::from("/opt/libs/b")]
        );
        assert!(config.use_path_filter);
        assert_eq!(
            config.path_filters,
            vec![PathBuf::from("vendor"), PathBuf::from("third_party")]
        );
    }

    #[test]
    fn test_db_config_display_parses_back() {
        let config = DbConfig {
            parser: ParserLabel::Pygments,
            auto_update: false,
            use_lib_db: true,
            lib_db_paths: vec![PathBuf::from("/usr/include")],
            use_path_filter: true,
            path_filters: vec![PathBuf::from("build")],
        };
        let back: DbConfig = config.to_string().parse().unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_db_config_rejects_stray_line() {
        let err = "Parser = default\nnot a key\n".parse::<DbConfig>().unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let err = "Bogus = 1\n".parse::<DbConfig>().unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_db_config_rejects_unknown_key_inside_list() {
        let err = "LibraryDbPaths =\n/a\nBogus = 1\n"
            .parse::<DbConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("line 3"));
        assert!(err.to_string().contains("Bogus"));

        let err = "PathFilters = gen\nUsePathFiltr = yes\n"
            .parse::<DbConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_db_config_list_keeps_paths_with_equals() {
        let config: DbConfig = "LibraryDbPaths =\n/opt/a=b\nC:\\libs\\x\n"
            .parse()
            .unwrap();
        assert_eq!(
            config.lib_db_paths,
            vec![PathBuf::from("/opt/a=b"), PathBuf::from("C:\\libs\\x")]
        );
    }

    #[test]
    fn test_db_config_rejects_bad_flag() {
        let err = "AutoUpdate = maybe\n".parse::<DbConfig>().unwrap_err();
        assert!(err.to_string().contains("AutoUpdate"));
    }

    #[test]
    fn test_lib_path_env_only_when_enabled() {
        let mut config = DbConfig {
            lib_db_paths: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            ..DbConfig::default()
        };
        assert!(config.lib_path_env().is_none());
        config.use_lib_db = true;
        let joined = config.lib_path_env().unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(parts, config.lib_db_paths);
    }

    #[test]
    fn test_save_and_load_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DbConfig::load_from_folder(dir.path()).unwrap().is_none());

        let config = DbConfig {
            auto_update: false,
            ..DbConfig::default()
        };
        config.save_to_folder(dir.path()).unwrap();
        let loaded = DbConfig::load_from_folder(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, config);
    }
}
