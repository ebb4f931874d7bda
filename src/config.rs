use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/syllabus.sqlite")
}
fn default_max_connections() -> u32 {
    1
}

/// Read cache in front of the SQLite store. `capacity = 0` disables it.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_capacity() -> usize {
    256
}
fn default_cache_ttl_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    /// Course definition file name inside a course directory.
    #[serde(default = "default_course_file")]
    pub course_file: String,
    /// Author bio directory, relative to the course directory.
    #[serde(default = "default_authors_dir")]
    pub authors_dir: String,
    /// Where local author photos are copied. Unset keeps them in place.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            course_file: default_course_file(),
            authors_dir: default_authors_dir(),
            assets_dir: None,
        }
    }
}

fn default_course_file() -> String {
    "course.yml".to_string()
}
fn default_authors_dir() -> String {
    "authors".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
        }
    }
}

fn default_quiet_period_ms() -> u64 {
    500
}

impl Config {
    /// Defaults with the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                ..DbConfig::default()
            },
            ..Self::default()
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.db.path.is_relative() {
            self.db.path = base.join(&self.db.path);
        }
        if let Some(assets) = &self.content.assets_dir {
            if assets.is_relative() {
                self.content.assets_dir = Some(base.join(assets));
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.db.max_connections < 1 {
            anyhow::bail!("db.max_connections must be >= 1");
        }
        if self.watch.quiet_period_ms == 0 {
            anyhow::bail!("watch.quiet_period_ms must be > 0");
        }
        if self.content.course_file.trim().is_empty() {
            anyhow::bail!("content.course_file must not be empty");
        }
        Ok(())
    }
}

/// Reads and validates a config file. Relative paths in it resolve against
/// the directory containing the file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);
    config.validate()?;

    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}

/// Config file written by [`new_site`].
pub const SITE_CONFIG_FILE: &str = "syllabus.toml";

const SITE_CONFIG: &str = r#"[db]
path = "syllabus.sqlite"

[content]
assets_dir = "assets"
"#;

/// Creates a site directory holding `syllabus.toml` and an empty `assets/`
/// directory, and returns the config read back from it. `dir` must not
/// exist yet. The database itself is created by running the migrations.
pub fn new_site(dir: &Path) -> Result<Config> {
    if dir.exists() {
        anyhow::bail!("Directory {} already exists", dir.display());
    }
    std::fs::create_dir_all(dir.join("assets"))
        .with_context(|| format!("Failed to create site directory: {}", dir.display()))?;
    let path = dir.join(SITE_CONFIG_FILE);
    std::fs::write(&path, SITE_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    load_config(&path)
}
