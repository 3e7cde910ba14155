//! # Configuration
//!
//! Five JSON files in one directory, one per [`ConfigSection`]. Each file is
//! merged over built-in defaults on load, so a user file only needs the keys
//! it changes. Values are addressed with dot paths
//! (`generation_settings.temperature`) and can be read back as typed
//! [`Settings`].
//!
//! `MODSMITH_*` environment variables override provider settings for the
//! current process only; they are layered on reads and never written back.

use crate::error::{Error, ErrorKind, Result};
use crate::provider::{ProviderConfig, ProviderKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_DIR: &str = "data/config";

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSection {
    Main,
    Performance,
    Security,
    Learning,
    UserPreferences,
}

impl ConfigSection {
    pub const ALL: [ConfigSection; 5] = [
        ConfigSection::Main,
        ConfigSection::Performance,
        ConfigSection::Security,
        ConfigSection::Learning,
        ConfigSection::UserPreferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSection::Main => "main",
            ConfigSection::Performance => "performance",
            ConfigSection::Security => "security",
            ConfigSection::Learning => "learning",
            ConfigSection::UserPreferences => "user_preferences",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }

    /// Default contents of this section as JSON
    pub fn defaults(&self) -> Value {
        let value = match self {
            ConfigSection::Main => serde_json::to_value(MainConfig::default()),
            ConfigSection::Performance => serde_json::to_value(PerformanceConfig::default()),
            ConfigSection::Security => serde_json::to_value(SecurityConfig::default()),
            ConfigSection::Learning => serde_json::to_value(LearningConfig::default()),
            ConfigSection::UserPreferences => serde_json::to_value(UserPreferences::default()),
        };
        // Plain structs of strings/numbers/bools always serialize
        value.unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

impl fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigSection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "main" => Ok(ConfigSection::Main),
            "performance" => Ok(ConfigSection::Performance),
            "security" => Ok(ConfigSection::Security),
            "learning" => Ok(ConfigSection::Learning),
            "user_preferences" | "preferences" => Ok(ConfigSection::UserPreferences),
            other => Err(Error::new(ErrorKind::ConfigNotFound, format!("unknown config section '{}'", other))
                .with_context("section", other.to_string())),
        }
    }
}

// ============================================================================
// Typed schemas
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    /// Model name or path handed to the backend when the provider block names none
    pub model_path: String,
    /// Base directory for generated files and relative security paths
    pub workspace_path: String,
    pub max_memory_entries: usize,
    pub auto_backup: bool,
    pub safe_mode: bool,
    pub debug_mode: bool,
    pub minecraft_version: String,
    pub fabric_version: String,
    pub memory_dir: String,
    pub context_dir: String,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            model_path: "codellama:7b".into(),
            workspace_path: ".".into(),
            max_memory_entries: 1000,
            auto_backup: true,
            safe_mode: true,
            debug_mode: false,
            minecraft_version: "1.20.1".into(),
            fabric_version: "0.92.0+1.20.1".into(),
            memory_dir: "data/memory_db".into(),
            context_dir: "data/minecraft_api".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub generation_settings: GenerationSettings,
    pub model_optimization: ModelOptimization,
    pub provider: ProviderSettings,
}

/// Sampling parameters for code generation.
///
/// `top_k` and `repetition_penalty` are kept for servers that understand
/// them; the OpenAI and Anthropic wire formats only carry temperature, top_p
/// and max tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repetition_penalty: f32,
    pub do_sample: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 50,
            repetition_penalty: 1.1,
            do_sample: true,
        }
    }
}

impl GenerationSettings {
    /// Greedy decoding when sampling is off
    pub fn effective_temperature(&self) -> f32 {
        if self.do_sample {
            self.temperature
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptimization {
    pub use_gpu: bool,
    pub cache_enabled: bool,
    pub low_memory_mode: bool,
}

impl Default for ModelOptimization {
    fn default() -> Self {
        Self {
            use_gpu: true,
            cache_enabled: true,
            low_memory_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::None,
            base_url: None,
            model: None,
            api_key: None,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub file_operations: FileOperations,
    pub code_execution: CodeExecution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOperations {
    pub allowed_directories: Vec<String>,
    pub blocked_directories: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub max_file_size_mb: f64,
    pub enable_backup_before_overwrite: bool,
}

impl Default for FileOperations {
    fn default() -> Self {
        Self {
            allowed_directories: vec!["src/main/java".into(), "generated".into()],
            blocked_directories: vec![
                ".git".into(),
                "target".into(),
                "/etc".into(),
                "/usr".into(),
                "/bin".into(),
                "C:/Windows".into(),
            ],
            allowed_extensions: vec![".java".into()],
            max_file_size_mb: 1.0,
            enable_backup_before_overwrite: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeExecution {
    pub enable_sandbox: bool,
    pub timeout_secs: u64,
}

impl Default for CodeExecution {
    fn default() -> Self {
        Self {
            enable_sandbox: true,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub ai_learning: AiLearning,
    pub feedback_system: FeedbackSystem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiLearning {
    pub enable_learning: bool,
    pub pattern_recognition_threshold: f64,
}

impl Default for AiLearning {
    fn default() -> Self {
        Self {
            enable_learning: true,
            pattern_recognition_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackSystem {
    pub enable_user_feedback: bool,
}

impl Default for FeedbackSystem {
    fn default() -> Self {
        Self { enable_user_feedback: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub ui_preferences: UiPreferences,
    pub generation_preferences: GenerationPreferences,
    pub workflow: Workflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiPreferences {
    pub theme: String,
    pub font_family: String,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            theme: "dark".into(),
            font_family: "JetBrains Mono".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationPreferences {
    pub include_comments: bool,
    pub package_name: String,
}

impl Default for GenerationPreferences {
    fn default() -> Self {
        Self {
            include_comments: true,
            package_name: "com.example.mod".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    pub auto_save: bool,
    pub confirm_overwrites: bool,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            auto_save: false,
            confirm_overwrites: true,
        }
    }
}

/// Typed view over all five sections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub main: MainConfig,
    pub performance: PerformanceConfig,
    pub security: SecurityConfig,
    pub learning: LearningConfig,
    pub user_preferences: UserPreferences,
}

impl Settings {
    /// Provider configuration, falling back to `main.model_path` for the model
    pub fn provider_config(&self) -> ProviderConfig {
        let mut provider = self.performance.provider.clone();
        if provider.model.as_deref().map_or(true, |m| m.trim().is_empty())
            && matches!(provider.kind, ProviderKind::Local)
        {
            provider.model = Some(self.main.model_path.clone());
        }
        ProviderConfig::from_settings(&provider)
    }

    fn check(&self, section: ConfigSection) -> Result<()> {
        let fail = |msg: String| Err(Error::config_invalid(msg).with_context("section", section.as_str()));

        match section {
            ConfigSection::Main => {
                if self.main.max_memory_entries == 0 {
                    return fail("max_memory_entries must be greater than 0".into());
                }
            }
            ConfigSection::Performance => {
                let g = &self.performance.generation_settings;
                if !(0.0..=2.0).contains(&g.temperature) {
                    return fail(format!("temperature {} outside 0..=2", g.temperature));
                }
                if !(0.0..=1.0).contains(&g.top_p) {
                    return fail(format!("top_p {} outside 0..=1", g.top_p));
                }
                if g.max_new_tokens == 0 {
                    return fail("max_new_tokens must be greater than 0".into());
                }
            }
            ConfigSection::Security => {
                let f = &self.security.file_operations;
                if f.allowed_directories.is_empty() {
                    return fail("allowed_directories must not be empty".into());
                }
                if let Some(ext) = f.allowed_extensions.iter().find(|e| !e.starts_with('.')) {
                    return fail(format!("extension '{}' must start with '.'", ext));
                }
                if f.max_file_size_mb <= 0.0 {
                    return fail("max_file_size_mb must be positive".into());
                }
            }
            ConfigSection::Learning => {
                let t = self.learning.ai_learning.pattern_recognition_threshold;
                if !(0.0..=1.0).contains(&t) {
                    return fail(format!("pattern_recognition_threshold {} outside 0..=1", t));
                }
            }
            ConfigSection::UserPreferences => {
                if self.user_preferences.generation_preferences.package_name.trim().is_empty() {
                    return fail("package_name must not be empty".into());
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Config manager
// ============================================================================

/// Names of the recognised environment overrides and where they land
const ENV_OVERRIDES: [(&str, &str); 4] = [
    ("MODSMITH_PROVIDER", "provider.kind"),
    ("MODSMITH_BASE_URL", "provider.base_url"),
    ("MODSMITH_MODEL", "provider.model"),
    ("MODSMITH_API_KEY", "provider.api_key"),
];

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub config_dir: Option<PathBuf>,
    pub loaded_sections: Vec<&'static str>,
    /// Names of environment variables currently overriding file values
    pub env_overrides: Vec<&'static str>,
}

/// Loads, edits and persists the five configuration sections
#[derive(Debug, Clone)]
pub struct ConfigManager {
    dir: Option<PathBuf>,
    sections: BTreeMap<ConfigSection, Value>,
    overrides: Vec<(&'static str, &'static str, Value)>,
}

impl ConfigManager {
    /// Open the config directory and apply `MODSMITH_*` environment overrides
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::open(dir)?.with_env_overrides(|name| std::env::var(name).ok()))
    }

    /// Open the config directory without looking at the environment.
    ///
    /// Missing section files are created with defaults.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::from(e)
                .with_operation("config::open")
                .with_context("dir", dir.display().to_string())
        })?;

        let mut sections = BTreeMap::new();
        for section in ConfigSection::ALL {
            let path = dir.join(section.file_name());
            let mut value = section.defaults();

            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| Error::from(e).with_operation("config::open"))?;
                let user: Value = serde_json::from_str(&content).map_err(|e| {
                    Error::config_invalid(format!("{} is not valid JSON", section.file_name()))
                        .with_operation("config::open")
                        .with_context("path", path.display().to_string())
                        .set_source(e)
                })?;
                if !user.is_object() {
                    return Err(Error::config_invalid(format!("{} must contain a JSON object", section.file_name()))
                        .with_operation("config::open")
                        .with_context("path", path.display().to_string()));
                }
                deep_merge(&mut value, &user);
                tracing::debug!(section = section.as_str(), "loaded config file");
            } else {
                write_json(&path, &value)?;
                tracing::info!(path = %path.display(), "created default config");
            }

            sections.insert(section, value);
        }

        Ok(Self { dir: Some(dir), sections, overrides: Vec::new() })
    }

    /// Defaults only, nothing touches the disk
    pub fn in_memory() -> Self {
        let sections = ConfigSection::ALL.iter().map(|s| (*s, s.defaults())).collect();
        Self { dir: None, sections, overrides: Vec::new() }
    }

    /// Layer environment overrides on top of the performance section.
    ///
    /// `lookup` maps a variable name to its value; empty values are ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, path) in ENV_OVERRIDES {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                // Unknown provider names are kept verbatim so settings() reports them
                let value = if var == "MODSMITH_PROVIDER" {
                    match value.parse::<ProviderKind>() {
                        Ok(kind) => Value::String(kind.as_str().to_string()),
                        Err(_) => Value::String(value),
                    }
                } else {
                    Value::String(value)
                };
                self.overrides.push((var, path, value));
            }
        }
        self
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The section as stored on disk, without environment overrides
    pub fn raw(&self, section: ConfigSection) -> &Value {
        // Every section is inserted at construction
        &self.sections[&section]
    }

    /// The section as seen by readers, overrides applied
    pub fn effective(&self, section: ConfigSection) -> Value {
        let mut value = self.raw(section).clone();
        if section == ConfigSection::Performance {
            for (_, path, override_value) in &self.overrides {
                // Overrides target fixed paths inside an object section
                let _ = assign(&mut value, path, override_value.clone());
            }
        }
        value
    }

    /// Read a value by dot path. Missing keys and type mismatches yield None.
    pub fn get<T: DeserializeOwned>(&self, section: ConfigSection, path: &str) -> Option<T> {
        let value = self.effective(section);
        lookup(&value, path).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, section: ConfigSection, path: &str, default: T) -> T {
        self.get(section, path).unwrap_or(default)
    }

    /// Set a value by dot path, creating intermediate objects
    pub fn set<T: Serialize>(&mut self, section: ConfigSection, path: &str, value: T, save: bool) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            Error::serialization_failed("config value is not representable as JSON")
                .with_operation("config::set")
                .set_source(e)
        })?;

        let target = self.sections.entry(section).or_insert_with(|| section.defaults());
        assign(target, path, value).map_err(|e| {
            e.with_operation("config::set").with_context("section", section.as_str())
        })?;

        tracing::debug!(section = section.as_str(), path, "config value set");
        if save {
            self.save(section)?;
        }
        Ok(())
    }

    /// Deep-merge a JSON object into a section
    pub fn update(&mut self, section: ConfigSection, patch: Value, save: bool) -> Result<()> {
        if !patch.is_object() {
            return Err(Error::invalid_argument("config update must be a JSON object")
                .with_operation("config::update")
                .with_context("section", section.as_str()));
        }

        let target = self.sections.entry(section).or_insert_with(|| section.defaults());
        deep_merge(target, &patch);

        if save {
            self.save(section)?;
        }
        Ok(())
    }

    /// Persist one section. A manager without a directory has nothing to write.
    pub fn save(&self, section: ConfigSection) -> Result<()> {
        let Some(dir) = &self.dir else {
            tracing::debug!(section = section.as_str(), "in-memory config, skipping save");
            return Ok(());
        };
        write_json(&dir.join(section.file_name()), self.raw(section))
    }

    pub fn save_all(&self) -> Result<()> {
        for section in ConfigSection::ALL {
            self.save(section)?;
        }
        Ok(())
    }

    /// Typed view of every section, overrides applied
    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings {
            main: self.typed(ConfigSection::Main)?,
            performance: self.typed(ConfigSection::Performance)?,
            security: self.typed(ConfigSection::Security)?,
            learning: self.typed(ConfigSection::Learning)?,
            user_preferences: self.typed(ConfigSection::UserPreferences)?,
        })
    }

    fn typed<T: DeserializeOwned>(&self, section: ConfigSection) -> Result<T> {
        serde_json::from_value(self.effective(section)).map_err(|e| {
            Error::config_invalid(format!("{} section does not match its schema: {}", section, e))
                .with_operation("config::settings")
                .with_context("section", section.as_str())
        })
    }

    /// Validate every section against its schema and value ranges
    pub fn validate(&self) -> BTreeMap<ConfigSection, Result<()>> {
        ConfigSection::ALL
            .iter()
            .map(|&section| (section, self.validate_section(section)))
            .collect()
    }

    fn validate_section(&self, section: ConfigSection) -> Result<()> {
        // Parse just this section, defaults for the rest
        let mut settings = Settings::default();
        match section {
            ConfigSection::Main => settings.main = self.typed(section)?,
            ConfigSection::Performance => settings.performance = self.typed(section)?,
            ConfigSection::Security => settings.security = self.typed(section)?,
            ConfigSection::Learning => settings.learning = self.typed(section)?,
            ConfigSection::UserPreferences => settings.user_preferences = self.typed(section)?,
        }
        settings.check(section)
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            config_dir: self.dir.clone(),
            loaded_sections: self.sections.keys().map(|s| s.as_str()).collect(),
            env_overrides: self.overrides.iter().map(|(var, _, _)| *var).collect(),
        }
    }

    // ========================================================================
    // Convenience accessors
    // ========================================================================

    pub fn model_path(&self) -> String {
        self.get_or(ConfigSection::Main, "model_path", MainConfig::default().model_path)
    }

    pub fn workspace_path(&self) -> String {
        self.get_or(ConfigSection::Main, "workspace_path", ".".to_string())
    }

    pub fn minecraft_version(&self) -> String {
        self.get_or(ConfigSection::Main, "minecraft_version", "1.20.1".to_string())
    }

    pub fn safe_mode(&self) -> bool {
        self.get_or(ConfigSection::Main, "safe_mode", true)
    }

    pub fn debug_mode(&self) -> bool {
        self.get_or(ConfigSection::Main, "debug_mode", false)
    }

    pub fn use_gpu(&self) -> bool {
        self.get_or(ConfigSection::Performance, "model_optimization.use_gpu", true)
    }
}

// ============================================================================
// JSON path helpers
// ============================================================================

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, key| current.get(key))
}

fn assign(root: &mut Value, path: &str, new_value: Value) -> Result<()> {
    if path.trim().is_empty() || path.split('.').any(str::is_empty) {
        return Err(Error::invalid_argument(format!("invalid config path '{}'", path))
            .with_context("path", path.to_string()));
    }

    let mut keys = path.split('.').peekable();
    let mut current = root;
    while let Some(key) = keys.next() {
        let Value::Object(map) = current else {
            return Err(Error::invalid_argument(format!("'{}' crosses a non-object value", path))
                .with_context("path", path.to_string()));
        };

        if keys.peek().is_none() {
            map.insert(key.to_string(), new_value);
            return Ok(());
        }
        current = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

/// Merge `patch` into `base`; objects merge key by key, everything else replaces
fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(value).map_err(|e| {
        Error::serialization_failed(e.to_string()).with_operation("config::save")
    })?;
    std::fs::write(path, content).map_err(|e| {
        Error::from(e)
            .with_operation("config::save")
            .with_context("path", path.display().to_string())
    })
}
