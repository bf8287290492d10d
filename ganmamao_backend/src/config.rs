use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::actions::DEFAULT_ACTION;

pub const CONFIG_FILE_NAME: &str = "ganmamao.toml";
pub const CONFIG_PATH_ENV: &str = "GANMAMAO_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    /// Key into `list` naming the model to use.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub list: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_min_seconds")]
    pub min_seconds: u64,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,
}

fn default_min_seconds() -> u64 {
    600
}

fn default_max_seconds() -> u64 {
    3600
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            min_seconds: default_min_seconds(),
            max_seconds: default_max_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogBackend {
    #[default]
    Csv,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Empty means the platform data directory.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub backend: LogBackend,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default = "default_compress_batch")]
    pub compress_batch: usize,
}

fn default_max_records() -> usize {
    200
}

fn default_compress_batch() -> usize {
    50
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            backend: LogBackend::default(),
            max_records: default_max_records(),
            compress_batch: default_compress_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_max_tokens() -> u32 {
    120
}

fn default_max_retries() -> usize {
    3
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogConfig {
    /// Presenter backends in fallback order.
    #[serde(default = "default_dialog_backends")]
    pub backends: Vec<String>,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_notification_timeout_seconds")]
    pub notification_timeout_seconds: u64,
}

fn default_dialog_backends() -> Vec<String> {
    vec![
        "osascript".to_string(),
        "zenity".to_string(),
        "terminal".to_string(),
    ]
}

fn default_cooldown_seconds() -> u64 {
    5
}

fn default_notification_timeout_seconds() -> u64 {
    5
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            backends: default_dialog_backends(),
            cooldown_seconds: default_cooldown_seconds(),
            notification_timeout_seconds: default_notification_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Show the persisted summary and past exchanges to the model as well.
    #[serde(default = "default_true")]
    pub include_persisted: bool,
}

fn default_max_turns() -> usize {
    6
}

fn default_max_chars() -> usize {
    400
}

fn default_true() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_chars: default_max_chars(),
            include_persisted: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,
    #[serde(default = "default_catchphrase")]
    pub catchphrase: String,
    #[serde(default = "default_catchphrase_prefix")]
    pub catchphrase_prefix: String,
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
    #[serde(default = "default_fallback_action")]
    pub fallback_action: String,
}

fn default_persona_name() -> String {
    "干嘛猫".to_string()
}

fn default_catchphrase() -> String {
    "干嘛".to_string()
}

fn default_catchphrase_prefix() -> String {
    "干嘛呀……".to_string()
}

fn default_max_reply_chars() -> usize {
    50
}

fn default_fallback_action() -> String {
    DEFAULT_ACTION.to_string()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            catchphrase: default_catchphrase(),
            catchphrase_prefix: default_catchphrase_prefix(),
            max_reply_chars: default_max_reply_chars(),
            fallback_action: default_fallback_action(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, mlx_lm.server, vLLM, ...)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub models: ModelsConfig,
    // Legacy single-model setting, used when `models.default` is unset
    #[serde(default)]
    pub model_path: Option<String>,

    // Character
    #[serde(default)]
    pub role_prompt_path: Option<String>,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub actions: Vec<String>,

    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub dialog: DialogConfig,
    #[serde(default)]
    pub history: HistoryConfig,

    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_api_key: None,
            temperature: default_temperature(),
            models: ModelsConfig::default(),
            model_path: None,
            role_prompt_path: None,
            persona: PersonaConfig::default(),
            actions: Vec::new(),
            trigger: TriggerConfig::default(),
            log: LogConfig::default(),
            generation: GenerationConfig::default(),
            dialog: DialogConfig::default(),
            history: HistoryConfig::default(),
            base_dir: AppConfig::get_base_dir(),
        }
    }
}

impl AppConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// `$GANMAMAO_CONFIG`, or `ganmamao.toml` next to the executable.
    pub fn config_path() -> PathBuf {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => Self::get_base_dir().join(CONFIG_FILE_NAME),
        }
    }

    /// Load, apply environment overrides and validate. Any problem here is
    /// fatal for the caller.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let config = Self::load_from(&path)?;
            tracing::info!("Loaded config from {:?}", path);
            config
        } else {
            tracing::warn!("No config file at {:?}, using defaults + env vars", path);
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let mut config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }

    /// Write this config as TOML, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir {:?}", parent))?;
        }
        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("GANMAMAO_LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Ok(key) = env::var("GANMAMAO_LLM_API_KEY") {
            self.llm_api_key = Some(key);
        }

        if let Ok(model) = env::var("GANMAMAO_MODEL") {
            if !model.trim().is_empty() {
                self.models.default = None;
                self.model_path = Some(model);
            }
        }

        if let Ok(path) = env::var("GANMAMAO_LOG_PATH") {
            if !path.trim().is_empty() {
                self.log.path = path;
            }
        }
    }

    /// The model identifier sent to the inference server.
    pub fn resolve_model(&self) -> Result<String> {
        if let Some(key) = self.models.default.as_deref() {
            return self
                .models
                .list
                .get(key)
                .cloned()
                .with_context(|| format!("models.default = {:?} is not present in models.list", key));
        }
        self.model_path
            .clone()
            .filter(|model| !model.trim().is_empty())
            .context("No model configured: set models.default/models.list or model_path")
    }

    pub fn validate(&self) -> Result<()> {
        self.resolve_model()?;
        if self.log.compress_batch == 0 && self.log.max_records > 0 {
            anyhow::bail!("log.compress_batch must be at least 1 when log.max_records is set");
        }
        if self.trigger.min_seconds.max(self.trigger.max_seconds) == 0 {
            anyhow::bail!("trigger interval must be longer than zero seconds");
        }
        if self.generation.max_tokens == 0 {
            anyhow::bail!("generation.max_tokens must be at least 1");
        }
        if self.dialog.backends.is_empty() {
            tracing::warn!("dialog.backends is empty; only the terminal presenter will be used");
        }
        Ok(())
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn log_path(&self) -> PathBuf {
        if !self.log.path.trim().is_empty() {
            return self.resolve(self.log.path.trim());
        }
        let file_name = match self.log.backend {
            LogBackend::Sqlite => "log.db",
            LogBackend::Csv | LogBackend::Memory => "log.csv",
        };
        dirs::data_local_dir()
            .map(|dir| dir.join("ganmamao"))
            .unwrap_or_else(|| self.base_dir.clone())
            .join(file_name)
    }

    /// The role prompt text, sanitized; a short built-in prompt is used when
    /// no file is configured.
    pub fn load_role_prompt(&self) -> Result<String> {
        let raw = match self.role_prompt_path.as_deref() {
            Some(path) => {
                let path = self.resolve(path);
                fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read role prompt {:?}", path))?
            }
            None => format!(
                "你是{}，一只住在用户电脑里的小猫。说话简短，爱说“{}”。",
                self.persona.name, self.persona.catchphrase
            ),
        };
        Ok(crate::prompt::sanitize_role_prompt(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_model() -> AppConfig {
        AppConfig {
            model_path: Some("qwen2.5:7b".to_string()),
            ..AppConfig::default()
        }
    }

    #[test]
    fn parses_nested_sections_with_defaults() {
        let raw = r#"
            llm_api_url = "http://127.0.0.1:8080"
            actions = ["伸懒腰", "舔爪子"]

            [models]
            default = "small"
            [models.list]
            small = "mlx-community/Qwen2.5-3B"

            [log]
            max_records = 10
            compress_batch = 4

            [dialog]
            backends = ["terminal"]
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.resolve_model().unwrap(), "mlx-community/Qwen2.5-3B");
        assert_eq!(config.log.max_records, 10);
        assert_eq!(config.log.backend, LogBackend::Csv);
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.history.max_turns, 6);
        assert_eq!(config.history.max_chars, 400);
        assert_eq!(config.dialog.cooldown_seconds, 5);
        assert_eq!(config.dialog.backends, vec!["terminal".to_string()]);
        assert_eq!(config.persona.fallback_action, "扶正牛仔帽");
        assert_eq!(config.actions.len(), 2);
    }

    #[test]
    fn missing_model_is_a_configuration_error() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());

        let mut dangling = AppConfig::default();
        dangling.models.default = Some("big".to_string());
        let err = dangling.resolve_model().unwrap_err();
        assert!(err.to_string().contains("not present"));
    }

    #[test]
    fn zero_compress_batch_is_rejected() {
        let mut config = with_model();
        config.log.compress_batch = 0;
        assert!(config.validate().is_err());
        assert!(with_model().validate().is_ok());
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "model_path = \"m\"\nrole_prompt_path = \"role.md\"\n[log]\npath = \"logs/chat.csv\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("role.md"), "你是干嘛猫。").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.log_path(), dir.path().join("logs/chat.csv"));
        assert_eq!(config.load_role_prompt().unwrap(), "你是干嘛猫。");
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = with_model();
        config.log.max_records = 12;
        config.log.compress_batch = 3;
        config.dialog.backends = vec!["zenity".to_string(), "terminal".to_string()];
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.resolve_model().unwrap(), "qwen2.5:7b");
        assert_eq!(loaded.log.max_records, 12);
        assert_eq!(loaded.log.compress_batch, 3);
        assert_eq!(loaded.dialog.backends, config.dialog.backends);
        assert_eq!(loaded.base_dir, dir.path().join("nested"));
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn missing_role_prompt_file_is_an_error() {
        let config = AppConfig {
            role_prompt_path: Some("/definitely/not/here.md".to_string()),
            ..with_model()
        };
        assert!(config.load_role_prompt().is_err());
    }

    #[test]
    fn builtin_role_prompt_mentions_persona() {
        let prompt = with_model().load_role_prompt().unwrap();
        assert!(prompt.contains("干嘛猫"));
    }
}
