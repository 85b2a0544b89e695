//! Configuration types for the llmserve core

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Which engine implementation backs the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Tokenizes the prompt and decodes it back, one token per step
    #[default]
    Echo,
}

/// Compute backend requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpu,
    Metal,
    Cuda,
}

/// Model configuration, read once from the file named on the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Engine implementation
    #[serde(default)]
    pub engine: EngineKind,

    /// Path to a HuggingFace `tokenizer.json`
    #[serde(default)]
    pub tokenizer: Option<PathBuf>,

    /// Maximum number of tokens generated per request
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    /// Scratch directory created by the engine at load time
    #[serde(default = "default_tmp_path")]
    pub tmp_path: PathBuf,

    /// Compute backend
    #[serde(default)]
    pub backend: Backend,

    /// Number of threads for CPU operations
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            tokenizer: None,
            max_new_tokens: default_max_new_tokens(),
            tmp_path: default_tmp_path(),
            backend: Backend::default(),
            num_threads: default_num_threads(),
        }
    }
}

impl ModelConfig {
    /// Read and validate a config file.
    ///
    /// Relative paths inside the file are resolved against the directory
    /// that contains it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: ModelConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("invalid {}: {}", path.display(), e)))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        config.validate()?;

        debug!("Loaded model config from {:?}: {:?}", path, config);
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 {
            return Err(Error::ConfigError(
                "max_new_tokens must be greater than 0".to_string(),
            ));
        }
        if self.num_threads == 0 {
            return Err(Error::ConfigError(
                "num_threads must be greater than 0".to_string(),
            ));
        }
        if let Some(tokenizer) = &self.tokenizer {
            if tokenizer.as_os_str().is_empty() {
                return Err(Error::ConfigError("tokenizer path is empty".to_string()));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        if let Some(tokenizer) = self.tokenizer.take() {
            self.tokenizer = Some(resolve(base_dir, tokenizer));
        }
        let tmp_path = std::mem::take(&mut self.tmp_path);
        self.tmp_path = resolve(base_dir, tmp_path);
    }
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() || path.as_os_str().is_empty() {
        path
    } else {
        base_dir.join(path)
    }
}

fn default_max_new_tokens() -> usize {
    512
}

fn default_tmp_path() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_num_threads() -> usize {
    1
}

/// What to do with a request that arrives while the session is generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Queue behind the running request
    #[default]
    Wait,
    /// Fail fast with a busy error
    Reject,
}

/// Session controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Upper bound on single-step generate calls per request
    #[serde(default = "default_max_decode_steps")]
    pub max_decode_steps: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::default(),
            max_decode_steps: default_max_decode_steps(),
        }
    }
}

fn default_max_decode_steps() -> usize {
    8192
}

/// Streaming endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Append the stats report as a final chunk
    #[serde(default)]
    pub append_stats: bool,

    /// Chunks in flight between the engine thread and the response body
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long one chunk may wait on a client that stopped reading
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl StreamConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            append_stats: false,
            channel_capacity: default_channel_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

fn default_channel_capacity() -> usize {
    16
}

fn default_write_timeout_ms() -> u64 {
    30_000
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body
    #[serde(default = "default_max_prompt_bytes")]
    pub max_prompt_bytes: usize,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_prompt_bytes: default_max_prompt_bytes(),
            session: SessionConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_prompt_bytes() -> usize {
    1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_model_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "{}");

        let config = ModelConfig::from_file(&path).unwrap();
        assert_eq!(config.engine, EngineKind::Echo);
        assert_eq!(config.max_new_tokens, 512);
        assert_eq!(config.backend, Backend::Cpu);
        assert_eq!(config.num_threads, 1);
        assert!(config.tokenizer.is_none());
        assert_eq!(config.tmp_path, dir.path().join("tmp"));
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"tokenizer": "model/tokenizer.json", "tmp_path": "/var/tmp/llm"}"#,
        );

        let config = ModelConfig::from_file(&path).unwrap();
        assert_eq!(
            config.tokenizer.unwrap(),
            dir.path().join("model/tokenizer.json")
        );
        assert_eq!(config.tmp_path, PathBuf::from("/var/tmp/llm"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_config(dir.path(), r#"{"max_new_tokens": 0}"#);
        assert!(matches!(
            ModelConfig::from_file(&path),
            Err(Error::ConfigError(_))
        ));

        let path = write_config(dir.path(), r#"{"engine": "mnn"}"#);
        assert!(matches!(
            ModelConfig::from_file(&path),
            Err(Error::ConfigError(_))
        ));

        let path = write_config(dir.path(), "not json");
        assert!(matches!(
            ModelConfig::from_file(&path),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ModelConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.session.busy_policy, BusyPolicy::Wait);
        assert!(!config.stream.append_stats);
        assert_eq!(config.stream.write_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_server_config_from_partial_json() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "port": 9000,
                "session": {"busy_policy": "reject"},
                "stream": {"write_timeout_ms": 250}
            }"#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.session.busy_policy, BusyPolicy::Reject);
        assert_eq!(config.session.max_decode_steps, 8192);
        assert_eq!(config.stream.write_timeout(), Duration::from_millis(250));
    }
}
