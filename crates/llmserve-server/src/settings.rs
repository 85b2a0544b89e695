//! Layered server settings: defaults, optional file, `LLMSERVE_*` environment.

use config::{Config, Environment, File, Map};
use llmserve_core::{Error, Result, ServerConfig};
use std::path::Path;
use tracing::debug;

const ENV_PREFIX: &str = "LLMSERVE";

/// Build the server configuration.
///
/// `file` may be TOML, JSON or YAML (chosen by extension). Environment
/// variables use `__` between nesting levels, e.g.
/// `LLMSERVE_SESSION__BUSY_POLICY=reject`.
pub fn load(file: Option<&Path>) -> Result<ServerConfig> {
    load_with_env(file, None)
}

/// Like [`load`], reading variables from `env` instead of the process
/// environment when given.
pub fn load_with_env(
    file: Option<&Path>,
    env: Option<Map<String, String>>,
) -> Result<ServerConfig> {
    let mut builder = Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env),
    );

    let config: ServerConfig = builder
        .build()
        .and_then(|settings| settings.try_deserialize())
        .map_err(|e| Error::ConfigError(e.to_string()))?;

    if config.stream.channel_capacity == 0 {
        return Err(Error::ConfigError(
            "stream.channel_capacity must be greater than 0".to_string(),
        ));
    }
    if config.session.max_decode_steps == 0 {
        return Err(Error::ConfigError(
            "session.max_decode_steps must be greater than 0".to_string(),
        ));
    }
    if config.stream.write_timeout_ms == 0 {
        return Err(Error::ConfigError(
            "stream.write_timeout_ms must be greater than 0".to_string(),
        ));
    }

    debug!("Server settings: {:?}", config);
    Ok(config)
}
