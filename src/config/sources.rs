use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "CROWDCOUNT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/crowdcount.toml";
const ENV_PREFIX: &str = "CROWDCOUNT";
const ENV_SEPARATOR: &str = "__";

/// Resolve the config file path and merge every source
///
/// Later sources win: struct defaults, then the TOML file named by
/// `CROWDCOUNT_CONFIG` (or `config/crowdcount.toml`), then `CROWDCOUNT__*`
/// variables. A `.env` file in the working directory is read into the
/// process environment first, so its entries behave like real variables.
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env is the normal case
    let _ = dotenvy::dotenv();

    load_from_sources(config_path())
}

fn config_path() -> PathBuf {
    env::var_os(CONFIG_ENV_VAR)
        .filter(|path| !path.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Merge `config_path` (when present) and the environment over the defaults
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Reading config file");
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            path = %config_path.display(),
            "No config file, running on defaults plus CROWDCOUNT__* overrides"
        );
    }

    // CROWDCOUNT__WORKER__CONSUMERS=4 sets worker.consumers
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
