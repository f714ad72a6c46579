use serde::Deserialize;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_DB_FILE: &str = "classboard.sqlite3";
const ENV_PREFIX: &str = "CLASSBOARD";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Workspace opened at startup; clients may still switch with `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub db_file: String,
    pub log_filter: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let file = env::var("CLASSBOARD_CONFIG").unwrap_or_else(|_| "classboardd".to_string());
        Self::build(&file, environment())
    }

    fn build(file: &str, env: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("db_file", DEFAULT_DB_FILE)?
            .set_default("log_filter", "info")?
            .add_source(config::File::with_name(file).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()
    }
}

/// `CLASSBOARD_DB_FILE`, `CLASSBOARD_LOG_FILTER`, `CLASSBOARD_WORKSPACE`.
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
