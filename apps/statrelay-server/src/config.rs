use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen address for the HTTP surface.
    pub serve_addr: String,
    /// User/auth-key database path.
    pub db_path: PathBuf,
    /// HS256 signing key for session tokens. Generated at startup when
    /// absent, which invalidates outstanding tokens on restart.
    pub jwt_signing_key: Option<String>,
    /// Sessions without ingestion for this long are reset by the sweeper.
    #[serde(with = "humantime_serde")]
    pub max_idle: Duration,
    /// Per-request timeout on the HTTP surface.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("serve_addr", "0.0.0.0:8380")?
            .set_default("db_path", "data/statrelay-users.db")?
            .set_default("jwt_signing_key", None::<String>)?
            .set_default("max_idle", "10m")?
            .set_default("request_timeout", "10s")?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("STATRELAY").try_parsing(true));

        builder.build()?.try_deserialize()
    }
}
