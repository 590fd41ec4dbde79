use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// Runtime settings for the `quarry` binary.
///
/// Defaults are overridden by `quarry.toml` (or the file given on the
/// command line) and then by `QUARRY_*` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub listen: String,
    pub log: String,
    /// Fact script loaded at startup.
    pub facts: Option<String>,
    /// SQLite snapshot restored at startup and written on shutdown.
    pub snapshot: Option<String>,
    pub row_limit: usize,
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Settings> {
        let file = match path {
            Some(path) => File::with_name(path),
            None => File::with_name("quarry").required(false),
        };
        let settings = Config::builder()
            .set_default("listen", "127.0.0.1:8080")?
            .set_default("log", "info")?
            .set_default("row_limit", 1000_i64)?
            .add_source(file)
            .add_source(Environment::with_prefix("QUARRY"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen: "127.0.0.1:8080".into(),
            log: "info".into(),
            facts: None,
            snapshot: None,
            row_limit: 1000,
        }
    }
}
