use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings common to every service, read from an optional `configuration`
/// file and `APP__*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// HTTP port; the gRPC listener binds to `port + 1`.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn port_defaults_to_8080() {
        std::env::remove_var("APP__PORT");
        let config = Config::load().expect("config should load");
        assert_eq!(config.port, 8080);
    }

    #[test]
    #[serial]
    fn port_read_from_environment() {
        std::env::set_var("APP__PORT", "9191");
        let config = Config::load().expect("config should load");
        std::env::remove_var("APP__PORT");
        assert_eq!(config.port, 9191);
    }
}
