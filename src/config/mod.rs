use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used to build the redirect and
    /// callback URLs handed to the gateway.
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// PhonePe credentials and tuning.
///
/// Merchant id, salt key and webhook secret have no defaults on
/// purpose: a deployment without them must die at startup, not at the
/// first checkout.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub merchant_id: String,
    pub salt_key: String,
    #[serde(default = "default_salt_index")]
    pub salt_index: u32,
    pub webhook_secret: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
}

fn default_salt_index() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    2_000
}

fn default_retry_cap_ms() -> u64 {
    32_000
}

const SANDBOX_URL: &str = "https://api-preprod.phonepe.com/apis/pg-sandbox";
const PRODUCTION_URL: &str = "https://api.phonepe.com/apis/hermes";

impl GatewayConfig {
    pub fn api_base_url(&self) -> &'static str {
        if self.sandbox {
            SANDBOX_URL
        } else {
            PRODUCTION_URL
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values; gateway credentials have none
            // so deserialization fails when they are missing.
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://trailpass.db")?
            .set_default("database.max_connections", 10)?
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (with TRAILPASS__ prefix, double
            // underscore separates levels)
            .add_source(Environment::with_prefix("TRAILPASS").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(sandbox: bool) -> GatewayConfig {
        GatewayConfig {
            merchant_id: "MERCHANTTEST".to_string(),
            salt_key: "salt".to_string(),
            salt_index: 1,
            webhook_secret: "whsec".to_string(),
            sandbox,
            timeout_secs: 30,
            max_attempts: 5,
            retry_base_ms: 2_000,
            retry_cap_ms: 32_000,
        }
    }

    #[test]
    fn sandbox_flag_selects_base_url() {
        assert!(gateway(true).api_base_url().contains("preprod"));
        assert!(!gateway(false).api_base_url().contains("preprod"));
    }
}
