//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Allocation engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Allocation engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// `SET LOCAL lock_timeout` applied to every engine transaction, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Attempts made by standalone number generation before giving up.
    #[serde(default = "default_numbering_max_attempts")]
    pub numbering_max_attempts: u32,
    /// Default invoice number prefix.
    #[serde(default = "default_invoice_prefix")]
    pub invoice_prefix: String,
    /// Default payment number prefix.
    #[serde(default = "default_payment_prefix")]
    pub payment_prefix: String,
    /// Reject a repeated (idempotency key, action) pair with `DuplicateRequest`.
    #[serde(default)]
    pub deduplicate_requests: bool,
    /// Payment methods that settle instantly, on top of cash, check and credit card.
    #[serde(default)]
    pub instant_settlement_methods: Vec<String>,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_numbering_max_attempts() -> u32 {
    5
}

fn default_invoice_prefix() -> String {
    "INV".to_string()
}

fn default_payment_prefix() -> String {
    "PAY".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            numbering_max_attempts: default_numbering_max_attempts(),
            invoice_prefix: default_invoice_prefix(),
            payment_prefix: default_payment_prefix(),
            deduplicate_requests: false,
            instant_settlement_methods: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// Sources, lowest priority first: `config/default`, `config/{RUN_MODE}`,
    /// then `SETTLE__SECTION__KEY` environment variables (a `.env` file is read
    /// first if present).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("SETTLE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("engine.instant_settlement_methods"),
            )
            .build()?;

        config.try_deserialize()
    }
}
