use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub whatsapp: WhatsAppConfig,
    pub payment: PaymentConfig,
    pub routing: RoutingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<SecretString>,
    pub sender_number: String,
    pub webhook_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub api_key: Option<SecretString>,
    pub api_secret: Option<SecretString>,
    pub base_url: String,
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
}

/// Dispatch policy knobs. The confidence threshold and the turn count
/// after which clarifying prompts become more direct are tunable policy,
/// not fixed behavior.
#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub route_confidence_threshold: f32,
    pub history_window: usize,
    pub direct_prompt_after_turns: u32,
    pub max_chain_hops: u8,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Anthropic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub whatsapp_sender_number: Option<String>,
    pub payment_base_url: Option<String>,
    pub route_confidence_threshold: Option<f32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://sokoni.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: None,
                model: "gemini-1.5-flash".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            whatsapp: WhatsAppConfig {
                account_sid: None,
                auth_token: None,
                sender_number: "whatsapp:+14155238886".to_string(),
                webhook_secret: None,
            },
            payment: PaymentConfig {
                api_key: None,
                api_secret: None,
                base_url: "https://api.paylink.co.ke".to_string(),
                callback_url: None,
                timeout_secs: 30,
            },
            routing: RoutingConfig {
                route_confidence_threshold: 0.75,
                history_window: 5,
                direct_prompt_after_turns: 3,
                max_chain_hops: 3,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|openai|anthropic)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("sokoni.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(account_sid) = whatsapp.account_sid {
                self.whatsapp.account_sid = Some(account_sid);
            }
            if let Some(auth_token) = whatsapp.auth_token {
                self.whatsapp.auth_token = Some(secret_value(auth_token));
            }
            if let Some(sender_number) = whatsapp.sender_number {
                self.whatsapp.sender_number = sender_number;
            }
            if let Some(webhook_secret) = whatsapp.webhook_secret {
                self.whatsapp.webhook_secret = Some(secret_value(webhook_secret));
            }
        }

        if let Some(payment) = patch.payment {
            if let Some(api_key) = payment.api_key {
                self.payment.api_key = Some(secret_value(api_key));
            }
            if let Some(api_secret) = payment.api_secret {
                self.payment.api_secret = Some(secret_value(api_secret));
            }
            if let Some(base_url) = payment.base_url {
                self.payment.base_url = base_url;
            }
            if let Some(callback_url) = payment.callback_url {
                self.payment.callback_url = Some(callback_url);
            }
            if let Some(timeout_secs) = payment.timeout_secs {
                self.payment.timeout_secs = timeout_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(threshold) = routing.route_confidence_threshold {
                self.routing.route_confidence_threshold = threshold;
            }
            if let Some(history_window) = routing.history_window {
                self.routing.history_window = history_window;
            }
            if let Some(turns) = routing.direct_prompt_after_turns {
                self.routing.direct_prompt_after_turns = turns;
            }
            if let Some(hops) = routing.max_chain_hops {
                self.routing.max_chain_hops = hops;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SOKONI_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SOKONI_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("SOKONI_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SOKONI_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SOKONI_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SOKONI_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("SOKONI_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SOKONI_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("SOKONI_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SOKONI_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SOKONI_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SOKONI_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("SOKONI_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("SOKONI_WHATSAPP_ACCOUNT_SID") {
            self.whatsapp.account_sid = Some(value);
        }
        if let Some(value) = read_env("SOKONI_WHATSAPP_AUTH_TOKEN") {
            self.whatsapp.auth_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("SOKONI_WHATSAPP_SENDER_NUMBER") {
            self.whatsapp.sender_number = value;
        }
        if let Some(value) = read_env("SOKONI_WHATSAPP_WEBHOOK_SECRET") {
            self.whatsapp.webhook_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("SOKONI_PAYMENT_API_KEY") {
            self.payment.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SOKONI_PAYMENT_API_SECRET") {
            self.payment.api_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("SOKONI_PAYMENT_BASE_URL") {
            self.payment.base_url = value;
        }
        if let Some(value) = read_env("SOKONI_PAYMENT_CALLBACK_URL") {
            self.payment.callback_url = Some(value);
        }
        if let Some(value) = read_env("SOKONI_PAYMENT_TIMEOUT_SECS") {
            self.payment.timeout_secs = parse_u64("SOKONI_PAYMENT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SOKONI_ROUTING_CONFIDENCE_THRESHOLD") {
            self.routing.route_confidence_threshold =
                parse_f32("SOKONI_ROUTING_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SOKONI_ROUTING_HISTORY_WINDOW") {
            self.routing.history_window =
                parse_u32("SOKONI_ROUTING_HISTORY_WINDOW", &value)? as usize;
        }
        if let Some(value) = read_env("SOKONI_ROUTING_DIRECT_PROMPT_AFTER_TURNS") {
            self.routing.direct_prompt_after_turns =
                parse_u32("SOKONI_ROUTING_DIRECT_PROMPT_AFTER_TURNS", &value)?;
        }

        if let Some(value) = read_env("SOKONI_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SOKONI_SERVER_PORT") {
            self.server.port = parse_u16("SOKONI_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SOKONI_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("SOKONI_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SOKONI_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SOKONI_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("SOKONI_LOGGING_LEVEL").or_else(|| read_env("SOKONI_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SOKONI_LOGGING_FORMAT").or_else(|| read_env("SOKONI_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(sender_number) = overrides.whatsapp_sender_number {
            self.whatsapp.sender_number = sender_number;
        }
        if let Some(payment_base_url) = overrides.payment_base_url {
            self.payment.base_url = payment_base_url;
        }
        if let Some(threshold) = overrides.route_confidence_threshold {
            self.routing.route_confidence_threshold = threshold;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_payment(&self.payment)?;
        validate_routing(&self.routing)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("sokoni.toml"), PathBuf::from("config/sokoni.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    if whatsapp.sender_number.trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.sender_number must not be empty".to_string(),
        ));
    }

    // Credentials may be absent (mock sending), but they must come in a pair.
    let has_sid = whatsapp.account_sid.as_ref().is_some_and(|sid| !sid.trim().is_empty());
    let has_token = whatsapp
        .auth_token
        .as_ref()
        .is_some_and(|token| !token.expose_secret().trim().is_empty());
    if has_sid != has_token {
        return Err(ConfigError::Validation(
            "whatsapp.account_sid and whatsapp.auth_token must be configured together".to_string(),
        ));
    }

    Ok(())
}

fn validate_payment(payment: &PaymentConfig) -> Result<(), ConfigError> {
    if !payment.base_url.starts_with("http://") && !payment.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "payment.base_url must start with http:// or https://".to_string(),
        ));
    }

    if payment.timeout_secs == 0 || payment.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "payment.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let has_key = payment.api_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty());
    let has_secret = payment
        .api_secret
        .as_ref()
        .is_some_and(|secret| !secret.expose_secret().trim().is_empty());
    if has_key != has_secret {
        return Err(ConfigError::Validation(
            "payment.api_key and payment.api_secret must be configured together".to_string(),
        ));
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&routing.route_confidence_threshold) {
        return Err(ConfigError::Validation(
            "routing.route_confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    if routing.history_window == 0 {
        return Err(ConfigError::Validation(
            "routing.history_window must be greater than zero".to_string(),
        ));
    }

    if routing.max_chain_hops == 0 || routing.max_chain_hops > 5 {
        return Err(ConfigError::Validation(
            "routing.max_chain_hops must be in range 1..=5".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    whatsapp: Option<WhatsAppPatch>,
    payment: Option<PaymentPatch>,
    routing: Option<RoutingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    account_sid: Option<String>,
    auth_token: Option<String>,
    sender_number: Option<String>,
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentPatch {
    api_key: Option<String>,
    api_secret: Option<String>,
    base_url: Option<String>,
    callback_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    route_confidence_threshold: Option<f32>,
    history_window: Option<usize>,
    direct_prompt_after_turns: Option<u32>,
    max_chain_hops: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
