use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use sokoni_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "SOKONI_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "SOKONI_DATABASE_MAX_CONNECTIONS"),
    ));

    lines.push(render_line(
        "llm.provider",
        &format!("{:?}", config.llm.provider),
        source("llm.provider", "SOKONI_LLM_PROVIDER"),
    ));
    lines.push(render_line("llm.model", &config.llm.model, source("llm.model", "SOKONI_LLM_MODEL")));
    lines.push(render_line(
        "llm.api_key",
        if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" },
        source("llm.api_key", "SOKONI_LLM_API_KEY"),
    ));

    lines.push(render_line(
        "whatsapp.sender_number",
        &config.whatsapp.sender_number,
        source("whatsapp.sender_number", "SOKONI_WHATSAPP_SENDER_NUMBER"),
    ));
    lines.push(render_line(
        "whatsapp.auth_token",
        if config.whatsapp.auth_token.is_some() { "<redacted>" } else { "<unset>" },
        source("whatsapp.auth_token", "SOKONI_WHATSAPP_AUTH_TOKEN"),
    ));

    lines.push(render_line(
        "payment.base_url",
        &config.payment.base_url,
        source("payment.base_url", "SOKONI_PAYMENT_BASE_URL"),
    ));
    lines.push(render_line(
        "payment.api_key",
        if config.payment.api_key.is_some() { "<redacted>" } else { "<unset>" },
        source("payment.api_key", "SOKONI_PAYMENT_API_KEY"),
    ));

    lines.push(render_line(
        "routing.route_confidence_threshold",
        &config.routing.route_confidence_threshold.to_string(),
        source("routing.route_confidence_threshold", "SOKONI_ROUTING_CONFIDENCE_THRESHOLD"),
    ));
    lines.push(render_line(
        "routing.direct_prompt_after_turns",
        &config.routing.direct_prompt_after_turns.to_string(),
        source("routing.direct_prompt_after_turns", "SOKONI_ROUTING_DIRECT_PROMPT_AFTER_TURNS"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "SOKONI_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "SOKONI_SERVER_PORT"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "SOKONI_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "SOKONI_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("sokoni.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/sokoni.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn nested_key_paths_resolve_in_toml_documents() {
        let doc: toml::Value = r#"
[database]
url = "sqlite://sokoni.db"

[routing]
route_confidence_threshold = 0.8
"#
        .parse()
        .expect("toml");

        assert!(contains_path(&doc, "database.url"));
        assert!(contains_path(&doc, "routing.route_confidence_threshold"));
        assert!(!contains_path(&doc, "llm.model"));
    }
}
