//! C1: typed, env-driven configuration (§4.1).

use std::env;

use crate::engine_auth::{EngineAuth, OAuth2State};
use crate::error::{RelayError, Result};
use crate::server::{ServerConfig, ServerRegistry};

const SERVER_NAMES: [&str; 3] = ["staging", "production", "kozak_demo"];

#[derive(Debug)]
pub struct EngineConfig {
    pub address: String,
    pub use_tls: bool,
    pub auth: EngineAuth,
    /// Base URL of the engine's REST API, used for the process-instance
    /// cancellation call the Odoo webhook route issues (§4.8).
    pub rest_address: String,
}

#[derive(Debug)]
pub struct GitHubConfig {
    pub token: String,
    pub deploy_pat: String,
    pub webhook_secret: String,
    pub repository: String,
}

#[derive(Debug)]
pub struct WebhookConfig {
    pub host: String,
    pub port: u16,
    pub odoo_webhook_token: String,
}

#[derive(Debug)]
pub struct OdooConfig {
    pub webhook_url: String,
    pub project_id: i64,
    pub assignee_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug)]
pub struct LoggingConfig {
    pub filter: String,
    pub format: LogFormat,
}

/// The root configuration record, built once at startup by [`Config::from_env`]
/// and shared thereafter behind `Arc` — never mutated (§3 Ownership & lifecycle).
#[derive(Debug)]
pub struct Config {
    pub engine: EngineConfig,
    pub github: GitHubConfig,
    pub webhook: WebhookConfig,
    pub odoo: OdooConfig,
    pub ssh_key_path: String,
    pub servers: ServerRegistry,
    pub logging: LoggingConfig,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parse a numeric env var strictly: unset falls back to `default`, but a
/// value that IS set and doesn't parse is a fatal config error (§4.1).
fn parse_numeric<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| RelayError::Config(format!("{name}: invalid numeric value {raw:?}"))),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut servers = ServerRegistry::new();
        for name in SERVER_NAMES {
            let prefix = name.to_uppercase();
            let Ok(host) = env::var(format!("{prefix}_HOST")) else {
                continue;
            };
            if host.is_empty() {
                continue;
            }
            servers.insert(
                name,
                ServerConfig {
                    host,
                    ssh_user: env_or(&format!("{prefix}_SSH_USER"), "deploy"),
                    ssh_port: parse_numeric(&format!("{prefix}_SSH_PORT"), 22)?,
                    repo_dir: env_or(&format!("{prefix}_REPO_DIR"), "/opt/odoo-enterprise"),
                    db_name: env_or(&format!("{prefix}_DB_NAME"), "odoo19"),
                    container: env_or(&format!("{prefix}_CONTAINER"), name),
                    port: parse_numeric(&format!("{prefix}_PORT"), 8069)?,
                },
            );
        }

        let use_tls = env_or("ZEEBE_USE_TLS", "false").eq_ignore_ascii_case("true");
        let client_id = env::var("ZEEBE_CLIENT_ID").unwrap_or_default();
        let auth = if !client_id.is_empty() {
            EngineAuth::OAuth2ClientCredentials(OAuth2State::new(
                client_id,
                env::var("ZEEBE_CLIENT_SECRET").unwrap_or_default(),
                env::var("ZEEBE_TOKEN_URL").unwrap_or_default(),
                env::var("ZEEBE_AUDIENCE").unwrap_or_default(),
            ))
        } else if let Ok(token) = env::var("ZEEBE_STATIC_TOKEN") {
            EngineAuth::StaticToken(token)
        } else {
            EngineAuth::Insecure
        };

        let format = match env_or("LOG_FORMAT", "pretty").as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            engine: EngineConfig {
                address: env_or("ZEEBE_ADDRESS", "zeebe:26500"),
                use_tls,
                auth,
                rest_address: env_or("ZEEBE_REST_ADDRESS", "http://zeebe:8080"),
            },
            github: GitHubConfig {
                token: env::var("GITHUB_TOKEN").unwrap_or_default(),
                deploy_pat: env::var("DEPLOY_PAT").unwrap_or_default(),
                webhook_secret: env::var("GITHUB_WEBHOOK_SECRET").unwrap_or_default(),
                repository: env_or("REPOSITORY", "tut-ua/odoo-enterprise"),
            },
            webhook: WebhookConfig {
                host: env_or("WEBHOOK_HOST", "0.0.0.0"),
                port: parse_numeric("WEBHOOK_PORT", 9001)?,
                odoo_webhook_token: env::var("ODOO_WEBHOOK_TOKEN").unwrap_or_default(),
            },
            odoo: OdooConfig {
                webhook_url: env::var("ODOO_WEBHOOK_URL").unwrap_or_default(),
                project_id: parse_numeric("ODOO_PROJECT_ID", 0)?,
                assignee_id: parse_numeric("ODOO_ASSIGNEE_ID", 0)?,
            },
            ssh_key_path: env_or(
                "SSH_KEY_PATH",
                &format!(
                    "{}/.ssh/id_ed25519",
                    env::var("HOME").unwrap_or_else(|_| "/root".to_string())
                ),
            ),
            servers,
            logging: LoggingConfig {
                filter: env_or("RUST_LOG", "info"),
                format,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_numeric_env_is_fatal() {
        env::set_var("WEBHOOK_PORT", "not-a-number");
        let result = Config::from_env();
        env::remove_var("WEBHOOK_PORT");
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn missing_server_host_yields_empty_entry() {
        env::remove_var("STAGING_HOST");
        let config = Config::from_env().expect("defaults alone must be valid");
        assert!(config.servers.resolve("staging").is_none());
    }
}
