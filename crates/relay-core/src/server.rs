//! Remote-host descriptions handlers use for SSH/deploy operations (§3, §4.1).

use std::collections::HashMap;

/// A remote host a deploy/sync handler may target. Immutable after load.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub repo_dir: String,
    pub db_name: String,
    pub container: String,
    pub port: u16,
}

/// The set of servers known to this worker, keyed by logical name
/// (`staging`, `production`, `kozak_demo`) as loaded from `Config::from_env`.
///
/// Handlers may look a server up either by its logical name or by its raw
/// hostname (§8: "A server registered only as `staging` must resolve both by
/// logical name and by its raw host string").
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    by_name: HashMap<String, ServerConfig>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, logical_name: impl Into<String>, server: ServerConfig) {
        self.by_name.insert(logical_name.into(), server);
    }

    /// Resolve by logical name first, then by matching raw hostname.
    pub fn resolve(&self, name_or_host: &str) -> Option<&ServerConfig> {
        self.by_name
            .get(name_or_host)
            .or_else(|| self.by_name.values().find(|s| s.host == name_or_host))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Every configured server by logical name, for flattening into the
    /// `<name>_host`, `<name>_ssh_user`, … variables published with
    /// `msg_pr_event` (§4.8).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServerConfig)> {
        self.by_name.iter().map(|(name, server)| (name.as_str(), server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(host: &str) -> ServerConfig {
        ServerConfig {
            host: host.into(),
            ssh_user: "deploy".into(),
            ssh_port: 22,
            repo_dir: "/srv/app".into(),
            db_name: "app".into(),
            container: "app".into(),
            port: 8069,
        }
    }

    #[test]
    fn resolves_by_logical_name_and_raw_host() {
        let mut reg = ServerRegistry::new();
        reg.insert("staging", server("staging.example.internal"));

        assert!(reg.resolve("staging").is_some());
        assert!(reg.resolve("staging.example.internal").is_some());
        assert!(reg.resolve("production").is_none());
    }
}
