//! C3: multiplexed SSH connection pool.
//!
//! Grounded on the connection-map-with-mutex shape of
//! `cluster/shutdown.rs`'s registry handling in the teacher crate, adapted to
//! own live `openssh::Session`s instead of cluster membership state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use openssh::{KnownHosts, SessionBuilder};
use relay_core::{CommandResult, RelayError, Result, ServerConfig};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct ConnectionKey {
    user: String,
    host: String,
    port: u16,
}

impl ConnectionKey {
    fn for_server(server: &ServerConfig) -> Self {
        Self {
            user: server.ssh_user.clone(),
            host: server.host.clone(),
            port: server.ssh_port,
        }
    }
}

/// Pool of multiplexed SSH connections, at most one live connection per
/// `(user, host, port)` (§4.3). Host-key verification is disabled: servers
/// live on a trusted internal network and keys are provisioned out-of-band.
#[derive(Clone)]
pub struct SshPool {
    ssh_key_path: Arc<str>,
    connections: Arc<Mutex<HashMap<ConnectionKey, Arc<openssh::Session>>>>,
}

impl SshPool {
    pub fn new(ssh_key_path: impl Into<Arc<str>>) -> Self {
        Self {
            ssh_key_path: ssh_key_path.into(),
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn connection_for(&self, server: &ServerConfig) -> Result<Arc<openssh::Session>> {
        let key = ConnectionKey::for_server(server);
        let mut connections = self.connections.lock().await;

        if let Some(session) = connections.get(&key) {
            if session.check().await.is_ok() {
                return Ok(session.clone());
            }
            connections.remove(&key);
        }

        let session = SessionBuilder::default()
            .known_hosts_check(KnownHosts::Accept)
            .keyfile(&*self.ssh_key_path)
            .user(server.ssh_user.clone())
            .port(server.ssh_port)
            .connect_mux(&server.host)
            .await
            .map_err(|e| RelayError::Transient(format!("ssh dial to {}: {e}", server.host)))?;

        let session = Arc::new(session);
        connections.insert(key, session.clone());
        Ok(session)
    }

    async fn discard(&self, server: &ServerConfig) {
        let key = ConnectionKey::for_server(server);
        self.connections.lock().await.remove(&key);
    }

    /// Run `command` on `server` under an absolute wall-clock `timeout`.
    pub async fn run(
        &self,
        server: &ServerConfig,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let session = self.connection_for(server).await?;

        let run_fut = async {
            let mut cmd = session.command("sh");
            cmd.arg("-c").arg(command);
            let output = cmd
                .output()
                .await
                .map_err(|e| RelayError::Transient(format!("ssh command dispatch: {e}")))?;

            Ok::<_, RelayError>(CommandResult {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.status.code().unwrap_or(-1),
            })
        };

        match tokio::time::timeout(timeout, run_fut).await {
            Ok(result) => {
                if result.is_err() {
                    self.discard(server).await;
                }
                result
            }
            Err(_) => {
                self.discard(server).await;
                Err(RelayError::RemoteTimeout(timeout))
            }
        }
    }

    /// `run(server, "cd " + server.repo_dir + " && " + command, timeout)` (§4.3).
    pub async fn run_in_repo(
        &self,
        server: &ServerConfig,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let full = format!("cd {} && {}", server.repo_dir, command);
        self.run(server, &full, timeout).await
    }

    /// Close every connection and empty the pool. Safe to call once.
    pub async fn close(&self) {
        let mut connections = self.connections.lock().await;
        connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            ssh_user: "deploy".into(),
            ssh_port: 22,
            repo_dir: "/srv/app".into(),
            db_name: "app".into(),
            container: "app".into(),
            port: 8069,
        }
    }

    #[test]
    fn connection_key_groups_by_user_host_port() {
        let a = ConnectionKey::for_server(&server());
        let b = ConnectionKey::for_server(&server());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn close_on_empty_pool_is_safe() {
        let pool = SshPool::new("/nonexistent");
        pool.close().await;
        pool.close().await;
    }

    #[tokio::test]
    async fn run_in_repo_prefixes_cd() {
        let pool = SshPool::new("/nonexistent");
        let result = pool.run(&server(), "cd /srv/app && echo hi", Duration::from_millis(1)).await;
        assert!(result.is_err());
        let _ = pool
            .run_in_repo(&server(), "echo hi", Duration::from_millis(1))
            .await;
    }
}
