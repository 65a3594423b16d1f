//! Deploy pipeline handlers — 10 task types (§4.7 "Deploy").
//!
//! Grounded on `examples/original_source/worker/handlers/deploy.py`; every
//! shell command here is the Rust-side mirror of that file's SSH calls.

use std::time::Duration;

use relay_core::{RelayError, Result, ServerConfig, Variables};
use serde_json::json;

use crate::handlers::HandlerCtx;
use crate::pipeline::params::{i64_param, str_param};

fn resolve<'a>(ctx: &'a HandlerCtx, name: &str) -> Result<&'a ServerConfig> {
    ctx.config
        .servers
        .resolve(name)
        .ok_or_else(|| RelayError::Validation(format!("unknown server {name:?}")))
}

pub async fn git_pull(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let branch = str_param(&vars, "branch", "");
    let server = resolve(&ctx, &server_host)?;
    let repo = {
        let dir = str_param(&vars, "repo_dir", "");
        if dir.is_empty() { server.repo_dir.clone() } else { dir }
    };

    let state_file = format!("{repo}/.deploy-state/deploy_state_{branch}");
    let result = ctx
        .ssh
        .run(
            server,
            &format!("cat {state_file} 2>/dev/null || echo none"),
            Duration::from_secs(30),
        )
        .await?;
    let old_commit = result.stdout_str().trim().to_string();

    let fetch_cmd = format!(
        "git config --global --add safe.directory {repo} 2>/dev/null; git fetch origin {branch}"
    );
    relay_core::retry(
        || async {
            ctx.ssh
                .run_in_repo(server, &fetch_cmd, Duration::from_secs(60))
                .await
                .and_then(|r| r.check())
        },
        3,
        Duration::from_secs(5),
        1.0,
    )
    .await?;

    ctx.ssh
        .run_in_repo(
            server,
            &format!("git checkout -B {branch} origin/{branch}"),
            Duration::from_secs(60),
        )
        .await?
        .check()?;

    let result = ctx
        .ssh
        .run_in_repo(server, "git rev-parse HEAD", Duration::from_secs(30))
        .await?
        .check()?;
    let new_commit = result.stdout_str().trim().to_string();
    let has_changes = old_commit != new_commit;

    tracing::info!(host = %server.host, %old_commit, %new_commit, has_changes, "git-pull");

    Ok(Variables::from_iter([
        ("old_commit".to_string(), json!(old_commit)),
        ("new_commit".to_string(), json!(new_commit)),
        ("has_changes".to_string(), json!(has_changes)),
    ]))
}

const DOCKER_BUILD_TRIGGER_PATHS: &str =
    "docker/ Dockerfile docker-compose.yml src/community/requirements.txt src/custom/requirements.txt";

pub async fn detect_modules(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let old_commit = str_param(&vars, "old_commit", "");
    let new_commit = str_param(&vars, "new_commit", "");
    let server = resolve(&ctx, &server_host)?;

    if old_commit == "none" {
        return Ok(Variables::from_iter([
            ("changed_modules".to_string(), json!("all")),
            ("docker_build_needed".to_string(), json!(true)),
        ]));
    }

    let result = ctx
        .ssh
        .run_in_repo(
            server,
            &format!("git diff --name-only {old_commit} {new_commit} | wc -l"),
            Duration::from_secs(60),
        )
        .await?
        .check()?;
    let total_files: u32 = result.stdout_str().trim().parse().unwrap_or(0);

    if total_files > 250 {
        return Ok(Variables::from_iter([
            ("changed_modules".to_string(), json!("all")),
            ("docker_build_needed".to_string(), json!(true)),
        ]));
    }

    let mut modules = std::collections::BTreeSet::new();

    for (base_dir, depth) in [("src/custom", 3usize), ("src/enterprise", 3), ("src/third-party", 3)] {
        let result = ctx
            .ssh
            .run_in_repo(
                server,
                &format!("git diff --name-only {old_commit} {new_commit} -- {base_dir}/ 2>/dev/null"),
                Duration::from_secs(60),
            )
            .await?;
        let stdout = result.stdout_str();
        if stdout.trim().is_empty() {
            continue;
        }
        for line in stdout.trim().lines() {
            let parts: Vec<&str> = line.split('/').collect();
            if parts.len() >= depth {
                let mod_name = parts[depth - 1];
                let check = ctx
                    .ssh
                    .run_in_repo(
                        server,
                        &format!("test -f {base_dir}/{mod_name}/__manifest__.py && echo yes || echo no"),
                        Duration::from_secs(30),
                    )
                    .await?;
                if check.stdout_str().trim() == "yes" {
                    modules.insert(mod_name.to_string());
                }
            }
        }
    }

    let result = ctx
        .ssh
        .run_in_repo(
            server,
            &format!("git diff --name-only {old_commit} {new_commit} -- src/community/odoo/addons/ 2>/dev/null"),
            Duration::from_secs(60),
        )
        .await?;
    let stdout = result.stdout_str();
    if !stdout.trim().is_empty() {
        for line in stdout.trim().lines() {
            let parts: Vec<&str> = line.split('/').collect();
            if parts.len() >= 5 {
                let mod_name = parts[4];
                let check = ctx
                    .ssh
                    .run_in_repo(
                        server,
                        &format!(
                            "test -f src/community/odoo/addons/{mod_name}/__manifest__.py && echo yes || echo no"
                        ),
                        Duration::from_secs(30),
                    )
                    .await?;
                if check.stdout_str().trim() == "yes" {
                    modules.insert(mod_name.to_string());
                }
            }
        }
    }

    let docker_result = ctx
        .ssh
        .run_in_repo(
            server,
            &format!("git diff --name-only {old_commit} {new_commit} -- {DOCKER_BUILD_TRIGGER_PATHS}"),
            Duration::from_secs(60),
        )
        .await?;
    let docker_build_needed = !docker_result.stdout_str().trim().is_empty();

    let changed_modules: Vec<String> = modules.into_iter().collect();
    let changed_modules = changed_modules.join(",");

    tracing::info!(host = %server.host, %changed_modules, docker_build_needed, "detect-modules");

    Ok(Variables::from_iter([
        ("changed_modules".to_string(), json!(changed_modules)),
        ("docker_build_needed".to_string(), json!(docker_build_needed)),
    ]))
}

pub async fn docker_build(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let server = resolve(&ctx, &server_host)?;

    relay_core::retry(
        || async {
            ctx.ssh
                .run_in_repo(server, "docker compose build --pull web", Duration::from_secs(540))
                .await
                .and_then(|r| r.check())
        },
        3,
        Duration::from_secs(5),
        1.0,
    )
    .await?;

    tracing::info!(host = %server.host, "docker-build completed");
    Ok(Variables::new())
}

async fn wait_http(ctx: &HandlerCtx, server: &ServerConfig, port: u16, max_attempts: u32, interval: Duration) -> Result<()> {
    for attempt in 1..=max_attempts {
        let result = ctx
            .ssh
            .run(
                server,
                &format!("curl -sf -o /dev/null --max-time 10 http://localhost:{port}/web/login"),
                Duration::from_secs(20),
            )
            .await;
        if matches!(&result, Ok(r) if r.success()) {
            return Ok(());
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(RelayError::Retriable(format!(
        "HTTP service not responding on {}:{port} after {}s",
        server.host,
        max_attempts * interval.as_secs() as u32
    )))
}

pub async fn docker_up(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let server = resolve(&ctx, &server_host)?;
    let container = {
        let c = str_param(&vars, "container", "");
        if c.is_empty() { server.container.clone() } else { c }
    };
    let svc_port = {
        let p = i64_param(&vars, "port", 0);
        if p == 0 { server.port } else { p as u16 }
    };

    relay_core::retry(
        || async {
            ctx.ssh
                .run_in_repo(server, "docker compose up -d", Duration::from_secs(60))
                .await
                .and_then(|r| r.check())
        },
        3,
        Duration::from_secs(5),
        1.0,
    )
    .await?;

    let mut running = false;
    for _ in 0..12 {
        let result = ctx
            .ssh
            .run(
                server,
                &format!("docker inspect --format='{{{{.State.Status}}}}' {container} 2>/dev/null || echo unknown"),
                Duration::from_secs(15),
            )
            .await?;
        if result.stdout_str().trim().trim_matches('\'') == "running" {
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    if !running {
        return Err(RelayError::Retriable(format!(
            "container {container} not running after 60s"
        )));
    }

    wait_http(&ctx, server, svc_port, 24, Duration::from_secs(10)).await?;
    tracing::info!(host = %server.host, svc_port, "docker-up: service healthy");
    Ok(Variables::new())
}

async fn get_db_password(ctx: &HandlerCtx, server: &ServerConfig, container: &str) -> Result<String> {
    let result = ctx
        .ssh
        .run(
            server,
            &format!("docker exec {container} printenv PASSWORD 2>/dev/null"),
            Duration::from_secs(15),
        )
        .await?;
    if result.success() && !result.stdout_str().trim().is_empty() {
        return Ok(result.stdout_str().trim().to_string());
    }

    let result = ctx
        .ssh
        .run_in_repo(
            server,
            "grep -oP 'POSTGRES_PASSWORD=\\K.*' .env 2>/dev/null",
            Duration::from_secs(15),
        )
        .await?;
    if result.success() && !result.stdout_str().trim().is_empty() {
        return Ok(result.stdout_str().trim().to_string());
    }

    Err(RelayError::Retriable(format!(
        "cannot retrieve db password on {}",
        server.host
    )))
}

pub async fn module_update(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let changed_modules = str_param(&vars, "changed_modules", "");
    let server = resolve(&ctx, &server_host)?;
    let db = {
        let d = str_param(&vars, "db_name", "");
        if d.is_empty() { server.db_name.clone() } else { d }
    };
    let container = {
        let c = str_param(&vars, "container", "");
        if c.is_empty() { server.container.clone() } else { c }
    };

    if changed_modules.is_empty() {
        return Ok(Variables::from_iter([("modules_updated".to_string(), json!(""))]));
    }

    let update_modules = if changed_modules == "all" {
        "all".to_string()
    } else {
        let module_list: Vec<&str> = changed_modules.split(',').map(str::trim).filter(|m| !m.is_empty()).collect();

        let result = ctx
            .ssh
            .run(
                server,
                &format!(
                    "docker exec {container}-db psql -U odoo -d {db} -t -A -c \"SELECT name FROM ir_module_module WHERE state = 'installed';\""
                ),
                Duration::from_secs(30),
            )
            .await?
            .check()?;
        let stdout = result.stdout_str();
        let installed_owned: std::collections::HashSet<String> =
            stdout.lines().map(|l| l.trim().to_string()).collect();

        let update_mods: Vec<&str> = module_list.into_iter().filter(|m| installed_owned.contains(*m)).collect();
        if update_mods.len() > 10 {
            "all".to_string()
        } else {
            update_mods.join(",")
        }
    };

    if update_modules.is_empty() {
        return Ok(Variables::from_iter([("modules_updated".to_string(), json!(""))]));
    }

    let db_password = get_db_password(&ctx, server, &container).await?;

    ctx.ssh
        .run_in_repo(
            server,
            "find src -type d -name __pycache__ -exec rm -rf {} + 2>/dev/null || true",
            Duration::from_secs(60),
        )
        .await?;

    ctx.ssh
        .run(server, &format!("docker stop {container} 2>/dev/null || true"), Duration::from_secs(30))
        .await?;

    ctx.ssh
        .run_in_repo(
            server,
            &format!(
                "timeout 2000 docker compose run --rm web odoo-bin -d {db} -u {update_modules} --db_password='{db_password}' --stop-after-init --no-http --log-level=warn"
            ),
            Duration::from_secs(2100),
        )
        .await?
        .check()?;

    ctx.ssh
        .run_in_repo(server, "docker compose up -d", Duration::from_secs(60))
        .await?
        .check()?;

    ctx.ssh
        .run(
            server,
            &format!(
                "docker exec {container}-db psql -U odoo -d {db} -c \"DELETE FROM ir_attachment WHERE url LIKE '/web/assets/%' OR name LIKE 'web.assets%';\""
            ),
            Duration::from_secs(30),
        )
        .await?;

    tracing::info!(host = %server.host, %update_modules, "module-update");
    Ok(Variables::from_iter([("modules_updated".to_string(), json!(update_modules))]))
}

pub async fn cache_clear(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let server = resolve(&ctx, &server_host)?;
    let db = {
        let d = str_param(&vars, "db_name", "");
        if d.is_empty() { server.db_name.clone() } else { d }
    };
    let container = {
        let c = str_param(&vars, "container", "");
        if c.is_empty() { server.container.clone() } else { c }
    };

    ctx.ssh
        .run(
            server,
            &format!(
                "docker exec {container}-db psql -U odoo -d {db} -c \"DELETE FROM ir_attachment WHERE url LIKE '/web/assets/%' OR name LIKE 'web.assets%';\""
            ),
            Duration::from_secs(30),
        )
        .await?;
    ctx.ssh
        .run_in_repo(server, "docker compose up -d", Duration::from_secs(60))
        .await?
        .check()?;

    tracing::info!(host = %server.host, "cache-clear");
    Ok(Variables::new())
}

const SMOKE_TEST_IGNORE_PATTERNS: [&str; 3] = [
    "Some modules are not loaded",
    "inconsistent states",
    "Importing test framework",
];

pub async fn smoke_test(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let server = resolve(&ctx, &server_host)?;
    let db = {
        let d = str_param(&vars, "db_name", "");
        if d.is_empty() { server.db_name.clone() } else { d }
    };
    let container = {
        let c = str_param(&vars, "container", "");
        if c.is_empty() { server.container.clone() } else { c }
    };

    let db_password = get_db_password(&ctx, server, &container).await?;

    ctx.ssh
        .run(server, &format!("docker stop {container} 2>/dev/null || true"), Duration::from_secs(30))
        .await?;

    let result = ctx
        .ssh
        .run_in_repo(
            server,
            &format!(
                "timeout 120 docker compose run --rm -T web odoo-bin -d {db} --db_password='{db_password}' --stop-after-init --no-http 2>&1"
            ),
            Duration::from_secs(150),
        )
        .await?;

    let error_re = regex::Regex::new("CRITICAL|ERROR|ImportError|ModuleNotFoundError|SyntaxError|Traceback").unwrap();
    let stdout = result.stdout_str();
    let error_lines: Vec<&str> = stdout
        .lines()
        .filter(|line| error_re.is_match(line))
        .filter(|line| !SMOKE_TEST_IGNORE_PATTERNS.iter().any(|p| line.contains(p)))
        .map(|l| l.trim())
        .collect();
    let smoke_passed = result.success() && error_lines.is_empty();

    if smoke_passed {
        ctx.ssh
            .run_in_repo(server, "docker compose up -d", Duration::from_secs(60))
            .await?
            .check()?;
    } else {
        tracing::warn!(host = %server.host, ?error_lines, "smoke test failed");
    }

    tracing::info!(host = %server.host, smoke_passed, "smoke-test");
    Ok(Variables::from_iter([("smoke_passed".to_string(), json!(smoke_passed))]))
}

pub async fn http_verify(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let server = resolve(&ctx, &server_host)?;
    let svc_port = {
        let p = i64_param(&vars, "port", 0);
        if p == 0 { server.port } else { p as u16 }
    };

    wait_http(&ctx, server, svc_port, 24, Duration::from_secs(10)).await?;
    tracing::info!(host = %server.host, svc_port, "http-verify: OK");
    Ok(Variables::new())
}

pub async fn save_deploy_state(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let branch = str_param(&vars, "branch", "");
    let new_commit = str_param(&vars, "new_commit", "");
    let server = resolve(&ctx, &server_host)?;
    let repo = {
        let dir = str_param(&vars, "repo_dir", "");
        if dir.is_empty() { server.repo_dir.clone() } else { dir }
    };

    ctx.ssh
        .run(
            server,
            &format!(
                "mkdir -p {repo}/.deploy-state && chmod 700 {repo}/.deploy-state && echo '{new_commit}' > {repo}/.deploy-state/deploy_state_{branch} && chmod 600 {repo}/.deploy-state/deploy_state_{branch}"
            ),
            Duration::from_secs(15),
        )
        .await?
        .check()?;

    tracing::info!(host = %server.host, %branch, %new_commit, "save-deploy-state");
    Ok(Variables::new())
}

pub async fn rollback(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let old_commit = str_param(&vars, "old_commit", "none");
    let branch = str_param(&vars, "branch", "");
    let server = resolve(&ctx, &server_host)?;

    if old_commit.is_empty() || old_commit == "none" {
        tracing::warn!(host = %server.host, "rollback: no previous commit, skipping");
        return Ok(Variables::new());
    }

    if branch.is_empty() {
        ctx.ssh
            .run_in_repo(server, &format!("git checkout {old_commit}"), Duration::from_secs(60))
            .await?
            .check()?;
    } else {
        ctx.ssh
            .run_in_repo(server, &format!("git checkout -B {branch} {old_commit}"), Duration::from_secs(60))
            .await?
            .check()?;
    }

    ctx.ssh
        .run_in_repo(server, "docker compose up -d --force-recreate", Duration::from_secs(120))
        .await?
        .check()?;

    tracing::info!(host = %server.host, %old_commit, "rollback");
    Ok(Variables::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::EngineAuth;

    fn ctx() -> HandlerCtx {
        let mut servers = relay_core::ServerRegistry::new();
        servers.insert(
            "staging",
            ServerConfig {
                host: "staging.example.internal".into(),
                ssh_user: "deploy".into(),
                ssh_port: 22,
                repo_dir: "/srv/app".into(),
                db_name: "app".into(),
                container: "app".into(),
                port: 8069,
            },
        );
        let config = relay_core::Config {
            engine: relay_core::config::EngineConfig {
                address: "zeebe:26500".into(),
                use_tls: false,
                auth: EngineAuth::Insecure,
                rest_address: "http://zeebe:8080".into(),
            },
            github: relay_core::config::GitHubConfig {
                token: "".into(),
                deploy_pat: "".into(),
                webhook_secret: "".into(),
                repository: "acme/app".into(),
            },
            webhook: relay_core::config::WebhookConfig {
                host: "0.0.0.0".into(),
                port: 9001,
                odoo_webhook_token: "".into(),
            },
            odoo: relay_core::config::OdooConfig {
                webhook_url: "".into(),
                project_id: 0,
                assignee_id: 0,
            },
            ssh_key_path: "/nonexistent".into(),
            servers,
            logging: relay_core::config::LoggingConfig {
                filter: "info".into(),
                format: relay_core::config::LogFormat::Pretty,
            },
        };
        HandlerCtx {
            config: std::sync::Arc::new(config),
            ssh: crate::pipeline::ssh::SshPool::new("/nonexistent"),
            github: crate::pipeline::github::GitHubClient::new("tok", ""),
            odoo: crate::pipeline::odoo::OdooClient::new("http://localhost", 1),
        }
    }

    #[test]
    fn resolve_rejects_unknown_server() {
        let ctx = ctx();
        assert!(resolve(&ctx, "production").is_err());
        assert!(resolve(&ctx, "staging").is_ok());
    }

    #[tokio::test]
    async fn rollback_is_noop_without_previous_commit() {
        let ctx = ctx();
        let vars = Variables::from_iter([
            ("server_host".to_string(), json!("staging")),
            ("old_commit".to_string(), json!("none")),
        ]);
        let result = rollback(ctx, vars).await.unwrap();
        assert!(result.is_empty());
    }
}
