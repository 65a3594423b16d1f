//! C7: the handler registry — concrete pipeline handlers grouped by concern
//! (deploy, github, upstream-sync, audit, clickbot, notify), plus the
//! `HandlerCtx` every handler closes over and the registration table the job
//! runtime (C6) dispatches through.

pub mod audit;
pub mod clickbot;
pub mod deploy;
pub mod github;
pub mod notify;
pub mod sync;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{Config, HandlerMeta, Result, Variables};

use crate::pipeline::github::GitHubClient;
use crate::pipeline::odoo::OdooClient;
use crate::pipeline::ssh::SshPool;

/// Shared clients every handler needs, grounded on the Python worker's
/// `register_*_handlers(worker, config, ssh, github, odoo)` constructor
/// pattern — one registration call per concern, all sharing the same client
/// instances.
#[derive(Clone)]
pub struct HandlerCtx {
    pub config: Arc<Config>,
    pub ssh: SshPool,
    pub github: GitHubClient,
    pub odoo: OdooClient,
}

/// A boxed handler function: `(ctx, variables) -> variables-out`, grounded on
/// the teacher's `BoxedJobHandler` shape in `jobs/registry.rs` (`Arc<dyn Fn>`
/// keyed by task type), generalized from one argument (`Value`) to the
/// context + variables pair every concrete handler here needs.
pub type HandlerFn = Arc<
    dyn Fn(HandlerCtx, Variables) -> Pin<Box<dyn Future<Output = Result<Variables>> + Send>>
        + Send
        + Sync,
>;

/// One registered handler: declarative metadata (§3 `HandlerRegistration`)
/// plus the function it dispatches to.
#[derive(Clone)]
pub struct HandlerEntry {
    pub meta: HandlerMeta,
    pub handler: HandlerFn,
}

/// Registry of every handler this worker knows how to run, keyed by task
/// type. Built once at startup and handed to the job runtime (C6).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: HashMap<&'static str, HandlerEntry>,
}

macro_rules! register {
    ($registry:expr, $task_type:literal, $timeout_secs:expr, $concurrency:expr, $handler:path) => {
        $registry.insert(
            HandlerMeta::new($task_type, Duration::from_secs($timeout_secs), $concurrency),
            Arc::new(|ctx, vars| Box::pin($handler(ctx, vars))),
        )
    };
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, meta: HandlerMeta, handler: HandlerFn) {
        self.entries.insert(meta.task_type, HandlerEntry { meta, handler });
    }

    pub fn get(&self, task_type: &str) -> Option<&HandlerEntry> {
        self.entries.get(task_type)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every concrete handler this worker ships (§4.7): 10 deploy + 4 github
    /// + 10 upstream-sync + 1 audit + 1 clickbot + 2 notify = 28 task types.
    pub fn with_all_handlers() -> Self {
        let mut registry = Self::new();

        register!(registry, "git-pull", 120, 4, deploy::git_pull);
        register!(registry, "detect-modules", 60, 4, deploy::detect_modules);
        register!(registry, "docker-build", 600, 2, deploy::docker_build);
        register!(registry, "docker-up", 300, 2, deploy::docker_up);
        register!(registry, "module-update", 900, 2, deploy::module_update);
        register!(registry, "cache-clear", 60, 4, deploy::cache_clear);
        register!(registry, "smoke-test", 300, 2, deploy::smoke_test);
        register!(registry, "http-verify", 300, 4, deploy::http_verify);
        register!(registry, "save-deploy-state", 30, 4, deploy::save_deploy_state);
        register!(registry, "rollback", 300, 2, deploy::rollback);

        register!(registry, "pr-agent-review", 600, 2, github::pr_agent_review);
        register!(registry, "github-merge", 60, 4, github::github_merge);
        register!(registry, "github-comment", 30, 4, github::github_comment);
        register!(registry, "github-create-pr", 60, 4, github::github_create_pr);

        register!(registry, "fetch-current-version", 30, 4, sync::fetch_current_version);
        register!(registry, "fetch-runbot", 60, 4, sync::fetch_runbot);
        register!(registry, "clone-upstream", 600, 1, sync::clone_upstream);
        register!(registry, "sync-modules", 1200, 1, sync::sync_modules);
        register!(registry, "diff-report", 600, 1, sync::diff_report);
        register!(registry, "impact-analysis", 120, 2, sync::impact_analysis);
        register!(registry, "git-commit-push", 120, 1, sync::git_commit_push);
        register!(registry, "sync-code-to-demo", 120, 2, sync::sync_code_to_demo);
        register!(registry, "merge-to-staging", 180, 1, sync::merge_to_staging);
        register!(registry, "github-pr-ready", 60, 4, sync::github_pr_ready);

        register!(registry, "audit-upstream-conflicts", 600, 1, audit::audit_upstream_conflicts);

        register!(registry, "clickbot-test", 3600, 1, clickbot::clickbot_test);

        register!(registry, "send-notification", 30, 4, notify::send_notification);
        register!(registry, "create-odoo-task", 30, 4, notify::create_odoo_task);

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ships_every_spec_handler() {
        let registry = HandlerRegistry::with_all_handlers();
        assert_eq!(registry.len(), 28);
        assert!(registry.get("git-pull").is_some());
        assert!(registry.get("no-such-handler").is_none());
    }
}
