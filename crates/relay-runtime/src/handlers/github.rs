//! GitHub pipeline handlers — 4 task types (§4.7 "GitHub").
//!
//! Grounded on `examples/original_source/worker/handlers/github.py`,
//! including the score-parsing and critical-security regexes.

use std::time::Duration;

use regex::Regex;
use relay_core::{Result, Variables};
use serde_json::json;

use crate::handlers::HandlerCtx;
use crate::pipeline::params::{bool_param, i64_param, str_param};

pub async fn pr_agent_review(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let pr_number = i64_param(&vars, "pr_number", 0) as u64;
    let pr_url = str_param(&vars, "pr_url", "");
    let repo = {
        let r = str_param(&vars, "repository", "");
        if r.is_empty() { ctx.config.github.repository.clone() } else { r }
    };

    let pr_agent_server = ["kozak_demo", "staging"]
        .into_iter()
        .find_map(|name| ctx.config.servers.resolve(name));

    if let Some(server) = pr_agent_server {
        let cmd = format!(
            "docker run --rm -e GITHUB_TOKEN='{}' codiumai/pr-agent:latest --pr_url={pr_url} review",
            ctx.config.github.token
        );
        ctx.ssh.run(server, &cmd, Duration::from_secs(300)).await?;
    } else {
        tracing::warn!("no server available for PR-Agent, skipping review execution");
    }

    let comment = ctx
        .github
        .get_bot_review_comment(&repo, pr_number, "pr-agent[bot]")
        .await?;

    let Some(comment) = comment else {
        tracing::warn!(pr_number, "no PR-Agent review comment found");
        return Ok(Variables::from_iter([
            ("review_score".to_string(), json!(0)),
            ("has_critical_issues".to_string(), json!(false)),
        ]));
    };

    let body = comment.get("body").and_then(serde_json::Value::as_str).unwrap_or("");
    let score = parse_review_score(body);
    let has_critical = has_critical_security_issues(body);

    tracing::info!(pr_number, score, has_critical, "pr-agent-review");
    Ok(Variables::from_iter([
        ("review_score".to_string(), json!(score)),
        ("has_critical_issues".to_string(), json!(has_critical)),
    ]))
}

pub async fn github_merge(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let pr_number = i64_param(&vars, "pr_number", 0) as u64;
    let repo = {
        let r = str_param(&vars, "repository", "");
        if r.is_empty() { ctx.config.github.repository.clone() } else { r }
    };
    let pr_title = str_param(&vars, "pr_title", "");
    let commit_title = if pr_title.is_empty() {
        None
    } else {
        Some(format!("{pr_title} (#{pr_number})"))
    };

    ctx.github
        .merge_pr(&repo, pr_number, "squash", commit_title.as_deref())
        .await?;
    tracing::info!(pr_number, %repo, "merged pr");
    Ok(Variables::new())
}

pub async fn github_comment(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let pr_number = i64_param(&vars, "pr_number", 0) as u64;
    let comment_text = str_param(&vars, "comment_text", "");
    let repo = {
        let r = str_param(&vars, "repository", "");
        if r.is_empty() { ctx.config.github.repository.clone() } else { r }
    };

    ctx.github.comment_pr(&repo, pr_number, &comment_text).await?;
    tracing::info!(pr_number, %repo, "commented on pr");
    Ok(Variables::new())
}

pub async fn github_create_pr(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let head_branch = str_param(&vars, "head_branch", "");
    let base_branch = str_param(&vars, "base_branch", "");
    let pr_title = str_param(&vars, "pr_title", "");
    let pr_body = str_param(&vars, "pr_body", "");
    let is_draft = bool_param(&vars, "is_draft", false);
    let repo = {
        let r = str_param(&vars, "repository", "");
        if r.is_empty() { ctx.config.github.repository.clone() } else { r }
    };

    let result = ctx
        .github
        .create_pr(&repo, &head_branch, &base_branch, &pr_title, &pr_body, is_draft)
        .await?;

    let pr_url = result.get("html_url").and_then(serde_json::Value::as_str).unwrap_or("").to_string();
    let pr_number = result.get("number").and_then(serde_json::Value::as_i64).unwrap_or(0);

    tracing::info!(pr_number, %pr_url, "created pr");
    Ok(Variables::from_iter([
        ("pr_url".to_string(), json!(pr_url)),
        ("pr_number".to_string(), json!(pr_number)),
    ]))
}

/// Score formats: HTML `<strong>Score</strong>: 85`, `Score: 85`, `Score: 8/10`,
/// or the medal emoji. A >10 result is assumed to be on a 100-point scale.
fn parse_review_score(body: &str) -> i64 {
    let strip_tags = Regex::new(r"<[^>]+>").unwrap();
    let clean = strip_tags.replace_all(body, "");

    let score_re = Regex::new(r"[Ss]core[^0-9]*(\d+)").unwrap();
    let emoji_re = Regex::new(r"🏅[^0-9]*(\d+)").unwrap();

    let captured = score_re
        .captures(&clean)
        .or_else(|| emoji_re.captures(&clean))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok());

    match captured {
        None => 0,
        Some(score) if score > 10 => score / 10,
        Some(score) => score,
    }
}

/// The security section runs from the lock emoji to the next `</tr>` (or end
/// of string); "No security concerns identified" short-circuits to false.
fn has_critical_security_issues(body: &str) -> bool {
    if body.contains("No security concerns identified") {
        return false;
    }

    let section_re = Regex::new(r"(?s)🔒(.*?)(?:</tr>|$)").unwrap();
    let Some(captures) = section_re.captures(body) else {
        return false;
    };
    let section = &captures[1];

    let strip_tags = Regex::new(r"<[^>]+>").unwrap();
    let clean = strip_tags.replace_all(section, "");

    let critical_re = Regex::new(r"(?i)critical|high severity|блокер|критичн").unwrap();
    critical_re.is_match(&clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_exact_ten() {
        assert_eq!(parse_review_score("Score: 10"), 10);
    }

    #[test]
    fn score_hundred_point_scale_normalizes() {
        assert_eq!(parse_review_score("Score: 92"), 9);
    }

    #[test]
    fn score_single_digit() {
        assert_eq!(parse_review_score("Score: 3"), 3);
    }

    #[test]
    fn score_missing_is_zero() {
        assert_eq!(parse_review_score(""), 0);
    }

    #[test]
    fn score_falls_back_to_emoji() {
        assert_eq!(parse_review_score("Overall 🏅 7/10"), 7);
    }

    #[test]
    fn no_concerns_identified_is_not_critical() {
        assert!(!has_critical_security_issues("🔒 No security concerns identified"));
    }

    #[test]
    fn critical_keyword_detected() {
        assert!(has_critical_security_issues("🔒 Critical SQL injection</tr>"));
    }

    #[test]
    fn high_severity_keyword_detected() {
        assert!(has_critical_security_issues("🔒 <td>high severity XSS</td></tr>"));
    }

    #[test]
    fn no_lock_section_is_not_critical() {
        assert!(!has_critical_security_issues("nothing relevant here"));
    }
}
