//! Notification handlers — 2 task types (§4.7 "Notify").
//!
//! Grounded on `examples/original_source/worker/handlers/notify.py`,
//! including its markdown-table-to-HTML rendering helpers.

use relay_core::{Result, Variables};
use serde_json::json;

use crate::handlers::HandlerCtx;
use crate::pipeline::odoo::TaskRequest;
use crate::pipeline::params::{i64_param, str_param};

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Parse a markdown pipe-table into header→value rows; preamble text and
/// separator rows (`|---|---|`) are skipped.
fn parse_md_table(md: &str) -> Vec<std::collections::HashMap<String, String>> {
    let table_lines: Vec<&str> = md.trim().lines().map(str::trim).filter(|l| !l.is_empty() && l.contains('|')).collect();
    if table_lines.len() < 2 {
        return Vec::new();
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in table_lines {
        let cells: Vec<String> = line.trim_matches('|').split('|').map(|c| c.trim().to_string()).collect();
        let is_separator = cells.iter().all(|c| c.chars().all(|ch| ch == '-' || ch == ':' || ch == ' '));
        if is_separator {
            continue;
        }
        rows.push(cells);
    }
    if rows.len() < 2 {
        return Vec::new();
    }

    let headers = rows.remove(0);
    rows.into_iter()
        .map(|row| headers.iter().cloned().zip(row).collect())
        .collect()
}

fn impact_to_html(md: &str) -> String {
    let rows = parse_md_table(md);
    if rows.is_empty() {
        return "<p>Немає зачеплених модулів</p>".to_string();
    }

    let mut items = String::new();
    for row in rows {
        let module = html_escape(row.get("Custom Module").map(String::as_str).unwrap_or(""));
        let deps = html_escape(row.get("Affected Dependencies").map(String::as_str).unwrap_or(""));
        items.push_str(&format!("<li><b>{module}</b> — {deps}</li>"));
    }
    format!("<ul>{items}</ul>")
}

fn super_label(super_info: &str) -> &str {
    match super_info {
        "no" => "❌ без super()",
        "cond" => "⚠️ super() в умові",
        "yes" => "✅ super()",
        other => other,
    }
}

fn audit_to_html(md: &str) -> String {
    let rows = parse_md_table(md);
    if rows.is_empty() {
        return "<p>Конфліктів не знайдено</p>".to_string();
    }

    let mut critical = Vec::new();
    let mut warning = Vec::new();
    let mut info = Vec::new();

    for row in &rows {
        let get = |key: &str| row.get(key).map(String::as_str).unwrap_or("");
        let severity = get("Severity").trim();
        let ctype = html_escape(get("Type"));
        let module = html_escape(get("Custom Module"));
        let target = html_escape(get("Target"));
        let base = html_escape(get("Base"));

        let mut entry = format!("<li><b>{module}</b> → <code>{target}</code>");
        match ctype.as_str() {
            "python_override" => {
                entry.push_str(" (Python override");
                let super_info = get("Super");
                if !super_info.is_empty() {
                    entry.push_str(&format!(", {}", super_label(super_info)));
                }
                entry.push(')');
            }
            "js_patch" => entry.push_str(" (JS patch)"),
            "xml_xpath" => {
                entry.push_str(" (XML xpath");
                let super_info = get("Super");
                if !super_info.is_empty() {
                    entry.push_str(&format!(": <code>{}</code>", html_escape(super_info)));
                }
                entry.push(')');
            }
            _ => {}
        }
        if !base.is_empty() && ctype != "python_override" {
            entry.push_str(&format!(" (base: {base})"));
        }
        entry.push_str("</li>");

        let lower = severity.to_lowercase();
        if lower.contains("critical") {
            critical.push(entry);
        } else if lower.contains("warning") {
            warning.push(entry);
        } else {
            info.push(entry);
        }
    }

    let mut parts = String::new();
    if !critical.is_empty() {
        parts.push_str(&format!(
            "<p style=\"color:red;font-weight:bold\">🔴 Critical ({}):</p><ul>{}</ul>",
            critical.len(),
            critical.join("")
        ));
    }
    if !warning.is_empty() {
        parts.push_str(&format!(
            "<p style=\"color:orange;font-weight:bold\">🟡 Warning ({}):</p><details><summary>Показати warning конфлікти</summary><ul>{}</ul></details>",
            warning.len(),
            warning.join("")
        ));
    }
    if !info.is_empty() {
        parts.push_str(&format!(
            "<p>ℹ️ Info ({}):</p><details><summary>Показати info</summary><ul>{}</ul></details>",
            info.len(),
            info.join("")
        ));
    }
    parts
}

pub async fn send_notification(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let notification_type = str_param(&vars, "notification_type", "info");
    let message_body = str_param(&vars, "message_body", "");
    let pr_url = str_param(&vars, "pr_url", "");
    let sync_branch = str_param(&vars, "sync_branch", "");
    let process_instance_key = i64_param(&vars, "process_instance_key", 0);
    let element_instance_key = i64_param(&vars, "element_instance_key", 0);
    let bpmn_process_id = str_param(&vars, "bpmn_process_id", "");

    let branch_code = sync_branch.split_once("upstream-").map(|(_, rest)| rest).unwrap_or("");
    let branch_suffix = if branch_code.is_empty() { String::new() } else { format!(" {branch_code}") };

    let name = match notification_type.as_str() {
        "staging_ready" => "[deploy] Staging готовий до перевірки".to_string(),
        "deploy_failed" => "[deploy] Деплой провалився".to_string(),
        "review_needed" => "[review] Потрібна перевірка".to_string(),
        "sync_conflicts" => "[upstream-sync] Перевірити конфлікти з custom модулями".to_string(),
        "sync_start" => format!("[upstream-sync{branch_suffix}] Upstream Sync | x_camunda:{process_instance_key}"),
        "deploy_error" => "[deploy] ❌ Помилка деплою".to_string(),
        "sync_error" => format!("[upstream-sync{branch_suffix}] ❌ Помилка синхронізації"),
        "pipeline_error" => "[pipeline] ❌ Помилка пайплайну".to_string(),
        other => format!("[ci] {other}"),
    };

    let is_parent = notification_type == "sync_start";

    let mut description = String::new();
    if !sync_branch.is_empty() {
        let repo = &ctx.config.github.repository;
        let branch_url = format!("https://github.com/{repo}/tree/{sync_branch}");
        description.push_str(&format!("<p>🔗 <b>Гілка:</b> <a href=\"{branch_url}\">{sync_branch}</a></p>"));
    }
    if !message_body.is_empty() {
        description.push_str(&format!("<p>{message_body}</p>"));
    }
    if !pr_url.is_empty() {
        description.push_str(&format!("<p>PR: <a href=\"{pr_url}\">{pr_url}</a></p>"));
    }

    let task_id = ctx
        .odoo
        .create_task(TaskRequest {
            name,
            description: Some(description),
            assignee_id: (ctx.config.odoo.assignee_id != 0).then_some(ctx.config.odoo.assignee_id),
            process_instance_key: Some(process_instance_key),
            element_instance_key: Some(element_instance_key),
            bpmn_process_id: Some(bpmn_process_id),
            create_process: Some(is_parent),
        })
        .await?;

    tracing::info!(task_id, %notification_type, is_parent, "created odoo task");
    Ok(Variables::from_iter([("odoo_task_id".to_string(), json!(task_id))]))
}

pub async fn create_odoo_task(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let odoo_task_type = str_param(&vars, "odoo_task_type", "");
    let affected_custom_count = i64_param(&vars, "affected_custom_count", 0);
    let impact_table = str_param(&vars, "impact_table", "");
    let audit_report = str_param(&vars, "audit_report", "");
    let audit_conflicts = i64_param(&vars, "audit_conflicts", 0);
    let audit_critical = i64_param(&vars, "audit_critical", 0);
    let audit_warning = i64_param(&vars, "audit_warning", 0);
    let changed_modules = str_param(&vars, "changed_modules", "");
    let community_files = i64_param(&vars, "community_files", 0);
    let enterprise_files = i64_param(&vars, "enterprise_files", 0);
    let current_version = str_param(&vars, "current_version", "");
    let enterprise_date = str_param(&vars, "enterprise_date", "");
    let pr_url = str_param(&vars, "pr_url", "");
    let sync_branch = str_param(&vars, "sync_branch", "");
    let process_instance_key = i64_param(&vars, "process_instance_key", 0);
    let element_instance_key = i64_param(&vars, "element_instance_key", 0);
    let bpmn_process_id = str_param(&vars, "bpmn_process_id", "");

    let modules_count = if changed_modules.is_empty() { 0 } else { changed_modules.split(", ").count() };

    let branch_code = sync_branch.split_once("upstream-").map(|(_, rest)| rest.to_string()).unwrap_or_else(|| sync_branch.clone());
    let repo = &ctx.config.github.repository;
    let branch_url = if sync_branch.is_empty() { String::new() } else { format!("https://github.com/{repo}/tree/{sync_branch}") };
    let branch_link = if branch_url.is_empty() {
        String::new()
    } else {
        format!("<p>🔗 <b>Гілка:</b> <a href=\"{branch_url}\">{sync_branch}</a></p>")
    };

    let modules_list = changed_modules
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(html_escape)
        .collect::<Vec<_>>()
        .join("<br/>");

    let (name, description) = match odoo_task_type.as_str() {
        "resolve_conflicts" => (
            format!("[upstream-sync {branch_code}] Виправити конфлікти ({affected_custom_count} модулів)"),
            format!(
                "{branch_link}<h3>Upstream Sync — {current_version} ({enterprise_date})</h3>\
                 <p><b>Змінено файлів:</b> community {community_files}, enterprise {enterprise_files}</p>\
                 <p><b>Audit:</b> {audit_conflicts} конфліктів \
                 (<span style=\"color:red;font-weight:bold\">{audit_critical} critical</span>, \
                 <span style=\"color:orange\">{audit_warning} warning</span>)</p><hr/>\
                 <h4>Зачеплені custom модулі ({affected_custom_count})</h4>{impact_html}<hr/>\
                 <h4>Audit — конфлікти з upstream</h4>{audit_html}<hr/>\
                 <h4>Оновлені модулі ({modules_count})</h4>\
                 <details><summary>Показати повний список</summary><p>{modules_list}</p></details><hr/>\
                 <p><b>Що потрібно зробити:</b></p><ol>\
                 <li>Переглянути <b style=\"color:red\">critical</b> конфлікти</li>\
                 <li>Виправити зачеплені custom модулі (tut_*)</li>\
                 <li>Закомітити виправлення в репозиторій</li>\
                 <li>Закрити цю задачу — процес продовжить створення PR</li></ol>",
                impact_html = impact_to_html(&impact_table),
                audit_html = audit_to_html(&audit_report),
            ),
        ),
        "review_sync" => {
            let pr_line = if pr_url.is_empty() { String::new() } else { format!("<p>🔗 <b>PR:</b> <a href=\"{pr_url}\">{pr_url}</a></p>") };
            let audit_line = if audit_conflicts != 0 {
                format!(
                    "<p><b>Audit:</b> {audit_conflicts} конфліктів \
                     (<span style=\"color:red;font-weight:bold\">{audit_critical} critical</span>, \
                     <span style=\"color:orange\">{audit_warning} warning</span>)</p>"
                )
            } else {
                "<p><b>Audit:</b> конфліктів не знайдено ✅</p>".to_string()
            };
            (
                format!("[upstream-sync {branch_code}] Переглянути аналіз оновлення"),
                format!(
                    "{branch_link}{pr_line}<h3>Upstream Sync — {current_version} ({enterprise_date})</h3>\
                     <p><b>Змінено файлів:</b> community {community_files}, enterprise {enterprise_files}</p>\
                     {audit_line}<hr/>\
                     <h4>Зачеплені custom модулі ({affected_custom_count})</h4>{impact_html}<hr/>\
                     <h4>Audit — аналіз конфліктів з upstream</h4>{audit_html}<hr/>\
                     <h4>Оновлені модулі ({modules_count})</h4>\
                     <details><summary>Показати повний список</summary><p>{modules_list}</p></details><hr/>\
                     <h4>Що потрібно перевірити</h4><ul>\
                     <li>Які модулі оновились та чи всі потрібні</li>\
                     <li>Impact на custom модулі (tut_*)</li>\
                     <li>Результати audit — critical/warning конфлікти</li>\
                     <li>Чи є нові/видалені модулі</li></ul>\
                     <p><b>Після перевірки закрийте цю задачу</b> — процес продовжить merge в staging та деплой.</p>",
                    impact_html = impact_to_html(&impact_table),
                    audit_html = audit_to_html(&audit_report),
                ),
            )
        }
        other => (format!("[ci] {other}"), format!("<p>Task type: {other}</p>")),
    };

    let task_id = ctx
        .odoo
        .create_task(TaskRequest {
            name,
            description: Some(description),
            assignee_id: None,
            process_instance_key: Some(process_instance_key),
            element_instance_key: Some(element_instance_key),
            bpmn_process_id: Some(bpmn_process_id),
            create_process: Some(false),
        })
        .await?;

    // process_instance_key is always available and stamped on the Odoo task,
    // so it survives as the correlation key when Odoo's webhook omits id 0.
    let correlation_id = if task_id != 0 { task_id.to_string() } else { process_instance_key.to_string() };

    tracing::info!(task_id, %odoo_task_type, %correlation_id, "created blocking odoo task");
    Ok(Variables::from_iter([("odoo_task_id".to_string(), json!(correlation_id))]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_markdown_table_rows() {
        let md = "| Custom Module | Affected Dependencies |\n|---|---|\n| tut_sale | base, sale |";
        let rows = parse_md_table(md);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Custom Module").unwrap(), "tut_sale");
    }

    #[test]
    fn impact_html_falls_back_when_empty() {
        assert_eq!(impact_to_html(""), "<p>Немає зачеплених модулів</p>");
    }

    #[test]
    fn audit_html_groups_by_severity() {
        let md = "| Type | Custom Module | Target | Base | Severity |\n|---|---|---|---|---|\n| python_override | tut_sale | action_confirm |  | critical |";
        let html = audit_to_html(md);
        assert!(html.contains("🔴 Critical (1)"));
    }
}
