//! Audit handler — 1 task type (§4.7 "Audit").
//!
//! Uploads a self-contained static-analysis script via a here-document, runs
//! it against the isolated sync workspace, and parses its JSON output into
//! severity counts plus a markdown table capped at 80 rows.
//!
//! The Python source's embedded analysis script body was not present in the
//! retrieved `original_source/` extraction (only the dataclass/import
//! preamble survived — see DESIGN.md); the script below is a fresh
//! implementation of the three conflict families SPEC_FULL.md §4.7
//! describes, in the same here-document-upload idiom as the source.
//!
//! Every family is scoped to the `changed_modules` set diff-report already
//! computed for this sync, instead of flagging every `_inherit`/`patch()`/
//! `inherit_id` in the whole custom tree: a Python override only counts if
//! its `_inherit` target's addon prefix is in that set, a JS `patch()` only
//! counts if its file imports from one of those addons, and an XML
//! `inherit_id` only counts if its addon prefix is in that set.

use std::time::Duration;

use relay_core::{Result, Variables};
use serde::Deserialize;
use serde_json::json;

use crate::handlers::HandlerCtx;
use crate::handlers::sync::WORKSPACE;
use crate::pipeline::params::str_param;

const ANALYSIS_SCRIPT: &str = r##"
import json
import re
import sys
from pathlib import Path

SEVERITY_NO_SUPER = "critical"
SEVERITY_COND_SUPER = "warning"
SEVERITY_INFO = "info"

INHERIT_RE = re.compile(r"_inherit\s*=\s*['\"]([\w.]+)['\"]")
JS_IMPORT_RE = re.compile(r"""["']@(\w+)/""")

def classify_python_override(body: str) -> tuple[str, str]:
    lines = body.splitlines()
    super_call = None
    for i, line in enumerate(lines):
        if "super(" in line or re.search(r"super\(\)\.\w+\(", line):
            indent = len(line) - len(line.lstrip())
            if indent > 4:
                super_call = "cond"
            else:
                super_call = "yes"
            break
    if super_call is None:
        return SEVERITY_NO_SUPER, "no"
    if super_call == "cond":
        return SEVERITY_COND_SUPER, "cond"
    return SEVERITY_INFO, "yes"


def targets_changed_module(candidate: str, changed_modules: set[str]) -> bool:
    # Odoo technical names conventionally prefix both model names
    # ("sale.order") and XML/JS ids ("sale.view_order_form") with their
    # owning addon, so the segment before the first dot is the addon guess.
    return candidate.split(".")[0] in changed_modules


def scan_module(root: Path, changed_modules: set[str], rows: list[dict]) -> None:
    for py_file in root.rglob("*.py"):
        try:
            text = py_file.read_text(errors="ignore")
        except OSError:
            continue
        for match in re.finditer(r"class\s+(\w+)\(models\.Model\):\n(.*?)(?=\nclass\s|\Z)", text, re.DOTALL):
            class_body = match.group(2)
            inherit_match = INHERIT_RE.search(class_body)
            if not inherit_match or not targets_changed_module(inherit_match.group(1), changed_modules):
                continue
            for method_match in re.finditer(r"def\s+(\w+)\(self[^)]*\):\n((?:[ \t]+.*\n?)+)", class_body):
                method_name = method_match.group(1)
                method_body = method_match.group(2)
                if method_name in ("_compute_display_name", "__init__"):
                    continue
                severity, super_label = classify_python_override(method_body)
                rows.append({
                    "Type": "python_override",
                    "Custom Module": root.name,
                    "Target": method_name,
                    "Base": inherit_match.group(1),
                    "File": str(py_file),
                    "Line": str(method_match.start()),
                    "Super": super_label,
                    "Severity": severity,
                })


def scan_js_patch(root: Path, changed_modules: set[str], rows: list[dict]) -> None:
    for js_file in root.rglob("*.js"):
        try:
            text = js_file.read_text(errors="ignore")
        except OSError:
            continue
        imported_addons = set(JS_IMPORT_RE.findall(text))
        if not imported_addons & changed_modules:
            continue
        for match in re.finditer(r"patch\(([^,]+),", text):
            rows.append({
                "Type": "js_patch",
                "Custom Module": root.name,
                "Target": match.group(1).strip(),
                "Base": ", ".join(sorted(imported_addons & changed_modules)),
                "File": str(js_file),
                "Line": str(match.start()),
                "Super": "",
                "Severity": SEVERITY_INFO,
            })


def scan_xml_xpath(root: Path, changed_modules: set[str], rows: list[dict]) -> None:
    for xml_file in root.rglob("*.xml"):
        try:
            text = xml_file.read_text(errors="ignore")
        except OSError:
            continue
        for match in re.finditer(r'inherit_id="([^"]+)"', text):
            target = match.group(1)
            if not targets_changed_module(target, changed_modules):
                continue
            rows.append({
                "Type": "xml_xpath",
                "Custom Module": root.name,
                "Target": target,
                "Base": target.split(".")[0],
                "File": str(xml_file),
                "Line": str(match.start()),
                "Super": "",
                "Severity": SEVERITY_INFO,
            })


def main() -> None:
    workspace = Path(sys.argv[1])
    changed_modules = {m.strip() for m in sys.argv[2].split(",") if m.strip()} if len(sys.argv) > 2 else set()
    custom_root = workspace / "src" / "custom"
    rows: list[dict] = []

    if custom_root.is_dir():
        for module_dir in sorted(p for p in custom_root.iterdir() if p.is_dir()):
            scan_module(module_dir, changed_modules, rows)
            scan_js_patch(module_dir, changed_modules, rows)
            scan_xml_xpath(module_dir, changed_modules, rows)

    critical = sum(1 for r in rows if r["Severity"] == "critical")
    warning = sum(1 for r in rows if r["Severity"] == "warning")
    info = sum(1 for r in rows if r["Severity"] == "info")

    print(json.dumps({
        "conflicts": len(rows),
        "critical": critical,
        "warning": warning,
        "info": info,
        "rows": rows[:80],
    }))


if __name__ == "__main__":
    main()
"##;

#[derive(Deserialize)]
struct AuditOutput {
    conflicts: i64,
    critical: i64,
    warning: i64,
    info: i64,
    rows: Vec<AuditRow>,
}

#[derive(Deserialize)]
struct AuditRow {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Custom Module")]
    module: String,
    #[serde(rename = "Target")]
    target: String,
    #[serde(rename = "Base")]
    base: String,
    #[serde(rename = "Severity")]
    severity: String,
}

pub async fn audit_upstream_conflicts(ctx: HandlerCtx, vars: Variables) -> Result<Variables> {
    let server_host = str_param(&vars, "server_host", "");
    let name = if server_host.is_empty() { "kozak_demo" } else { &server_host };
    let server = ctx
        .config
        .servers
        .resolve(name)
        .ok_or_else(|| relay_core::RelayError::Validation(format!("unknown server {name:?}")))?;

    // Scope conflict detection to modules upstream actually touched this
    // sync (§4.6/§4.7) — the same "changed_modules" list diff-report and
    // impact-analysis already compute.
    let changed_modules = str_param(&vars, "changed_modules", "");

    let upload_cmd = format!("cat <<'AUDIT_SCRIPT_EOF' > /tmp/audit_conflicts.py\n{ANALYSIS_SCRIPT}\nAUDIT_SCRIPT_EOF");
    ctx.ssh.run(server, &upload_cmd, Duration::from_secs(30)).await?.check()?;

    let result = ctx
        .ssh
        .run(
            server,
            &format!("python3 /tmp/audit_conflicts.py {WORKSPACE} '{changed_modules}'"),
            Duration::from_secs(540),
        )
        .await?
        .check()?;

    let output: AuditOutput = serde_json::from_str(result.stdout_str().trim())
        .map_err(|e| relay_core::RelayError::Retriable(format!("audit script produced invalid json: {e}")))?;

    let table = render_table(&output.rows);

    tracing::info!(conflicts = output.conflicts, critical = output.critical, warning = output.warning, "audit-upstream-conflicts");
    Ok(Variables::from_iter([
        ("audit_conflicts".to_string(), json!(output.conflicts)),
        ("audit_critical".to_string(), json!(output.critical)),
        ("audit_warning".to_string(), json!(output.warning)),
        ("audit_info".to_string(), json!(output.info)),
        ("audit_report".to_string(), json!(table)),
    ]))
}

fn render_table(rows: &[AuditRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let mut out = String::from("| Severity | Type | Custom Module | Target | Base |\n|---|---|---|---|---|\n");
    for row in rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            row.severity, row.kind, row.module, row.target, row.base
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_table_empty_for_no_conflicts() {
        assert_eq!(render_table(&[]), "");
    }

    #[test]
    fn parses_audit_output_shape() {
        let raw = r#"{"conflicts":1,"critical":1,"warning":0,"info":0,"rows":[
            {"Type":"python_override","Custom Module":"tut_sale","Target":"action_confirm","Base":"","File":"x.py","Line":"1","Super":"no","Severity":"critical"}
        ]}"#;
        let parsed: AuditOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.conflicts, 1);
        assert_eq!(parsed.rows[0].module, "tut_sale");
    }

    /// Writes `custom/tut_sale/__manifest__.py` + a `_inherit` override of
    /// `sale.order` (a changed module) and `stock.picking` (not changed),
    /// runs the embedded script against the tree, and checks only the
    /// override targeting the changed module is reported — guards against
    /// the unfiltered "flags every `_inherit` in the tree" regression.
    #[test]
    fn script_filters_conflicts_by_changed_modules() {
        let root = std::env::temp_dir().join(format!("audit-script-test-{}", std::process::id()));
        let custom = root.join("src").join("custom").join("tut_sale");
        std::fs::create_dir_all(&custom).unwrap();
        std::fs::write(
            custom.join("models.py"),
            "class SaleOrderCustom(models.Model):\n    _inherit = 'sale.order'\n\n    def action_confirm(self):\n        return True\n",
        )
        .unwrap();
        std::fs::write(
            custom.join("stock.py"),
            "class PickingCustom(models.Model):\n    _inherit = 'stock.picking'\n\n    def action_done(self):\n        return True\n",
        )
        .unwrap();

        let script_path = root.join("audit_conflicts.py");
        std::fs::write(&script_path, ANALYSIS_SCRIPT).unwrap();

        let output = std::process::Command::new("python3")
            .arg(&script_path)
            .arg(&root)
            .arg("sale, account")
            .output()
            .expect("python3 must be on PATH to run this test");
        std::fs::remove_dir_all(&root).ok();

        assert!(output.status.success(), "script failed: {}", String::from_utf8_lossy(&output.stderr));
        let parsed: AuditOutput = serde_json::from_str(String::from_utf8_lossy(&output.stdout).trim()).unwrap();

        assert_eq!(parsed.conflicts, 1, "expected only the sale.order override to be flagged");
        assert_eq!(parsed.rows[0].target, "action_confirm");
    }
}
