use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use flux_core::resilience::with_timeout_async;

use crate::schema_extract::extract_schema;
use crate::security::{filename_is_valid, is_reserved_name, security_scan, tool_name_is_valid, verify_convention};
use crate::types::{ToolError, ToolResult, ToolSchema};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ApprovalRecord {
    /// filename -> approved sha256
    approved: HashMap<String, String>,
}

struct LoadedTool {
    filename: String,
    path: PathBuf,
    mtime: SystemTime,
    schema: ToolSchema,
}

/// Hot-reloading registry of single-file tool modules, gated by a
/// fixed sequence of six security checks. Each accepted tool is
/// executed as a subprocess: `python3 <file>` with the filtered input
/// JSON fed on stdin and the result read from stdout.
pub struct ToolRegistry {
    tools_dir: PathBuf,
    approval_path: PathBuf,
    interactive: bool,
    tool_timeout_seconds: f64,
    loaded: RwLock<HashMap<String, LoadedTool>>,
}

impl ToolRegistry {
    pub fn new(tools_dir: impl Into<PathBuf>, approval_path: impl Into<PathBuf>, interactive: bool) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            approval_path: approval_path.into(),
            interactive,
            tool_timeout_seconds: 30.0,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_tool_timeout(mut self, seconds: f64) -> Self {
        self.tool_timeout_seconds = seconds;
        self
    }

    fn load_approvals(&self) -> ApprovalRecord {
        std::fs::read_to_string(&self.approval_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save_approvals(&self, record: &ApprovalRecord) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.approval_path, json)
    }

    /// Approve a filename/hash pair so a subsequent reload accepts it
    /// (stands in for the source's interactive approval prompt).
    pub fn approve(&self, filename: &str, sha256: &str) -> std::io::Result<()> {
        let mut record = self.load_approvals();
        record.approved.insert(filename.to_string(), sha256.to_string());
        self.save_approvals(&record)
    }

    /// Rescans `tools_dir`; additions/removals/mtime changes trigger a
    /// reload of just those files. Returns the set of filenames that
    /// failed a gate, with the reason.
    pub async fn reload_if_changed(&self) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        let entries = match std::fs::read_dir(&self.tools_dir) {
            Ok(e) => e,
            Err(_) => return failures,
        };

        let approvals = self.load_approvals();
        let mut seen = std::collections::HashSet::new();

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let filename = match path.file_name().and_then(|f| f.to_str()) {
                Some(f) => f.to_string(),
                None => continue,
            };
            seen.insert(filename.clone());

            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            let already_current = self
                .loaded
                .read()
                .unwrap()
                .get(&filename)
                .is_some_and(|t| t.mtime == mtime);
            if already_current {
                continue;
            }

            match self.load_one(&path, &filename, mtime, &approvals) {
                Ok(tool) => {
                    info!(filename = %filename, name = %tool.schema.name, "tool (re)loaded");
                    self.loaded.write().unwrap().insert(filename.clone(), tool);
                }
                Err(reason) => {
                    warn!(filename = %filename, reason = %reason, "tool rejected by security gate");
                    self.loaded.write().unwrap().remove(&filename);
                    failures.push((filename, reason));
                }
            }
        }

        // drop tools whose file disappeared
        self.loaded.write().unwrap().retain(|f, _| seen.contains(f));

        failures
    }

    fn load_one(
        &self,
        path: &Path,
        filename: &str,
        mtime: SystemTime,
        approvals: &ApprovalRecord,
    ) -> Result<LoadedTool, String> {
        // gate 1: filename
        if !filename_is_valid(filename) {
            return Err(format!("invalid filename: {filename}"));
        }

        // gate 2: reserved-name collision
        let base_name = filename.trim_end_matches(".py");
        if is_reserved_name(base_name) {
            return Err(format!("reserved tool name: {base_name}"));
        }

        let code = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let hash = format!("{:x}", Sha256::digest(code.as_bytes()));

        // gate 3+4: regex + AST-level danger scan
        let findings = security_scan(&code);
        if !findings.is_empty() {
            return Err(format!("security scan failed: {}", findings.join(", ")));
        }

        // gate 5: user approval of hash
        match approvals.approved.get(filename) {
            Some(approved_hash) if approved_hash == &hash => {}
            Some(_) => return Err("approved hash stale, file changed since approval".to_string()),
            None if self.interactive => {
                // in a real interactive context this would prompt; headless
                // server runs reject unapproved files outright.
                return Err("awaiting interactive approval".to_string());
            }
            None => return Err("no approval on file for non-interactive context".to_string()),
        }

        // gate 6: contract
        let convention_errors = verify_convention(&code);
        if !convention_errors.is_empty() {
            return Err(format!("contract violation: {}", convention_errors.join(", ")));
        }

        let schema_json = extract_schema(&code).ok_or("missing or unparsable SCHEMA")?;
        let name = schema_json
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or("SCHEMA.name missing")?
            .to_string();
        if !tool_name_is_valid(&name) {
            return Err(format!("SCHEMA.name invalid: {name}"));
        }
        let description = schema_json
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let input_schema = schema_json
            .get("input_schema")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));

        Ok(LoadedTool {
            filename: filename.to_string(),
            path: path.to_path_buf(),
            mtime,
            schema: ToolSchema {
                name,
                description,
                input_schema,
            },
        })
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.loaded
            .read()
            .unwrap()
            .values()
            .map(|t| t.schema.clone())
            .collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.loaded.read().unwrap().values().any(|t| t.schema.name == name)
    }

    pub fn schema_for(&self, name: &str) -> Option<ToolSchema> {
        self.loaded
            .read()
            .unwrap()
            .values()
            .find(|t| t.schema.name == name)
            .map(|t| t.schema.clone())
    }

    /// Invoke a registered tool, already-filtered inputs in hand.
    /// Timeouts and thrown errors map to fixed Korean error strings,
    /// escaped so the LLM can't be confused by a tool payload that
    /// happens to contain the output-wrapper markers.
    pub async fn invoke(&self, name: &str, inputs: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = {
            let loaded = self.loaded.read().unwrap();
            let tool = loaded
                .values()
                .find(|t| t.schema.name == name)
                .ok_or_else(|| ToolError::NotRegistered(name.to_string()))?;
            tool.path.clone()
        };

        let run = run_tool_subprocess(&path, &inputs);
        match with_timeout_async(run, self.tool_timeout_seconds).await {
            Err(_) => Ok(ToolResult::error("Error: 도구 실행 타임아웃")),
            Ok(Err(_)) => Ok(ToolResult::error("Error: 도구 실행 실패")),
            Ok(Ok(output)) => Ok(ToolResult::success(sanitize_tool_output(&output))),
        }
    }
}

async fn run_tool_subprocess(path: &Path, inputs: &serde_json::Value) -> Result<String, ToolError> {
    use std::process::Stdio;
    use tokio::io::AsyncWriteExt;

    let mut child = tokio::process::Command::new("python3")
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let payload = inputs.to_string();
        stdin.write_all(payload.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(ToolError::ExecutionFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Neutralizes literal output-wrapper markers inside a tool's payload
/// before it gets wrapped for the LLM.
fn sanitize_tool_output(raw: &str) -> String {
    raw.replace("[TOOL OUTPUT]", "[TOOL_OUTPUT]")
        .replace("[/TOOL OUTPUT]", "[/TOOL_OUTPUT]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_neutralizes_markers() {
        let raw = "before [TOOL OUTPUT] inner [/TOOL OUTPUT] after";
        let clean = sanitize_tool_output(raw);
        assert!(!clean.contains("[TOOL OUTPUT]"));
        assert!(clean.contains("[TOOL_OUTPUT]"));
    }
}
