//! Multi-layer security gating shared by the registry and the
//! marketplace install pipeline.
//!
//! Tool modules are single-file scripts, not compiled Rust — the host
//! never executes one to learn its shape or safety. Everything here is
//! a textual/static check over the source string.

/// Only lowercase ascii letters, digits, underscore, `.py` extension.
pub fn filename_is_valid(filename: &str) -> bool {
    let Some(base) = filename.strip_suffix(".py") else {
        return false;
    };
    if base.is_empty() {
        return false;
    }
    let mut chars = base.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    first_ok
        && base
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Tool names owned by the host and never shadowable by a loaded or
/// installed tool.
pub const RESERVED_NAMES: &[&str] = &[
    "web_search",
    "web_fetch",
    "weather",
    "read_text_file",
    "save_text_file",
    "list_files",
    "play_audio",
    "screen_capture",
    "add_two_numbers",
    "multiply_two_numbers",
    "memory_manage",
    "schedule_task",
    "marketplace_tool",
    "browser_tool",
    "browser",
];

pub fn is_reserved_name(base_name: &str) -> bool {
    RESERVED_NAMES.contains(&base_name)
}

/// `SCHEMA.name` / tool name contract.
pub fn tool_name_is_valid(name: &str) -> bool {
    if name.is_empty() || name.len() > 31 {
        return false;
    }
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    first_ok
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// The normative dangerous-pattern set, used by the source scan and by
/// the marketplace's install-time check.
pub const DANGEROUS_PATTERNS: &[&str] = &[
    "os.system(",
    "os.popen(",
    "subprocess.",
    "pty.",
    "shutil.rmtree(",
    "eval(",
    "exec(",
    "__import__(",
    "open(",
    "pickle.",
    "base64.decode",
    "compile(",
    "globals()",
    "locals()",
    "vars(",
    "__builtins__",
    "__class__",
    "__subclasses__",
    "__mro__",
    "getattr(",
    "setattr(",
    "delattr(",
];

/// Modules whose import is rejected outright regardless of what's
/// actually called.
const BLOCKED_IMPORTS: &[&str] = &[
    "subprocess",
    "ctypes",
    "socket",
    "multiprocessing",
    "http.server",
    "webbrowser",
];

/// Regex-equivalent scan: every literal substring from `DANGEROUS_PATTERNS`.
/// Returns `regex:<pattern>` findings, matching the source's finding
/// label convention.
pub fn regex_scan(code: &str) -> Vec<String> {
    DANGEROUS_PATTERNS
        .iter()
        .filter(|p| code.contains(**p))
        .map(|p| format!("regex:{p}"))
        .collect()
}

/// Lexical approximation of an AST-level import scan: there's no Python
/// parser crate in play, so import statements are matched line-by-line
/// instead of via a real AST walk. Findings are labeled `ast:<detail>`.
pub fn ast_scan(code: &str) -> Vec<String> {
    let mut findings = Vec::new();

    for line in code.lines() {
        let trimmed = line.trim();
        if let Some(module) = import_target(trimmed) {
            if BLOCKED_IMPORTS.iter().any(|b| module == *b || module.starts_with(&format!("{b}."))) {
                findings.push(format!("ast:import {module}"));
            }
        }
    }

    findings
}

fn import_target(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("import ") {
        Some(rest.split(|c: char| c == ' ' || c == ',').next().unwrap_or(rest).trim())
    } else if let Some(rest) = line.strip_prefix("from ") {
        rest.split(" import").next().map(|s| s.trim())
    } else {
        None
    }
}

/// Gates 3+4 combined: the full security scan applied to a candidate
/// tool's source.
pub fn security_scan(code: &str) -> Vec<String> {
    let mut findings = regex_scan(code);
    findings.extend(ast_scan(code));
    findings
}

/// Gate 6 / marketplace step 7: the file must assign a `SCHEMA` name
/// and define a `main` function. Checked without executing the file.
pub fn verify_convention(code: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let has_schema = code
        .lines()
        .any(|l| l.trim_start().starts_with("SCHEMA") && l.contains('='));
    let has_main = code
        .lines()
        .any(|l| l.trim_start().starts_with("def main("));

    if !has_schema {
        errors.push("missing SCHEMA assignment".to_string());
    }
    if !has_main {
        errors.push("missing main() function".to_string());
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_gate_accepts_lowercase_snake_case() {
        assert!(filename_is_valid("my_tool.py"));
        assert!(!filename_is_valid("MyTool.py"));
        assert!(!filename_is_valid("my-tool.py"));
        assert!(!filename_is_valid("my_tool.txt"));
    }

    #[test]
    fn reserved_name_gate_blocks_builtins() {
        assert!(is_reserved_name("web_search"));
        assert!(!is_reserved_name("custom_tool"));
    }

    #[test]
    fn regex_scan_flags_eval() {
        let findings = regex_scan("def main(**kw):\n    eval('1+1')\n");
        assert!(findings.iter().any(|f| f.contains("eval(")));
    }

    #[test]
    fn ast_scan_flags_subprocess_import() {
        let findings = ast_scan("import subprocess\n\ndef main(**kw):\n    pass\n");
        assert!(findings.iter().any(|f| f.contains("subprocess")));
    }

    #[test]
    fn clean_source_has_no_findings() {
        let code = "SCHEMA = {\"name\": \"hello\"}\n\ndef main(**kwargs):\n    return 'hi'\n";
        assert!(security_scan(code).is_empty());
        assert!(verify_convention(code).is_empty());
    }

    #[test]
    fn verify_convention_requires_both_symbols() {
        assert_eq!(verify_convention("def main(**kw): pass").len(), 1);
        assert_eq!(verify_convention("SCHEMA = {}").len(), 1);
    }
}
