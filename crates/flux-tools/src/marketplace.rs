use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::security::{filename_is_valid, is_reserved_name, security_scan, verify_convention};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceEntry {
    pub name: String,
    pub filename: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub sha256: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub filename: String,
    pub version: String,
    pub sha256: String,
    pub installed_at: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Registry {
    #[serde(default)]
    tools: Vec<MarketplaceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct InstalledState {
    #[serde(default)]
    installed: HashMap<String, InstalledRecord>,
    #[serde(default = "default_version")]
    version: u32,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityEntry {
    pub name: String,
    pub filename: String,
    pub expected: String,
    pub actual: String,
    pub status: String, // ok | tampered | missing
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceStats {
    pub total_tools: usize,
    pub installed_count: usize,
    pub categories: Vec<String>,
    pub integrity_checked: usize,
    pub integrity_tampered: usize,
    pub integrity_missing: usize,
    pub integrity_ok: usize,
}

/// Registry JSON -> installed JSON state machine with a 7-gate
/// install pipeline, grounded on `MarketplaceEngine`. File locking is
/// replaced by this process's own
/// in-memory mutex at the call site (`flux-gateway` wraps one
/// `Marketplace` per process behind a lock); within a single process
/// that's equivalent to the source's flock-based TOCTOU guard.
pub struct Marketplace {
    registry_path: PathBuf,
    installed_path: PathBuf,
    cache_dir: PathBuf,
    tools_dir: PathBuf,
}

impl Marketplace {
    pub fn new(
        registry_path: impl Into<PathBuf>,
        installed_path: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        tools_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry_path: registry_path.into(),
            installed_path: installed_path.into(),
            cache_dir: cache_dir.into(),
            tools_dir: tools_dir.into(),
        }
    }

    fn load_registry(&self) -> Registry {
        fs::read_to_string(&self.registry_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn load_installed(&self) -> InstalledState {
        fs::read_to_string(&self.installed_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save_installed(&self, state: &InstalledState) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&self.installed_path, json)
    }

    pub fn search(&self, query: &str, category: Option<&str>, tags: &[String]) -> Vec<MarketplaceEntry> {
        let registry = self.load_registry();
        let query_lower = query.to_lowercase();

        registry
            .tools
            .into_iter()
            .filter(|t| {
                if !query_lower.is_empty() {
                    let name_match = t.name.to_lowercase().contains(&query_lower);
                    let desc_match = t.description.to_lowercase().contains(&query_lower);
                    if !(name_match || desc_match) {
                        return false;
                    }
                }
                if let Some(cat) = category {
                    if t.category != cat {
                        return false;
                    }
                }
                if !tags.is_empty() {
                    let tool_tags: std::collections::HashSet<_> = t.tags.iter().collect();
                    if !tags.iter().all(|tag| tool_tags.contains(tag)) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    pub fn get_info(&self, tool_name: &str) -> Option<MarketplaceEntry> {
        self.load_registry().tools.into_iter().find(|t| t.name == tool_name)
    }

    pub fn is_installed(&self, tool_name: &str) -> bool {
        self.load_installed().installed.contains_key(tool_name)
    }

    pub fn install(&self, tool_name: &str) -> InstallOutcome {
        let registry = self.load_registry();
        let Some(tool_info) = registry.tools.into_iter().find(|t| t.name == tool_name) else {
            return InstallOutcome {
                status: "error".into(),
                message: format!("'{tool_name}' not found in registry"),
            };
        };

        let installed = self.load_installed();
        if installed.installed.contains_key(tool_name) {
            return InstallOutcome {
                status: "error".into(),
                message: format!("'{tool_name}' is already installed"),
            };
        }

        // step 2: filename gate
        if !filename_is_valid(&tool_info.filename) {
            return InstallOutcome {
                status: "error".into(),
                message: format!("[gate 2] invalid filename: {}", tool_info.filename),
            };
        }

        // step 3: reserved-name gate
        let base_name = tool_info.filename.trim_end_matches(".py");
        if is_reserved_name(base_name) {
            return InstallOutcome {
                status: "error".into(),
                message: format!("[gate 3] reserved tool name: {base_name}"),
            };
        }

        let source_path = self.cache_dir.join(&tool_info.filename);
        if !source_path.exists() {
            return InstallOutcome {
                status: "error".into(),
                message: format!("source file missing in cache: {}", source_path.display()),
            };
        }

        // single read, TOCTOU-safe
        let raw_bytes = match fs::read(&source_path) {
            Ok(b) => b,
            Err(e) => {
                return InstallOutcome {
                    status: "error".into(),
                    message: format!("failed to read source: {e}"),
                }
            }
        };
        let code = String::from_utf8_lossy(&raw_bytes).to_string();

        // step 4: hash gate
        let actual_hash = format!("{:x}", Sha256::digest(&raw_bytes));
        if tool_info.sha256.is_empty() {
            return InstallOutcome {
                status: "error".into(),
                message: format!("registry has no SHA-256 for '{tool_name}'"),
            };
        }
        if actual_hash != tool_info.sha256 {
            return InstallOutcome {
                status: "error".into(),
                message: format!(
                    "[gate 4] SHA-256 mismatch — expected {}, got {}",
                    tool_info.sha256, actual_hash
                ),
            };
        }

        // step 5+6: security scan
        let findings = security_scan(&code);
        if !findings.is_empty() {
            return InstallOutcome {
                status: "error".into(),
                message: format!("[gate 5/6] security scan failed: {}", findings.join(", ")),
            };
        }

        // step 7: contract
        let convention_errors = verify_convention(&code);
        if !convention_errors.is_empty() {
            return InstallOutcome {
                status: "error".into(),
                message: format!("[gate 7] contract violation: {}", convention_errors.join(", ")),
            };
        }

        // step 8: copy bytes already in memory, update installed state
        if let Err(e) = fs::create_dir_all(&self.tools_dir) {
            return InstallOutcome {
                status: "error".into(),
                message: format!("failed to create tools dir: {e}"),
            };
        }
        let dest_path = self.tools_dir.join(&tool_info.filename);
        if let Err(e) = fs::write(&dest_path, &raw_bytes) {
            return InstallOutcome {
                status: "error".into(),
                message: format!("failed to write tool file: {e}"),
            };
        }

        let mut installed = self.load_installed();
        installed.installed.insert(
            tool_name.to_string(),
            InstalledRecord {
                filename: tool_info.filename.clone(),
                version: tool_info.version.clone(),
                sha256: actual_hash,
                installed_at: iso8601_now(),
                source: tool_info.source.clone(),
            },
        );
        if let Err(e) = self.save_installed(&installed) {
            return InstallOutcome {
                status: "error".into(),
                message: format!("failed to persist installed state: {e}"),
            };
        }

        InstallOutcome {
            status: "installed".into(),
            message: format!("'{tool_name}' installed"),
        }
    }

    pub fn uninstall(&self, tool_name: &str) -> InstallOutcome {
        let mut installed = self.load_installed();
        let Some(record) = installed.installed.get(tool_name).cloned() else {
            return InstallOutcome {
                status: "error".into(),
                message: format!("'{tool_name}' is not installed"),
            };
        };

        let tool_path = self.tools_dir.join(&record.filename);
        if tool_path.exists() {
            if let Err(e) = fs::remove_file(&tool_path) {
                return InstallOutcome {
                    status: "error".into(),
                    message: format!("failed to remove file: {e}"),
                };
            }
        }

        installed.installed.remove(tool_name);
        if let Err(e) = self.save_installed(&installed) {
            return InstallOutcome {
                status: "error".into(),
                message: format!("failed to persist installed state: {e}"),
            };
        }

        InstallOutcome {
            status: "uninstalled".into(),
            message: format!("'{tool_name}' removed"),
        }
    }

    pub fn list_installed(&self) -> Vec<(String, InstalledRecord)> {
        self.load_installed().installed.into_iter().collect()
    }

    pub fn verify_integrity(&self) -> Vec<IntegrityEntry> {
        let installed = self.load_installed();
        installed
            .installed
            .into_iter()
            .map(|(name, info)| {
                let tool_path = self.tools_dir.join(&info.filename);
                if !tool_path.exists() {
                    return IntegrityEntry {
                        name,
                        filename: info.filename,
                        expected: info.sha256,
                        actual: String::new(),
                        status: "missing".into(),
                    };
                }
                match fs::read(&tool_path) {
                    Ok(bytes) => {
                        let actual = format!("{:x}", Sha256::digest(&bytes));
                        let status = if !info.sha256.is_empty() && actual != info.sha256 {
                            "tampered"
                        } else {
                            "ok"
                        };
                        IntegrityEntry {
                            name,
                            filename: info.filename,
                            expected: info.sha256,
                            actual,
                            status: status.into(),
                        }
                    }
                    Err(_) => IntegrityEntry {
                        name,
                        filename: info.filename,
                        expected: info.sha256,
                        actual: String::new(),
                        status: "missing".into(),
                    },
                }
            })
            .collect()
    }

    pub fn get_categories(&self) -> Vec<String> {
        let mut cats: std::collections::BTreeSet<String> =
            self.load_registry().tools.into_iter().map(|t| t.category).collect();
        cats.retain(|c| !c.is_empty());
        cats.into_iter().collect()
    }

    pub fn get_tags(&self) -> Vec<String> {
        let mut tags: std::collections::BTreeSet<String> = Default::default();
        for tool in self.load_registry().tools {
            tags.extend(tool.tags);
        }
        tags.into_iter().collect()
    }

    pub fn get_stats(&self) -> MarketplaceStats {
        let registry = self.load_registry();
        let installed = self.load_installed();
        let integrity = self.verify_integrity();
        let tampered = integrity.iter().filter(|r| r.status == "tampered").count();
        let missing = integrity.iter().filter(|r| r.status == "missing").count();

        MarketplaceStats {
            total_tools: registry.tools.len(),
            installed_count: installed.installed.len(),
            categories: self.get_categories(),
            integrity_checked: integrity.len(),
            integrity_tampered: tampered,
            integrity_missing: missing,
            integrity_ok: integrity.len() - tampered - missing,
        }
    }
}

fn iso8601_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Marketplace) {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let tools_dir = dir.path().join("tools");
        fs::create_dir_all(&cache_dir).unwrap();
        fs::create_dir_all(&tools_dir).unwrap();

        let tool_src = "SCHEMA = {\"name\": \"greeter\", \"description\": \"says hi\", \"input_schema\": {\"type\": \"object\", \"properties\": {}}}\n\ndef main(**kwargs):\n    return \"hi\"\n";
        let mut f = fs::File::create(cache_dir.join("greeter.py")).unwrap();
        f.write_all(tool_src.as_bytes()).unwrap();
        let hash = format!("{:x}", Sha256::digest(tool_src.as_bytes()));

        let registry = Registry {
            tools: vec![MarketplaceEntry {
                name: "greeter".into(),
                filename: "greeter.py".into(),
                description: "says hi".into(),
                version: "1.0.0".into(),
                author: "test".into(),
                category: "utility".into(),
                tags: vec!["greeting".into()],
                dependencies: vec![],
                sha256: hash,
                source: "local".into(),
            }],
        };
        let registry_path = dir.path().join("registry.json");
        fs::write(&registry_path, serde_json::to_string(&registry).unwrap()).unwrap();
        let installed_path = dir.path().join("installed.json");

        let marketplace = Marketplace::new(registry_path, installed_path, cache_dir, tools_dir);
        (dir, marketplace)
    }

    #[test]
    fn install_then_uninstall_round_trips() {
        let (_dir, marketplace) = setup();
        let outcome = marketplace.install("greeter");
        assert_eq!(outcome.status, "installed");
        assert!(marketplace.is_installed("greeter"));

        let integrity = marketplace.verify_integrity();
        assert_eq!(integrity[0].status, "ok");

        let outcome = marketplace.uninstall("greeter");
        assert_eq!(outcome.status, "uninstalled");
        assert!(!marketplace.is_installed("greeter"));
    }

    #[test]
    fn install_twice_fails_second_time() {
        let (_dir, marketplace) = setup();
        assert_eq!(marketplace.install("greeter").status, "installed");
        assert_eq!(marketplace.install("greeter").status, "error");
    }

    #[test]
    fn install_unknown_tool_fails() {
        let (_dir, marketplace) = setup();
        let outcome = marketplace.install("nonexistent");
        assert_eq!(outcome.status, "error");
    }

    #[test]
    fn tampered_source_is_rejected_by_hash_gate() {
        let (dir, marketplace) = setup();
        fs::write(dir.path().join("cache").join("greeter.py"), b"SCHEMA={}\ndef main(**kw): pass\n").unwrap();
        let outcome = marketplace.install("greeter");
        assert_eq!(outcome.status, "error");
        assert!(outcome.message.contains("mismatch"));
    }
}
