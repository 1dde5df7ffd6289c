use std::path::Path;

use corral_core::types::BridgeKind;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// AgentDescriptor
// ---------------------------------------------------------------------------

/// A typed agent descriptor parsed from a `*.toml` file in the agents
/// directory, e.g.:
///
/// ```toml
/// name = "local-worker"
/// capabilities = ["code", "test", "docs"]
/// bridge = "local_inference"
/// model = "dolphin-llama3:latest"
/// ```
///
/// Descriptors are the only way agents enter the registry; untyped data is
/// rejected at this boundary rather than propagated inward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub bridge: BridgeKind,
    #[serde(default)]
    pub model: Option<String>,
}

impl AgentDescriptor {
    fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Directory scan
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct ScanOutcome {
    pub descriptors: Vec<AgentDescriptor>,
    pub skipped: usize,
}

/// Scan `dir` for `*.toml` descriptor files.
///
/// Partial or malformed descriptors never fail the scan: each bad file is
/// skipped with a warning and counted in `skipped`. A missing directory
/// yields an empty outcome.
pub fn scan_dir(dir: &Path) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "agents directory not readable");
            return outcome;
        }
    };

    // Deterministic order: sort by file name so insertion order is stable
    // across scans of the same directory.
    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    paths.sort();

    for path in paths {
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable descriptor");
                outcome.skipped += 1;
                continue;
            }
        };
        match toml::from_str::<AgentDescriptor>(&text) {
            Ok(desc) if desc.is_valid() => {
                debug!(name = %desc.name, bridge = %desc.bridge, "descriptor parsed");
                outcome.descriptors.push(desc);
            }
            Ok(_) => {
                warn!(path = %path.display(), "skipping descriptor with empty name");
                outcome.skipped += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping malformed descriptor");
                outcome.skipped += 1;
            }
        }
    }

    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("worker.toml"),
            r#"
name = "local-worker"
capabilities = ["code", "test"]
bridge = "local_inference"
model = "dolphin-llama3:latest"
"#,
        )
        .unwrap();

        let outcome = scan_dir(dir.path());
        assert_eq!(outcome.descriptors.len(), 1);
        assert_eq!(outcome.skipped, 0);
        let desc = &outcome.descriptors[0];
        assert_eq!(desc.name, "local-worker");
        assert_eq!(desc.bridge, BridgeKind::LocalInference);
        assert_eq!(desc.model.as_deref(), Some("dolphin-llama3:latest"));
    }

    #[test]
    fn defaults_for_partial_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("min.toml"), "name = \"minimal\"\n").unwrap();

        let outcome = scan_dir(dir.path());
        assert_eq!(outcome.descriptors.len(), 1);
        let desc = &outcome.descriptors[0];
        assert!(desc.capabilities.is_empty());
        assert_eq!(desc.bridge, BridgeKind::FileHandoff);
    }

    #[test]
    fn malformed_descriptor_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.toml"), "name = \"ok\"\n").unwrap();
        std::fs::write(dir.path().join("bad.toml"), "name = [broken\n").unwrap();
        std::fs::write(dir.path().join("empty.toml"), "name = \"\"\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "not a descriptor").unwrap();

        let outcome = scan_dir(dir.path());
        assert_eq!(outcome.descriptors.len(), 1);
        assert_eq!(outcome.descriptors[0].name, "ok");
        assert_eq!(outcome.skipped, 2);
    }

    #[test]
    fn missing_directory_yields_empty_outcome() {
        let outcome = scan_dir(Path::new("/nonexistent/agents"));
        assert!(outcome.descriptors.is_empty());
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn scan_order_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.toml"), "name = \"beta\"\n").unwrap();
        std::fs::write(dir.path().join("a.toml"), "name = \"alpha\"\n").unwrap();

        let names: Vec<String> = scan_dir(dir.path())
            .descriptors
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }
}
