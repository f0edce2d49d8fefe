use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Tuning knobs read from `sieve.yaml`. A missing file means defaults; a
/// file that fails to parse is a startup error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    pub queue_capacity: usize,
    pub max_connections: usize,
    pub flow_timeout_secs: u64,
    pub drain_wait_ms: u64,
    pub cpu_affinity: Option<Vec<usize>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            queue_capacity: 10_000,
            max_connections: 100_000,
            flow_timeout_secs: 300,
            drain_wait_ms: 500,
            cpu_affinity: None,
        }
    }
}

pub fn config_path() -> PathBuf {
    std::env::var("SIEVE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("sieve.yaml"))
}

pub fn load_runtime_config(path: &Path) -> Result<RuntimeConfig, String> {
    if !path.exists() {
        return Ok(RuntimeConfig::default());
    }
    let body = fs::read_to_string(path)
        .map_err(|e| format!("read runtime config {}: {e}", path.display()))?;
    if body.trim().is_empty() {
        return Ok(RuntimeConfig::default());
    }
    serde_yaml::from_str(&body).map_err(|e| format!("parse runtime config {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_runtime_config(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(cfg.queue_capacity, 10_000);
        assert_eq!(cfg.max_connections, 100_000);
        assert_eq!(cfg.flow_timeout_secs, 300);
        assert!(cfg.cpu_affinity.is_none());
    }

    #[test]
    fn parses_partial_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sieve.yaml");
        fs::write(&path, "queue-capacity: 256\ncpu-affinity: [0, 1, 2, 3]\n").unwrap();
        let cfg = load_runtime_config(&path).unwrap();
        assert_eq!(cfg.queue_capacity, 256);
        assert_eq!(cfg.cpu_affinity, Some(vec![0, 1, 2, 3]));
        assert_eq!(cfg.drain_wait_ms, 500);
    }

    #[test]
    fn rejects_malformed_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sieve.yaml");
        fs::write(&path, "queue-capacity: [not a number\n").unwrap();
        assert!(load_runtime_config(&path).is_err());
    }
}
