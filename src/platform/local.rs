//! File-backed platform client: state lives in `<output>/state.yaml`.

use super::{DeploymentManifest, DeploymentPlan, PlatformClient, PlatformState};
use crate::core::output::write_atomic;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalStateClient {
    path: PathBuf,
}

impl LocalStateClient {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load recorded state. Returns an empty state if the file doesn't exist.
pub fn load_state(path: &Path) -> Result<PlatformState> {
    if !path.exists() {
        return Ok(PlatformState::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_yaml_ng::from_str(&content).map_err(|e| Error::load(path, format!("invalid state file: {}", e)))
}

/// Save state atomically (write to temp, then rename).
pub fn save_state(path: &Path, state: &PlatformState) -> Result<()> {
    let yaml = serde_yaml_ng::to_string(state)
        .map_err(|e| Error::Platform(format!("cannot serialize state: {}", e)))?;
    write_atomic(path, yaml.as_bytes())
}

#[async_trait]
impl PlatformClient for LocalStateClient {
    async fn fetch_state(&self) -> Result<PlatformState> {
        load_state(&self.path)
    }

    async fn apply(&self, plan: &DeploymentPlan, manifest: &DeploymentManifest) -> Result<PlatformState> {
        let state = PlatformState {
            project: manifest.project.clone(),
            workspace_id: manifest.workspace_id.clone(),
            generator: format!("tailor-sdk {}", env!("CARGO_PKG_VERSION")),
            resources: manifest.resources.clone(),
        };
        save_state(&self.path, &state)?;
        tracing::info!(
            "applied {} change(s) to {}",
            plan.to_create + plan.to_update + plan.to_delete,
            self.path.display()
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{apply, build_manifest, PlanAction};
    use super::*;
    use crate::generators::test_support::fixture_graph;
    use std::time::Duration;

    #[test]
    fn test_load_missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = load_state(&dir.path().join("state.yaml")).unwrap();
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_corrupt_state_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        std::fs::write(&path, "resources: [not, a, map]\n").unwrap();
        let err = load_state(&path).unwrap_err();
        assert!(err.to_string().contains("state.yaml"));
    }

    #[tokio::test]
    async fn test_apply_then_replan_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let graph = fixture_graph(dir.path()).await;
        let manifest = build_manifest(&graph, None, Some("ws-1".to_string())).unwrap();
        let client = LocalStateClient::new(&dir.path().join(".tailor-sdk/state.yaml"));

        let first = apply(&client, &manifest, false, Duration::from_secs(5)).await.unwrap();
        assert!(first.has_changes());
        assert!(client.path().exists());
        assert!(!dir.path().join(".tailor-sdk/.state.yaml.tmp").exists());

        let second = apply(&client, &manifest, false, Duration::from_secs(5)).await.unwrap();
        assert!(!second.has_changes());

        let mut smaller = manifest.clone();
        smaller.resources.shift_remove("executor:notify-order");
        let third = apply(&client, &smaller, true, Duration::from_secs(5)).await.unwrap();
        assert_eq!(third.to_delete, 1);
        assert_eq!(third.changes.last().unwrap().action, PlanAction::Delete);

        // dry run left the state untouched
        assert_eq!(load_state(client.path()).unwrap().resources.len(), manifest.resources.len());
    }
}
