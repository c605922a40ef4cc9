//! Platform apply: deployment manifest, plan against current state, apply.
//!
//! The platform is reached through [`PlatformClient`]. A manifest lists every
//! deployable resource with a content hash; the planner compares it with the
//! client's recorded state.

pub mod local;
pub mod planner;

use crate::bundler::{BundleManifest, FunctionKind};
use crate::core::hasher;
use crate::core::project::ProjectGraph;
use crate::error::{Error, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use planner::{plan, DeploymentPlan, PlanAction, PlannedChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Type,
    Resolver,
    Executor,
    Auth,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Type => "type",
            Self::Resolver => "resolver",
            Self::Executor => "executor",
            Self::Auth => "auth",
        };
        write!(f, "{}", s)
    }
}

/// One deployable resource and the hash of its desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub hash: String,
}

/// Desired state of a project.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentManifest {
    pub project: String,
    pub workspace_id: Option<String>,
    /// Keyed `<kind>:<app>/<namespace>/<name>` (executors: `executor:<name>`)
    pub resources: IndexMap<String, ResourceState>,
}

/// State recorded by the platform after an apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformState {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub generator: String,
    #[serde(default)]
    pub resources: IndexMap<String, ResourceState>,
}

/// Remote platform, opaque RPC.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn fetch_state(&self) -> Result<PlatformState>;

    /// Apply `plan`; `manifest` is the full desired state.
    async fn apply(&self, plan: &DeploymentPlan, manifest: &DeploymentManifest) -> Result<PlatformState>;
}

/// Build the manifest for a loaded project. Function hashes come from the
/// bundle when one is given, so body edits show up as updates.
pub fn build_manifest(
    graph: &ProjectGraph,
    bundle: Option<&BundleManifest>,
    workspace_id: Option<String>,
) -> Result<DeploymentManifest> {
    let mut resources = IndexMap::new();

    for app in &graph.applications {
        for ns in app.db.iter().filter(|ns| !ns.external) {
            for name in &ns.type_order {
                if let Some(parsed) = ns.types.get(name) {
                    resources.insert(
                        format!("type:{}/{}/{}", app.name, ns.name, name),
                        ResourceState {
                            kind: ResourceKind::Type,
                            hash: hasher::hash_value(parsed)?,
                        },
                    );
                }
            }
        }
        for ns in &app.resolvers {
            for (name, resolver) in &ns.resolvers {
                let decl = hasher::hash_value(resolver)?;
                let function = bundle
                    .and_then(|b| b.find(FunctionKind::Resolver, name))
                    .map(|e| e.hash.as_str())
                    .unwrap_or_default();
                resources.insert(
                    format!("resolver:{}/{}/{}", app.name, ns.name, name),
                    ResourceState {
                        kind: ResourceKind::Resolver,
                        hash: hasher::composite_hash(&[decl.as_str(), function]),
                    },
                );
            }
        }
        if let Some(auth) = &app.auth {
            resources.insert(
                format!("auth:{}/{}", app.name, auth.name),
                ResourceState {
                    kind: ResourceKind::Auth,
                    hash: hasher::hash_value(auth)?,
                },
            );
        }
    }

    for (name, executor) in &graph.executors {
        let decl = hasher::hash_value(executor)?;
        let function = bundle
            .and_then(|b| b.find(FunctionKind::Executor, name))
            .map(|e| e.hash.as_str())
            .unwrap_or_default();
        resources.insert(
            format!("executor:{}", name),
            ResourceState {
                kind: ResourceKind::Executor,
                hash: hasher::composite_hash(&[decl.as_str(), function]),
            },
        );
    }

    Ok(DeploymentManifest {
        project: graph.name.clone(),
        workspace_id,
        resources,
    })
}

/// Plan `manifest` against the client's state and apply it unless `dry_run`.
/// Each client call is bounded by `timeout`.
pub async fn apply(
    client: &dyn PlatformClient,
    manifest: &DeploymentManifest,
    dry_run: bool,
    timeout: Duration,
) -> Result<DeploymentPlan> {
    let state = with_timeout("fetch platform state", timeout, client.fetch_state()).await?;
    if let (Some(current), Some(desired)) = (&state.workspace_id, &manifest.workspace_id) {
        if current != desired {
            return Err(Error::Platform(format!(
                "state belongs to workspace '{}', not '{}'",
                current, desired
            )));
        }
    }

    let plan = plan(manifest, &state);
    tracing::info!(
        "plan: {} to create, {} to update, {} to delete, {} unchanged",
        plan.to_create,
        plan.to_update,
        plan.to_delete,
        plan.unchanged
    );
    if dry_run || !plan.has_changes() {
        return Ok(plan);
    }

    with_timeout("apply", timeout, client.apply(&plan, manifest)).await?;
    Ok(plan)
}

async fn with_timeout<T>(
    operation: &str,
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout {
            operation: operation.to_string(),
            seconds: timeout.as_secs(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::test_support::fixture_graph;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        state: PlatformState,
        applied: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl PlatformClient for Recorder {
        async fn fetch_state(&self) -> Result<PlatformState> {
            Ok(self.state.clone())
        }

        async fn apply(&self, plan: &DeploymentPlan, _manifest: &DeploymentManifest) -> Result<PlatformState> {
            self.applied.lock().unwrap().push(plan.changes.len());
            Ok(self.state.clone())
        }
    }

    struct Stuck;

    #[async_trait]
    impl PlatformClient for Stuck {
        async fn fetch_state(&self) -> Result<PlatformState> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(PlatformState::default())
        }

        async fn apply(&self, _plan: &DeploymentPlan, _manifest: &DeploymentManifest) -> Result<PlatformState> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_manifest_keys() {
        let dir = tempfile::tempdir().unwrap();
        let graph = fixture_graph(dir.path()).await;
        let manifest = build_manifest(&graph, None, Some("ws-1".to_string())).unwrap();

        let keys: Vec<&str> = manifest.resources.keys().map(String::as_str).collect();
        assert_eq!(keys[0], "type:storefront/main/User");
        assert!(keys.contains(&"resolver:storefront/main/add"));
        assert!(keys.contains(&"auth:storefront/shop-auth"));
        assert!(keys.contains(&"executor:notify-order"));
        assert_eq!(manifest.resources.len(), 7 + 2 + 1 + 2);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_apply() {
        let dir = tempfile::tempdir().unwrap();
        let graph = fixture_graph(dir.path()).await;
        let manifest = build_manifest(&graph, None, None).unwrap();
        let client = Recorder::default();

        let plan = apply(&client, &manifest, true, Duration::from_secs(5)).await.unwrap();
        assert_eq!(plan.to_create as usize, manifest.resources.len());
        assert!(client.applied.lock().unwrap().is_empty());

        apply(&client, &manifest, false, Duration::from_secs(5)).await.unwrap();
        assert_eq!(client.applied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_workspace_mismatch() {
        let client = Recorder {
            state: PlatformState {
                workspace_id: Some("ws-a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let manifest = DeploymentManifest {
            project: "shop".to_string(),
            workspace_id: Some("ws-b".to_string()),
            resources: IndexMap::new(),
        };
        let err = apply(&client, &manifest, false, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("workspace 'ws-a'"));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let manifest = DeploymentManifest {
            project: "shop".to_string(),
            workspace_id: None,
            resources: IndexMap::new(),
        };
        let err = apply(&Stuck, &manifest, true, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
