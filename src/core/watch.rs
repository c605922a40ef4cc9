//! Watch mode: poll source files by blake3 hash and reload on change.
//!
//! Every tick re-runs discovery, so added and removed files are noticed as
//! well as edits. JS body files named by resolvers and executors are
//! included. A failed reload is logged and the loop keeps going; the
//! next change gets a fresh attempt.

use super::hasher;
use super::loader::fresh_token;
use super::project::{Project, ProjectGraph};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Content hash of every watched file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot(BTreeMap<PathBuf, String>);

impl Snapshot {
    pub fn capture(files: &[PathBuf]) -> Self {
        Self(
            files
                .iter()
                .map(|path| {
                    let hash = hasher::hash_file(path).unwrap_or_else(|e| format!("ERROR:{}", e));
                    (path.clone(), hash)
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Changes from `old` to `new`, in path order.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<Change> {
    let mut changes = Vec::new();
    for (path, hash) in &new.0 {
        match old.0.get(path) {
            None => changes.push(Change {
                path: path.clone(),
                kind: ChangeKind::Added,
            }),
            Some(previous) if previous != hash => changes.push(Change {
                path: path.clone(),
                kind: ChangeKind::Modified,
            }),
            Some(_) => {}
        }
    }
    for path in old.0.keys().filter(|p| !new.0.contains_key(*p)) {
        changes.push(Change {
            path: path.clone(),
            kind: ChangeKind::Removed,
        });
    }
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

async fn capture(project: &Project) -> Result<Snapshot> {
    let files = project.source_files();
    tokio::task::spawn_blocking(move || Snapshot::capture(&files))
        .await
        .map_err(|e| Error::Config(format!("snapshot task failed: {}", e)))
}

/// Poll until `shutdown` resolves. After each successful reload the fresh
/// graph is handed to `on_reload`; its errors are logged, not returned.
pub async fn run<S, F, Fut>(project: &mut Project, interval: Duration, shutdown: S, mut on_reload: F) -> Result<()>
where
    S: Future<Output = ()>,
    F: FnMut(Arc<ProjectGraph>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut snapshot = capture(project).await?;
    tracing::info!("watching {} file(s)", snapshot.len());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("watch stopped");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let current = capture(project).await?;
        let changes = diff(&snapshot, &current);
        if changes.is_empty() {
            continue;
        }
        for change in &changes {
            tracing::info!("{} {}", change.kind, change.path.display());
        }
        snapshot = current;

        let reloaded = match project.reload(fresh_token()).await {
            Ok(()) => project.graph(),
            Err(e) => Err(e),
        };
        match reloaded {
            Ok(graph) => {
                if let Err(e) = on_reload(Arc::new(graph)).await {
                    tracing::error!("{}", e);
                }
            }
            Err(e) => tracing::error!("reload failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::project::fixtures;
    use super::*;
    use crate::core::output::write_atomic;
    use crate::plugins::PluginManager;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn next(rx: &mut UnboundedReceiver<usize>) -> usize {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_diff_detects_all_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        let c = dir.path().join("c.yaml");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();
        let before = Snapshot::capture(&[a.clone(), b.clone()]);

        std::fs::write(&b, "b2").unwrap();
        std::fs::write(&c, "c").unwrap();
        let after = Snapshot::capture(&[b.clone(), c.clone()]);

        let changes = diff(&before, &after);
        assert_eq!(
            changes,
            vec![
                Change { path: a, kind: ChangeKind::Removed },
                Change { path: b, kind: ChangeKind::Modified },
                Change { path: c, kind: ChangeKind::Added },
            ]
        );
        assert!(diff(&after, &after).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_reloads_and_survives_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = fixtures::project(dir.path());
        let mut project =
            Project::open(&config_path, None, &[], Arc::new(PluginManager::with_builtins())).unwrap();
        project.load().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            run(
                &mut project,
                Duration::from_millis(20),
                async {
                    let _ = stop_rx.await;
                },
                move |graph| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(graph.type_count());
                        Ok(())
                    }
                },
            )
            .await
        });

        let root = dir.path();
        tokio::time::sleep(Duration::from_millis(60)).await;
        write_atomic(
            &root.join("db/coupon.yaml"),
            b"name: Coupon\nfields:\n  code: { type: string }\n",
        )
        .unwrap();
        assert_eq!(next(&mut rx).await, 8);

        // broken file: reload fails, loop keeps polling
        write_atomic(&root.join("db/broken.yaml"), b"name: [oops\n").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::remove_file(root.join("db/coupon.yaml")).unwrap();
        std::fs::remove_file(root.join("db/broken.yaml")).unwrap();
        assert_eq!(next(&mut rx).await, 7);

        // body files referenced by resolvers are watched too
        write_atomic(
            &root.join("resolvers/orders.js"),
            b"export async function ordersByUser() {\n  return [];\n}\n",
        )
        .unwrap();
        assert_eq!(next(&mut rx).await, 7);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
