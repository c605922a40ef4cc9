//! Deployment planning: diff the desired manifest against recorded state.

use super::{DeploymentManifest, PlatformState, ResourceKind};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Delete,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::NoOp => " ",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    pub key: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    pub project: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_delete: u32,
    pub unchanged: u32,
}

impl DeploymentPlan {
    pub fn has_changes(&self) -> bool {
        self.to_create + self.to_update + self.to_delete > 0
    }
}

/// Compare `manifest` to `state`. Desired resources keep manifest order;
/// deletions follow in state order.
pub fn plan(manifest: &DeploymentManifest, state: &PlatformState) -> DeploymentPlan {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_delete = 0u32;
    let mut unchanged = 0u32;

    for (key, desired) in &manifest.resources {
        let action = match state.resources.get(key) {
            None => PlanAction::Create,
            Some(current) if current.hash == desired.hash && current.kind == desired.kind => PlanAction::NoOp,
            Some(_) => PlanAction::Update,
        };
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            _ => unchanged += 1,
        }
        changes.push(PlannedChange {
            key: key.clone(),
            kind: desired.kind,
            action,
            description: describe(key, action),
        });
    }

    for (key, current) in &state.resources {
        if !manifest.resources.contains_key(key) {
            to_delete += 1;
            changes.push(PlannedChange {
                key: key.clone(),
                kind: current.kind,
                action: PlanAction::Delete,
                description: describe(key, PlanAction::Delete),
            });
        }
    }

    DeploymentPlan {
        project: manifest.project.clone(),
        changes,
        to_create,
        to_update,
        to_delete,
        unchanged,
    }
}

fn describe(key: &str, action: PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create", key),
        PlanAction::Update => format!("{}: update (hash changed)", key),
        PlanAction::Delete => format!("{}: delete", key),
        PlanAction::NoOp => format!("{}: no changes", key),
    }
}
