//! Auth namespace binding.
//!
//! Auth config names its user-profile (and optional tenant-provider) types
//! by type name only. Which database namespace owns each type is decided by
//! [`AuthService::resolve_namespaces`], which must run exactly once before
//! either binding is read.
//!
//! Resolution order: explicit namespace; else the only database namespace
//! (local or external); else the first local namespace, in declaration
//! order, whose loaded types contain the name.

use super::TailorDbService;
use crate::core::types::AuthConfig;
use crate::error::{Error, Result};

/// A type reference bound to its owning namespace.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NamespaceBinding {
    pub type_name: String,
    pub namespace: String,
}

#[derive(Debug)]
pub struct AuthService {
    config: AuthConfig,
    user_profile: Option<NamespaceBinding>,
    tenant_provider: Option<NamespaceBinding>,
    resolved: bool,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            user_profile: None,
            tenant_provider: None,
            resolved: false,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Bind the user profile and tenant provider to their namespaces.
    ///
    /// Loads every local database service when a scan is needed.
    pub async fn resolve_namespaces(&mut self, db: &mut [TailorDbService]) -> Result<()> {
        if self.resolved {
            return Err(Error::Namespace(format!(
                "auth '{}' namespaces are already resolved",
                self.config.name
            )));
        }

        let user = &self.config.user_profile;
        let user_profile = bind(&user.type_name, user.namespace.as_deref(), db).await?;

        let tenant_provider = match &self.config.tenant_provider {
            Some(tp) => Some(bind(&tp.type_name, tp.namespace.as_deref(), db).await?),
            None => None,
        };

        tracing::info!(
            "auth '{}': user profile '{}' bound to namespace '{}'",
            self.config.name,
            user_profile.type_name,
            user_profile.namespace
        );
        self.user_profile = Some(user_profile);
        self.tenant_provider = tenant_provider;
        self.resolved = true;
        Ok(())
    }

    pub fn user_profile(&self) -> Result<&NamespaceBinding> {
        self.user_profile.as_ref().ok_or_else(|| self.unresolved())
    }

    pub fn tenant_provider(&self) -> Result<Option<&NamespaceBinding>> {
        if !self.resolved {
            return Err(self.unresolved());
        }
        Ok(self.tenant_provider.as_ref())
    }

    fn unresolved(&self) -> Error {
        Error::Namespace(format!(
            "auth '{}' namespaces read before resolve_namespaces()",
            self.config.name
        ))
    }

    /// Check the bound types against the loaded namespaces.
    ///
    /// Bindings to external namespaces are trusted; local ones must hold the
    /// type and every referenced field.
    pub fn validate_bindings(&self, db: &[TailorDbService]) -> Result<()> {
        let user = self.user_profile()?;
        let mut required = vec![self.config.user_profile.username_field.as_str()];
        required.extend(self.config.user_profile.attributes.keys().map(String::as_str));
        let mut errors = check_binding(user, &required, db);

        if let (Some(binding), Some(tp)) = (self.tenant_provider()?, &self.config.tenant_provider) {
            errors.extend(check_binding(binding, &[tp.field.as_str()], db));
        }
        Error::collect(errors)
    }
}

async fn bind(
    type_name: &str,
    explicit: Option<&str>,
    db: &mut [TailorDbService],
) -> Result<NamespaceBinding> {
    let binding = |namespace: &str| NamespaceBinding {
        type_name: type_name.to_string(),
        namespace: namespace.to_string(),
    };

    if let Some(namespace) = explicit {
        return Ok(binding(namespace));
    }

    match db.len() {
        0 => Err(Error::Namespace(format!(
            "type '{}' cannot be bound: no database namespace is configured",
            type_name
        ))),
        1 => Ok(binding(db[0].namespace())),
        _ => {
            futures::future::try_join_all(
                db.iter_mut()
                    .filter(|svc| !svc.is_external())
                    .map(|svc| svc.load_types()),
            )
            .await?;

            // First match in declaration order wins, even if later namespaces also declare it.
            db.iter()
                .filter(|svc| !svc.is_external())
                .find(|svc| svc.get_types().contains_key(type_name))
                .map(|svc| binding(svc.namespace()))
                .ok_or_else(|| {
                    Error::Namespace(format!(
                        "type '{}' was not found in any database namespace ({})",
                        type_name,
                        db.iter().map(TailorDbService::namespace).collect::<Vec<_>>().join(", ")
                    ))
                })
        }
    }
}

fn check_binding(binding: &NamespaceBinding, fields: &[&str], db: &[TailorDbService]) -> Vec<Error> {
    let Some(svc) = db.iter().find(|s| s.namespace() == binding.namespace) else {
        return vec![Error::Namespace(format!(
            "type '{}' is bound to unknown namespace '{}'",
            binding.type_name, binding.namespace
        ))];
    };
    if svc.is_external() {
        return Vec::new();
    }
    let Some(ty) = svc.get_types().get(&binding.type_name) else {
        return vec![Error::Namespace(format!(
            "type '{}' does not exist in namespace '{}'",
            binding.type_name, binding.namespace
        ))];
    };
    fields
        .iter()
        .filter(|f| !ty.decl.fields.contains_key(**f))
        .map(|f| {
            Error::Namespace(format!(
                "field '{}' does not exist on type '{}' in namespace '{}'",
                f, binding.type_name, binding.namespace
            ))
        })
        .collect()
}
