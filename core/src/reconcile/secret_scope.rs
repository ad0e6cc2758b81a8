//! Secret scope driver.
//!
//! Secret values cannot be read back, so the scope is synchronized by
//! removing keys and principals that are no longer wanted and writing every
//! wanted one again. A scope that already exists remotely is never adopted.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::{Action, Context, Driver, ReconcileError};
use crate::events::{EventType, Reason};
use crate::finalizer::Cleanup;
use crate::fingerprint::{decode_payload, fingerprint_json};
use crate::remote::models::{AclPermission, SecretValue};
use crate::remote::{ignore_missing, RemoteError};
use crate::store::ResourceStore;
use crate::types::now_ms;
use crate::types::secret_scope::{ScopeSecret, SecretScope, SecretScopeDetail, SecretScopeKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct SecretScopeDriver;

impl SecretScopeDriver {
    pub fn new() -> Self {
        SecretScopeDriver
    }
}

fn content_hash(scope: &SecretScope) -> String {
    fingerprint_json(&(&scope.spec.secrets, &scope.spec.acls))
}

fn acls(scope: &SecretScope) -> Result<Vec<(String, AclPermission)>, ReconcileError> {
    scope
        .spec
        .acls
        .iter()
        .map(|acl| match AclPermission::parse(&acl.permission) {
            Some(permission) => Ok((acl.principal.clone(), permission)),
            None => Err(ReconcileError::Validation(format!(
                "unsupported permission '{}' for principal '{}'",
                acl.permission, acl.principal
            ))),
        })
        .collect()
}

fn secret_value(
    ctx: &Context,
    namespace: &str,
    secret: &ScopeSecret,
) -> Result<SecretValue, ReconcileError> {
    if let Some(text) = &secret.string_value {
        return Ok(SecretValue::Text(text.clone()));
    }
    if let Some(encoded) = &secret.byte_value {
        let bytes = decode_payload(encoded).map_err(|e| {
            ReconcileError::Validation(format!("secret '{}' bytes are not base64: {}", secret.key, e))
        })?;
        return Ok(SecretValue::Bytes(bytes));
    }
    if let Some(source) = &secret.value_from {
        return match ctx.secrets.secret_value(namespace, &source.name, &source.key)? {
            Some(bytes) => Ok(SecretValue::Bytes(bytes)),
            None => Err(ReconcileError::Validation(format!(
                "secret '{}' refers to missing key '{}' of '{}'",
                secret.key, source.key, source.name
            ))),
        };
    }
    Err(ReconcileError::Validation(format!(
        "secret '{}' has no value",
        secret.key
    )))
}

impl Driver<SecretScopeKind> for SecretScopeDriver {
    fn teardown(&self, ctx: &Context, scope: &SecretScope) -> Result<Cleanup, ReconcileError> {
        if !scope.is_submitted() {
            return Ok(Cleanup::Complete);
        }
        let name = &scope.status.remote_id;
        ignore_missing(ctx.call("scope", "delete", |r| r.delete_scope(name)))?;
        info!(scope = %scope.identity, "secret scope deleted");
        Ok(Cleanup::Complete)
    }

    fn needs_submit(&self, scope: &SecretScope) -> bool {
        !scope.is_submitted() || scope.status.content_hash != content_hash(scope)
    }

    fn submit(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<SecretScopeKind>,
        scope: &SecretScope,
    ) -> Result<Action, ReconcileError> {
        let name = scope.identity.name.as_str();
        let wanted_acls = acls(scope)?;
        let wanted_secrets = scope
            .spec
            .secrets
            .iter()
            .map(|s| Ok((s.key.clone(), secret_value(ctx, &scope.identity.namespace, s)?)))
            .collect::<Result<Vec<_>, ReconcileError>>()?;

        let mut current = scope.clone();
        if !scope.is_submitted() {
            let principal = scope.spec.initial_manage_principal.as_deref();
            match ctx.call("scope", "create", |r| r.create_scope(name, principal)) {
                Ok(()) => {}
                Err(RemoteError::AlreadyExists(what)) => {
                    return Err(ReconcileError::Validation(format!(
                        "{} already exists and is not managed here",
                        what
                    )))
                }
                Err(e) => return Err(e.into()),
            }
            info!(scope = %scope.identity, "secret scope created");
            current = ctx.write_status(store, scope, |r| {
                r.status.remote_id = name.to_string();
                r.status.remote_state = "ACTIVE".into();
            })?;
        }

        let keep: BTreeSet<&str> = wanted_secrets.iter().map(|(k, _)| k.as_str()).collect();
        for stale in ctx.call("scope", "list_secrets", |r| r.list_secrets(name))? {
            if !keep.contains(stale.key.as_str()) {
                debug!(scope = name, key = %stale.key, "removing secret");
                ignore_missing(ctx.call("scope", "delete_secret", |r| r.delete_secret(name, &stale.key)))?;
            }
        }
        for (key, value) in &wanted_secrets {
            ctx.call("scope", "put_secret", |r| r.put_secret(name, key, value))?;
        }

        let mut keep: BTreeSet<&str> = wanted_acls.iter().map(|(p, _)| p.as_str()).collect();
        if let Some(principal) = &scope.spec.initial_manage_principal {
            keep.insert(principal.as_str());
        }
        for stale in ctx.call("scope", "list_acls", |r| r.list_acls(name))? {
            if !keep.contains(stale.principal.as_str()) {
                debug!(scope = name, principal = %stale.principal, "removing acl");
                ignore_missing(ctx.call("scope", "delete_acl", |r| r.delete_acl(name, &stale.principal)))?;
            }
        }
        for (principal, permission) in &wanted_acls {
            ctx.call("scope", "put_acl", |r| r.put_acl(name, principal, *permission))?;
        }

        let detail = SecretScopeDetail {
            backend_type: String::new(),
            secret_keys: wanted_secrets.iter().map(|(k, _)| k.clone()).collect(),
            acls: ctx.call("scope", "list_acls", |r| r.list_acls(name))?,
        };
        let hash = content_hash(scope);
        let stored = ctx.write_status(store, &current, |r| {
            r.status.remote_id = name.to_string();
            r.status.remote_state = "ACTIVE".into();
            r.status.content_hash = hash.clone();
            r.status.last_refreshed_ms = Some(now_ms());
            r.status.detail = Some(detail.clone());
        })?;
        ctx.event(
            &stored,
            EventType::Normal,
            Reason::Submitted,
            format!(
                "synchronized {} secrets and {} acls",
                detail.secret_keys.len(),
                detail.acls.len()
            ),
        );
        Ok(Action::RequeueAfter(ctx.settings.requeue_interval()))
    }

    fn refresh(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<SecretScopeKind>,
        scope: &SecretScope,
    ) -> Result<Action, ReconcileError> {
        let name = &scope.status.remote_id;
        let scopes = ctx.call("scope", "list", |r| r.list_scopes())?;
        let Some(found) = scopes.into_iter().find(|s| s.name == *name) else {
            warn!(scope = %scope.identity, "secret scope vanished remotely, will recreate");
            let stored = ctx.reset_status(store, scope)?;
            ctx.event(
                &stored,
                EventType::Warning,
                Reason::Refreshed,
                format!("scope {} no longer exists", name),
            );
            return Ok(Action::RequeueAfter(std::time::Duration::ZERO));
        };

        let backend_changed = scope
            .status
            .detail
            .as_ref()
            .map_or(true, |d| d.backend_type != found.backend_type);
        if backend_changed {
            ctx.write_status(store, scope, |r| {
                r.status.last_refreshed_ms = Some(now_ms());
                if let Some(detail) = r.status.detail.as_mut() {
                    detail.backend_type = found.backend_type.clone();
                }
            })?;
        }
        Ok(Action::RequeueAfter(ctx.settings.requeue_interval()))
    }
}
