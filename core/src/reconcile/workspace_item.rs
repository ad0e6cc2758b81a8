//! Workspace item driver: notebooks and files imported by path.

use tracing::{info, warn};

use super::{Action, Context, Driver, ReconcileError};
use crate::events::{EventType, Reason};
use crate::finalizer::Cleanup;
use crate::fingerprint::{decode_payload, fingerprint};
use crate::remote::ignore_missing;
use crate::store::ResourceStore;
use crate::types::now_ms;
use crate::types::workspace::{WorkspaceItem, WorkspaceItemKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkspaceItemDriver;

impl WorkspaceItemDriver {
    pub fn new() -> Self {
        WorkspaceItemDriver
    }
}

impl Driver<WorkspaceItemKind> for WorkspaceItemDriver {
    fn teardown(&self, ctx: &Context, item: &WorkspaceItem) -> Result<Cleanup, ReconcileError> {
        if !item.is_submitted() {
            return Ok(Cleanup::Complete);
        }
        let path = &item.status.remote_id;
        ignore_missing(ctx.call("workspace", "delete", |r| r.delete_object(path, true)))?;
        info!(item = %item.identity, path = %path, "workspace item deleted");
        Ok(Cleanup::Complete)
    }

    fn needs_submit(&self, item: &WorkspaceItem) -> bool {
        !item.is_submitted()
            || item.status.content_hash != fingerprint(&item.spec.content)
            || item.status.remote_id != item.spec.path
    }

    fn submit(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<WorkspaceItemKind>,
        item: &WorkspaceItem,
    ) -> Result<Action, ReconcileError> {
        let spec = &item.spec;
        if !spec.path.starts_with('/') {
            return Err(ReconcileError::Validation(format!(
                "workspace path '{}' must be absolute",
                spec.path
            )));
        }
        let content = decode_payload(&spec.content).map_err(|e| {
            ReconcileError::Validation(format!("workspace content is not base64: {}", e))
        })?;

        if item.is_submitted() && item.status.remote_id != spec.path {
            let old = &item.status.remote_id;
            info!(item = %item.identity, from = %old, to = %spec.path, "workspace item moved");
            ignore_missing(ctx.call("workspace", "delete", |r| r.delete_object(old, true)))?;
        }

        ctx.call("workspace", "import", |r| {
            r.import(&spec.path, spec.language, spec.format, &content, true)
        })?;
        ctx.settle();
        let info = ctx.call("workspace", "status", |r| r.get_object_status(&spec.path))?;
        info!(item = %item.identity, path = %spec.path, object_id = info.object_id, "workspace item imported");

        let hash = fingerprint(&spec.content);
        let stored = ctx.write_status(store, item, |r| {
            r.status.remote_id = spec.path.clone();
            r.status.remote_state = info.object_type.as_str().to_string();
            r.status.content_hash = hash.clone();
            r.status.last_refreshed_ms = Some(now_ms());
            r.status.detail = Some(info.clone());
        })?;
        ctx.event(
            &stored,
            EventType::Normal,
            Reason::Submitted,
            format!("imported {} as {}", spec.path, info.object_type.as_str()),
        );
        Ok(Action::AwaitChange)
    }

    fn refresh(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<WorkspaceItemKind>,
        item: &WorkspaceItem,
    ) -> Result<Action, ReconcileError> {
        let path = &item.status.remote_id;
        let info = match ctx.call("workspace", "status", |r| r.get_object_status(path)) {
            Ok(info) => info,
            Err(e) if e.is_does_not_exist() => {
                warn!(item = %item.identity, path = %path, "workspace item vanished remotely, will re-import");
                ctx.reset_status(store, item)?;
                return Ok(Action::RequeueAfter(std::time::Duration::ZERO));
            }
            Err(e) => return Err(e.into()),
        };
        if item.status.detail.as_ref() != Some(&info) {
            ctx.write_status(store, item, |r| {
                r.status.remote_state = info.object_type.as_str().to_string();
                r.status.last_refreshed_ms = Some(now_ms());
                r.status.detail = Some(info.clone());
            })?;
        }
        Ok(Action::AwaitChange)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::reconcile;
    use crate::reconcile::testing::{harness, Harness};
    use crate::remote::models::{ExportFormat, Language};
    use crate::store::memory::MemoryStore;
    use crate::types::workspace::WorkspaceItemSpec;
    use crate::types::Identity;

    fn notebook(path: &str, content: &str) -> WorkspaceItemSpec {
        WorkspaceItemSpec {
            path: path.into(),
            language: Some(Language::Python),
            format: ExportFormat::Source,
            content: content.into(),
        }
    }

    fn pass(h: &Harness, store: &MemoryStore<WorkspaceItemKind>, id: &Identity) -> Result<Action, ReconcileError> {
        reconcile(&h.ctx, store, &WorkspaceItemDriver, store.get(id).unwrap())
    }

    #[test]
    fn import_then_steady() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "etl");
        // "print(1)"
        store
            .create(id.clone(), notebook("/Shared/etl", "cHJpbnQoMSk="))
            .unwrap();
        pass(&h, &store, &id).unwrap();
        pass(&h, &store, &id).unwrap();

        let item = store.get(&id).unwrap();
        assert_eq!(item.status.remote_state, "NOTEBOOK");
        assert_eq!(h.remote.object_content("/Shared/etl").unwrap(), b"print(1)");

        h.remote.clear_calls();
        pass(&h, &store, &id).unwrap();
        assert!(h.remote.mutating_calls().is_empty());
    }

    #[test]
    fn content_drift_reimports_once() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "etl");
        store
            .create(id.clone(), notebook("/Shared/etl", "cHJpbnQoMSk="))
            .unwrap();
        pass(&h, &store, &id).unwrap();
        pass(&h, &store, &id).unwrap();

        // "print(2)"
        store
            .apply_spec(&id, notebook("/Shared/etl", "cHJpbnQoMik="))
            .unwrap();
        pass(&h, &store, &id).unwrap();
        pass(&h, &store, &id).unwrap();
        assert_eq!(h.remote.calls_to("import"), 2);
        assert_eq!(h.remote.object_content("/Shared/etl").unwrap(), b"print(2)");
    }

    #[test]
    fn relative_path_is_rejected() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "etl");
        store
            .create(id.clone(), notebook("Shared/etl", "cHJpbnQoMSk="))
            .unwrap();
        pass(&h, &store, &id).unwrap();
        assert!(matches!(
            pass(&h, &store, &id),
            Err(ReconcileError::Validation(_))
        ));
    }

    #[test]
    fn deletion_removes_object() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "etl");
        store
            .create(id.clone(), notebook("/Shared/etl", "cHJpbnQoMSk="))
            .unwrap();
        pass(&h, &store, &id).unwrap();
        pass(&h, &store, &id).unwrap();
        store.request_deletion(&id).unwrap();
        pass(&h, &store, &id).unwrap();
        assert!(h.remote.object_content("/Shared/etl").is_none());
        assert!(!store.contains(&id));
    }
}
