//! Block driver: a file uploaded in bounded chunks.
//!
//! The content hash is the fingerprint of the decoded payload, and the
//! remote ID is the file path, so a path change is drift too.

use tracing::{debug, info, warn};

use super::{chunks, Action, Context, Driver, ReconcileError};
use crate::events::{EventType, Reason};
use crate::finalizer::Cleanup;
use crate::fingerprint::{decode_payload, fingerprint};
use crate::remote::{ignore_missing, RemoteResult};
use crate::store::ResourceStore;
use crate::types::block::{Block, BlockKind};
use crate::types::now_ms;

#[derive(Debug, Default, Clone, Copy)]
pub struct BlockDriver;

impl BlockDriver {
    pub fn new() -> Self {
        BlockDriver
    }
}

/// Write `data` to `path` through an upload handle.
fn upload(ctx: &Context, path: &str, data: &[u8]) -> RemoteResult<()> {
    let handle = ctx.call("block", "open", |r| r.open_handle(path, true))?;
    for chunk in chunks(data, ctx.settings.block_chunk_size) {
        if let Err(e) = ctx.call("block", "append", |r| r.append_chunk(handle, chunk)) {
            if let Err(close) = ctx.call("block", "close", |r| r.close_handle(handle)) {
                debug!(path, handle, error = %close, "close after failed append");
            }
            return Err(e);
        }
    }
    ctx.call("block", "close", |r| r.close_handle(handle))
}

impl Driver<BlockKind> for BlockDriver {
    fn teardown(&self, ctx: &Context, block: &Block) -> Result<Cleanup, ReconcileError> {
        if !block.is_submitted() {
            return Ok(Cleanup::Complete);
        }
        let path = &block.status.remote_id;
        ignore_missing(ctx.call("block", "delete", |r| r.delete_file(path, false)))?;
        info!(block = %block.identity, path = %path, "block deleted");
        Ok(Cleanup::Complete)
    }

    fn needs_submit(&self, block: &Block) -> bool {
        !block.is_submitted()
            || block.status.content_hash != fingerprint(&block.spec.data)
            || block.status.remote_id != block.spec.path
    }

    fn submit(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<BlockKind>,
        block: &Block,
    ) -> Result<Action, ReconcileError> {
        let path = &block.spec.path;
        if path.is_empty() {
            return Err(ReconcileError::Validation("block path is empty".into()));
        }
        let data = decode_payload(&block.spec.data)
            .map_err(|e| ReconcileError::Validation(format!("block data is not base64: {}", e)))?;

        if block.is_submitted() && block.status.remote_id != *path {
            let old = &block.status.remote_id;
            info!(block = %block.identity, from = %old, to = %path, "block moved");
            ignore_missing(ctx.call("block", "delete", |r| r.delete_file(old, false)))?;
        }

        upload(ctx, path, &data)?;
        ctx.settle();
        let info = ctx.call("block", "status", |r| r.get_file_status(path))?;
        if info.file_size != data.len() as u64 {
            warn!(block = %block.identity, expected = data.len(), observed = info.file_size, "size mismatch after upload");
        }

        let hash = fingerprint(&block.spec.data);
        let stored = ctx.write_status(store, block, |r| {
            r.status.remote_id = path.clone();
            r.status.remote_state = "AVAILABLE".into();
            r.status.content_hash = hash.clone();
            r.status.last_refreshed_ms = Some(now_ms());
            r.status.detail = Some(info.clone());
        })?;
        ctx.event(
            &stored,
            EventType::Normal,
            Reason::Submitted,
            format!("uploaded {} bytes to {}", data.len(), path),
        );
        Ok(Action::AwaitChange)
    }

    fn refresh(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<BlockKind>,
        block: &Block,
    ) -> Result<Action, ReconcileError> {
        let path = &block.status.remote_id;
        let info = match ctx.call("block", "status", |r| r.get_file_status(path)) {
            Ok(info) => info,
            Err(e) if e.is_does_not_exist() => {
                warn!(block = %block.identity, path = %path, "block vanished remotely, will re-upload");
                ctx.reset_status(store, block)?;
                return Ok(Action::RequeueAfter(std::time::Duration::ZERO));
            }
            Err(e) => return Err(e.into()),
        };
        if block.status.detail.as_ref() != Some(&info) {
            ctx.write_status(store, block, |r| {
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
    use crate::reconcile::testing::{harness, HookedStore};
    use crate::remote::RemoteError;
    use crate::store::memory::MemoryStore;
    use crate::types::block::BlockSpec;
    use crate::types::Identity;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn spec(path: &str, data: &str) -> BlockSpec {
        BlockSpec {
            path: path.into(),
            data: data.into(),
        }
    }

    fn pass(h: &crate::reconcile::testing::Harness, store: &MemoryStore<BlockKind>, id: &Identity) -> Result<Action, ReconcileError> {
        reconcile(&h.ctx, store, &BlockDriver, store.get(id).unwrap())
    }

    #[test]
    fn upload_sets_known_fingerprint() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "lib");
        store.create(id.clone(), spec("/libs/a.txt", "dGVzdA==")).unwrap();
        pass(&h, &store, &id).unwrap();
        pass(&h, &store, &id).unwrap();

        let b = store.get(&id).unwrap();
        assert_eq!(b.status.content_hash, "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3");
        assert!(!BlockDriver.needs_submit(&b));
        assert_eq!(h.remote.file("/libs/a.txt").unwrap(), b"test");

        store.apply_spec(&id, spec("/libs/a.txt", "b3RoZXI=")).unwrap();
        assert!(BlockDriver.needs_submit(&store.get(&id).unwrap()));
        pass(&h, &store, &id).unwrap();
        assert!(!BlockDriver.needs_submit(&store.get(&id).unwrap()));
        assert_eq!(h.remote.file("/libs/a.txt").unwrap(), b"other");
    }

    #[test]
    fn author_edit_during_upload_keeps_uploaded_hash() {
        let h = harness();
        let store: HookedStore<BlockKind> = HookedStore::new();
        let id = Identity::new("ns", "lib");
        store.inner.create(id.clone(), spec("/libs/a.txt", "dGVzdA==")).unwrap();
        reconcile(&h.ctx, &store, &BlockDriver, store.get(&id).unwrap()).unwrap();

        // The author edits the spec after the upload, before status is written.
        let edited = id.clone();
        store.before_status_write(move |inner| {
            inner.apply_spec(&edited, spec("/libs/a.txt", "b3RoZXI=")).unwrap();
            None
        });
        reconcile(&h.ctx, &store, &BlockDriver, store.get(&id).unwrap()).unwrap();

        let b = store.get(&id).unwrap();
        assert_eq!(b.spec.data, "b3RoZXI=");
        assert_eq!(b.status.remote_id, "/libs/a.txt");
        assert_eq!(b.status.content_hash, "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3");
        assert_eq!(h.remote.file("/libs/a.txt").unwrap(), b"test");
        assert!(BlockDriver.needs_submit(&b));

        reconcile(&h.ctx, &store, &BlockDriver, b).unwrap();
        assert_eq!(h.remote.file("/libs/a.txt").unwrap(), b"other");
        assert!(!BlockDriver.needs_submit(&store.get(&id).unwrap()));
    }

    #[test]
    fn large_payload_is_chunked() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "big");
        let payload = STANDARD.encode(vec![7u8; 2500]);
        store.create(id.clone(), spec("/big.bin", &payload)).unwrap();
        pass(&h, &store, &id).unwrap();
        pass(&h, &store, &id).unwrap();
        assert_eq!(h.remote.calls_to("append_chunk"), 3);
        assert_eq!(h.remote.file("/big.bin").unwrap().len(), 2500);
    }

    #[test]
    fn failed_append_closes_handle() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "lib");
        store.create(id.clone(), spec("/a.txt", "dGVzdA==")).unwrap();
        pass(&h, &store, &id).unwrap();
        h.remote
            .fail_next("append_chunk", RemoteError::Unavailable("503".into()));
        assert!(pass(&h, &store, &id).is_err());
        assert_eq!(h.remote.calls_to("close_handle"), 1);
        assert!(!store.get(&id).unwrap().is_submitted());
    }

    #[test]
    fn path_change_moves_file() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "lib");
        store.create(id.clone(), spec("/old.txt", "dGVzdA==")).unwrap();
        pass(&h, &store, &id).unwrap();
        pass(&h, &store, &id).unwrap();

        store.apply_spec(&id, spec("/new.txt", "dGVzdA==")).unwrap();
        pass(&h, &store, &id).unwrap();
        assert!(h.remote.file("/old.txt").is_none());
        assert!(h.remote.file("/new.txt").is_some());
        assert_eq!(store.get(&id).unwrap().status.remote_id, "/new.txt");
    }

    #[test]
    fn invalid_payload_is_validation_error() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "lib");
        store.create(id.clone(), spec("/a.txt", "invalid-base64")).unwrap();
        pass(&h, &store, &id).unwrap();
        assert!(matches!(
            pass(&h, &store, &id),
            Err(ReconcileError::Validation(_))
        ));
        assert!(h.remote.mutating_calls().is_empty());
    }

    #[test]
    fn deletion_removes_file() {
        let h = harness();
        let store = MemoryStore::new();
        let id = Identity::new("ns", "lib");
        store.create(id.clone(), spec("/a.txt", "dGVzdA==")).unwrap();
        pass(&h, &store, &id).unwrap();
        pass(&h, &store, &id).unwrap();
        store.request_deletion(&id).unwrap();
        pass(&h, &store, &id).unwrap();
        assert!(h.remote.file("/a.txt").is_none());
        assert!(!store.contains(&id));
    }
}
