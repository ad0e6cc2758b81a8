//! Owns one controller per kind and the threads that drive them.
//!
//! Thread layout, per kind: one watch feeder that turns store notifications
//! into queue entries, and `workers_per_kind` workers draining the queue.
//! A single resync thread re-queues every record each `resync_interval`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Controller, Managed};
use crate::reconcile::block::BlockDriver;
use crate::reconcile::cluster::ClusterDriver;
use crate::reconcile::job::JobDriver;
use crate::reconcile::run::RunDriver;
use crate::reconcile::secret_scope::SecretScopeDriver;
use crate::reconcile::workspace_item::WorkspaceItemDriver;
use crate::reconcile::Context;
use crate::store::ResourceStore;
use crate::types::block::BlockKind;
use crate::types::cluster::ClusterKind;
use crate::types::job::JobKind;
use crate::types::run::RunKind;
use crate::types::secret_scope::SecretScopeKind;
use crate::types::workspace::WorkspaceItemKind;

/// How often watch feeders check for shutdown.
const WATCH_POLL: Duration = Duration::from_millis(100);

/// Upper bound on passes in one `converge` round, so a resource that keeps
/// asking to be requeued immediately cannot spin forever.
const MAX_PASSES_PER_ROUND: usize = 10_000;

/// The stores of every kind.
#[derive(Clone)]
pub struct Stores {
    pub clusters: Arc<dyn ResourceStore<ClusterKind>>,
    pub jobs: Arc<dyn ResourceStore<JobKind>>,
    pub runs: Arc<dyn ResourceStore<RunKind>>,
    pub blocks: Arc<dyn ResourceStore<BlockKind>>,
    pub workspace_items: Arc<dyn ResourceStore<WorkspaceItemKind>>,
    pub secret_scopes: Arc<dyn ResourceStore<SecretScopeKind>>,
}

pub struct Manager {
    ctx: Arc<Context>,
    controllers: Vec<Arc<dyn Managed>>,
    stop: Arc<AtomicBool>,
    resync_stop: Option<mpsc::Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl Manager {
    pub fn new(ctx: Context, stores: Stores) -> Self {
        let ctx = Arc::new(ctx);
        let controllers: Vec<Arc<dyn Managed>> = vec![
            Arc::new(Controller::new(stores.clusters.clone(), ClusterDriver::new(), ctx.clone())),
            Arc::new(Controller::new(
                stores.jobs.clone(),
                JobDriver::new(stores.clusters.clone()),
                ctx.clone(),
            )),
            Arc::new(Controller::new(
                stores.runs.clone(),
                RunDriver::new(stores.jobs.clone(), stores.clusters.clone()),
                ctx.clone(),
            )),
            Arc::new(Controller::new(stores.blocks.clone(), BlockDriver::new(), ctx.clone())),
            Arc::new(Controller::new(
                stores.workspace_items.clone(),
                WorkspaceItemDriver::new(),
                ctx.clone(),
            )),
            Arc::new(Controller::new(
                stores.secret_scopes.clone(),
                SecretScopeDriver::new(),
                ctx.clone(),
            )),
        ];
        Manager {
            ctx,
            controllers,
            stop: Arc::new(AtomicBool::new(false)),
            resync_stop: None,
            threads: Vec::new(),
        }
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.controllers.iter().map(|c| c.kind()).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Spawn feeders, workers and the resync thread, and queue every
    /// existing record once. A manager that was shut down stays down.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        if self.controllers.iter().any(|c| c.queue().is_shutdown()) {
            warn!("manager was shut down, not restarting");
            return;
        }
        let workers = self.ctx.settings.workers_per_kind.max(1);
        for controller in &self.controllers {
            let feed = controller.watch();
            let c = controller.clone();
            let stop = self.stop.clone();
            self.threads.push(thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match feed.recv_timeout(WATCH_POLL) {
                        Ok(id) => c.queue().add(id),
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(kind = c.kind(), "watch feeder stopped");
            }));

            for _ in 0..workers {
                let c = controller.clone();
                self.threads.push(thread::spawn(move || {
                    while let Some(id) = c.queue().take() {
                        c.handle(id);
                    }
                }));
            }
            controller.enqueue_all();
        }

        let (tx, rx) = mpsc::channel::<()>();
        let interval = self.ctx.settings.resync_interval();
        let controllers = self.controllers.clone();
        self.threads.push(thread::spawn(move || loop {
            match rx.recv_timeout(interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    debug!("periodic resync");
                    for c in &controllers {
                        c.enqueue_all();
                    }
                }
                _ => break,
            }
        }));
        self.resync_stop = Some(tx);
        info!(
            kinds = ?self.kinds(),
            workers_per_kind = workers,
            "controllers started"
        );
    }

    /// Stop every thread and wait for in-flight passes to finish.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.resync_stop.take();
        for c in &self.controllers {
            c.queue().shutdown();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("controller thread panicked");
            }
        }
        info!("controllers stopped");
    }

    /// Run `rounds` synchronous rounds on the calling thread: queue every
    /// record, then drain every queue until nothing is ready. Delayed
    /// requeues are left for the next round. Returns the number of passes.
    pub fn converge(&self, rounds: usize) -> usize {
        let mut passes = 0;
        for round in 0..rounds {
            for c in &self.controllers {
                c.enqueue_all();
            }
            let mut in_round = 0;
            loop {
                let mut progressed = false;
                for c in &self.controllers {
                    while let Some(id) = c.queue().try_take() {
                        c.handle(id);
                        in_round += 1;
                        progressed = true;
                        if in_round >= MAX_PASSES_PER_ROUND {
                            warn!(round, "pass limit reached");
                            return passes + in_round;
                        }
                    }
                }
                if !progressed {
                    break;
                }
            }
            debug!(round, passes = in_round, "round complete");
            passes += in_round;
        }
        passes
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryRecorder;
    use crate::remote::mock::MockRemote;
    use crate::remote::models::{ClusterSpec, JobSettings, JobTask, NotebookTask};
    use crate::stats::MemoryStats;
    use crate::store::memory::{MemorySecrets, MemoryStore};
    use crate::types::block::BlockSpec;
    use crate::types::cluster::ClusterRef;
    use crate::types::config::Settings;
    use crate::types::job::JobSpec;
    use crate::types::Identity;
    use std::collections::BTreeMap;
    use std::time::Instant;

    struct World {
        remote: Arc<MockRemote>,
        clusters: Arc<MemoryStore<ClusterKind>>,
        jobs: Arc<MemoryStore<JobKind>>,
        blocks: Arc<MemoryStore<BlockKind>>,
        manager: Manager,
    }

    fn world() -> World {
        let remote = Arc::new(MockRemote::auto_advancing());
        let clusters = Arc::new(MemoryStore::new());
        let jobs = Arc::new(MemoryStore::new());
        let blocks = Arc::new(MemoryStore::new());
        let ctx = Context {
            remote: remote.clone(),
            events: Arc::new(MemoryRecorder::new()),
            stats: Arc::new(MemoryStats::new()),
            secrets: Arc::new(MemorySecrets::new()),
            settings: Settings {
                settle_delay_ms: 0,
                ..Settings::default()
            },
        };
        let stores = Stores {
            clusters: clusters.clone(),
            jobs: jobs.clone(),
            runs: Arc::new(MemoryStore::<RunKind>::new()),
            blocks: blocks.clone(),
            workspace_items: Arc::new(MemoryStore::<WorkspaceItemKind>::new()),
            secret_scopes: Arc::new(MemoryStore::<SecretScopeKind>::new()),
        };
        World {
            remote,
            clusters,
            jobs,
            blocks,
            manager: Manager::new(ctx, stores),
        }
    }

    fn cluster_spec() -> ClusterSpec {
        ClusterSpec {
            spark_version: "13.3.x-scala2.12".into(),
            node_type_id: "Standard_D3_v2".into(),
            num_workers: Some(2),
            ..ClusterSpec::default()
        }
    }

    fn job_spec() -> JobSpec {
        JobSpec {
            existing_cluster: Some(ClusterRef {
                name: Some("etl".into()),
                remote_id: None,
            }),
            settings: JobSettings {
                task: JobTask {
                    notebook_task: Some(NotebookTask {
                        notebook_path: "/etl".into(),
                        base_parameters: BTreeMap::new(),
                    }),
                    ..JobTask::default()
                },
                ..JobSettings::default()
            },
        }
    }

    #[test]
    fn converge_resolves_dependencies_across_rounds() {
        let w = world();
        // The job is declared first and has to wait for its cluster.
        w.jobs
            .create(Identity::new("ns", "nightly"), job_spec())
            .unwrap();
        w.clusters
            .create(Identity::new("ns", "etl"), cluster_spec())
            .unwrap();

        w.manager.converge(3);

        let cluster = w.clusters.get(&Identity::new("ns", "etl")).unwrap();
        let job = w.jobs.get(&Identity::new("ns", "nightly")).unwrap();
        assert!(cluster.is_submitted());
        assert!(job.is_submitted());
        assert_eq!(
            job.status.detail.unwrap().settings.existing_cluster_id,
            Some(cluster.status.remote_id)
        );
        assert_eq!(w.remote.calls_to("create_job"), 1);
    }

    #[test]
    fn converge_is_idempotent_once_settled() {
        let w = world();
        w.clusters
            .create(Identity::new("ns", "etl"), cluster_spec())
            .unwrap();
        w.manager.converge(3);
        w.remote.clear_calls();
        w.manager.converge(3);
        assert!(w.remote.mutating_calls().is_empty());
    }

    #[test]
    fn threaded_run_uploads_and_stops() {
        let mut w = world();
        let id = Identity::new("ns", "lib");
        w.manager.start();
        w.blocks
            .create(
                id.clone(),
                BlockSpec {
                    path: "/libs/a.txt".into(),
                    data: "dGVzdA==".into(),
                },
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && !w.blocks.get(&id).unwrap().is_submitted() {
            std::thread::sleep(Duration::from_millis(10));
        }
        w.manager.shutdown();
        assert!(w.blocks.get(&id).unwrap().is_submitted());
        assert_eq!(w.remote.file("/libs/a.txt").unwrap(), b"test");
        assert!(!w.manager.is_running());

        w.manager.start();
        assert!(!w.manager.is_running());
        assert_eq!(w.manager.kinds().len(), 6);
    }
}
