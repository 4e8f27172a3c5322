//! Apply dispatch.
//!
//! Admission (apply vs defer) happens on the engine's single thread; the
//! apply itself is handed to an [`ApplyExecutor`]. The keyed executor keeps
//! one FIFO lane per worker and routes every (entity, key) to a fixed lane,
//! so per-key order survives while distinct keys run in parallel.
//! Entity-level sync requests and universal-key operations are barriers:
//! they run only after every lane has drained the work queued ahead of them,
//! and no lane proceeds until they finish.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};

use crate::core::{ConcurrencyKey, EntityId};

use super::collab::{EntityAction, EntityRequest, ManagedEntity, RequestPayload};
use super::completion::CompletionHandle;

/// One dispatched apply.
pub struct ApplyJob {
    entity: Arc<dyn ManagedEntity>,
    request: EntityRequest,
    payload: RequestPayload,
    completion: CompletionHandle,
}

impl ApplyJob {
    pub fn new(
        entity: Arc<dyn ManagedEntity>,
        request: EntityRequest,
        payload: RequestPayload,
        completion: CompletionHandle,
    ) -> Self {
        Self {
            entity,
            request,
            payload,
            completion,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        self.entity.id()
    }

    pub fn key(&self) -> ConcurrencyKey {
        self.request.key
    }

    /// Must be ordered against every lane, not just its own.
    pub fn is_barrier(&self) -> bool {
        matches!(
            self.request.action,
            EntityAction::SyncEntityStart | EntityAction::SyncEntityEnd
        ) || self.request.key == ConcurrencyKey::UNIVERSAL
    }

    pub fn run(self) {
        self.entity
            .add_request(self.request, self.payload, self.completion);
    }
}

impl std::fmt::Debug for ApplyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyJob")
            .field("entity", self.entity.id())
            .field("request", &self.request)
            .field("payload", &self.payload)
            .finish()
    }
}

pub trait ApplyExecutor: Send {
    fn execute(&self, job: ApplyJob);
}

/// Applies on the caller's thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl ApplyExecutor for InlineExecutor {
    fn execute(&self, job: ApplyJob) {
        run_guarded(job);
    }
}

struct BarrierTask {
    arrive: Barrier,
    release: Barrier,
    job: Mutex<Option<ApplyJob>>,
}

enum LaneTask {
    Run(ApplyJob),
    Barrier(Arc<BarrierTask>),
}

/// Fixed pool of lane workers.
pub struct KeyedExecutor {
    lanes: Vec<Sender<LaneTask>>,
    joins: Vec<JoinHandle<()>>,
}

impl KeyedExecutor {
    pub fn new(workers: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let mut lanes = Vec::with_capacity(workers);
        let mut joins = Vec::with_capacity(workers);
        for idx in 0..workers {
            let (tx, rx) = channel::unbounded::<LaneTask>();
            let join = thread::Builder::new()
                .name(format!("stripe-apply-{idx}"))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        match task {
                            LaneTask::Run(job) => run_guarded(job),
                            LaneTask::Barrier(task) => run_barrier(&task),
                        }
                    }
                })?;
            lanes.push(tx);
            joins.push(join);
        }
        Ok(Self { lanes, joins })
    }

    pub fn workers(&self) -> usize {
        self.lanes.len()
    }

    /// Lane owning (entity, key).
    pub fn lane_for(&self, entity: &EntityId, key: ConcurrencyKey) -> usize {
        let mut hasher = DefaultHasher::new();
        entity.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }

    /// Drains every lane and joins the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.lanes.clear();
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }
}

impl ApplyExecutor for KeyedExecutor {
    fn execute(&self, job: ApplyJob) {
        if job.is_barrier() {
            let task = Arc::new(BarrierTask {
                arrive: Barrier::new(self.lanes.len()),
                release: Barrier::new(self.lanes.len()),
                job: Mutex::new(Some(job)),
            });
            for lane in &self.lanes {
                if lane.send(LaneTask::Barrier(Arc::clone(&task))).is_err() {
                    tracing::error!("apply lane stopped; barrier request dropped");
                }
            }
            return;
        }

        let lane = self.lane_for(job.entity_id(), job.key());
        if self.lanes[lane].send(LaneTask::Run(job)).is_err() {
            tracing::error!(lane, "apply lane stopped; request dropped");
        }
    }
}

impl Drop for KeyedExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for KeyedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedExecutor")
            .field("workers", &self.lanes.len())
            .finish()
    }
}

fn run_barrier(task: &BarrierTask) {
    if task.arrive.wait().is_leader() {
        let job = task
            .job
            .lock()
            .expect("barrier job lock poisoned")
            .take();
        if let Some(job) = job {
            run_guarded(job);
        }
    }
    task.release.wait();
}

fn run_guarded(job: ApplyJob) {
    let entity = job.entity_id().clone();
    let action = job.request.action;
    if panic::catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
        tracing::error!(entity = %entity, action = ?action, "entity apply panicked");
    }
}
