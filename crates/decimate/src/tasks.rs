//! Simplification tasks dispatched over a [`WorkerPool`].

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use meshstream_common::{Aabb, FileId, GeometryRecord, MeshId, MeshTransform};
use rustc_hash::FxHashMap;

use crate::pool::{Completion, PoolError, TaskId, WorkerPool};
use crate::simplify::{SimplifiedMesh, SimplifyOutcome, simplify};

/// One mesh handed to a worker. The worker owns the buffers outright.
#[derive(Debug, Clone)]
pub struct SimplifyTask {
    pub mesh: GeometryRecord,
    /// Key the result is stored under.
    pub mesh_id: String,
    pub original_mesh_id: MeshId,
}

impl SimplifyTask {
    pub fn new(mesh: GeometryRecord) -> Self {
        Self {
            mesh_id: mesh.id.simplified_key(),
            original_mesh_id: mesh.id.clone(),
            mesh,
        }
    }
}

/// What a worker reports back for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Success {
        mesh_id: String,
        original_mesh_id: MeshId,
        data: SimplifiedMesh,
    },
    Error {
        mesh_id: String,
        original_mesh_id: MeshId,
        error: String,
    },
}

impl WorkerMessage {
    pub fn mesh_id(&self) -> &str {
        match self {
            Self::Success { mesh_id, .. } | Self::Error { mesh_id, .. } => mesh_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Everything needed to write an error record once the task itself is gone.
#[derive(Debug, Clone)]
struct TaskHeader {
    mesh_id: String,
    original_mesh_id: MeshId,
    file_id: FileId,
    name: String,
    transform: MeshTransform,
    bounds: Aabb,
    screen_coverage: f32,
}

impl TaskHeader {
    fn of(task: &SimplifyTask) -> Self {
        Self {
            mesh_id: task.mesh_id.clone(),
            original_mesh_id: task.original_mesh_id.clone(),
            file_id: task.mesh.metadata.file_id.clone(),
            name: task.mesh.name.clone(),
            transform: task.mesh.transform,
            bounds: task.mesh.bounds,
            screen_coverage: task.mesh.metadata.screen_coverage,
        }
    }

    fn failed(self, error_message: String) -> SimplifiedMesh {
        SimplifiedMesh {
            mesh_id: self.mesh_id,
            original_mesh_id: self.original_mesh_id,
            file_id: self.file_id,
            name: self.name,
            transform: self.transform,
            bounds: self.bounds,
            screen_coverage: self.screen_coverage,
            outcome: SimplifyOutcome::Failed { error_message },
        }
    }
}

fn run_task(task: SimplifyTask, angle_threshold_degrees: f32) -> WorkerMessage {
    let data = simplify(&task.mesh, angle_threshold_degrees);
    match data.error_message() {
        Some(error) => WorkerMessage::Error {
            mesh_id: task.mesh_id,
            original_mesh_id: task.original_mesh_id,
            error: error.to_string(),
        },
        None => WorkerMessage::Success {
            mesh_id: task.mesh_id,
            original_mesh_id: task.original_mesh_id,
            data,
        },
    }
}

/// Mesh simplification pool.
///
/// Every submitted record yields exactly one [`SimplifiedMesh`] from
/// [`drain`](Self::drain): the simplified geometry, or an error-tagged record
/// when simplification failed or the worker panicked.
pub struct DecimationPool {
    pool: WorkerPool<SimplifyTask, WorkerMessage>,
    headers: Mutex<FxHashMap<TaskId, TaskHeader>>,
}

impl DecimationPool {
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        angle_threshold_degrees: f32,
    ) -> Result<Self, PoolError> {
        let pool = WorkerPool::new("decimate", worker_count, queue_capacity, move |task| {
            run_task(task, angle_threshold_degrees)
        })?;
        tracing::info!(
            workers = pool.worker_count(),
            angle_threshold_degrees,
            "decimation pool ready"
        );
        Ok(Self {
            pool,
            headers: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Queue one record, blocking while the pending queue is full.
    pub fn submit(&self, record: GeometryRecord) -> Result<TaskId, PoolError> {
        let task = SimplifyTask::new(record);
        let header = TaskHeader::of(&task);
        // Hold the lock across submit so a fast completion cannot miss its header.
        let mut headers = self.headers.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.pool.submit(task).map_err(|r| r.reason)?;
        headers.insert(id, header);
        tracing::trace!(task = id, mesh = %headers[&id].original_mesh_id, "queued simplification");
        Ok(id)
    }

    fn resolve(&self, completion: Completion<WorkerMessage>) -> Option<SimplifiedMesh> {
        let header = self
            .headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&completion.task_id);
        let Some(header) = header else {
            tracing::warn!(task = completion.task_id, "completion for unknown task");
            return None;
        };
        match completion.result {
            Ok(WorkerMessage::Success { data, .. }) => Some(data),
            Ok(WorkerMessage::Error { error, .. }) => Some(header.failed(error)),
            Err(panic) => {
                tracing::error!(mesh = %header.original_mesh_id, panic = %panic.0, "worker panicked");
                Some(header.failed(format!("worker panicked: {}", panic.0)))
            }
        }
    }

    /// Every result delivered so far, without blocking.
    pub fn drain(&self) -> Vec<SimplifiedMesh> {
        self.pool
            .drain()
            .into_iter()
            .filter_map(|c| self.resolve(c))
            .collect()
    }

    /// Wait up to `timeout` for the next result.
    pub fn next_timeout(&self, timeout: Duration) -> Option<SimplifiedMesh> {
        let completion = self.pool.recv_timeout(timeout)?;
        self.resolve(completion)
    }

    /// Block until every submitted record has completed and return all results.
    pub fn run_to_completion(&self) -> Vec<SimplifiedMesh> {
        self.pool.wait_idle();
        self.drain()
    }

    /// Abort outstanding work. Pending results are discarded.
    pub fn terminate(&mut self) {
        let dropped = {
            let mut headers = self.headers.lock().unwrap_or_else(PoisonError::into_inner);
            let n = headers.len();
            headers.clear();
            n
        };
        self.pool.terminate();
        tracing::info!(dropped, "decimation pool terminated");
    }
}
