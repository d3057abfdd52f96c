//! 编排器看到的 worker 接口，以及基于子进程的默认实现

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::actions::ExecutionReport;
use crate::core::error::WorkerError;
use crate::core::supervisor::{exchange, PersistentWorker, WorkerCommand};
use crate::worker::{ExecuteRequest, ObserveRequest, ObserveResponse, EXECUTE_ROLE, OBSERVE_ROLE};

#[async_trait]
pub trait TurnWorkers: Send + Sync {
    async fn execute(&self, req: &ExecuteRequest, limit: Duration) -> Result<ExecutionReport, WorkerError>;

    async fn observe(&self, req: &ObserveRequest, limit: Duration) -> Result<ObserveResponse, WorkerError>;

    /// 回合开始时调用：需要 overlay 时保证它在运行（必要时重启），不需要时停掉
    async fn ensure_overlay(&self, needed: bool);

    async fn shutdown(&self) {}
}

/// 每回合起 `scribe-worker execute|observe`，overlay 为常驻 `scribe-overlay <run_dir>`
pub struct ProcessWorkers {
    worker_bin: PathBuf,
    overlay: Mutex<PersistentWorker>,
    overlay_active: Mutex<bool>,
}

impl ProcessWorkers {
    pub fn new(worker_bin: PathBuf, overlay_bin: PathBuf, run_dir: &std::path::Path) -> Self {
        let overlay_cmd = WorkerCommand::new(overlay_bin).arg(run_dir.display().to_string());
        Self {
            worker_bin,
            overlay: Mutex::new(PersistentWorker::new("overlay", overlay_cmd)),
            overlay_active: Mutex::new(false),
        }
    }
}

#[async_trait]
impl TurnWorkers for ProcessWorkers {
    async fn execute(&self, req: &ExecuteRequest, limit: Duration) -> Result<ExecutionReport, WorkerError> {
        let cmd = WorkerCommand::new(&self.worker_bin).arg(EXECUTE_ROLE);
        exchange(EXECUTE_ROLE, &cmd, req, limit).await
    }

    async fn observe(&self, req: &ObserveRequest, limit: Duration) -> Result<ObserveResponse, WorkerError> {
        let cmd = WorkerCommand::new(&self.worker_bin).arg(OBSERVE_ROLE);
        exchange(OBSERVE_ROLE, &cmd, req, limit).await
    }

    async fn ensure_overlay(&self, needed: bool) {
        let mut active = self.overlay_active.lock().await;
        let mut overlay = self.overlay.lock().await;
        if !needed {
            if *active {
                overlay.stop().await;
                *active = false;
            }
            return;
        }
        let res = if *active {
            overlay.ensure_running().map(|_| ())
        } else {
            overlay.spawn()
        };
        match res {
            Ok(()) => *active = true,
            // overlay 缺失只影响标记显示，不影响回合
            Err(e) => tracing::error!("overlay unavailable: {}", e),
        }
    }

    async fn shutdown(&self) {
        self.overlay.lock().await.stop().await;
        *self.overlay_active.lock().await = false;
    }
}
