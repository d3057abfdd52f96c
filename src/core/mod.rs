//! 核心编排层：错误类型、运行状态 actor、子进程监管、回合编排、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod state;
pub mod supervisor;
pub mod workers;

pub use error::{ActionError, BackendError, ObserveError, TurnError, WorkerError};
pub use orchestrator::{Orchestrator, StepOutcome, TurnSummary};
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason, WorkersCleanup};
pub use state::{RunSnapshot, RunState, StateHandle, TurnRecord};
pub use workers::{ProcessWorkers, TurnWorkers};
