//! 每回合 worker 的请求/响应约定（stdin 一个 JSON，stdout 一个 JSON）

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::actions::{standard_registry, ActionExecutor, ExecutionReport, NoteStore, ToolContext};
use crate::config::{ActionsSection, ObserveSection};
use crate::display::{input_for, screen_from_settings};
use crate::observe::{observe, Frame, ObservationMode, PointerAction};
use crate::storage::RunDir;

pub const EXECUTE_ROLE: &str = "execute";
pub const OBSERVE_ROLE: &str = "observe";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub run_dir: PathBuf,
    pub story: String,
    pub actions: ActionsSection,
    pub mode: ObservationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserveRequest {
    pub run_dir: PathBuf,
    pub mode: ObservationMode,
    pub pointer_actions: Vec<PointerAction>,
    pub settings: ObserveSection,
}

/// 观察失败（截屏、编码）不是回合级错误：帧缺失，回合照常继续
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObserveResponse {
    pub frame: Option<Frame>,
    pub error: Option<String>,
}

pub async fn run_execute(req: ExecuteRequest) -> ExecutionReport {
    let run_dir = RunDir::new(&req.run_dir);
    let physical = req.actions.physical && req.mode.allows_physical();
    let ctx = ToolContext {
        execute: req.actions.execute,
        input: input_for(physical),
        notes: NoteStore::new(run_dir.notes()),
    };
    let report = ActionExecutor::new(standard_registry())
        .run(&req.story, &ctx)
        .await;
    tracing::info!(
        calls = report.recognized(),
        ok = report.successes(),
        errors = report.errors(),
        physical,
        "execution finished"
    );
    report
}

pub async fn run_observe(req: ObserveRequest) -> ObserveResponse {
    let run_dir = RunDir::new(&req.run_dir);
    let screen = screen_from_settings(&req.settings);
    match observe(
        &run_dir,
        screen.as_ref(),
        req.mode,
        &req.pointer_actions,
        &req.settings,
    )
    .await
    {
        Ok(frame) => ObserveResponse {
            frame: Some(frame),
            error: None,
        },
        Err(e) => {
            tracing::error!("observation failed: {}", e);
            ObserveResponse {
                frame: None,
                error: Some(e.to_string()),
            }
        }
    }
}
