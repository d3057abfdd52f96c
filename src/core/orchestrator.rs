//! 回合编排器：主控循环
//!
//! 每个回合依次经过：检查暂停 → 读取状态 → 抽取并执行动作 → 观察 → 组装请求 → 调用后端 → 应用输出 → 持久化 → 节拍等待。
//! 执行与观察都在子进程里完成（见 `TurnWorkers`），后端调用经过代理层（见 `Backend`）。
//! 状态只通过 `StateHandle` 访问；配置在每个回合边界重新加载，本回合内按值使用同一份快照。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::actions::ExecutionReport;
use crate::config::{reload_or, AppConfig};
use crate::core::error::TurnError;
use crate::core::state::{StateHandle, TurnRecord};
use crate::core::workers::TurnWorkers;
use crate::llm::{build_request, system_prompt, Backend};
use crate::observe::{Frame, ObservationMode};
use crate::proxy::{EventHub, TurnEvent};
use crate::storage::RunDir;
use crate::worker::{ExecuteRequest, ObserveRequest};

/// 一个回合的结果摘要
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnSummary {
    pub turn: u64,
    pub calls: usize,
    pub successes: usize,
    pub errors: usize,
    pub fail_streak: u32,
    pub has_frame: bool,
    /// 执行子进程失败（超时、崩溃、输出不可解析）
    pub execute_error: Option<String>,
    pub backend_error: Option<String>,
    /// 本回合是否用后端输出替换了叙事
    pub story_replaced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// 暂停中，本回合什么也没做
    Paused,
    /// 失败计数达到阈值：已写入状态并进入暂停，没有调用后端
    AutoPaused(TurnSummary),
    Completed(TurnSummary),
}

/// 只有错误、没有成功的回合才累加；有任何成功即清零；没有可识别调用时保持不变
pub fn next_fail_streak(previous: u32, successes: usize, errors: usize) -> u32 {
    if successes > 0 {
        0
    } else if errors > 0 {
        previous.saturating_add(1)
    } else {
        previous
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " | ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

pub struct Orchestrator {
    state: StateHandle,
    run_dir: RunDir,
    workers: Arc<dyn TurnWorkers>,
    backend: Arc<dyn Backend>,
    events: EventHub,
    config: AppConfig,
    config_path: Option<PathBuf>,
    reload_config: bool,
    was_paused: bool,
}

impl Orchestrator {
    pub fn new(
        state: StateHandle,
        run_dir: RunDir,
        workers: Arc<dyn TurnWorkers>,
        backend: Arc<dyn Backend>,
        events: EventHub,
        config: AppConfig,
    ) -> Self {
        Self {
            state,
            run_dir,
            workers,
            backend,
            events,
            config,
            config_path: None,
            reload_config: false,
            was_paused: false,
        }
    }

    /// 每个回合边界从该路径（以及默认配置与环境变量）重新加载配置
    pub fn with_config_reload(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self.reload_config = true;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 执行一个完整回合
    pub async fn step(&mut self) -> Result<StepOutcome, TurnError> {
        // CHECK_PAUSE
        let snapshot = self.state.get().await?;
        if snapshot.paused {
            self.was_paused = true;
            return Ok(StepOutcome::Paused);
        }
        if self.was_paused {
            self.was_paused = false;
            self.state.clear_fail_streak().await?;
            let reason = "pause flag cleared".to_string();
            tracing::info!("Resuming: {}", reason);
            self.events.publish(TurnEvent::Resumed { reason });
        }

        if self.reload_config {
            self.config = reload_or(&self.config, self.config_path.clone());
        }
        let cfg = self.config.clone();
        let mode = ObservationMode::resolve(&cfg.actions, &cfg.observe);
        self.workers.ensure_overlay(mode.needs_overlay()).await;

        // LOAD_STATE
        let run = self.state.get().await?.state;
        let turn = run.turn + 1;
        let story = run.story;
        tracing::info!(turn, mode = mode.as_str(), story_len = story.len(), "turn started");

        // EXTRACT_EXECUTE
        let exec_req = ExecuteRequest {
            run_dir: self.run_dir.path().to_path_buf(),
            story: story.clone(),
            actions: cfg.actions,
            mode,
        };
        let exec_limit = Duration::from_secs(cfg.supervisor.execute_timeout_secs);
        let (report, execute_error) = match self.workers.execute(&exec_req, exec_limit).await {
            Ok(report) => (report, None),
            Err(e) => {
                let timed_out = e.is_timeout_like();
                let message = TurnError::Execute(e).to_string();
                tracing::error!(turn, timed_out, "{}", message);
                let report = ExecutionReport {
                    feedback: message.clone(),
                    ..ExecutionReport::default()
                };
                (report, Some(message))
            }
        };

        let successes = report.successes();
        let errors = report.errors() + usize::from(execute_error.is_some());
        let fail_streak = next_fail_streak(run.fail_streak, successes, errors);
        let calls: Vec<String> = report.results.iter().map(|r| r.call.source.clone()).collect();
        let mut summary = TurnSummary {
            turn,
            calls: calls.len(),
            successes,
            errors,
            fail_streak,
            execute_error,
            ..TurnSummary::default()
        };

        if fail_streak >= cfg.policy.max_fail_streak {
            let reason = format!(
                "fail streak reached {} (last feedback: {})",
                fail_streak,
                excerpt(&report.feedback, 200)
            );
            tracing::warn!(turn, fail_streak, "Auto-pausing: {}", reason);
            self.state
                .record_turn(TurnRecord {
                    story: None,
                    fail_streak,
                    calls,
                    successes,
                    errors,
                })
                .await?;
            self.state.set_paused(true, reason.clone()).await?;
            self.was_paused = true;
            self.events.publish(TurnEvent::Paused { reason });
            return Ok(StepOutcome::AutoPaused(summary));
        }

        // OBSERVE
        let mut feedback = report.feedback.clone();
        let obs_req = ObserveRequest {
            run_dir: self.run_dir.path().to_path_buf(),
            mode,
            pointer_actions: report.pointer_actions.clone(),
            settings: cfg.observe.clone(),
        };
        let obs_limit = Duration::from_secs(cfg.supervisor.observe_timeout_secs);
        let frame: Option<Frame> = match self.workers.observe(&obs_req, obs_limit).await {
            Ok(resp) => {
                if let Some(err) = &resp.error {
                    tracing::warn!(turn, "no frame this turn: {}", err);
                }
                resp.frame
            }
            Err(e) => {
                let message = TurnError::Observe(e).to_string();
                tracing::error!(turn, "{}", message);
                feedback.push_str(&format!("\n(no screenshot this turn: {})", message));
                None
            }
        };
        summary.has_frame = frame.is_some();

        // BUILD_REQUEST / CALL_BACKEND
        let prompt = system_prompt(&cfg.model);
        let body = build_request(&cfg.model, &prompt, &story, &feedback, frame.as_ref());
        let next_story = match self.backend.complete(body).await {
            Ok(completion) => Some(completion.summary.text),
            Err(e) => {
                let message = TurnError::Backend(e).to_string();
                tracing::error!(turn, "{}; story kept", message);
                summary.backend_error = Some(message);
                None
            }
        };
        summary.story_replaced = next_story.is_some();

        // APPLY_RESPONSE / PERSIST
        self.state
            .record_turn(TurnRecord {
                story: next_story,
                fail_streak,
                calls,
                successes,
                errors,
            })
            .await?;
        self.events.publish(TurnEvent::TurnCompleted {
            turn,
            calls: summary.calls,
            successes,
            errors,
            fail_streak,
        });
        tracing::info!(
            turn,
            calls = summary.calls,
            ok = successes,
            errors,
            fail_streak,
            frame = summary.has_frame,
            "turn finished"
        );
        Ok(StepOutcome::Completed(summary))
    }

    /// 主循环：直到 cancel 触发。暂停时按 pause_poll_ms 轮询，回合之间等待 loop_delay
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!(run_dir = %self.run_dir.path().display(), "Main loop started");
        let mut announced_pause = false;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.step() => outcome,
            };
            let wait = match outcome {
                Ok(StepOutcome::Paused) => {
                    if !announced_pause {
                        tracing::info!("Paused, waiting for the pause flag to clear");
                        announced_pause = true;
                    }
                    Duration::from_millis(self.config.pacing.pause_poll_ms)
                }
                Ok(StepOutcome::AutoPaused(_)) => {
                    announced_pause = true;
                    Duration::from_millis(self.config.pacing.pause_poll_ms)
                }
                Ok(StepOutcome::Completed(_)) => {
                    announced_pause = false;
                    self.config.pacing.loop_delay()
                }
                Err(e) => {
                    tracing::error!("Turn aborted: {}", e);
                    self.config.pacing.loop_delay()
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        self.workers.shutdown().await;
        tracing::info!("Main loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ExecutionResult, Outcome};
    use crate::actions::grammar::ActionCall;
    use crate::core::error::{BackendError, WorkerError};
    use crate::llm::{Completion, RequestSummary, ResponseSummary};
    use crate::worker::ObserveResponse;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockWorkers {
        reports: Mutex<VecDeque<Result<ExecutionReport, WorkerError>>>,
        executed: Mutex<Vec<String>>,
        overlay_calls: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl TurnWorkers for MockWorkers {
        async fn execute(&self, req: &ExecuteRequest, _limit: Duration) -> Result<ExecutionReport, WorkerError> {
            self.executed.lock().unwrap().push(req.story.clone());
            self.reports
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ExecutionReport::default()))
        }

        async fn observe(&self, _req: &ObserveRequest, _limit: Duration) -> Result<ObserveResponse, WorkerError> {
            Ok(ObserveResponse {
                frame: Some(Frame::from_png(b"png", 4, 4)),
                error: None,
            })
        }

        async fn ensure_overlay(&self, needed: bool) {
            self.overlay_calls.lock().unwrap().push(needed);
        }
    }

    struct MockBackend {
        replies: Mutex<VecDeque<Result<String, BackendError>>>,
        seen: Mutex<Vec<Value>>,
    }

    impl MockBackend {
        fn new(replies: Vec<Result<String, BackendError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn complete(&self, request: Value) -> Result<Completion, BackendError> {
            self.seen.lock().unwrap().push(request);
            let text = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("again".to_string()))?;
            Ok(Completion {
                summary: ResponseSummary {
                    text,
                    ..ResponseSummary::default()
                },
                raw: Value::Null,
            })
        }
    }

    fn report(ok: usize, err: usize) -> ExecutionReport {
        let call = |source: &str| ActionCall {
            name: "click".into(),
            args: vec![],
            source: source.into(),
        };
        let mut results = Vec::new();
        for _ in 0..ok {
            results.push(ExecutionResult {
                call: call("click(1, 1)"),
                outcome: Outcome::Ok { value: "OK".into() },
            });
        }
        for _ in 0..err {
            results.push(ExecutionResult {
                call: call("click(5000, 1)"),
                outcome: Outcome::Error {
                    message: "RangeError".into(),
                    hint: None,
                },
            });
        }
        ExecutionReport {
            results,
            pointer_actions: vec![],
            feedback: "feedback".into(),
        }
    }

    fn orchestrator(
        dir: &TempDir,
        workers: Arc<MockWorkers>,
        backend: Arc<MockBackend>,
    ) -> (Orchestrator, StateHandle, EventHub) {
        let run_dir = RunDir::new(dir.path());
        let state = StateHandle::spawn(run_dir.clone());
        let events = EventHub::new(64);
        let orch = Orchestrator::new(
            state.clone(),
            run_dir,
            workers,
            backend,
            events.clone(),
            AppConfig::default(),
        );
        (orch, state, events)
    }

    #[test]
    fn test_fail_streak_rules() {
        assert_eq!(next_fail_streak(3, 1, 5), 0);
        assert_eq!(next_fail_streak(3, 0, 1), 4);
        assert_eq!(next_fail_streak(3, 0, 0), 3);
    }

    #[tokio::test]
    async fn test_story_flows_verbatim_between_turns() {
        let dir = TempDir::new().unwrap();
        let workers = Arc::new(MockWorkers::default());
        let backend = Arc::new(MockBackend::new(vec![Ok("first\nclick(1,1)".into()), Ok(String::new())]));
        let (mut orch, state, _) = orchestrator(&dir, workers.clone(), backend.clone());

        let out = orch.step().await.unwrap();
        assert!(matches!(out, StepOutcome::Completed(ref s) if s.turn == 1 && s.has_frame));
        orch.step().await.unwrap();

        let executed = workers.executed.lock().unwrap().clone();
        assert_eq!(executed, vec!["".to_string(), "first\nclick(1,1)".to_string()]);
        let seen = backend.seen.lock().unwrap();
        let second = RequestSummary::parse(&seen[1]);
        assert_eq!(second.previous_output, "first\nclick(1,1)");
        assert!(second.image_data_url.is_some());

        // 空输出也原样成为下一回合的叙事
        let snap = state.get().await.unwrap();
        assert_eq!(snap.state.story, "");
        assert_eq!(snap.state.turn, 2);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_story() {
        let dir = TempDir::new().unwrap();
        let workers = Arc::new(MockWorkers::default());
        let backend = Arc::new(MockBackend::new(vec![
            Ok("kept".into()),
            Err(BackendError::Exhausted {
                attempts: 5,
                last: "down".into(),
            }),
        ]));
        let (mut orch, state, _) = orchestrator(&dir, workers, backend);
        orch.step().await.unwrap();
        let out = orch.step().await.unwrap();
        let StepOutcome::Completed(summary) = out else {
            panic!("expected completed turn");
        };
        assert!(summary.backend_error.is_some());
        assert!(!summary.story_replaced);
        assert_eq!(state.get().await.unwrap().state.story, "kept");
    }

    #[tokio::test]
    async fn test_worker_timeout_counts_as_error() {
        let dir = TempDir::new().unwrap();
        let workers = Arc::new(MockWorkers::default());
        workers.reports.lock().unwrap().push_back(Err(WorkerError::Timeout {
            role: "execute".into(),
            after: Duration::from_secs(120),
        }));
        let backend = Arc::new(MockBackend::new(vec![]));
        let (mut orch, state, _) = orchestrator(&dir, workers, backend.clone());

        let StepOutcome::Completed(summary) = orch.step().await.unwrap() else {
            panic!("expected completed turn");
        };
        assert_eq!(summary.fail_streak, 1);
        assert!(summary.execute_error.is_some());
        let sent = RequestSummary::parse(&backend.seen.lock().unwrap()[0]);
        assert!(sent.feedback.contains("execution step failed"));
        assert_eq!(state.get().await.unwrap().state.fail_streak, 1);
    }

    #[tokio::test]
    async fn test_auto_pause_and_resume_clears_streak() {
        let dir = TempDir::new().unwrap();
        let workers = Arc::new(MockWorkers::default());
        for _ in 0..8 {
            workers.reports.lock().unwrap().push_back(Ok(report(0, 1)));
        }
        let backend = Arc::new(MockBackend::new(vec![]));
        let (mut orch, state, events) = orchestrator(&dir, workers.clone(), backend.clone());
        let mut rx = events.subscribe();

        for turn in 1..=7 {
            let out = orch.step().await.unwrap();
            assert!(matches!(out, StepOutcome::Completed(ref s) if s.fail_streak == turn));
        }
        let out = orch.step().await.unwrap();
        assert!(matches!(out, StepOutcome::AutoPaused(ref s) if s.fail_streak == 8));
        // 第 8 回合不调用后端
        assert_eq!(backend.seen.lock().unwrap().len(), 7);

        let snap = state.get().await.unwrap();
        assert!(snap.paused);
        assert!(snap.pause_reason.unwrap().contains("fail streak reached 8"));
        assert_eq!(snap.state.turn, 8);

        // 暂停期间不执行任何动作
        assert_eq!(orch.step().await.unwrap(), StepOutcome::Paused);
        assert_eq!(workers.executed.lock().unwrap().len(), 8);

        std::fs::remove_file(dir.path().join("PAUSED")).unwrap();
        workers.reports.lock().unwrap().push_back(Ok(report(1, 0)));
        let StepOutcome::Completed(summary) = orch.step().await.unwrap() else {
            panic!("expected completed turn");
        };
        assert_eq!(summary.fail_streak, 0);

        let mut saw_paused = false;
        let mut saw_resumed = false;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                TurnEvent::Paused { .. } => saw_paused = true,
                TurnEvent::Resumed { .. } => saw_resumed = true,
                _ => {}
            }
        }
        assert!(saw_paused && saw_resumed);
    }

    #[tokio::test]
    async fn test_no_calls_keeps_streak() {
        let dir = TempDir::new().unwrap();
        let workers = Arc::new(MockWorkers::default());
        workers.reports.lock().unwrap().push_back(Ok(report(0, 1)));
        let backend = Arc::new(MockBackend::new(vec![]));
        let (mut orch, _, _) = orchestrator(&dir, workers.clone(), backend);
        orch.step().await.unwrap();
        let StepOutcome::Completed(summary) = orch.step().await.unwrap() else {
            panic!("expected completed turn");
        };
        assert_eq!(summary.calls, 0);
        assert_eq!(summary.fail_streak, 1);
        // 默认配置是虚拟画布模式，不需要 overlay
        assert!(workers.overlay_calls.lock().unwrap().iter().all(|n| !n));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let workers = Arc::new(MockWorkers::default());
        let backend = Arc::new(MockBackend::new(vec![]));
        let (mut orch, state, _) = orchestrator(&dir, workers, backend);
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            orch.run(c).await;
        });
        tokio::time::sleep(Duration::from_millis(4500)).await;
        cancel.cancel();
        handle.await.unwrap();
        // 回合间隔 2 秒：0s、2s、4s 各一回合
        assert_eq!(state.get().await.unwrap().state.turn, 3);
    }
}
