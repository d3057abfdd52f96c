//! 运行状态：单一所有者 actor
//!
//! RunState 只由 StateStore 任务持有，主循环与控制面都通过消息（get / set_paused / record_turn）访问。
//! 暂停标志就是运行目录中的 PAUSED 文件，外部删除该文件即恢复。

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::core::error::TurnError;
use crate::storage::{atomic_write, atomic_write_json, read_json_or_default, RunDir};

/// state.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub story: String,
    pub prev_story: String,
    pub fail_streak: u32,
    pub turn: u64,
    pub last_calls: Vec<String>,
    pub last_successes: usize,
    pub last_errors: usize,
    pub updated_at: Option<String>,
}

/// 读取结果：状态 + 当前暂停标志
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub state: RunState,
    pub paused: bool,
    pub pause_reason: Option<String>,
}

/// 一个回合结束时写入的内容
#[derive(Debug, Clone, Default)]
pub struct TurnRecord {
    /// None 表示本回合没有拿到后端输出，叙事保持不变
    pub story: Option<String>,
    pub fail_streak: u32,
    pub calls: Vec<String>,
    pub successes: usize,
    pub errors: usize,
}

enum StateMsg {
    Get {
        reply: oneshot::Sender<RunSnapshot>,
    },
    SetPaused {
        paused: bool,
        reason: String,
        reply: oneshot::Sender<std::io::Result<()>>,
    },
    ClearFailStreak {
        reply: oneshot::Sender<std::io::Result<()>>,
    },
    RecordTurn {
        record: TurnRecord,
        reply: oneshot::Sender<std::io::Result<RunState>>,
    },
}

struct StateStore {
    run_dir: RunDir,
    state: RunState,
}

impl StateStore {
    fn pause_info(&self) -> (bool, Option<String>) {
        match std::fs::read_to_string(self.run_dir.pause()) {
            Ok(content) => (true, Some(content.trim().to_string())),
            Err(_) => (false, None),
        }
    }

    fn persist(&mut self) -> std::io::Result<()> {
        self.state.updated_at = Some(chrono::Local::now().to_rfc3339());
        atomic_write_json(&self.run_dir.state(), &self.state)
    }

    fn set_paused(&self, paused: bool, reason: &str) -> std::io::Result<()> {
        let path = self.run_dir.pause();
        if paused {
            let body = format!("{}\n{}\n", chrono::Local::now().to_rfc3339(), reason);
            atomic_write(&path, body.as_bytes())
        } else {
            match std::fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        }
    }

    fn handle(&mut self, msg: StateMsg) {
        match msg {
            StateMsg::Get { reply } => {
                let (paused, pause_reason) = self.pause_info();
                let _ = reply.send(RunSnapshot {
                    state: self.state.clone(),
                    paused,
                    pause_reason,
                });
            }
            StateMsg::SetPaused {
                paused,
                reason,
                reply,
            } => {
                let res = self.set_paused(paused, &reason);
                match &res {
                    Ok(()) if paused => tracing::warn!("run paused: {}", reason),
                    Ok(()) => tracing::info!("run resumed: {}", reason),
                    Err(e) => tracing::error!("pause flag update failed: {}", e),
                }
                let _ = reply.send(res);
            }
            StateMsg::ClearFailStreak { reply } => {
                self.state.fail_streak = 0;
                let _ = reply.send(self.persist());
            }
            StateMsg::RecordTurn { record, reply } => {
                self.state.turn += 1;
                if let Some(story) = record.story {
                    self.state.prev_story = std::mem::replace(&mut self.state.story, story);
                }
                self.state.fail_streak = record.fail_streak;
                self.state.last_calls = record.calls;
                self.state.last_successes = record.successes;
                self.state.last_errors = record.errors;
                let res = self.persist().map(|_| self.state.clone());
                let _ = reply.send(res);
            }
        }
    }
}

/// 状态 actor 的句柄，可随意克隆
#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::Sender<StateMsg>,
}

fn stopped() -> TurnError {
    TurnError::State("state actor stopped".to_string())
}

impl StateHandle {
    /// 从运行目录加载 state.json 并启动 actor
    pub fn spawn(run_dir: RunDir) -> Self {
        let state: RunState = read_json_or_default(&run_dir.state());
        tracing::info!(
            turn = state.turn,
            fail_streak = state.fail_streak,
            story_len = state.story.len(),
            "run state loaded"
        );
        let (tx, mut rx) = mpsc::channel(32);
        let mut store = StateStore { run_dir, state };
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                store.handle(msg);
            }
        });
        Self { tx }
    }

    async fn ask<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StateMsg,
    ) -> Result<T, TurnError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn get(&self) -> Result<RunSnapshot, TurnError> {
        self.ask(|reply| StateMsg::Get { reply }).await
    }

    pub async fn set_paused(&self, paused: bool, reason: impl Into<String>) -> Result<(), TurnError> {
        let reason = reason.into();
        self.ask(|reply| StateMsg::SetPaused {
            paused,
            reason,
            reply,
        })
        .await?
        .map_err(|e| TurnError::State(e.to_string()))
    }

    pub async fn clear_fail_streak(&self) -> Result<(), TurnError> {
        self.ask(|reply| StateMsg::ClearFailStreak { reply })
            .await?
            .map_err(|e| TurnError::State(e.to_string()))
    }

    pub async fn record_turn(&self, record: TurnRecord) -> Result<RunState, TurnError> {
        self.ask(|reply| StateMsg::RecordTurn { record, reply })
            .await?
            .map_err(|e| TurnError::State(e.to_string()))
    }
}
