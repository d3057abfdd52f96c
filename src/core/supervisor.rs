//! 进程监管
//!
//! - 每回合 worker：新起一个子进程，stdin 写一个 JSON 请求并关闭，stdout 读一个 JSON 响应；
//!   整个交换包在硬超时内，超时即杀进程。输出缺失或无法解析按超时同等处理。
//! - 常驻 worker（overlay）：运行开始时启动一次；每回合开始检查是否退出，退出则重启。
//!   停止时先关闭其 stdin 请求退出，3 秒后仍未退出则强杀。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::core::error::WorkerError;

const STOP_GRACE: Duration = Duration::from_secs(3);

/// 子进程命令行
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// 与当前可执行文件同目录的兄弟程序；找不到时退回 PATH 查找
pub fn sibling_binary(configured: Option<&PathBuf>, name: &str) -> PathBuf {
    if let Some(p) = configured {
        return p.clone();
    }
    let file = format!("{}{}", name, std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join(&file)))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(file))
}

fn relay_stderr(role: &str, stderr: &[u8]) {
    for line in String::from_utf8_lossy(stderr).lines() {
        let line = line.trim_end();
        if !line.is_empty() {
            tracing::info!(worker = role, "{}", line);
        }
    }
}

/// 一次请求/响应交换
pub async fn exchange<Req, Resp>(
    role: &str,
    command: &WorkerCommand,
    request: &Req,
    limit: Duration,
) -> Result<Resp, WorkerError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_vec(request).map_err(|e| WorkerError::Malformed {
        role: role.to_string(),
        detail: format!("request encoding failed: {}", e),
    })?;

    let mut child = command
        .command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| WorkerError::Spawn {
            role: role.to_string(),
            source,
        })?;

    let stdin = child.stdin.take();
    let io = async move {
        if let Some(mut stdin) = stdin {
            // 子进程可能不读 stdin 就退出，管道破裂不算错误，以输出为准
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e);
                }
            }
            let _ = stdin.shutdown().await;
        }
        child.wait_with_output().await
    };

    // 超时时 future 被丢弃，kill_on_drop 负责杀掉子进程
    let output = match tokio::time::timeout(limit, io).await {
        Err(_) => {
            tracing::warn!(worker = role, "worker exceeded {}s, killed", limit.as_secs_f64());
            return Err(WorkerError::Timeout {
                role: role.to_string(),
                after: limit,
            });
        }
        Ok(Err(source)) => {
            return Err(WorkerError::Io {
                role: role.to_string(),
                source,
            })
        }
        Ok(Ok(output)) => output,
    };

    relay_stderr(role, &output.stderr);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let body = stdout.trim();
    if body.is_empty() {
        return Err(WorkerError::Malformed {
            role: role.to_string(),
            detail: format!("no output (exit {:?})", output.status.code()),
        });
    }
    serde_json::from_str(body).map_err(|e| WorkerError::Malformed {
        role: role.to_string(),
        detail: format!("{} (exit {:?})", e, output.status.code()),
    })
}

/// 常驻 worker
pub struct PersistentWorker {
    role: String,
    command: WorkerCommand,
    child: Option<Child>,
    restarts: u32,
}

impl PersistentWorker {
    pub fn new(role: impl Into<String>, command: WorkerCommand) -> Self {
        Self {
            role: role.into(),
            command,
            child: None,
            restarts: 0,
        }
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn spawn(&mut self) -> Result<(), WorkerError> {
        let child = self
            .command
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                role: self.role.clone(),
                source,
            })?;
        tracing::info!(worker = %self.role, pid = ?child.id(), "persistent worker started");
        self.child = Some(child);
        Ok(())
    }

    /// 进程是否仍在运行；已退出时记录退出码
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::warn!(worker = %self.role, "persistent worker exited ({})", status);
                self.child = None;
                false
            }
            Err(e) => {
                tracing::warn!(worker = %self.role, "persistent worker status unknown: {}", e);
                false
            }
        }
    }

    /// 回合开始时调用：已退出则重启，返回是否发生了重启
    pub fn ensure_running(&mut self) -> Result<bool, WorkerError> {
        if self.is_running() {
            return Ok(false);
        }
        self.spawn()?;
        self.restarts += 1;
        tracing::info!(worker = %self.role, restarts = self.restarts, "persistent worker respawned");
        Ok(true)
    }

    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        // 关闭 stdin 即请求退出
        drop(child.stdin.take());
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(worker = %self.role, "persistent worker stopped ({})", status)
            }
            Ok(Err(e)) => tracing::warn!(worker = %self.role, "wait failed: {}", e),
            Err(_) => {
                tracing::warn!(worker = %self.role, "persistent worker ignored stop, killing");
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_exchange_roundtrip_through_cat() {
        let cmd = WorkerCommand::new("cat");
        let resp: Value = exchange("echo", &cmd, &json!({"story": "héllo"}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp["story"], "héllo");
    }

    #[tokio::test]
    async fn test_exchange_timeout_kills_worker() {
        let cmd = WorkerCommand::new("sleep").arg("30");
        let started = std::time::Instant::now();
        let err = exchange::<_, Value>("execute", &cmd, &json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_malformed_output_is_timeout_like() {
        let cmd = WorkerCommand::new("echo").arg("not json");
        let err = exchange::<_, Value>("observe", &cmd, &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Malformed { .. }));
        assert!(err.is_timeout_like());

        let cmd = WorkerCommand::new("true");
        let err = exchange::<_, Value>("observe", &cmd, &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_timeout_like());
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let cmd = WorkerCommand::new("/definitely/not/here");
        let err = exchange::<_, Value>("execute", &cmd, &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_persistent_worker_respawns_after_exit() {
        let mut worker = PersistentWorker::new("overlay", WorkerCommand::new("true"));
        worker.spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!worker.is_running());
        assert!(worker.ensure_running().unwrap());
        assert_eq!(worker.restarts(), 1);
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_stdin() {
        // cat 在 stdin 关闭后自行退出
        let mut worker = PersistentWorker::new("overlay", WorkerCommand::new("cat"));
        worker.spawn().unwrap();
        assert!(worker.is_running());
        assert!(!worker.ensure_running().unwrap());
        let started = std::time::Instant::now();
        worker.stop().await;
        assert!(started.elapsed() < STOP_GRACE);
        assert!(!worker.is_running());
    }
}
