//! 跨进程「通知 + 有界等待」
//!
//! 通知方把序号写入 overlay.signal；overlay 进程重绘后把处理过的序号写入 overlay.ack。
//! 等待只是尽力而为：超时后调用方照常继续，帧可能落后一个标记。

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::storage::{atomic_write, RunDir};

const ACK_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Acknowledged,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct OverlaySignal {
    signal: PathBuf,
    ack: PathBuf,
}

fn read_seq(path: &Path) -> u64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

impl OverlaySignal {
    pub fn new(run_dir: &RunDir) -> Self {
        Self {
            signal: run_dir.overlay_signal(),
            ack: run_dir.overlay_ack(),
        }
    }

    /// 最近一次发出的序号
    pub fn current(&self) -> u64 {
        read_seq(&self.signal)
    }

    /// 最近一次确认的序号
    pub fn acknowledged(&self) -> u64 {
        read_seq(&self.ack)
    }

    /// 发出通知，返回新序号
    pub fn raise(&self) -> std::io::Result<u64> {
        let seq = self.current() + 1;
        atomic_write(&self.signal, seq.to_string().as_bytes())?;
        Ok(seq)
    }

    pub fn acknowledge(&self, seq: u64) -> std::io::Result<()> {
        atomic_write(&self.ack, seq.to_string().as_bytes())
    }

    /// 等待 seq 被确认，最多 limit；无论结果都返回，不报错
    pub async fn wait(&self, seq: u64, limit: Duration) -> WaitOutcome {
        let deadline = Instant::now() + limit;
        loop {
            if self.acknowledged() >= seq {
                return WaitOutcome::Acknowledged;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(ACK_POLL.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_wait_times_out_without_overlay() {
        let dir = TempDir::new().unwrap();
        let sig = OverlaySignal::new(&RunDir::new(dir.path()));
        let seq = sig.raise().unwrap();
        assert_eq!(seq, 1);
        let started = std::time::Instant::now();
        assert_eq!(sig.wait(seq, Duration::from_millis(50)).await, WaitOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_ack_ends_wait_early() {
        let dir = TempDir::new().unwrap();
        let sig = OverlaySignal::new(&RunDir::new(dir.path()));
        let seq = sig.raise().unwrap();
        let other = sig.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other.acknowledge(other.current()).unwrap();
        });
        assert_eq!(sig.wait(seq, Duration::from_secs(5)).await, WaitOutcome::Acknowledged);
        assert_eq!(sig.raise().unwrap(), 2);
    }
}
