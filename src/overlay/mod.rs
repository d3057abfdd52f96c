//! 常驻 overlay 进程
//!
//! 启动（含被重启）时立即按现有 marks.json / cursor_state.json 重绘一次，不丢标记；
//! 之后在收到通知时重绘，并在标记文件的修改时间变化时兜底重绘。

pub mod render;
pub mod signal;

use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::observe::marks::{CursorState, MarkStore};
use crate::storage::RunDir;

pub use signal::{OverlaySignal, WaitOutcome};

const SIGNAL_POLL: Duration = Duration::from_millis(25);
const FALLBACK_POLL: Duration = Duration::from_secs(2);

fn mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub struct OverlayWorker {
    run_dir: RunDir,
    width: u32,
    height: u32,
    signal: OverlaySignal,
}

impl OverlayWorker {
    pub fn new(run_dir: RunDir, width: u32, height: u32) -> Self {
        let signal = OverlaySignal::new(&run_dir);
        Self {
            run_dir,
            width,
            height,
            signal,
        }
    }

    fn stamp(&self) -> (Option<SystemTime>, Option<SystemTime>) {
        (mtime(&self.run_dir.marks()), mtime(&self.run_dir.cursor()))
    }

    /// 重绘图层并写盘
    pub fn redraw(&self) -> std::io::Result<usize> {
        let marks = MarkStore::new(self.run_dir.marks()).load();
        let cursor = CursorState::load(&self.run_dir.cursor());
        let layer = render::render_layer(&marks, &cursor, self.width, self.height);
        render::write_layer(&self.run_dir.overlay_layer(), &layer)?;
        Ok(marks.len())
    }

    fn redraw_and_ack(&self, seq: u64) {
        match self.redraw() {
            Ok(n) => tracing::debug!(seq, marks = n, "overlay redrawn"),
            Err(e) => tracing::warn!("overlay redraw failed: {}", e),
        }
        if let Err(e) = self.signal.acknowledge(seq) {
            tracing::warn!("overlay ack failed: {}", e);
        }
    }

    /// 主循环，直到 cancel
    pub async fn run(&self, cancel: CancellationToken) {
        let mut seen = self.signal.current();
        self.redraw_and_ack(seen);
        let mut stamp = self.stamp();
        let mut last_fallback = tokio::time::Instant::now();
        tracing::info!(
            run_dir = %self.run_dir.path().display(),
            "Overlay worker started ({}x{})",
            self.width,
            self.height
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Overlay worker stopping");
                    return;
                }
                _ = tokio::time::sleep(SIGNAL_POLL) => {}
            }

            let current = self.signal.current();
            if current != seen {
                seen = current;
                self.redraw_and_ack(seen);
                stamp = self.stamp();
                continue;
            }

            if last_fallback.elapsed() >= FALLBACK_POLL {
                last_fallback = tokio::time::Instant::now();
                let now = self.stamp();
                if now != stamp {
                    tracing::debug!("mark files changed without signal, redrawing");
                    stamp = now;
                    self.redraw_and_ack(seen);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::marks::{Mark, PointerAction};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_respawned_worker_renders_existing_marks_immediately() {
        let dir = TempDir::new().unwrap();
        let run = RunDir::new(dir.path());
        MarkStore::new(run.marks())
            .append(&[Mark::from_action(&PointerAction::Click { x: 500, y: 500 })])
            .unwrap();

        let worker = OverlayWorker::new(run.clone(), 100, 100);
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        let handle = tokio::spawn(async move { worker.run(c).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let layer = render::read_layer(&run.overlay_layer(), 100, 100).unwrap().unwrap();
        assert_eq!(layer.get_pixel(50, 50).0, [255, 255, 255, 255]);

        // 通知后应确认
        let sig = OverlaySignal::new(&run);
        let seq = sig.raise().unwrap();
        assert_eq!(sig.wait(seq, Duration::from_secs(2)).await, WaitOutcome::Acknowledged);

        cancel.cancel();
        handle.await.unwrap();
    }
}
