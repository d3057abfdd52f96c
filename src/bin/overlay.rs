//! scribe-overlay：常驻 overlay 渲染进程
//!
//! 用法：`scribe-overlay <run_dir>`。stdin 关闭（父进程退出或要求停止）或收到 Ctrl+C 时退出。

use std::path::PathBuf;

use anyhow::Context;
use scribe::config::load_config;
use scribe::display::{screen_from_settings, ScreenSource as _};
use scribe::observability;
use scribe::overlay::OverlayWorker;
use scribe::storage::RunDir;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_stderr("overlay");
    let run_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: scribe-overlay <run_dir>")?;

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let (width, height) = screen_from_settings(&cfg.observe).dimensions();
    let worker = OverlayWorker::new(RunDir::new(run_dir), width, height);

    let cancel = CancellationToken::new();
    let on_eof = cancel.clone();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 64];
        while let Ok(n) = stdin.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
        on_eof.cancel();
    });
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    worker.run(cancel).await;
    Ok(())
}
