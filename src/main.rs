//! Scribe 主进程
//!
//! 入口：初始化日志、加载配置、打开运行目录（SCRIBE_RUN_DIR 指定时续跑），
//! 组装代理层与 worker 监管，启动控制面（feature = "web"），然后运行主循环直到收到关闭信号。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scribe::config::load_config;
use scribe::core::supervisor::sibling_binary;
use scribe::core::{
    Orchestrator, ProcessWorkers, ShutdownCoordinator, ShutdownManager, StateHandle, TurnWorkers,
    WorkersCleanup,
};
use scribe::observability;
use scribe::proxy::{EventHub, HttpUpstream, Proxy, ProxyLog};
use scribe::storage::RunDir;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    // 可选的配置文件路径：第一个命令行参数
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });

    let resume = std::env::var_os("SCRIBE_RUN_DIR")
        .map(PathBuf::from)
        .or_else(|| cfg.run.dir.clone());
    let run_dir = RunDir::open_or_create(resume.as_deref(), &cfg.run.runs_root)
        .context("Failed to open run directory")?;
    tracing::info!(run_dir = %run_dir.path().display(), "Run directory ready");

    let state = StateHandle::spawn(run_dir.clone());
    let snapshot = state.get().await.context("Failed to load run state")?;
    let last_output = (snapshot.state.turn > 0).then(|| snapshot.state.story.clone());

    let upstream = HttpUpstream::new(
        cfg.model.upstream_url.clone(),
        Duration::from_secs(cfg.proxy.request_timeout_secs),
    )
    .context("Failed to build upstream client")?;
    let events = EventHub::new(cfg.proxy.event_buffer);
    let proxy = Arc::new(Proxy::new(
        Arc::new(upstream),
        &cfg.proxy,
        ProxyLog::new(run_dir.proxy_log(), cfg.proxy.turns_per_log_file),
        events.clone(),
        last_output,
        snapshot.state.turn,
    ));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let cancel = shutdown.token();

    #[cfg(feature = "web")]
    let server = {
        let control = scribe::proxy::server::ControlState {
            proxy: proxy.clone(),
            state: state.clone(),
            started: std::time::Instant::now(),
        };
        let bind = cfg.proxy.bind.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = scribe::proxy::server::serve(&bind, control, cancel).await {
                tracing::error!("Control surface stopped: {}", e);
            }
        })
    };

    let workers: Arc<dyn TurnWorkers> = Arc::new(ProcessWorkers::new(
        sibling_binary(cfg.supervisor.worker_bin.as_ref(), "scribe-worker"),
        sibling_binary(cfg.supervisor.overlay_bin.as_ref(), "scribe-overlay"),
        run_dir.path(),
    ));
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(WorkersCleanup::new(workers.clone()));

    let mut orchestrator = Orchestrator::new(state, run_dir, workers, proxy, events, cfg)
        .with_config_reload(config_path);
    orchestrator.run(cancel).await;

    coordinator.run_cleanup().await;
    #[cfg(feature = "web")]
    if let Err(e) = server.await {
        tracing::warn!("Control surface task ended abnormally: {}", e);
    }
    tracing::info!("Scribe stopped");
    Ok(())
}
