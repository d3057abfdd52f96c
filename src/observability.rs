//! 可观测性：tracing 订阅器初始化

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter() -> EnvFilter {
    // RUST_LOG 优先；未设置时默认 info
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 主进程：日志写到 stdout
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer())
        .try_init();
}

/// 子进程：stdout 留给 JSON 协议，日志只能写 stderr，由父进程转发
pub fn init_stderr(role: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
    tracing::debug!(role, "worker logging ready");
}
