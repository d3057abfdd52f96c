//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCRIBE__*` 覆盖（双下划线表示嵌套，如 `SCRIBE__OBSERVE__WIDTH=640`）。
//! 主循环在每个回合边界重新加载一次，得到的快照按值传入本回合的各个阶段。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunSection,
    pub model: ModelSection,
    pub actions: ActionsSection,
    pub observe: ObserveSection,
    pub pacing: PacingSection,
    pub supervisor: SupervisorSection,
    pub proxy: ProxySection,
    pub policy: PolicySection,
}

/// [run] 段：运行目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// 指定已有运行目录（续跑）；未设置时在 runs_root 下新建
    pub dir: Option<PathBuf>,
    pub runs_root: PathBuf,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            dir: None,
            runs_root: PathBuf::from("runs"),
        }
    }
}

/// [model] 段：上游模型服务与采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub upstream_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            upstream_url: "http://127.0.0.1:1235/v1/chat/completions".to_string(),
            model: "qwen3-vl-2b-instruct-1m".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 300,
            system_prompt_path: None,
        }
    }
}

/// [actions] 段：动作总开关与物理输入开关
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActionsSection {
    /// 关闭时指针/键入类调用只记为 suppressed
    pub execute: bool,
    /// 是否真正向操作系统发送鼠标键盘事件
    pub physical: bool,
}

impl Default for ActionsSection {
    fn default() -> Self {
        Self {
            execute: true,
            physical: false,
        }
    }
}

/// [observe] 段：观察模式与输出尺寸
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObserveSection {
    pub overlay: bool,
    pub virtual_canvas: bool,
    /// 输出帧尺寸；0 表示保持显示器原始尺寸
    pub width: u32,
    pub height: u32,
    /// 真实截屏前的稳定等待
    pub capture_delay_ms: u64,
    /// Overlay 重绘的有界等待
    pub overlay_wait_ms: u64,
    /// headless / desktop
    pub display: String,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
}

impl Default for ObserveSection {
    fn default() -> Self {
        Self {
            overlay: false,
            virtual_canvas: true,
            width: 512,
            height: 288,
            capture_delay_ms: 1000,
            overlay_wait_ms: 150,
            display: "headless".to_string(),
            display_width: None,
            display_height: None,
        }
    }
}

/// [pacing] 段：回合节奏
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub loop_delay_ms: u64,
    /// loop_delay_ms 的下限，防止配置成 0 后空转
    pub min_loop_delay_ms: u64,
    pub pause_poll_ms: u64,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            loop_delay_ms: 2000,
            min_loop_delay_ms: 1000,
            pause_poll_ms: 2000,
        }
    }
}

impl PacingSection {
    pub fn loop_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.loop_delay_ms.max(self.min_loop_delay_ms))
    }
}

/// [supervisor] 段：子进程超时与可执行文件位置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub execute_timeout_secs: u64,
    pub observe_timeout_secs: u64,
    /// 未设置时取当前可执行文件同目录下的 scribe-worker
    pub worker_bin: Option<PathBuf>,
    pub overlay_bin: Option<PathBuf>,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            execute_timeout_secs: 120,
            observe_timeout_secs: 60,
            worker_bin: None,
            overlay_bin: None,
        }
    }
}

/// [proxy] 段：转发、重试、日志与事件流
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// 控制面监听地址（feature = "web"）
    pub bind: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub turns_per_log_file: u64,
    pub event_buffer: usize,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:1234".to_string(),
            request_timeout_secs: 300,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 16000,
            turns_per_log_file: 15,
            event_buffer: 256,
        }
    }
}

/// [policy] 段
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// 连续多少个「只有错误、没有成功」的回合后自动暂停
    pub max_fail_streak: u32,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self { max_fail_streak: 8 }
    }
}

/// 从 config 目录加载配置，环境变量 SCRIBE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCRIBE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCRIBE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 回合边界的热加载：失败时沿用上一份快照
pub fn reload_or(previous: &AppConfig, config_path: Option<PathBuf>) -> AppConfig {
    match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Config reload failed ({}), keeping previous snapshot", e);
            previous.clone()
        }
    }
}
