//! Scribe：叙事驱动的 agent 循环
//!
//! 模型每回合的输出就是它的叙事：既是下一回合的记忆，其中独占一行的函数调用又会被当作动作执行。
//!
//! 模块划分：
//! - **actions**: 动作语法抽取、工具注册表、内置工具与执行器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、运行状态、子进程监管、回合编排、优雅关闭
//! - **display**: 屏幕与输入设备抽象（无头 / 桌面）
//! - **llm**: 后端请求协议
//! - **observe**: 标记、光栅绘制、虚拟画布与观察流水线
//! - **overlay**: overlay 同步协议与常驻渲染 worker
//! - **proxy**: SST 校验、重试、日志、事件流与 HTTP 控制面
//! - **storage**: 运行目录与原子写入
//! - **worker**: 每回合子进程的请求/响应约定

pub mod actions;
pub mod config;
pub mod core;
pub mod display;
pub mod llm;
pub mod observability;
pub mod observe;
pub mod overlay;
pub mod proxy;
pub mod storage;
pub mod worker;
