//! 错误类型
//!
//! 分层：单次调用失败（ActionError，写入反馈，不中断批次）、子进程失败（WorkerError）、
//! 上游失败（BackendError）、观察失败（ObserveError），以及编排器的回合级致命错误（TurnError）。
//! 叙事中无法解析的行不是错误，不在这里出现。

use std::time::Duration;

use thiserror::Error;

/// 单次工具调用失败；Display 文本即反馈中的 outcome
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("RangeError: {name}={value} outside valid range 0-1000")]
    OutOfRange { name: &'static str, value: i64 },

    #[error("TypeError: {name} must be a number, got {got}")]
    NotANumber { name: &'static str, got: &'static str },

    #[error("TypeError: {tool}() requires str, got {got}")]
    NotAString { tool: &'static str, got: &'static str },

    #[error("ArityError: {tool}() takes {expected} argument(s) ({got} given)")]
    Arity {
        tool: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("NameError: no tool named '{0}'")]
    UnknownTool(String),

    #[error("DeviceError: {0}")]
    Device(String),

    #[error("NoteStoreError: {0}")]
    NoteStore(String),
}

impl ActionError {
    /// 附在反馈后的提示（参见 feedback 组装）
    pub fn hint(&self) -> Option<String> {
        match self {
            ActionError::OutOfRange { .. } => Some("(Coordinates: integers 0-1000)".to_string()),
            ActionError::Arity { tool, .. } | ActionError::NotAString { tool, .. } => {
                Some(format!("(Use help(\"{tool}\") for signature)"))
            }
            ActionError::NotANumber { .. } => Some("(Coordinates: integers 0-1000)".to_string()),
            ActionError::UnknownTool(_) => Some("(Use help() to list tools)".to_string()),
            _ => None,
        }
    }
}

/// 子进程（每回合 worker / 常驻 overlay）失败
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn {role} worker: {source}")]
    Spawn {
        role: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} worker timed out after {}s", .after.as_secs_f64())]
    Timeout { role: String, after: Duration },

    /// 输出缺失或无法解析；与超时同等对待
    #[error("{role} worker produced malformed output: {detail}")]
    Malformed { role: String, detail: String },

    #[error("{role} worker io error: {source}")]
    Io {
        role: String,
        #[source]
        source: std::io::Error,
    },
}

impl WorkerError {
    pub fn is_timeout_like(&self) -> bool {
        matches!(self, WorkerError::Timeout { .. } | WorkerError::Malformed { .. })
    }
}

/// 上游模型服务失败
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// 可重试：连接失败、超时、5xx、429
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// 不可重试：其余 4xx、响应体无法解析
    #[error("upstream rejected request (status {status}): {detail}")]
    Fatal { status: u16, detail: String },

    #[error("upstream failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("upstream request exceeded overall deadline of {}s", .0.as_secs())]
    Deadline(Duration),

    #[error("invalid request body: {0}")]
    BadRequest(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// 观察流水线失败
#[derive(Error, Debug)]
pub enum ObserveError {
    #[error("display capture failed: {0}")]
    Capture(String),

    #[error("image encoding failed: {0}")]
    Encode(String),

    #[error("canvas io error at {path}: {source}")]
    Canvas {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state io error: {0}")]
    State(String),
}

/// 回合级致命错误：本回合放弃，记录后循环继续或暂停
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("execution step failed: {0}")]
    Execute(#[source] WorkerError),

    #[error("observation step failed: {0}")]
    Observe(#[source] WorkerError),

    #[error("backend call failed: {0}")]
    Backend(#[source] BackendError),

    #[error("run state unavailable: {0}")]
    State(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_error_carries_coordinate_hint() {
        let err = ActionError::OutOfRange {
            name: "x",
            value: 2000,
        };
        assert_eq!(err.to_string(), "RangeError: x=2000 outside valid range 0-1000");
        assert!(err.hint().unwrap().contains("0-1000"));
    }

    #[test]
    fn test_arity_hint_names_tool() {
        let err = ActionError::Arity {
            tool: "drag",
            expected: "4",
            got: 2,
        };
        assert!(err.hint().unwrap().contains("help(\"drag\")"));
    }

    #[test]
    fn test_timeout_display() {
        let err = WorkerError::Timeout {
            role: "execute".into(),
            after: Duration::from_secs(120),
        };
        assert_eq!(err.to_string(), "execute worker timed out after 120s");
        assert!(err.is_timeout_like());
    }
}
