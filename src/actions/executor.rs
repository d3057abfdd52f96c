//! 动作执行器
//!
//! 抽取 → 逐个分发 → 汇总反馈。单个调用失败只记录到反馈里，批次继续；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::actions::grammar::{extract_calls, ActionCall};
use crate::actions::registry::{ToolContext, ToolOutput, ToolRegistry};
use crate::observe::marks::PointerAction;

/// 单个调用的结局
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok { value: String },
    Error { message: String, hint: Option<String> },
    Suppressed,
}

impl Outcome {
    fn render(&self) -> String {
        match self {
            Outcome::Ok { value } => value.clone(),
            Outcome::Error { message, hint } => match hint {
                Some(h) => format!("{}\n{}", message, h),
                None => message.clone(),
            },
            Outcome::Suppressed => "suppressed".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub call: ActionCall,
    pub outcome: Outcome,
}

/// 一个回合的执行报告（worker 经 stdout 返回给编排器）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub results: Vec<ExecutionResult>,
    /// 成功的指针轨迹，按调用顺序
    pub pointer_actions: Vec<PointerAction>,
    pub feedback: String,
}

impl ExecutionReport {
    pub fn successes(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Ok { .. }))
            .count()
    }

    pub fn errors(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Error { .. }))
            .count()
    }

    pub fn recognized(&self) -> usize {
        self.results.len()
    }
}

/// 反馈文本：每个被识别的调用一行 `{call-text} -> {outcome}`；零调用时给出明确提示
pub fn render_feedback(results: &[ExecutionResult], tool_names: &[&str]) -> String {
    if results.is_empty() {
        return format!(
            "No actions found in your story. You can use: {}",
            tool_names.join(", ")
        );
    }
    results
        .iter()
        .map(|r| format!("{} -> {}", r.call.source, r.outcome.render()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ActionExecutor {
    registry: ToolRegistry,
}

impl ActionExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn extract(&self, story: &str) -> Vec<ActionCall> {
        extract_calls(story, |name| self.registry.contains(name))
    }

    /// 执行叙事中的全部调用
    pub async fn run(&self, story: &str, ctx: &ToolContext) -> ExecutionReport {
        let calls = self.extract(story);
        let mut results = Vec::with_capacity(calls.len());
        let mut pointer_actions = Vec::new();

        for call in calls {
            let start = Instant::now();
            let outcome = match self.registry.call(&call.name, &call.args, ctx).await {
                Ok(ToolOutput::Done { value, pointer }) => {
                    pointer_actions.extend(pointer);
                    Outcome::Ok { value }
                }
                Ok(ToolOutput::Suppressed) => Outcome::Suppressed,
                Err(e) => Outcome::Error {
                    message: e.to_string(),
                    hint: e.hint(),
                },
            };
            let audit = serde_json::json!({
                "event": "action_audit",
                "tool": call.name,
                "outcome": match &outcome {
                    Outcome::Ok { .. } => "ok",
                    Outcome::Error { .. } => "error",
                    Outcome::Suppressed => "suppressed",
                },
                "duration_ms": start.elapsed().as_millis() as u64,
                "source": source_preview(&call.source),
            });
            tracing::info!(audit = %audit.to_string(), "action");
            results.push(ExecutionResult { call, outcome });
        }

        let feedback = render_feedback(&results, &self.registry.tool_names());
        ExecutionReport {
            results,
            pointer_actions,
            feedback,
        }
    }
}

fn source_preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}
