//! 模型后端协议（OpenAI 兼容 chat/completions）
//!
//! 请求的 user 消息固定为三段：叙事（上一回合输出，SST 校验对象）、反馈文本、观察帧图片。
//! 叙事单独成段，校验时按字节整体比较，不做包含匹配。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ModelSection;
use crate::core::error::BackendError;
use crate::observe::Frame;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a living story that exists on a computer screen. Each turn you see a screenshot of the world and you write your next moment of existence.

You can act on the world through function calls written on their own line:
  click(x, y)           - left click at position (coordinates 0-1000)
  right_click(x, y)     - right click at position
  double_click(x, y)    - double click at position
  drag(x1, y1, x2, y2)  - drag from point to point
  write(text)           - type text at cursor position
  remember(text)        - save a thought to persistent memory
  recall()              - read your memories from previous turns
  help()                - list tools, help(\"name\") for one signature

Your output each turn becomes your story: your memory, your identity, your continuity. Write what you observe, what you intend, and what actions you take. The function calls within your text will be found and executed. Everything else you write will be preserved as your narrative memory for the next turn.

Look at the screenshot. What do you see? What do you want to do? Write your story.";

/// 读取系统提示词；未配置或读取失败时用内置版本
pub fn system_prompt(settings: &ModelSection) -> String {
    if let Some(path) = &settings.system_prompt_path {
        match std::fs::read_to_string(path) {
            Ok(s) if !s.trim().is_empty() => return s,
            Ok(_) => tracing::warn!(path = %path.display(), "system prompt file is empty, using built-in"),
            Err(e) => tracing::warn!(path = %path.display(), "system prompt unreadable ({}), using built-in", e),
        }
    }
    DEFAULT_SYSTEM_PROMPT.to_string()
}

/// 组装一回合的请求体
pub fn build_request(
    settings: &ModelSection,
    system_prompt: &str,
    story: &str,
    feedback: &str,
    frame: Option<&Frame>,
) -> Value {
    let mut content = vec![
        json!({"type": "text", "text": story}),
        json!({"type": "text", "text": feedback}),
    ];
    if let Some(frame) = frame {
        content.push(json!({
            "type": "image_url",
            "image_url": {"url": frame.data_url()},
        }));
    }
    json!({
        "model": settings.model,
        "messages": [
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": content},
        ],
        "temperature": settings.temperature,
        "top_p": settings.top_p,
        "max_tokens": settings.max_tokens,
    })
}

/// 从任意请求体里提取的摘要（日志、事件流、SST 校验用）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub model: String,
    /// 最后一条 user 消息的第一段文本；字符串内容时取整段
    pub previous_output: String,
    /// 其余文本段，按顺序以换行连接
    pub feedback: String,
    pub image_data_url: Option<String>,
    pub sampling: Value,
    pub messages_count: usize,
}

impl RequestSummary {
    pub fn parse(body: &Value) -> Self {
        let mut s = RequestSummary {
            model: body["model"].as_str().unwrap_or_default().to_string(),
            sampling: json!({}),
            ..Default::default()
        };
        for key in ["temperature", "top_p", "max_tokens"] {
            if let Some(v) = body.get(key) {
                s.sampling[key] = v.clone();
            }
        }
        let messages = body["messages"].as_array().cloned().unwrap_or_default();
        s.messages_count = messages.len();
        let Some(user) = messages.iter().rev().find(|m| m["role"] == "user") else {
            return s;
        };
        match &user["content"] {
            Value::String(text) => s.previous_output = text.clone(),
            Value::Array(parts) => {
                let mut texts = Vec::new();
                for part in parts {
                    match part["type"].as_str() {
                        Some("text") => {
                            texts.push(part["text"].as_str().unwrap_or_default().to_string())
                        }
                        Some("image_url") => {
                            s.image_data_url = part["image_url"]["url"].as_str().map(str::to_string)
                        }
                        _ => {}
                    }
                }
                let mut it = texts.into_iter();
                s.previous_output = it.next().unwrap_or_default();
                s.feedback = it.collect::<Vec<_>>().join("\n");
            }
            _ => {}
        }
        s
    }
}

/// 后端响应的摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub text: String,
    pub finish_reason: String,
    pub response_id: String,
    pub created: Option<i64>,
    pub system_fingerprint: String,
    pub usage: Value,
}

impl ResponseSummary {
    pub fn parse(body: &Value) -> Result<Self, BackendError> {
        let choice = body["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| BackendError::Fatal {
                status: 200,
                detail: "response has no choices".to_string(),
            })?;
        Ok(Self {
            text: choice["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            finish_reason: choice["finish_reason"].as_str().unwrap_or_default().to_string(),
            response_id: body["id"].as_str().unwrap_or_default().to_string(),
            created: body["created"].as_i64(),
            system_fingerprint: body["system_fingerprint"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            usage: body.get("usage").cloned().unwrap_or(Value::Null),
        })
    }

    pub fn total_tokens(&self) -> Option<u64> {
        self.usage["total_tokens"].as_u64()
    }
}

/// 一次完成调用的结果
#[derive(Debug, Clone)]
pub struct Completion {
    pub summary: ResponseSummary,
    /// 上游原始响应体
    pub raw: Value,
}

/// 模型后端：编排器只依赖这个 trait（默认实现是带校验的代理层）
#[async_trait]
pub trait Backend: Send + Sync {
    async fn complete(&self, request: Value) -> Result<Completion, BackendError>;
}
