//! 上游模型服务

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::error::BackendError;

/// 单次发送；瞬时失败映射为 BackendError::Transient，由重试层处理
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, body: &Value) -> Result<Value, BackendError>;
}

/// OpenAI 兼容的 HTTP 上游
pub struct HttpUpstream {
    client: reqwest::Client,
    url: String,
}

impl HttpUpstream {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::BadRequest(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

fn classify(status: reqwest::StatusCode, detail: String) -> BackendError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        BackendError::Transient(format!("status {}: {}", status.as_u16(), detail))
    } else {
        BackendError::Fatal {
            status: status.as_u16(),
            detail,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, body: &Value) -> Result<Value, BackendError> {
        let resp = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() || e.is_request() {
                    BackendError::Transient(e.to_string())
                } else {
                    BackendError::Fatal {
                        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Transient(format!("reading body: {}", e)))?;
        if !status.is_success() {
            return Err(classify(status, text));
        }
        serde_json::from_str(&text).map_err(|e| BackendError::Fatal {
            status: status.as_u16(),
            detail: format!("invalid json body: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify(reqwest::StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(!classify(reqwest::StatusCode::BAD_REQUEST, String::new()).is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // 端口 9 上通常没有 HTTP 服务
        let up = HttpUpstream::new("http://127.0.0.1:9/v1/chat/completions", Duration::from_secs(2)).unwrap();
        let err = up.send(&serde_json::json!({})).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
