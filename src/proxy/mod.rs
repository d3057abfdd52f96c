//! 代理/校验层
//!
//! 每个请求：SST 校验（只标记）→ 事件广播 → 带退避重试地转发 → 记录完整日志与截图 → 事件广播。
//! 主循环与 HTTP 反向代理路由走同一条路径。

pub mod events;
pub mod log;
pub mod retry;
#[cfg(feature = "web")]
pub mod server;
pub mod sst;
pub mod upstream;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::ProxySection;
use crate::core::error::BackendError;
use crate::llm::{Backend, Completion, RequestSummary, ResponseSummary};

pub use events::{EventHub, TurnEvent};
pub use log::ProxyLog;
pub use retry::{with_retry, RetryPolicy, RetryReport};
pub use sst::{SstVerifier, Verdict};
pub use upstream::{HttpUpstream, Upstream};

/// 一次转发的完整结果
#[derive(Debug, Clone)]
pub struct Forwarded {
    pub turn: u64,
    pub verdict: Verdict,
    pub retry: RetryReport,
    pub latency: Duration,
    pub result: Result<Completion, BackendError>,
}

pub struct Proxy {
    upstream: Arc<dyn Upstream>,
    policy: RetryPolicy,
    sst: Mutex<SstVerifier>,
    turn: AtomicU64,
    log: ProxyLog,
    events: EventHub,
}

impl Proxy {
    /// last_output / last_turn：续跑时从持久化状态恢复
    pub fn new(
        upstream: Arc<dyn Upstream>,
        settings: &ProxySection,
        log: ProxyLog,
        events: EventHub,
        last_output: Option<String>,
        last_turn: u64,
    ) -> Self {
        Self {
            upstream,
            policy: RetryPolicy::from_settings(settings),
            sst: Mutex::new(SstVerifier::new(last_output)),
            turn: AtomicU64::new(last_turn),
            log,
            events,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn turns_forwarded(&self) -> u64 {
        self.turn.load(Ordering::SeqCst)
    }

    pub async fn forward(&self, body: Value) -> Forwarded {
        let turn = self.turn.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let request = RequestSummary::parse(&body);
        let body_bytes = serde_json::to_vec(&body).map(|b| b.len()).unwrap_or(0);

        let verdict = self.sst.lock().await.check(&request.previous_output);
        if !verdict.matched {
            tracing::warn!(turn, "{}", verdict.detail);
        }
        self.events.publish(TurnEvent::Request {
            turn,
            model: request.model.clone(),
            previous_output_len: request.previous_output.chars().count(),
            feedback: request.feedback.clone(),
            has_image: request.image_data_url.is_some(),
            body_bytes,
            sst: verdict.clone(),
        });
        tracing::info!(
            turn,
            bytes = body_bytes,
            image = request.image_data_url.is_some(),
            "forwarding to upstream"
        );

        let upstream = self.upstream.clone();
        let (sent, retry) = with_retry(self.policy, |_| {
            let upstream = upstream.clone();
            let body = &body;
            async move { upstream.send(body).await }
        })
        .await;

        let result = sent.and_then(|raw| {
            ResponseSummary::parse(&raw).map(|summary| Completion { summary, raw })
        });
        if let Ok(completion) = &result {
            self.sst.lock().await.record(&completion.summary.text);
        }
        let latency = started.elapsed();

        self.record(turn, &body, &request, &verdict, &retry, latency, &result)
            .await;

        match &result {
            Ok(c) => tracing::info!(
                turn,
                latency_ms = latency.as_millis() as u64,
                sst = verdict.label(),
                text_len = c.summary.text.len(),
                finish = %c.summary.finish_reason,
                "turn done"
            ),
            Err(e) => tracing::error!(turn, attempts = retry.attempts, "upstream error: {}", e),
        }

        Forwarded {
            turn,
            verdict,
            retry,
            latency,
            result,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        turn: u64,
        body: &Value,
        request: &RequestSummary,
        verdict: &Verdict,
        retry: &RetryReport,
        latency: Duration,
        result: &Result<Completion, BackendError>,
    ) {
        let mut logged_body = body.clone();
        if let Some(url) = &request.image_data_url {
            match self.log.save_screenshot(turn, url).await {
                Ok(Some(rel)) => logged_body = log::replace_image_urls(body, &rel),
                Ok(None) => {}
                Err(e) => tracing::warn!(turn, "screenshot save failed: {}", e),
            }
        }

        let error = result.as_ref().err().map(|e| e.to_string());
        let (status, response, summary) = match result {
            Ok(c) => (200u16, c.raw.clone(), c.summary.clone()),
            Err(BackendError::Fatal { status, .. }) => (*status, Value::Null, ResponseSummary::default()),
            Err(_) => (502u16, Value::Null, ResponseSummary::default()),
        };

        let entry = json!({
            "turn": turn,
            "request_id": uuid::Uuid::new_v4().to_string(),
            "timestamp": chrono::Local::now().to_rfc3339(),
            "latency_ms": latency.as_millis() as u64,
            "attempts": retry.attempts,
            "retry_delays_ms": retry.delays.iter().map(|d| d.as_millis() as u64).collect::<Vec<_>>(),
            "request": logged_body,
            "response": response,
            "response_id": summary.response_id,
            "system_fingerprint": summary.system_fingerprint,
            "usage": summary.usage,
            "status": status,
            "error": error,
            "sst_check": verdict,
        });
        if let Err(e) = self.log.append(turn, &entry).await {
            tracing::warn!(turn, "proxy log write failed: {}", e);
        }

        self.events.publish(TurnEvent::Response {
            turn,
            status,
            response_id: summary.response_id.clone(),
            system_fingerprint: summary.system_fingerprint.clone(),
            text_len: summary.text.chars().count(),
            finish_reason: summary.finish_reason.clone(),
            usage: summary.usage.clone(),
            latency_ms: latency.as_millis() as u64,
            attempts: retry.attempts,
            sst: verdict.clone(),
            error,
        });
    }
}

#[async_trait]
impl Backend for Proxy {
    async fn complete(&self, request: Value) -> Result<Completion, BackendError> {
        self.forward(request).await.result
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{reply, ScriptedUpstream};
    use super::*;
    use crate::config::ModelSection;
    use crate::llm::build_request;
    use tempfile::TempDir;

    fn proxy(dir: &TempDir, upstream: Arc<ScriptedUpstream>) -> Proxy {
        Proxy::new(
            upstream,
            &ProxySection::default(),
            ProxyLog::new(dir.path(), 15),
            EventHub::new(16),
            None,
            0,
        )
    }

    fn req(story: &str) -> Value {
        build_request(&ModelSection::default(), "sys", story, "feedback", None)
    }

    #[tokio::test]
    async fn test_mismatch_is_flagged_but_still_forwarded() {
        let dir = TempDir::new().unwrap();
        let up = Arc::new(ScriptedUpstream::new(vec![Ok(reply("story one")), Ok(reply("story two"))]));
        let p = proxy(&dir, up.clone());
        let mut rx = p.events().subscribe();

        let first = p.forward(req("")).await;
        assert!(first.verdict.first_observed);
        assert_eq!(first.result.unwrap().summary.text, "story one");

        let second = p.forward(req("story ome")).await;
        assert!(!second.verdict.matched);
        assert_eq!(second.verdict.mismatch_at, Some(7));
        // 仍然转发，且请求原样到达上游
        assert_eq!(second.result.unwrap().summary.text, "story two");
        let seen = up.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(RequestSummary::parse(&seen[1]).previous_output, "story ome");

        let mut violations = 0;
        while let Ok(ev) = rx.try_recv() {
            if let TurnEvent::Request { sst, .. } = ev {
                if !sst.matched {
                    violations += 1;
                }
            }
        }
        assert_eq!(violations, 1);

        let logged = std::fs::read_to_string(dir.path().join("turns_0001_0015.jsonl")).unwrap();
        assert_eq!(logged.lines().count(), 2);
        assert!(logged.contains("SST VIOLATION"));
    }

    #[tokio::test]
    async fn test_seeded_output_matches_on_resume() {
        let dir = TempDir::new().unwrap();
        let up = Arc::new(ScriptedUpstream::new(vec![]));
        let p = Proxy::new(
            up,
            &ProxySection::default(),
            ProxyLog::new(dir.path(), 15),
            EventHub::new(4),
            Some("persisted".into()),
            41,
        );
        let f = p.forward(req("persisted")).await;
        assert!(f.verdict.matched);
        assert!(!f.verdict.first_observed);
        assert_eq!(f.turn, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_through_proxy() {
        let dir = TempDir::new().unwrap();
        let up = Arc::new(ScriptedUpstream::new(vec![
            Err(BackendError::Transient("a".into())),
            Err(BackendError::Transient("b".into())),
            Ok(reply("ok")),
        ]));
        let p = proxy(&dir, up.clone());
        let f = p.forward(req("")).await;
        assert_eq!(f.retry.attempts, 3);
        assert_eq!(f.retry.delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert!(f.result.is_ok());
        assert_eq!(up.seen.lock().await.len(), 3);
    }
}
