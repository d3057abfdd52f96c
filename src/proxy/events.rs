//! 回合事件广播：一个写者，任意多个观察者
//!
//! 发送永不阻塞；没有订阅者或订阅者落后时事件直接丢弃，落后的订阅者跳过缺失部分。

use serde::Serialize;
use tokio::sync::broadcast;

use crate::proxy::sst::Verdict;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    Request {
        turn: u64,
        model: String,
        previous_output_len: usize,
        feedback: String,
        has_image: bool,
        body_bytes: usize,
        sst: Verdict,
    },
    Response {
        turn: u64,
        status: u16,
        response_id: String,
        system_fingerprint: String,
        text_len: usize,
        finish_reason: String,
        usage: serde_json::Value,
        latency_ms: u64,
        attempts: u32,
        sst: Verdict,
        error: Option<String>,
    },
    TurnCompleted {
        turn: u64,
        calls: usize,
        successes: usize,
        errors: usize,
        fail_streak: u32,
    },
    Paused {
        reason: String,
    },
    Resumed {
        reason: String,
    },
}

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<TurnEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: TurnEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.tx.subscribe()
    }

    pub fn observers(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_observers_does_not_block() {
        let hub = EventHub::new(2);
        for _ in 0..10 {
            hub.publish(TurnEvent::Paused { reason: "x".into() });
        }
        assert_eq!(hub.observers(), 0);
    }

    #[tokio::test]
    async fn test_slow_observer_lags_instead_of_blocking() {
        let hub = EventHub::new(2);
        let mut rx = hub.subscribe();
        for i in 0..5 {
            hub.publish(TurnEvent::Resumed {
                reason: i.to_string(),
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        let next = rx.recv().await.unwrap();
        assert!(matches!(next, TurnEvent::Resumed { ref reason } if reason == "3"));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let v = serde_json::to_value(TurnEvent::Paused { reason: "r".into() }).unwrap();
        assert_eq!(v["event"], "paused");
    }
}
