//! HTTP 控制面：反向代理路由、SSE 事件流、健康检查、暂停/恢复

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::error::BackendError;
use crate::core::state::StateHandle;
use crate::proxy::{Proxy, TurnEvent};

#[derive(Clone)]
pub struct ControlState {
    pub proxy: Arc<Proxy>,
    pub state: StateHandle,
    pub started: Instant,
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/events", get(events_sse))
        .route("/health", get(health))
        .route("/api/pause", post(pause))
        .route("/api/resume", post(resume))
        .with_state(state)
}

/// 监听直到 cancel 触发
pub async fn serve(bind: &str, state: ControlState, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Control surface: http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({"error": {"message": message}}))).into_response()
}

/// POST /v1/chat/completions：任意 OpenAI 兼容请求体走同一条校验/重试/日志路径
async fn chat_completions(State(state): State<ControlState>, body: Bytes) -> Response {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, format!("invalid json: {}", e)),
    };
    let forwarded = state.proxy.forward(request).await;
    match forwarded.result {
        Ok(completion) => (StatusCode::OK, Json(completion.raw)).into_response(),
        Err(BackendError::Fatal { status, detail }) => error_body(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            detail,
        ),
        Err(e) => error_body(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

/// GET /events：SSE 回合事件流；落后的观察者跳过缺失事件
async fn events_sse(
    State(state): State<ControlState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.proxy.events().subscribe();
    let event_stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    let data = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string());
                    return Some((Ok(Event::default().data(data)), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// GET /health
async fn health(State(state): State<ControlState>) -> Response {
    match state.state.get().await {
        Ok(snap) => Json(json!({
            "status": "ok",
            "turn": snap.state.turn,
            "paused": snap.paused,
            "pause_reason": snap.pause_reason,
            "fail_streak": snap.state.fail_streak,
            "uptime_secs": state.started.elapsed().as_secs(),
            "observers": state.proxy.events().observers(),
            "turns_forwarded": state.proxy.turns_forwarded(),
        }))
        .into_response(),
        Err(e) => error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// POST /api/pause
async fn pause(State(state): State<ControlState>) -> Response {
    let reason = "paused via control surface".to_string();
    if let Err(e) = state.state.set_paused(true, reason.clone()).await {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    state.proxy.events().publish(TurnEvent::Paused { reason });
    Json(json!({"paused": true})).into_response()
}

/// POST /api/resume：清除暂停标志并清零失败计数
async fn resume(State(state): State<ControlState>) -> Response {
    let reason = "resumed via control surface".to_string();
    let res = async {
        state.state.set_paused(false, reason.clone()).await?;
        state.state.clear_fail_streak().await
    }
    .await;
    if let Err(e) = res {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    state.proxy.events().publish(TurnEvent::Resumed { reason });
    Json(json!({"paused": false})).into_response()
}
