//! HTTP server for the LINE webhook.
//!
//! `POST {webhook_path}` verifies and acknowledges the batch at once, then
//! handles each event on its own task. `GET /health` reports the persona.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::parse_events;
use super::signature::verify_signature;
use crate::orchestrator::TurnOrchestrator;

const SIGNATURE_HEADER: &str = "x-line-signature";

#[derive(Clone)]
pub struct WebhookState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub channel_secret: Arc<str>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    persona: String,
}

/// Build the axum router.
pub fn router(state: WebhookState, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, post(handle_callback))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn serve(router: Router, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Webhook server listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
}

// --- Handlers ---

async fn handle_health(State(state): State<WebhookState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        persona: state.orchestrator.persona().name.clone(),
    })
}

async fn handle_callback(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(&state.channel_secret, &body, signature) {
        warn!("Rejected webhook with invalid signature ({} bytes)", body.len());
        return StatusCode::UNAUTHORIZED;
    }

    let events = match parse_events(&body) {
        Ok(events) => events,
        Err(e) => {
            warn!("Rejected malformed webhook body: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    debug!("Webhook accepted {} event(s)", events.len());
    // Fire-and-forget: LINE only needs the acknowledgement.
    state.orchestrator.dispatch(events);
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::history::MemoryHistoryStore;
    use crate::line::signature::sign;
    use crate::orchestrator::Services;
    use crate::persona::PersonaConfig;
    use crate::platform::testing::RecordingPlatform;
    use crate::reply::testing::ScriptedChat;
    use crate::storage::testing::MemoryObjectStore;
    use crate::transcribe::testing::FixedTranscriber;
    use crate::voice::testing::RecordingSpeech;
    use std::time::Duration;

    const SECRET: &str = "channel-secret";

    async fn spawn_server(platform: Arc<RecordingPlatform>) -> String {
        let orchestrator = TurnOrchestrator::new(
            PersonaConfig::builtin("jack").unwrap(),
            &PipelineConfig::default(),
            Services {
                chat: Arc::new(ScriptedChat::replying("EN: Hey!\nJP: やあ！")),
                speech: Arc::new(RecordingSpeech::new()),
                transcriber: Arc::new(FixedTranscriber::hearing("hello")),
                objects: Arc::new(MemoryObjectStore::default()),
                history: Arc::new(MemoryHistoryStore::new()),
                platform,
            },
        );
        let state = WebhookState {
            orchestrator: Arc::new(orchestrator),
            channel_secret: Arc::from(SECRET),
        };
        let app = router(state, "/callback");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    const BODY: &str = r#"{"destination":"Ubot","events":[
        {"type":"message","replyToken":"r1","source":{"type":"user","userId":"U1"},
         "message":{"id":"m1","type":"text","text":"Hi"}}]}"#;

    #[tokio::test]
    async fn valid_signature_is_acknowledged_and_dispatched() {
        let platform = Arc::new(RecordingPlatform::default());
        let base = spawn_server(platform.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/callback"))
            .header(SIGNATURE_HEADER, sign(SECRET, BODY.as_bytes()))
            .body(BODY)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        for _ in 0..50 {
            if !platform.replies().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let replies = platform.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, "r1");
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let platform = Arc::new(RecordingPlatform::default());
        let base = spawn_server(platform.clone()).await;
        let client = reqwest::Client::new();

        let forged = client
            .post(format!("{base}/callback"))
            .header(SIGNATURE_HEADER, sign("wrong-secret", BODY.as_bytes()))
            .body(BODY)
            .send()
            .await
            .unwrap();
        assert_eq!(forged.status().as_u16(), 401);

        let unsigned = client
            .post(format!("{base}/callback"))
            .body(BODY)
            .send()
            .await
            .unwrap();
        assert_eq!(unsigned.status().as_u16(), 401);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(platform.replies().is_empty());
    }

    #[tokio::test]
    async fn signed_garbage_is_bad_request() {
        let base = spawn_server(Arc::new(RecordingPlatform::default())).await;
        let body = "not json";
        let resp = reqwest::Client::new()
            .post(format!("{base}/callback"))
            .header(SIGNATURE_HEADER, sign(SECRET, body.as_bytes()))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn health_reports_persona() {
        let base = spawn_server(Arc::new(RecordingPlatform::default())).await;
        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["persona"], "Jack");
    }
}
