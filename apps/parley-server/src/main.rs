use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_stream::stream;
use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use clap::Parser;
use parley_protocol::{
    ApprovalId, ApprovalStatus, MessageId, MessageSnapshot, SessionId, encode_frame,
};
use parley_transcript::Session;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod script;

use crate::script::{PlannedApproval, plan_turn, user_snapshot};

#[derive(Debug, Parser)]
#[command(name = "parley-server")]
#[command(about = "parley simulation backend")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:8789")]
    listen: SocketAddr,
    /// Pause between streamed frames, in milliseconds.
    #[arg(long, default_value_t = 40)]
    frame_delay_ms: u64,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<RwLock<Registry>>,
    frame_delay: Duration,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionRecord>,
    approvals: HashMap<ApprovalId, ApprovalRecord>,
}

struct SessionRecord {
    session: Session,
    messages: Vec<MessageSnapshot>,
}

struct ApprovalRecord {
    session_id: SessionId,
    message_id: MessageId,
    expires_at: DateTime<Utc>,
    status: ApprovalStatus,
}

impl From<&PlannedApproval> for ApprovalRecord {
    fn from(planned: &PlannedApproval) -> Self {
        Self {
            session_id: planned.session_id.clone(),
            message_id: planned.message_id.clone(),
            expires_at: planned.expires_at,
            status: ApprovalStatus::Pending,
        }
    }
}

/// Resolve an approval record against the server clock. Late and duplicate
/// decisions are refused; the caller turns the refusal into a 409.
fn apply_decision(
    record: &mut ApprovalRecord,
    decision: ApprovalStatus,
    now: DateTime<Utc>,
) -> Result<(), String> {
    match record.status {
        ApprovalStatus::Pending if now >= record.expires_at => {
            record.status = ApprovalStatus::Expired;
            Err("approval has expired".to_owned())
        }
        ApprovalStatus::Pending => {
            record.status = decision;
            Ok(())
        }
        ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Expired => {
            Err(format!("approval is already {:?}", record.status).to_lowercase())
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct CreateSessionRequest {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamTurnRequest {
    content: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let state = AppState {
        registry: Arc::new(RwLock::new(Registry::default())),
        frame_delay: Duration::from_millis(cli.frame_delay_ms),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{session_id}/messages", get(list_messages))
        .route("/sessions/{session_id}/stream", post(stream_turn))
        .route("/approvals/{approval_id}/approve", post(approve))
        .route("/approvals/{approval_id}/reject", post(reject))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, "parley-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "parley-server"
    }))
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Json<Session> {
    let title = request.title.unwrap_or_else(|| "untitled".to_owned());
    let session = Session::new(title);
    info!(session_id = %session.id, "session created");

    state.registry.write().await.sessions.insert(
        session.id.clone(),
        SessionRecord {
            session: session.clone(),
            messages: Vec::new(),
        },
    );
    Json(session)
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    let registry = state.registry.read().await;
    let mut sessions: Vec<Session> = registry
        .sessions
        .values()
        .map(|record| record.session.clone())
        .collect();
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(sessions)
}

async fn list_messages(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<MessageSnapshot>>> {
    let session_id = SessionId::from_string(session_id);
    let registry = state.registry.read().await;
    let record = registry
        .sessions
        .get(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown session {session_id}")))?;
    Ok(Json(record.messages.clone()))
}

/// Accept one user turn and stream the scripted response as NDJSON.
///
/// The turn's finalized snapshots land in history before the first frame
/// goes out, so a reconnecting client always sees a consistent state.
async fn stream_turn(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<StreamTurnRequest>,
) -> ApiResult<Response> {
    let session_id = SessionId::from_string(session_id);
    let now = Utc::now();

    let script = {
        let mut registry = state.registry.write().await;
        let record = registry
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| ApiError::not_found(format!("unknown session {session_id}")))?;

        record
            .messages
            .push(user_snapshot(&session_id, &request.content, now));
        record.session.note_message(now);

        let script = plan_turn(&session_id, &request.content, now);
        for snapshot in &script.snapshots {
            record.messages.push(snapshot.clone());
            record.session.note_message(now);
        }
        if let Some(planned) = &script.approval {
            registry
                .approvals
                .insert(planned.id.clone(), ApprovalRecord::from(planned));
        }
        script
    };

    info!(session_id = %session_id, frames = script.events.len(), "turn stream starting");

    let delay = state.frame_delay;
    let body = Body::from_stream(stream! {
        for event in script.events {
            tokio::time::sleep(delay).await;
            if let Ok(frame) = encode_frame(&event) {
                yield Ok::<_, Infallible>(frame);
            }
        }
    });

    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}

async fn approve(
    Path(approval_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    decide(&state, approval_id, ApprovalStatus::Approved).await
}

async fn reject(
    Path(approval_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    decide(&state, approval_id, ApprovalStatus::Rejected).await
}

async fn decide(
    state: &AppState,
    approval_id: String,
    decision: ApprovalStatus,
) -> ApiResult<StatusCode> {
    let approval_id = ApprovalId::from_string(approval_id);
    let now = Utc::now();
    let mut registry = state.registry.write().await;

    let Registry {
        sessions,
        approvals,
    } = &mut *registry;
    let record = approvals
        .get_mut(&approval_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown approval {approval_id}")))?;

    apply_decision(record, decision, now).map_err(ApiError::conflict)?;
    info!(approval_id = %approval_id, ?decision, "approval resolved");

    // Reflect the outcome in history for late-fetching clients.
    if let Some(session) = sessions.get_mut(&record.session_id)
        && let Some(message) = session
            .messages
            .iter_mut()
            .find(|message| message.id == record.message_id)
        && let Some(approval) = message.approval.as_mut()
    {
        approval.status = decision;
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn test_state() -> AppState {
        AppState {
            registry: Arc::new(RwLock::new(Registry::default())),
            frame_delay: Duration::ZERO,
        }
    }

    async fn new_session(state: &AppState) -> Session {
        let Json(session) = create_session(
            State(state.clone()),
            Json(CreateSessionRequest {
                title: Some("test".to_owned()),
            }),
        )
        .await;
        session
    }

    #[tokio::test]
    async fn turn_history_is_persisted_before_streaming() {
        let state = test_state();
        let session = new_session(&state).await;

        let response = stream_turn(
            Path(session.id.to_string()),
            State(state.clone()),
            Json(StreamTurnRequest {
                content: "deploy the site".to_owned(),
            }),
        )
        .await
        .unwrap();
        drop(response);

        let registry = state.registry.read().await;
        let record = registry.sessions.get(&session.id).unwrap();
        // User submission plus the scripted assistant reply.
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[0].content, "deploy the site");
        assert_eq!(record.session.message_count, 2);
        // Risky content registered a decidable approval.
        assert_eq!(registry.approvals.len(), 1);
    }

    #[tokio::test]
    async fn streaming_into_an_unknown_session_is_not_found() {
        let state = test_state();
        let err = stream_turn(
            Path("ghost".to_owned()),
            State(state),
            Json(StreamTurnRequest {
                content: "hello".to_owned(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn approval_endpoint_resolves_once_then_conflicts() {
        let state = test_state();
        let session = new_session(&state).await;
        drop(
            stream_turn(
                Path(session.id.to_string()),
                State(state.clone()),
                Json(StreamTurnRequest {
                    content: "delete the database".to_owned(),
                }),
            )
            .await
            .unwrap(),
        );

        let approval_id = {
            let registry = state.registry.read().await;
            registry.approvals.keys().next().unwrap().clone()
        };

        let status = approve(Path(approval_id.to_string()), State(state.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        // History reflects the decision for late fetchers.
        {
            let registry = state.registry.read().await;
            let record = registry.sessions.get(&session.id).unwrap();
            let approval = record.messages[1].approval.as_ref().unwrap();
            assert_eq!(approval.status, ApprovalStatus::Approved);
        }

        let err = reject(Path(approval_id.to_string()), State(state))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    fn pending_record(expires_in: ChronoDuration) -> ApprovalRecord {
        ApprovalRecord {
            session_id: SessionId::from_string("s1"),
            message_id: MessageId::from_string("m1"),
            expires_at: Utc::now() + expires_in,
            status: ApprovalStatus::Pending,
        }
    }

    #[test]
    fn decision_on_live_approval_is_accepted() {
        let mut record = pending_record(ChronoDuration::seconds(60));
        assert!(apply_decision(&mut record, ApprovalStatus::Approved, Utc::now()).is_ok());
        assert_eq!(record.status, ApprovalStatus::Approved);
    }

    #[test]
    fn late_decision_is_refused_and_marks_expired() {
        let mut record = pending_record(ChronoDuration::seconds(-1));
        let err = apply_decision(&mut record, ApprovalStatus::Approved, Utc::now()).unwrap_err();
        assert!(err.contains("expired"));
        assert_eq!(record.status, ApprovalStatus::Expired);
    }

    #[test]
    fn duplicate_decision_is_refused() {
        let mut record = pending_record(ChronoDuration::seconds(60));
        apply_decision(&mut record, ApprovalStatus::Rejected, Utc::now()).unwrap();
        let err = apply_decision(&mut record, ApprovalStatus::Approved, Utc::now()).unwrap_err();
        assert!(err.contains("already"));
        assert_eq!(record.status, ApprovalStatus::Rejected);
    }
}
