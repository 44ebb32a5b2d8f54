//! HTTP surface: inbound email webhook plus operational endpoints.

use crate::debounce::DebounceRegistry;
use crate::dispatch::{DispatchDecision, EmailDispatcher, EmailRoute};
use crate::IssueId;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

pub struct AppState {
    pub dispatcher: EmailDispatcher,
    pub registry: DebounceRegistry,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/healthz", get(healthz))
        .route("/email/inbound", post(inbound_email))
        .route("/simulate/:issue_id", post(simulate))
        .with_state(state)
}

async fn banner() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct InboundResponse {
    route: &'static str,
    text: String,
}

/// Raw RFC 822 message in, routing decision out. A 500 here tells the mail
/// provider the event was not recorded and it should redeliver.
async fn inbound_email(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<InboundResponse>) {
    let DispatchDecision { route, text } = state.dispatcher.dispatch(&body);

    match route {
        EmailRoute::Summarize { issue_id } => record_event(&state, issue_id, text).await,
        EmailRoute::ForwardAdmin { admin_email } => {
            tracing::warn!(admin_email = %admin_email, decision = %text, "inbound email handed to admin");
            (
                StatusCode::OK,
                Json(InboundResponse {
                    route: "forward-admin",
                    text,
                }),
            )
        }
        EmailRoute::Reject => {
            tracing::debug!(reason = %text, "inbound email rejected");
            (
                StatusCode::OK,
                Json(InboundResponse {
                    route: "reject",
                    text,
                }),
            )
        }
    }
}

/// Inject a tracker event without an email, for operational testing.
async fn simulate(
    State(state): State<Arc<AppState>>,
    Path(issue_id): Path<u64>,
) -> (StatusCode, Json<InboundResponse>) {
    let issue_id = IssueId(issue_id);
    record_event(&state, issue_id, format!("Processing Ruby issue #{issue_id}")).await
}

async fn record_event(
    state: &AppState,
    issue_id: IssueId,
    text: String,
) -> (StatusCode, Json<InboundResponse>) {
    match state.registry.on_event(issue_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(InboundResponse {
                route: "summarize",
                text,
            }),
        ),
        Err(error) => {
            tracing::error!(%error, issue_id = %issue_id, "failed to record tracker event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InboundResponse {
                    route: "error",
                    text: "failed to record tracker event".to_string(),
                }),
            )
        }
    }
}
