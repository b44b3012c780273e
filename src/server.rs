use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dedupe::RecentUpdates;
use crate::error::RelayError;
use crate::relay::{Job, ResultNotifier};
use crate::update::Update;

/// Shared state of the webhook listener.
#[derive(Clone)]
pub struct AppState {
    pub tx: mpsc::Sender<Job>,
    pub seen: RecentUpdates,
    pub notifier: Arc<dyn ResultNotifier>,
    pub allowed_extensions: Arc<Vec<String>>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookReply {
    pub ok: bool,
    pub status: &'static str,
}

fn reply(code: StatusCode, ok: bool, status: &'static str) -> (StatusCode, Json<WebhookReply>) {
    (code, Json(WebhookReply { ok, status }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Kept on the relay port for container health probes.
async fn health() -> &'static str {
    "OK"
}

/// Ingress for gateway webhook deliveries. Validates shape, claims the
/// update_id once per dedupe window, and enqueues the job. The gateway
/// caps concurrent deliveries at 40, so this handler never waits on
/// downstream work; it answers as soon as the job is queued.
pub async fn webhook(
    State(state): State<AppState>,
    body: String,
) -> (StatusCode, Json<WebhookReply>) {
    let update: Update = match serde_json::from_str(&body) {
        Ok(update) => update,
        Err(e) => {
            let err = RelayError::MalformedPayload(e.to_string());
            warn!("Rejected webhook payload: {}", err);
            return reply(StatusCode::BAD_REQUEST, false, "rejected");
        }
    };

    let update_id = update.update_id;
    let Some(file) = update.file_reference() else {
        debug!("Update {} carries no document, ignoring", update_id);
        send_usage_hint(&state, &update);
        return reply(StatusCode::OK, true, "ignored");
    };

    if !extension_allowed(&file.file_name, &state.allowed_extensions) {
        info!(
            "Update {}: {} has a disallowed extension",
            update_id, file.file_name
        );
        send_usage_hint(&state, &update);
        return reply(StatusCode::OK, true, "ignored");
    }

    if !state.seen.first_seen(update_id).await {
        return reply(StatusCode::OK, true, "duplicate");
    }

    match state.tx.try_send(Job { update, file }) {
        Ok(()) => {
            debug!("Update {} queued", update_id);
            reply(StatusCode::OK, true, "queued")
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Job queue full, asking the gateway to redeliver {}", update_id);
            // Release the dedupe claim or the redelivery would be dropped.
            state.seen.forget(update_id).await;
            reply(StatusCode::SERVICE_UNAVAILABLE, false, "overloaded")
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("Job queue closed, dropping update {}", update_id);
            state.seen.forget(update_id).await;
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, "shutting_down")
        }
    }
}

fn extension_allowed(file_name: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let ext = file_name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
    match ext {
        Some(ext) => allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

/// Off-path, best-effort reply telling the chat what this bot is for.
fn send_usage_hint(state: &AppState, update: &Update) {
    let Some(chat_id) = update.chat_id() else { return };
    // Only answer actual text messages, not service updates.
    let is_text = update
        .message
        .as_ref()
        .map(|m| m.text.is_some() || m.document.is_some())
        .unwrap_or(false);
    if !is_text {
        return;
    }
    let text = if state.allowed_extensions.is_empty() {
        "Send me a document and I'll upload it to the GitHub repository.".to_string()
    } else {
        format!(
            "Send me a document ({}) and I'll upload it to the GitHub repository.",
            state
                .allowed_extensions
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    let notifier = Arc::clone(&state.notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(chat_id, &text).await {
            warn!("Could not send usage hint to chat {}: {}", chat_id, e);
        }
    });
}
