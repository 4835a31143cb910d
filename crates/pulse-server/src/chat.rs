use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tracing::{error, info};

use pulse_core::events::ChangeEvent;
use pulse_core::ids::AccountId;
use pulse_store::chat::{ChatMessageRow, ChatRepo, SenderRole};
use pulse_store::StoreError;

use crate::dispatch::Dispatcher;
use crate::error::ApiError;
use crate::server::AppState;

/// History and live relay for one user/support conversation.
///
/// Sends are relayed to every open stream, not just the conversation's
/// participants; clients filter by account id. Per-conversation
/// addressing would need a topic field on the connection.
pub struct ChatService {
    repo: ChatRepo,
    dispatcher: Arc<Dispatcher>,
}

impl ChatService {
    pub fn new(repo: ChatRepo, dispatcher: Arc<Dispatcher>) -> Self {
        Self { repo, dispatcher }
    }

    /// Stored conversation, oldest first. No side effects on seen state.
    pub fn history(&self, account_id: &AccountId) -> Result<Vec<ChatMessageRow>, StoreError> {
        self.repo.history(account_id)
    }

    /// Persist a message, then relay exactly one chat_message frame.
    pub fn send(
        &self,
        account_id: &AccountId,
        sender: SenderRole,
        body: &str,
    ) -> Result<ChatMessageRow, StoreError> {
        let message = self.repo.append(account_id, sender, body)?;

        match ChangeEvent::chat_message(&message) {
            Ok(event) => {
                let delivered = self.dispatcher.broadcast(&event);
                info!(
                    account_id = %account_id,
                    message_id = %message.id,
                    delivered,
                    "chat message relayed"
                );
            }
            // Unreachable for a row we just serialized into the store,
            // but a lost relay must not lose the stored message.
            Err(e) => {
                error!(account_id = %account_id, error = %e, "failed to encode chat frame");
            }
        }

        Ok(message)
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender: SenderRole,
    pub body: String,
}

pub async fn history_handler(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<ChatMessageRow>>, ApiError> {
    let account_id = AccountId::from_raw(account_id);
    Ok(Json(state.chat.history(&account_id)?))
}

pub async fn send_handler(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<ChatMessageRow>, ApiError> {
    let account_id = AccountId::from_raw(account_id);
    let message = state.chat.send(&account_id, request.sender, &request.body)?;
    Ok(Json(message))
}
