use serde_json::json;

use crate::audit;
use crate::channels::graph::{ChannelCredentials, ChannelError, SendReceipt};
use crate::db::{self, MessageRecord, ThreadRecord};
use crate::error::HubError;
use crate::guard;
use crate::types::{Direction, MessageKind, MessageStatus};
use crate::AppState;

async fn load_thread(
    state: &AppState,
    workspace_id: &str,
    thread_id: &str,
) -> Result<ThreadRecord, HubError> {
    db::get_thread(&state.pool, state.db_kind, thread_id)
        .await?
        .filter(|t| t.workspace_id == workspace_id)
        .ok_or(HubError::NotFound("thread"))
}

/// Sends a free-form text reply after the session/consent guard allows it.
pub async fn send_thread_text(
    state: &AppState,
    workspace_id: &str,
    thread_id: &str,
    body: &str,
) -> Result<MessageRecord, HubError> {
    if body.trim().is_empty() {
        return Err(HubError::BadRequest("body_required".to_string()));
    }
    let thread = load_thread(state, workspace_id, thread_id).await?;
    guard::can_send_now(&state.pool, state.db_kind, thread_id)
        .await?
        .into_result()?;

    let to = thread.participant_id.clone();
    deliver(state, &thread, MessageKind::Text, body, |creds| async move {
        state.graph.send_text(&creds, &to, body).await
    })
    .await
}

/// Sends an approved template into a thread. Not bound by the session window.
pub async fn send_thread_template(
    state: &AppState,
    workspace_id: &str,
    thread_id: &str,
    template_name: &str,
    language: &str,
) -> Result<MessageRecord, HubError> {
    if template_name.trim().is_empty() {
        return Err(HubError::BadRequest("template_name_required".to_string()));
    }
    let thread = load_thread(state, workspace_id, thread_id).await?;
    guard::can_send_template_now(&state.pool, state.db_kind, thread_id)
        .await?
        .into_result()?;

    let to = thread.participant_id.clone();
    deliver(state, &thread, MessageKind::Template, template_name, |creds| async move {
        state
            .graph
            .send_template(&creds, &to, template_name, language)
            .await
    })
    .await
}

/// Records a queued outbound message, performs the send and settles the row.
async fn deliver<F, Fut>(
    state: &AppState,
    thread: &ThreadRecord,
    kind: MessageKind,
    body: &str,
    send: F,
) -> Result<MessageRecord, HubError>
where
    F: FnOnce(ChannelCredentials) -> Fut,
    Fut: std::future::Future<Output = Result<SendReceipt, ChannelError>>,
{
    let (pool, db_kind) = (&state.pool, state.db_kind);
    let channel = db::get_channel(pool, db_kind, &thread.channel_id)
        .await?
        .ok_or(HubError::NotFound("channel"))?;
    let creds = ChannelCredentials::from_record(&channel)?;

    let now = db::now_ms();
    let record = MessageRecord {
        id: db::new_id(),
        workspace_id: thread.workspace_id.clone(),
        thread_id: thread.id.clone(),
        provider_message_id: None,
        direction: Direction::Outbound.as_str().to_string(),
        kind: kind.as_str().to_string(),
        status: MessageStatus::Queued.as_str().to_string(),
        body: Some(body.to_string()),
        media_url: None,
        error_code: None,
        error_message: None,
        payload: None,
        created_at: now,
        sent_at: None,
        delivered_at: None,
        read_at: None,
        failed_at: None,
        status_updated_at: Some(now),
    };
    db::insert_message(pool, db_kind, &record).await?;

    match send(creds).await {
        Ok(receipt) => {
            let sent_at = db::now_ms();
            db::mark_outbound_sent(pool, db_kind, &record.id, &receipt.provider_message_id, sent_at)
                .await?;
            db::record_thread_outbound(pool, db_kind, &thread.id, Some(body), sent_at).await?;
            audit::record_event(
                pool,
                db_kind,
                &thread.workspace_id,
                "message.outbound",
                json!({
                    "threadId": thread.id,
                    "messageId": record.id,
                    "providerMessageId": receipt.provider_message_id,
                    "type": kind.as_str(),
                }),
            )
            .await;
        }
        Err(err) => {
            tracing::warn!(
                workspace_id = %thread.workspace_id,
                thread_id = %thread.id,
                error = %err,
                "outbound send failed"
            );
            db::mark_outbound_failed(
                pool,
                db_kind,
                &record.id,
                err.code(),
                &err.to_string(),
                db::now_ms(),
            )
            .await?;
            return Err(HubError::Upstream(err));
        }
    }

    db::get_message(pool, db_kind, &record.id)
        .await?
        .ok_or(HubError::NotFound("message"))
}
