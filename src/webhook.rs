use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::channels::{messenger, whatsapp};
use crate::db::{self, ChannelRecord, MessageRecord};
use crate::error::HubError;
use crate::routing;
use crate::types::{
    DeliveryReceipt, Direction, FailureReceipt, InboundMessage, MessageStatus,
    ParsedWebhook, ReadReceipt, SkippedEvent, WebhookEvent,
};
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const PREVIEW_CHARS: usize = 120;

/// Checks `sha256=<hex>` against an HMAC-SHA256 of the raw body. Without a
/// configured secret nothing verifies.
pub fn verify_signature(app_secret: Option<&str>, signature_header: Option<&str>, body: &[u8]) -> bool {
    let Some(secret) = app_secret.filter(|s| !s.is_empty()) else {
        return false;
    };
    let signature = signature_header.unwrap_or("").trim();
    let Some(hex_sig) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Header value a provider would send for `body`.
pub fn sign_body(app_secret: &str, body: &[u8]) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Subscription handshake. Returns the challenge to echo back when the mode
/// and token match.
pub fn verify_handshake(
    verify_token: Option<&str>,
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
) -> Option<String> {
    let expected = verify_token.filter(|t| !t.is_empty())?;
    if mode != Some("subscribe") || token != Some(expected) {
        return None;
    }
    challenge.filter(|c| !c.is_empty()).map(String::from)
}

pub fn parse_payload(payload: &Value) -> ParsedWebhook {
    match payload.get("object").and_then(Value::as_str) {
        Some(whatsapp::OBJECT) => whatsapp::parse_whatsapp_payload(payload),
        Some(object) if messenger::OBJECTS.contains(&object) => {
            messenger::parse_messenger_payload(payload)
        }
        other => ParsedWebhook {
            events: Vec::new(),
            skipped: vec![SkippedEvent {
                reason: format!("unsupported_object:{}", other.unwrap_or("none")),
                raw: Value::Null,
            }],
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Inserted { thread_id: String, message_id: String },
    Duplicate,
    ChannelUnknown,
    ThreadUnknown,
    Receipt { updated: u64 },
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub events: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub receipts: usize,
    pub ignored: usize,
    pub failed: usize,
    pub skipped: usize,
}

fn provider_id_of(event: &WebhookEvent) -> Option<&str> {
    match event {
        WebhookEvent::Message(m) => Some(&m.provider_message_id),
        WebhookEvent::Delivery(d) => d.provider_message_ids.first().map(String::as_str),
        WebhookEvent::Read(r) => r.provider_message_ids.first().map(String::as_str),
        WebhookEvent::Failed(f) => Some(&f.provider_message_id),
    }
}

/// Applies each event independently; one failing event never stops the rest.
pub async fn ingest(state: &AppState, parsed: ParsedWebhook) -> IngestReport {
    let mut report = IngestReport {
        skipped: parsed.skipped.len(),
        ..Default::default()
    };
    for skipped in &parsed.skipped {
        tracing::warn!(reason = %skipped.reason, "webhook sub-event skipped");
    }

    for event in parsed.events {
        report.events += 1;
        match process_event(state, &event).await {
            Ok(EventOutcome::Inserted { .. }) => report.inserted += 1,
            Ok(EventOutcome::Duplicate) => report.duplicates += 1,
            Ok(EventOutcome::Receipt { .. }) => report.receipts += 1,
            Ok(EventOutcome::ChannelUnknown) | Ok(EventOutcome::ThreadUnknown) => {
                report.ignored += 1
            }
            Err((workspace_id, err)) => {
                report.failed += 1;
                tracing::error!(
                    workspace_id = workspace_id.as_deref().unwrap_or("-"),
                    channel = %event.channel_external_id(),
                    provider_message_id = provider_id_of(&event).unwrap_or("-"),
                    event = event.label(),
                    error = %err,
                    "webhook event failed"
                );
            }
        }
    }
    report
}

/// Resolves the channel and applies one event. Errors carry the workspace id
/// when it was known.
pub async fn process_event(
    state: &AppState,
    event: &WebhookEvent,
) -> Result<EventOutcome, (Option<String>, HubError)> {
    let channel = db::find_channel_by_external_id(&state.pool, state.db_kind, event.channel_external_id())
        .await
        .map_err(|e| (None, HubError::from(e)))?;
    let Some(channel) = channel else {
        tracing::info!(
            channel = %event.channel_external_id(),
            event = event.label(),
            "webhook for unknown channel ignored"
        );
        return Ok(EventOutcome::ChannelUnknown);
    };

    let result = match event {
        WebhookEvent::Message(message) => handle_message(state, &channel, message).await,
        WebhookEvent::Delivery(receipt) => handle_delivery(state, &channel, receipt).await,
        WebhookEvent::Read(receipt) => handle_read(state, &channel, receipt).await,
        WebhookEvent::Failed(receipt) => handle_failed(state, &channel, receipt).await,
    };
    result.map_err(|err| (Some(channel.workspace_id.clone()), err))
}

fn preview_for(message: &InboundMessage) -> String {
    match message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => text.chars().take(PREVIEW_CHARS).collect(),
        None => format!("[{}]", message.kind.as_str()),
    }
}

pub async fn handle_message(
    state: &AppState,
    channel: &ChannelRecord,
    message: &InboundMessage,
) -> Result<EventOutcome, HubError> {
    let (pool, kind) = (&state.pool, state.db_kind);
    let workspace_id = channel.workspace_id.as_str();

    if db::message_exists(pool, kind, workspace_id, &message.provider_message_id).await? {
        return Ok(EventOutcome::Duplicate);
    }

    let (thread, created) = db::resolve_or_create_thread(
        pool,
        kind,
        workspace_id,
        &channel.id,
        &message.participant_id,
        message.participant_name.as_deref(),
    )
    .await?;
    if created {
        tracing::info!(
            workspace_id = %workspace_id,
            thread_id = %thread.id,
            participant_id = %message.participant_id,
            "thread opened"
        );
    }

    let now = db::now_ms();
    let created_at = message.timestamp_ms.unwrap_or(now);
    let record = MessageRecord {
        id: db::new_id(),
        workspace_id: workspace_id.to_string(),
        thread_id: thread.id.clone(),
        provider_message_id: Some(message.provider_message_id.clone()),
        direction: Direction::Inbound.as_str().to_string(),
        kind: message.kind.as_str().to_string(),
        status: MessageStatus::Sent.as_str().to_string(),
        body: message.text.clone(),
        media_url: message.media_url.clone(),
        error_code: None,
        error_message: None,
        payload: Some(message.payload.clone()),
        created_at,
        sent_at: Some(created_at),
        delivered_at: None,
        read_at: None,
        failed_at: None,
        status_updated_at: Some(now),
    };
    if !db::insert_message(pool, kind, &record).await? {
        return Ok(EventOutcome::Duplicate);
    }

    let preview = preview_for(message);
    db::record_thread_inbound(pool, kind, &thread.id, Some(&preview), created_at).await?;

    crate::audit::record_event(
        pool,
        kind,
        workspace_id,
        "message.inbound",
        json!({
            "threadId": thread.id,
            "messageId": record.id,
            "providerMessageId": message.provider_message_id,
            "type": message.kind.as_str(),
        }),
    )
    .await;

    routing::maybe_auto_route_inbound(
        pool,
        kind,
        state.assigner.as_ref(),
        state.config.routing.auto_route_default,
        workspace_id,
        &thread.id,
        message.text.as_deref(),
    )
    .await;

    Ok(EventOutcome::Inserted {
        thread_id: thread.id,
        message_id: record.id,
    })
}

pub async fn handle_delivery(
    state: &AppState,
    channel: &ChannelRecord,
    receipt: &DeliveryReceipt,
) -> Result<EventOutcome, HubError> {
    let updated = db::mark_messages_delivered(
        &state.pool,
        state.db_kind,
        &channel.workspace_id,
        &receipt.provider_message_ids,
        db::now_ms(),
    )
    .await?;
    Ok(EventOutcome::Receipt { updated })
}

pub async fn handle_read(
    state: &AppState,
    channel: &ChannelRecord,
    receipt: &ReadReceipt,
) -> Result<EventOutcome, HubError> {
    let (pool, kind) = (&state.pool, state.db_kind);
    let thread = db::find_live_thread(
        pool,
        kind,
        &channel.workspace_id,
        &channel.id,
        &receipt.participant_id,
    )
    .await?;
    let Some(thread) = thread else {
        return Ok(EventOutcome::ThreadUnknown);
    };

    db::reset_thread_unread(pool, kind, &thread.id).await?;
    let now = db::now_ms();
    let updated = if receipt.provider_message_ids.is_empty() {
        db::mark_thread_outbound_read(pool, kind, &thread.id, receipt.watermark_ms, now).await?
    } else {
        db::mark_messages_read_by_ids(
            pool,
            kind,
            &channel.workspace_id,
            &receipt.provider_message_ids,
            now,
        )
        .await?
    };
    Ok(EventOutcome::Receipt { updated })
}

pub async fn handle_failed(
    state: &AppState,
    channel: &ChannelRecord,
    receipt: &FailureReceipt,
) -> Result<EventOutcome, HubError> {
    let updated = db::mark_provider_message_failed(
        &state.pool,
        state.db_kind,
        &channel.workspace_id,
        &receipt.provider_message_id,
        receipt.error_code.as_deref(),
        receipt.error_message.as_deref(),
        db::now_ms(),
    )
    .await?;
    if updated > 0 {
        tracing::warn!(
            workspace_id = %channel.workspace_id,
            provider_message_id = %receipt.provider_message_id,
            error_code = receipt.error_code.as_deref().unwrap_or("-"),
            "provider reported delivery failure"
        );
    }
    Ok(EventOutcome::Receipt { updated })
}
