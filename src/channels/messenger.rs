use serde_json::Value;

use super::whatsapp::id_string;
use crate::types::{
    Attachment, DeliveryReceipt, InboundMessage, MessageKind, ParsedWebhook, ReadReceipt,
    SkippedEvent, WebhookEvent,
};

pub const OBJECTS: &[&str] = &["page", "instagram"];

pub fn parse_messenger_payload(payload: &Value) -> ParsedWebhook {
    let mut parsed = ParsedWebhook::default();
    for entry in payload
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let entry_id = entry.get("id").and_then(id_string);
        for event in entry
            .get("messaging")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            match parse_messaging(entry_id.as_deref(), event) {
                Ok(Some(ev)) => parsed.events.push(ev),
                Ok(None) => {}
                Err(reason) => parsed.skipped.push(SkippedEvent {
                    reason: reason.to_string(),
                    raw: event.clone(),
                }),
            }
        }
    }
    parsed
}

fn parse_messaging(
    entry_id: Option<&str>,
    event: &Value,
) -> Result<Option<WebhookEvent>, &'static str> {
    let page_id = event
        .get("recipient")
        .and_then(|r| r.get("id"))
        .and_then(id_string)
        .or_else(|| entry_id.map(String::from))
        .ok_or("page_id_missing")?;
    let sender = event
        .get("sender")
        .and_then(|s| s.get("id"))
        .and_then(id_string)
        .ok_or("sender_missing")?;

    if let Some(message) = event.get("message") {
        if message
            .get("is_echo")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Ok(None);
        }
        return parse_message(page_id, sender, event, message).map(Some);
    }

    if let Some(delivery) = event.get("delivery") {
        let mids: Vec<String> = delivery
            .get("mids")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(id_string)
            .collect();
        if mids.is_empty() {
            return Err("delivery_without_mids");
        }
        return Ok(Some(WebhookEvent::Delivery(DeliveryReceipt {
            channel_external_id: page_id,
            participant_id: Some(sender),
            provider_message_ids: mids,
            watermark_ms: delivery.get("watermark").and_then(Value::as_i64),
        })));
    }

    if let Some(read) = event.get("read") {
        return Ok(Some(WebhookEvent::Read(ReadReceipt {
            channel_external_id: page_id,
            participant_id: sender,
            provider_message_ids: Vec::new(),
            watermark_ms: read.get("watermark").and_then(Value::as_i64),
        })));
    }

    Err("unsupported_messaging_event")
}

fn parse_message(
    page_id: String,
    sender: String,
    event: &Value,
    message: &Value,
) -> Result<WebhookEvent, &'static str> {
    let mid = message
        .get("mid")
        .and_then(id_string)
        .ok_or("message_id_missing")?;

    let attachments: Vec<Attachment> = message
        .get("attachments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|a| Attachment {
            kind: MessageKind::from_attachment(
                a.get("type").and_then(Value::as_str).unwrap_or_default(),
            ),
            url: a
                .get("payload")
                .and_then(|p| p.get("url"))
                .and_then(Value::as_str)
                .map(String::from),
            media_id: None,
            mime_type: None,
        })
        .collect();

    let text = message
        .get("text")
        .and_then(Value::as_str)
        .map(String::from);
    let kind = match (&text, attachments.first()) {
        (_, Some(first)) => first.kind,
        (Some(_), None) => MessageKind::Text,
        (None, None) => MessageKind::Unsupported,
    };
    let media_url = attachments.iter().find_map(|a| a.url.clone());

    Ok(WebhookEvent::Message(InboundMessage {
        channel_external_id: page_id,
        participant_id: sender,
        participant_name: None,
        provider_message_id: mid,
        kind,
        text,
        media_url,
        attachments,
        timestamp_ms: event.get("timestamp").and_then(Value::as_i64),
        payload: event.clone(),
    }))
}
