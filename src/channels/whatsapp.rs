use serde_json::Value;

use crate::types::{
    Attachment, DeliveryReceipt, FailureReceipt, InboundMessage, MessageKind, ParsedWebhook,
    ReadReceipt, SkippedEvent, WebhookEvent,
};

pub const OBJECT: &str = "whatsapp_business_account";

const MEDIA_TYPES: &[&str] = &["image", "video", "audio", "voice", "document", "sticker"];

/// Normalizes a WhatsApp Cloud webhook body into events. Sub-events that
/// cannot be read are returned in `skipped`.
pub fn parse_whatsapp_payload(payload: &Value) -> ParsedWebhook {
    let mut parsed = ParsedWebhook::default();
    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for change in changes {
            let Some(value) = change.get("value") else {
                parsed.skipped.push(skip("change_without_value", &change));
                continue;
            };
            parsed.extend(parse_change_value(value));
        }
    }
    parsed
}

fn parse_change_value(value: &Value) -> ParsedWebhook {
    let mut parsed = ParsedWebhook::default();
    let Some(phone_number_id) = value
        .get("metadata")
        .and_then(|m| m.get("phone_number_id"))
        .and_then(id_string)
    else {
        parsed.skipped.push(skip("phone_number_id_missing", value));
        return parsed;
    };

    let contacts = value
        .get("contacts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for message in value
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match parse_message(&phone_number_id, &contacts, message) {
            Ok(inbound) => parsed.events.push(WebhookEvent::Message(inbound)),
            Err(reason) => parsed.skipped.push(skip(reason, message)),
        }
    }

    for status in value
        .get("statuses")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match parse_status(&phone_number_id, status) {
            Ok(Some(event)) => parsed.events.push(event),
            Ok(None) => {}
            Err(reason) => parsed.skipped.push(skip(reason, status)),
        }
    }
    parsed
}

fn parse_message(
    phone_number_id: &str,
    contacts: &[Value],
    message: &Value,
) -> Result<InboundMessage, &'static str> {
    let from = message
        .get("from")
        .and_then(id_string)
        .ok_or("sender_missing")?;
    let id = message
        .get("id")
        .and_then(id_string)
        .ok_or("message_id_missing")?;
    let msg_type = message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unsupported");

    let participant_name = contacts
        .iter()
        .find(|c| c.get("wa_id").and_then(id_string).as_deref() == Some(from.as_str()))
        .or_else(|| contacts.first())
        .and_then(|c| c.get("profile"))
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(String::from);

    let (kind, text, attachments) = classify(msg_type, message);
    let media_url = attachments.iter().find_map(|a| a.url.clone());

    Ok(InboundMessage {
        channel_external_id: phone_number_id.to_string(),
        participant_id: from,
        participant_name,
        provider_message_id: id,
        kind,
        text,
        media_url,
        attachments,
        timestamp_ms: message.get("timestamp").and_then(seconds_to_ms),
        payload: message.clone(),
    })
}

fn classify(msg_type: &str, message: &Value) -> (MessageKind, Option<String>, Vec<Attachment>) {
    let body = message.get(msg_type);
    match msg_type {
        "text" => (
            MessageKind::Text,
            body.and_then(|b| b.get("body"))
                .and_then(Value::as_str)
                .map(String::from),
            Vec::new(),
        ),
        "button" => (
            MessageKind::Text,
            body.and_then(|b| b.get("text"))
                .and_then(Value::as_str)
                .map(String::from),
            Vec::new(),
        ),
        "interactive" => {
            let title = body.and_then(|b| {
                b.get("button_reply")
                    .or_else(|| b.get("list_reply"))
                    .and_then(|r| r.get("title"))
                    .and_then(Value::as_str)
            });
            (MessageKind::Text, title.map(String::from), Vec::new())
        }
        "location" => {
            let text = body.and_then(|b| {
                let lat = b.get("latitude").and_then(Value::as_f64)?;
                let lng = b.get("longitude").and_then(Value::as_f64)?;
                Some(format!("{lat},{lng}"))
            });
            (MessageKind::Location, text, Vec::new())
        }
        t if MEDIA_TYPES.contains(&t) => {
            let kind = MessageKind::from_attachment(t);
            let caption = body
                .and_then(|b| b.get("caption"))
                .and_then(Value::as_str)
                .map(String::from);
            let attachment = Attachment {
                kind,
                url: body
                    .and_then(|b| b.get("link").or_else(|| b.get("url")))
                    .and_then(Value::as_str)
                    .map(String::from),
                media_id: body.and_then(|b| b.get("id")).and_then(id_string),
                mime_type: body
                    .and_then(|b| b.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(String::from),
            };
            (kind, caption, vec![attachment])
        }
        _ => (MessageKind::Unsupported, None, Vec::new()),
    }
}

fn parse_status(
    phone_number_id: &str,
    status: &Value,
) -> Result<Option<WebhookEvent>, &'static str> {
    let id = status
        .get("id")
        .and_then(id_string)
        .ok_or("status_id_missing")?;
    let recipient = status.get("recipient_id").and_then(id_string);
    let state = status
        .get("status")
        .and_then(Value::as_str)
        .ok_or("status_missing")?;

    let event = match state {
        "delivered" => WebhookEvent::Delivery(DeliveryReceipt {
            channel_external_id: phone_number_id.to_string(),
            participant_id: recipient,
            provider_message_ids: vec![id],
            watermark_ms: status.get("timestamp").and_then(seconds_to_ms),
        }),
        "read" => WebhookEvent::Read(ReadReceipt {
            channel_external_id: phone_number_id.to_string(),
            participant_id: recipient.ok_or("recipient_missing")?,
            provider_message_ids: vec![id],
            watermark_ms: status.get("timestamp").and_then(seconds_to_ms),
        }),
        "failed" => {
            let first_error = status
                .get("errors")
                .and_then(Value::as_array)
                .and_then(|e| e.first());
            WebhookEvent::Failed(FailureReceipt {
                channel_external_id: phone_number_id.to_string(),
                provider_message_id: id,
                error_code: first_error.and_then(|e| e.get("code")).and_then(id_string),
                error_message: first_error
                    .and_then(|e| {
                        e.get("error_data")
                            .and_then(|d| d.get("details"))
                            .or_else(|| e.get("message"))
                            .or_else(|| e.get("title"))
                    })
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        }
        // `sent` only echoes what the send call already recorded.
        "sent" => return Ok(None),
        _ => return Err("status_unknown"),
    };
    Ok(Some(event))
}

/// Provider ids arrive as strings but some fixtures use numbers.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn seconds_to_ms(value: &Value) -> Option<i64> {
    let seconds = match value {
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    seconds.checked_mul(1000)
}

fn skip(reason: &str, raw: &Value) -> SkippedEvent {
    SkippedEvent {
        reason: reason.to_string(),
        raw: raw.clone(),
    }
}
