use relay_hub::channels::messenger::parse_messenger_payload;
use relay_hub::types::{MessageKind, WebhookEvent};
use serde_json::json;

fn page_payload(messaging: serde_json::Value) -> serde_json::Value {
    json!({
        "object": "page",
        "entry": [{"id": "PAGE1", "time": 1700000000000_i64, "messaging": messaging}]
    })
}

#[test]
fn test_text_message() {
    let payload = page_payload(json!([{
        "sender": {"id": "PSID1"},
        "recipient": {"id": "PAGE1"},
        "timestamp": 1700000000123_i64,
        "message": {"mid": "m_1", "text": "I need a refund"}
    }]));
    let parsed = parse_messenger_payload(&payload);
    assert_eq!(parsed.events.len(), 1);
    let WebhookEvent::Message(msg) = &parsed.events[0] else {
        panic!("expected message event");
    };
    assert_eq!(msg.channel_external_id, "PAGE1");
    assert_eq!(msg.participant_id, "PSID1");
    assert_eq!(msg.provider_message_id, "m_1");
    assert_eq!(msg.kind, MessageKind::Text);
    assert_eq!(msg.timestamp_ms, Some(1_700_000_000_123));
}

#[test]
fn test_attachment_message() {
    let payload = page_payload(json!([{
        "sender": {"id": "PSID1"},
        "recipient": {"id": "PAGE1"},
        "message": {"mid": "m_2", "attachments": [
            {"type": "image", "payload": {"url": "https://cdn.example.com/a.jpg"}}
        ]}
    }]));
    let parsed = parse_messenger_payload(&payload);
    let WebhookEvent::Message(msg) = &parsed.events[0] else {
        panic!("expected message event");
    };
    assert_eq!(msg.kind, MessageKind::Image);
    assert_eq!(msg.media_url.as_deref(), Some("https://cdn.example.com/a.jpg"));
}

#[test]
fn test_echo_is_ignored() {
    let payload = page_payload(json!([{
        "sender": {"id": "PAGE1"},
        "recipient": {"id": "PSID1"},
        "message": {"mid": "m_3", "text": "our reply", "is_echo": true}
    }]));
    let parsed = parse_messenger_payload(&payload);
    assert!(parsed.events.is_empty());
    assert!(parsed.skipped.is_empty());
}

#[test]
fn test_delivery_and_read() {
    let payload = page_payload(json!([
        {
            "sender": {"id": "PSID1"},
            "recipient": {"id": "PAGE1"},
            "delivery": {"mids": ["m_out_1", "m_out_2"], "watermark": 1700000000500_i64}
        },
        {
            "sender": {"id": "PSID1"},
            "recipient": {"id": "PAGE1"},
            "read": {"watermark": 1700000000900_i64}
        }
    ]));
    let parsed = parse_messenger_payload(&payload);
    assert_eq!(parsed.events.len(), 2);
    match &parsed.events[0] {
        WebhookEvent::Delivery(d) => {
            assert_eq!(d.provider_message_ids, vec!["m_out_1", "m_out_2"]);
            assert_eq!(d.participant_id.as_deref(), Some("PSID1"));
        }
        other => panic!("unexpected {other:?}"),
    }
    match &parsed.events[1] {
        WebhookEvent::Read(r) => {
            assert!(r.provider_message_ids.is_empty());
            assert_eq!(r.watermark_ms, Some(1_700_000_000_900));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_instagram_object_and_bad_sibling() {
    let payload = json!({
        "object": "instagram",
        "entry": [{"id": "IG1", "messaging": [
            {"recipient": {"id": "IG1"}, "message": {"mid": "m_x", "text": "no sender"}},
            {"sender": {"id": "IGSID"}, "recipient": {"id": "IG1"}, "message": {"mid": "m_y", "text": "hello"}}
        ]}]
    });
    let parsed = parse_messenger_payload(&payload);
    assert_eq!(parsed.events.len(), 1);
    assert_eq!(parsed.skipped.len(), 1);
    assert_eq!(parsed.skipped[0].reason, "sender_missing");
}
