use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Whatsapp,
    Messenger,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Messenger => "messenger",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "whatsapp" => Some(Self::Whatsapp),
            "messenger" | "instagram" | "page" => Some(Self::Messenger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Open,
    OptOut,
    Closed,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::OptOut => "opt_out",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "opt_out" => Some(Self::OptOut),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Delivery status of a single message. Moves forward only:
/// `queued -> sent -> delivered -> read`, or to `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Template,
    Image,
    Video,
    Audio,
    File,
    Sticker,
    Location,
    Unsupported,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Template => "template",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Unsupported => "unsupported",
        }
    }

    /// Maps a provider attachment/message kind onto the stored type.
    pub fn from_attachment(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "text" => Self::Text,
            "image" | "photo" => Self::Image,
            "video" => Self::Video,
            "audio" | "voice" => Self::Audio,
            "file" | "document" => Self::File,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            "template" | "button" | "interactive" => Self::Template,
            _ => Self::Unsupported,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Running,
    Finished,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Queued,
    Processing,
    Sent,
    Failed,
}

impl RecipientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: MessageKind,
    pub url: Option<String>,
    pub media_id: Option<String>,
    pub mime_type: Option<String>,
}

/// A consumer message normalized from any provider payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_external_id: String,
    pub participant_id: String,
    pub participant_name: Option<String>,
    pub provider_message_id: String,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub attachments: Vec<Attachment>,
    pub timestamp_ms: Option<i64>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub channel_external_id: String,
    pub participant_id: Option<String>,
    pub provider_message_ids: Vec<String>,
    pub watermark_ms: Option<i64>,
}

/// Read receipt. `provider_message_ids` is empty for thread-level receipts,
/// in which case `watermark_ms` bounds which outbound messages get marked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub channel_external_id: String,
    pub participant_id: String,
    pub provider_message_ids: Vec<String>,
    pub watermark_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReceipt {
    pub channel_external_id: String,
    pub provider_message_id: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEvent {
    Message(InboundMessage),
    Delivery(DeliveryReceipt),
    Read(ReadReceipt),
    Failed(FailureReceipt),
}

impl WebhookEvent {
    pub fn channel_external_id(&self) -> &str {
        match self {
            Self::Message(m) => &m.channel_external_id,
            Self::Delivery(d) => &d.channel_external_id,
            Self::Read(r) => &r.channel_external_id,
            Self::Failed(f) => &f.channel_external_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Delivery(_) => "delivery",
            Self::Read(_) => "read",
            Self::Failed(_) => "failed",
        }
    }
}

/// A sub-event that could not be normalized. Kept so one bad entry is
/// reported without dropping its siblings.
#[derive(Debug, Clone)]
pub struct SkippedEvent {
    pub reason: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Default, Clone)]
pub struct ParsedWebhook {
    pub events: Vec<WebhookEvent>,
    pub skipped: Vec<SkippedEvent>,
}

impl ParsedWebhook {
    pub fn extend(&mut self, other: ParsedWebhook) {
        self.events.extend(other.events);
        self.skipped.extend(other.skipped);
    }
}
