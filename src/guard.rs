use serde::Serialize;
use serde_json::json;
use sqlx::AnyPool;

use crate::audit;
use crate::db::{self, DbKind, WorkspaceSettings};
use crate::error::HubError;
use crate::types::ThreadStatus;

/// Free-form replies are allowed for 24h after the consumer's last message.
pub const SESSION_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

pub const OPT_OUT_KEYWORDS: &[&str] = &["stop", "unsubscribe", "cancel", "end", "quit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    SessionExpired,
    RecipientOptedOut,
    NotWhitelisted,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionExpired => "session_expired",
            Self::RecipientOptedOut => "recipient_opted_out",
            Self::NotWhitelisted => "not_whitelisted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl SendDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), HubError> {
        match self.reason {
            Some(reason) if !self.allowed => Err(HubError::SendDenied(reason)),
            _ => Ok(()),
        }
    }
}

/// Whole-token match against the opt-out keywords, ignoring case and the
/// punctuation around tokens.
pub fn is_opt_out_text(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| OPT_OUT_KEYWORDS.contains(&token))
}

pub fn session_open(last_inbound_ms: Option<i64>, now_ms: i64) -> bool {
    match last_inbound_ms {
        Some(last) => now_ms - last < SESSION_WINDOW_MS,
        None => false,
    }
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

pub fn is_whitelisted(settings: &WorkspaceSettings, destination: &str) -> bool {
    let wanted = digits_only(destination);
    settings.sandbox_allow_list.iter().any(|entry| {
        let digits = digits_only(entry);
        if digits.is_empty() || wanted.is_empty() {
            entry.trim() == destination.trim()
        } else {
            digits == wanted
        }
    })
}

pub async fn can_send_now(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
) -> Result<SendDecision, HubError> {
    can_send_at(pool, kind, thread_id, db::now_ms()).await
}

pub async fn can_send_at(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    now_ms: i64,
) -> Result<SendDecision, HubError> {
    evaluate(pool, kind, thread_id, now_ms, true).await
}

/// Templates are exempt from the session window; opt-out and sandbox still
/// apply.
pub async fn can_send_template_now(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
) -> Result<SendDecision, HubError> {
    evaluate(pool, kind, thread_id, db::now_ms(), false).await
}

async fn evaluate(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    now_ms: i64,
    enforce_window: bool,
) -> Result<SendDecision, HubError> {
    let thread = db::get_thread(pool, kind, thread_id)
        .await?
        .ok_or(HubError::NotFound("thread"))?;
    if thread.status == ThreadStatus::OptOut.as_str() {
        return Ok(SendDecision::deny(DenyReason::RecipientOptedOut));
    }

    let last_inbound = db::latest_inbound_message(pool, kind, thread_id).await?;
    if enforce_window && !session_open(last_inbound.as_ref().map(|m| m.created_at), now_ms) {
        return Ok(SendDecision::deny(DenyReason::SessionExpired));
    }

    let last_text = last_inbound.as_ref().and_then(|m| m.body.as_deref());
    if last_text.is_some_and(is_opt_out_text) {
        let flipped =
            db::set_thread_status(pool, kind, thread_id, ThreadStatus::OptOut.as_str()).await?;
        if flipped {
            tracing::info!(
                workspace_id = %thread.workspace_id,
                thread_id = %thread_id,
                "thread opted out"
            );
            audit::record_event(
                pool,
                kind,
                &thread.workspace_id,
                "thread.opt_out",
                json!({
                    "threadId": thread_id,
                    "messageId": last_inbound.as_ref().map(|m| m.id.clone()),
                }),
            )
            .await;
        }
        return Ok(SendDecision::deny(DenyReason::RecipientOptedOut));
    }

    if let Some(settings) = db::get_workspace_settings(pool, kind, &thread.workspace_id).await? {
        if settings.sandbox_enabled && !is_whitelisted(&settings, &thread.participant_id) {
            return Ok(SendDecision::deny(DenyReason::NotWhitelisted));
        }
    }

    Ok(SendDecision::allow())
}
