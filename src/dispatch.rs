use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

use crate::audit;
use crate::channels::graph::{ChannelCredentials, ChannelError, GraphClient, SendReceipt};
use crate::db::{self, ContactRecord, RecipientRecord};
use crate::error::HubError;
use crate::guard::digits_only;
use crate::types::{CampaignStatus, ChannelKind, RecipientStatus};
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub campaign_id: String,
    pub processed: usize,
    pub queued_remaining: i64,
    pub dry_run: bool,
    pub status: CampaignStatus,
}

pub fn backoff_delay(backoff_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(backoff_ms.saturating_mul(u64::from(attempt.max(1))))
}

/// Sends a template, retrying only on 429. Returns the result together with
/// the number of attempts made.
pub async fn send_with_retry(
    graph: &GraphClient,
    channel: &ChannelCredentials,
    to: &str,
    template_name: &str,
    language: &str,
    max_attempts: u32,
    backoff_ms: u64,
) -> (Result<SendReceipt, ChannelError>, u32) {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match graph.send_template(channel, to, template_name, language).await {
            Err(err) if err.is_rate_limited() && attempt < max_attempts => {
                let delay = backoff_delay(backoff_ms, attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "template send rate limited");
                sleep(delay).await;
                attempt += 1;
            }
            result => return (result, attempt),
        }
    }
}

/// What happens to one claimed recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Fail(&'static str),
    Requeue(&'static str),
    Send(String),
}

fn consent_verdict(
    recipient: &RecipientRecord,
    contact: Option<&ContactRecord>,
    workspace_id: &str,
    dry_run: bool,
) -> Verdict {
    let contact = contact.filter(|c| c.workspace_id == workspace_id);
    if contact.is_some_and(|c| c.opted_out) {
        return Verdict::Fail("opted_out");
    }
    let Some(contact) = contact.filter(|c| c.opted_in) else {
        return Verdict::Fail("not_opted_in");
    };
    let phone = recipient
        .phone
        .as_deref()
        .or(contact.phone.as_deref())
        .map(digits_only)
        .unwrap_or_default();
    if phone.is_empty() {
        return Verdict::Fail("phone_missing");
    }
    if dry_run {
        return Verdict::Requeue("dry_run");
    }
    Verdict::Send(phone)
}

pub async fn run_batch(state: &AppState, campaign_id: &str) -> Result<BatchSummary, HubError> {
    let (pool, kind) = (&state.pool, state.db_kind);
    let cfg = &state.config.dispatch;
    let dry_run = cfg.dry_run;

    let campaign = db::get_campaign(pool, kind, campaign_id)
        .await?
        .ok_or(HubError::NotFound("campaign"))?;
    let mut status = CampaignStatus::parse(&campaign.status).unwrap_or(CampaignStatus::Failed);

    if status.is_terminal() {
        let remaining = db::count_recipients_with_status(
            pool,
            kind,
            campaign_id,
            RecipientStatus::Queued.as_str(),
        )
        .await?;
        return Ok(BatchSummary {
            campaign_id: campaign_id.to_string(),
            processed: 0,
            queued_remaining: remaining,
            dry_run,
            status,
        });
    }

    if status == CampaignStatus::Draft {
        if db::start_campaign(pool, kind, campaign_id, db::now_ms()).await? {
            audit::record_event(
                pool,
                kind,
                &campaign.workspace_id,
                "campaign.started",
                json!({"campaignId": campaign_id}),
            )
            .await;
        }
        status = CampaignStatus::Running;
    }

    let batch = db::pull_queued_recipients(pool, kind, campaign_id, cfg.batch_size.max(1)).await?;
    if batch.is_empty() {
        if db::finish_campaign(pool, kind, campaign_id, db::now_ms()).await? {
            audit::record_event(
                pool,
                kind,
                &campaign.workspace_id,
                "campaign.finished",
                json!({"campaignId": campaign_id}),
            )
            .await;
        }
        return Ok(BatchSummary {
            campaign_id: campaign_id.to_string(),
            processed: 0,
            queued_remaining: 0,
            dry_run,
            status: CampaignStatus::Finished,
        });
    }

    let mut claimed = Vec::with_capacity(batch.len());
    for recipient in batch {
        match db::claim_recipient(pool, kind, &recipient.id, db::now_ms()).await {
            Ok(true) => claimed.push(recipient),
            Ok(false) => {}
            Err(err) => tracing::error!(
                campaign_id = %campaign_id,
                recipient_id = %recipient.id,
                error = %err,
                "recipient claim failed"
            ),
        }
    }

    let contact_ids: Vec<String> = claimed.iter().filter_map(|r| r.contact_id.clone()).collect();
    let lookups = async {
        let consent = db::load_consent(pool, kind, &contact_ids).await?;
        let channel = db::find_workspace_channel(
            pool,
            kind,
            &campaign.workspace_id,
            ChannelKind::Whatsapp.as_str(),
        )
        .await?
        .map(|c| ChannelCredentials::from_record(&c))
        .transpose()?;
        Ok::<_, anyhow::Error>((consent, channel))
    }
    .await;
    let (consent, channel) = match lookups {
        Ok(lookups) => lookups,
        Err(err) => {
            release_claimed(state, campaign_id, &claimed).await;
            return Err(err.into());
        }
    };

    let mut processed = 0;
    for recipient in &claimed {
        let contact = recipient.contact_id.as_ref().and_then(|id| consent.get(id));
        let verdict = consent_verdict(recipient, contact, &campaign.workspace_id, dry_run);

        let write = match (verdict, channel.as_ref()) {
            (Verdict::Fail(reason), _) => {
                db::update_recipient_result(
                    pool,
                    kind,
                    &recipient.id,
                    RecipientStatus::Failed.as_str(),
                    Some(reason),
                    None,
                )
                .await
            }
            (Verdict::Requeue(reason), _) => {
                db::update_recipient_result(
                    pool,
                    kind,
                    &recipient.id,
                    RecipientStatus::Queued.as_str(),
                    Some(reason),
                    None,
                )
                .await
            }
            (Verdict::Send(_), None) => {
                db::update_recipient_result(
                    pool,
                    kind,
                    &recipient.id,
                    RecipientStatus::Failed.as_str(),
                    Some("channel_missing"),
                    None,
                )
                .await
            }
            (Verdict::Send(phone), Some(creds)) => {
                let (result, attempts) = send_with_retry(
                    &state.graph,
                    creds,
                    &phone,
                    &campaign.template_name,
                    &campaign.template_language,
                    cfg.max_attempts,
                    cfg.backoff_ms,
                )
                .await;
                match result {
                    Ok(receipt) => {
                        db::update_recipient_result(
                            pool,
                            kind,
                            &recipient.id,
                            RecipientStatus::Sent.as_str(),
                            None,
                            Some(&receipt.provider_message_id),
                        )
                        .await
                    }
                    Err(err) => {
                        tracing::warn!(
                            campaign_id = %campaign_id,
                            recipient_id = %recipient.id,
                            attempts,
                            error = %err,
                            "template send failed"
                        );
                        db::update_recipient_result(
                            pool,
                            kind,
                            &recipient.id,
                            RecipientStatus::Failed.as_str(),
                            Some(&err.to_string()),
                            None,
                        )
                        .await
                    }
                }
            }
        };
        if let Err(err) = write {
            tracing::error!(
                campaign_id = %campaign_id,
                recipient_id = %recipient.id,
                error = %err,
                "recipient update failed"
            );
        }
        processed += 1;

        if cfg.throttle_ms > 0 {
            sleep(Duration::from_millis(cfg.throttle_ms)).await;
        }
    }

    let remaining =
        db::count_recipients_with_status(pool, kind, campaign_id, RecipientStatus::Queued.as_str())
            .await?;
    if remaining == 0 && !dry_run {
        if db::finish_campaign(pool, kind, campaign_id, db::now_ms()).await? {
            audit::record_event(
                pool,
                kind,
                &campaign.workspace_id,
                "campaign.finished",
                json!({"campaignId": campaign_id}),
            )
            .await;
        }
        // Another run may have closed the campaign first.
        status = db::get_campaign(pool, kind, campaign_id)
            .await?
            .and_then(|c| CampaignStatus::parse(&c.status))
            .unwrap_or(CampaignStatus::Finished);
    }

    tracing::info!(
        campaign_id = %campaign_id,
        processed,
        queued_remaining = remaining,
        dry_run,
        "campaign batch processed"
    );

    Ok(BatchSummary {
        campaign_id: campaign_id.to_string(),
        processed,
        queued_remaining: remaining,
        dry_run,
        status,
    })
}

/// Hands claimed rows back to the queue after a batch aborts.
async fn release_claimed(state: &AppState, campaign_id: &str, claimed: &[RecipientRecord]) {
    for recipient in claimed {
        if let Err(err) = db::release_recipient(&state.pool, state.db_kind, &recipient.id).await {
            tracing::error!(
                campaign_id = %campaign_id,
                recipient_id = %recipient.id,
                error = %err,
                "releasing claimed recipient failed"
            );
        }
    }
}

/// Polls running campaigns and advances each by one batch.
pub async fn start_dispatch_worker(state: AppState) {
    if !state.config.dispatch.worker_enabled {
        return;
    }
    let poll = Duration::from_secs(state.config.dispatch.poll_seconds.max(1));
    loop {
        match db::list_running_campaign_ids(&state.pool, state.db_kind).await {
            Ok(ids) => {
                for id in ids {
                    if let Err(err) = run_batch(&state, &id).await {
                        tracing::error!(campaign_id = %id, error = %err, "dispatch batch failed");
                    }
                }
            }
            Err(err) => tracing::error!(error = %err, "listing running campaigns failed"),
        }
        sleep(poll).await;
    }
}
