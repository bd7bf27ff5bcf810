pub mod access;
pub mod assignment;
pub mod audit;
pub mod budget;
pub mod channels;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod outbound;
pub mod ratelimit;
pub mod routing;
pub mod types;
pub mod webhook;

use self::access::{Principal, RoleProvider, StaticTokenRoles, ANY_ROLE, CAMPAIGN_ROLES};
use self::assignment::{RoundRobinAssigner, SqlRoundRobin};
use self::budget::{BudgetDecision, BudgetGuard, UnlimitedBudget};
use self::channels::graph::{ChannelCredentials, GraphClient};
use self::config::{load_config, resolve_database_url, Config};
use self::db::{DbKind, NewRecipient};
use self::error::HubError;
use self::ratelimit::{InMemoryRateLimiter, RateLimiter};
use self::types::{ChannelKind, RecipientStatus};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::AnyPool;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: AnyPool,
    pub db_kind: DbKind,
    pub graph: GraphClient,
    pub roles: Arc<dyn RoleProvider>,
    pub budget: Arc<dyn BudgetGuard>,
    pub assigner: Arc<dyn RoundRobinAssigner>,
    pub limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    /// State with the default collaborators: config tokens, no budget cap,
    /// SQL round robin and an in-process rate limiter.
    pub fn new(config: Config, pool: AnyPool, db_kind: DbKind) -> anyhow::Result<Self> {
        let graph = GraphClient::new(&config.graph)?;
        Ok(Self {
            roles: Arc::new(StaticTokenRoles::new(config.auth.tokens.clone())),
            budget: Arc::new(UnlimitedBudget),
            assigner: Arc::new(SqlRoundRobin::new(pool.clone(), db_kind)),
            limiter: Arc::new(InMemoryRateLimiter::new()),
            config,
            pool,
            db_kind,
            graph,
        })
    }

    async fn principal(&self, headers: &HeaderMap, allowed: &[access::Role]) -> Result<Principal, HubError> {
        self.roles.require_role(headers, allowed).await
    }

    async fn check_rate(&self, bucket: &str, workspace_id: &str, max: u32) -> Result<(), HubError> {
        let key = format!("{bucket}:{workspace_id}");
        if self
            .limiter
            .check(&key, self.config.rate_limit.window_ms, max)
            .await
        {
            Ok(())
        } else {
            Err(HubError::RateLimited)
        }
    }

    async fn check_budget(&self, workspace_id: &str, cost: u64) -> Result<(), HubError> {
        match self.budget.assert_budget(workspace_id, cost).await? {
            BudgetDecision::Allowed => Ok(()),
            BudgetDecision::Denied(reason) => Err(HubError::BudgetDenied(reason)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub threads: i64,
    pub messages: i64,
    pub campaigns: i64,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    fn bounds(&self, default_limit: i64) -> (i64, i64) {
        (
            self.limit.unwrap_or(default_limit).clamp(1, 500),
            self.offset.unwrap_or(0).max(0),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTemplateRequest {
    pub template_name: String,
    #[serde(default = "default_template_language")]
    pub language: String,
}

fn default_template_language() -> String {
    "en_US".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRecipientRequest {
    pub contact_id: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub template_name: String,
    #[serde(default = "default_template_language")]
    pub template_language: String,
    #[serde(default)]
    pub recipients: Vec<CampaignRecipientRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCampaignResponse {
    pub ok: bool,
    pub processed: usize,
    pub queued_remaining: i64,
    pub dry_run: bool,
    pub status: types::CampaignStatus,
}

pub async fn create_app() -> anyhow::Result<(AppState, Router)> {
    sqlx::any::install_default_drivers();

    let config = load_config();
    let db_url = resolve_database_url(&config);
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await?;
    db::init_db(&pool, db_kind).await?;

    let state = AppState::new(config, pool, db_kind)?;
    if state.config.dispatch.worker_enabled {
        tokio::spawn(dispatch::start_dispatch_worker(state.clone()));
    }

    let app = build_router(state.clone());
    Ok((state, app))
}

pub fn build_router(state: AppState) -> Router {
    let webhook_path = state.config.webhook.path.clone();
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route(&webhook_path, get(webhook_verify).post(webhook_receive))
        .route("/v1/threads", get(list_threads))
        .route(
            "/v1/threads/:thread_id/messages",
            get(list_thread_messages).post(send_text),
        )
        .route("/v1/threads/:thread_id/send-check", get(send_check))
        .route("/v1/threads/:thread_id/template", post(send_template))
        .route("/v1/campaigns", post(create_campaign))
        .route("/v1/campaigns/:campaign_id", get(get_campaign))
        .route("/v1/campaigns/:campaign_id/run", post(run_campaign))
        .route("/v1/templates/:template_id/status", get(template_status))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, HubError> {
    Ok(Json(StatusResponse {
        threads: db::count_rows(&state.pool, "threads").await?,
        messages: db::count_rows(&state.pool, "messages").await?,
        campaigns: db::count_rows(&state.pool, "campaigns").await?,
    }))
}

async fn webhook_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = webhook::verify_handshake(
        state.config.webhook.verify_token.as_deref(),
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
    );
    match challenge {
        Some(challenge) => (StatusCode::OK, challenge).into_response(),
        None => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn webhook_receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(webhook::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !webhook::verify_signature(state.config.webhook.app_secret.as_deref(), signature, &body) {
        tracing::warn!("webhook signature rejected");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "invalid_signature"})),
        )
            .into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!("webhook body is not json: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    let parsed = webhook::parse_payload(&payload);
    let report = webhook::ingest(&state, parsed).await;
    Json(json!({"ok": true, "report": report})).into_response()
}

async fn list_threads(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<db::ThreadRecord>>, HubError> {
    let principal = state.principal(&headers, ANY_ROLE).await?;
    let (limit, offset) = page.bounds(50);
    let threads =
        db::list_threads(&state.pool, state.db_kind, &principal.workspace_id, limit, offset).await?;
    Ok(Json(threads))
}

async fn owned_thread(
    state: &AppState,
    principal: &Principal,
    thread_id: &str,
) -> Result<db::ThreadRecord, HubError> {
    db::get_thread(&state.pool, state.db_kind, thread_id)
        .await?
        .filter(|t| t.workspace_id == principal.workspace_id)
        .ok_or(HubError::NotFound("thread"))
}

async fn list_thread_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<db::MessageRecord>>, HubError> {
    let principal = state.principal(&headers, ANY_ROLE).await?;
    owned_thread(&state, &principal, &thread_id).await?;
    let (limit, offset) = page.bounds(100);
    let messages = db::list_messages(&state.pool, state.db_kind, &thread_id, limit, offset).await?;
    Ok(Json(messages))
}

async fn send_check(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<guard::SendDecision>, HubError> {
    let principal = state.principal(&headers, ANY_ROLE).await?;
    owned_thread(&state, &principal, &thread_id).await?;
    let decision = guard::can_send_now(&state.pool, state.db_kind, &thread_id).await?;
    Ok(Json(decision))
}

async fn send_text(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendTextRequest>,
) -> Result<Json<db::MessageRecord>, HubError> {
    let principal = state.principal(&headers, ANY_ROLE).await?;
    state
        .check_rate("send", &principal.workspace_id, state.config.rate_limit.sends_per_window)
        .await?;
    state.check_budget(&principal.workspace_id, 1).await?;
    let message =
        outbound::send_thread_text(&state, &principal.workspace_id, &thread_id, &req.body).await?;
    Ok(Json(message))
}

async fn send_template(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendTemplateRequest>,
) -> Result<Json<db::MessageRecord>, HubError> {
    let principal = state.principal(&headers, ANY_ROLE).await?;
    state
        .check_rate("send", &principal.workspace_id, state.config.rate_limit.sends_per_window)
        .await?;
    state.check_budget(&principal.workspace_id, 1).await?;
    let message = outbound::send_thread_template(
        &state,
        &principal.workspace_id,
        &thread_id,
        &req.template_name,
        &req.language,
    )
    .await?;
    Ok(Json(message))
}

async fn create_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<db::CampaignRecord>), HubError> {
    let principal = state.principal(&headers, CAMPAIGN_ROLES).await?;
    if req.template_name.trim().is_empty() {
        return Err(HubError::BadRequest("template_name_required".to_string()));
    }
    let recipients: Vec<NewRecipient> = req
        .recipients
        .into_iter()
        .map(|r| NewRecipient {
            contact_id: r.contact_id,
            phone: r.phone,
        })
        .collect();
    let campaign = db::create_campaign(
        &state.pool,
        state.db_kind,
        &principal.workspace_id,
        req.template_name.trim(),
        req.template_language.trim(),
        &recipients,
    )
    .await?;
    audit::record_event(
        &state.pool,
        state.db_kind,
        &principal.workspace_id,
        "campaign.created",
        json!({
            "campaignId": campaign.id,
            "recipients": recipients.len(),
            "userId": principal.user_id,
        }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(campaign)))
}

async fn owned_campaign(
    state: &AppState,
    principal: &Principal,
    campaign_id: &str,
) -> Result<db::CampaignRecord, HubError> {
    db::get_campaign(&state.pool, state.db_kind, campaign_id)
        .await?
        .filter(|c| c.workspace_id == principal.workspace_id)
        .ok_or(HubError::NotFound("campaign"))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, HubError> {
    let principal = state.principal(&headers, ANY_ROLE).await?;
    let campaign = owned_campaign(&state, &principal, &campaign_id).await?;
    let counts = db::recipient_status_counts(&state.pool, state.db_kind, &campaign_id).await?;
    Ok(Json(json!({"campaign": campaign, "recipients": counts})))
}

async fn run_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RunCampaignResponse>, HubError> {
    let principal = state.principal(&headers, CAMPAIGN_ROLES).await?;
    owned_campaign(&state, &principal, &campaign_id).await?;
    state
        .check_rate(
            "campaign_run",
            &principal.workspace_id,
            state.config.rate_limit.campaign_runs_per_window,
        )
        .await?;

    let queued = db::count_recipients_with_status(
        &state.pool,
        state.db_kind,
        &campaign_id,
        RecipientStatus::Queued.as_str(),
    )
    .await?;
    let cost = queued.min(state.config.dispatch.batch_size).max(0) as u64;
    if cost > 0 {
        state.check_budget(&principal.workspace_id, cost).await?;
    }

    let summary = dispatch::run_batch(&state, &campaign_id).await?;
    Ok(Json(RunCampaignResponse {
        ok: true,
        processed: summary.processed,
        queued_remaining: summary.queued_remaining,
        dry_run: summary.dry_run,
        status: summary.status,
    }))
}

async fn template_status(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<channels::graph::TemplateStatus>, HubError> {
    let principal = state.principal(&headers, ANY_ROLE).await?;
    let channel = db::find_workspace_channel(
        &state.pool,
        state.db_kind,
        &principal.workspace_id,
        ChannelKind::Whatsapp.as_str(),
    )
    .await?
    .ok_or(HubError::NotFound("channel"))?;
    let status = state
        .graph
        .get_template_status(&ChannelCredentials::from_record(&channel)?, &template_id)
        .await?;
    Ok(Json(status))
}
