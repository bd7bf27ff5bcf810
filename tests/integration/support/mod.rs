#![allow(dead_code)]

use relay_hub::access::Role;
use relay_hub::config::{ApiToken, Config};
use relay_hub::db::{self, ChannelRecord, ContactRecord, MessageRecord, ThreadRecord};
use relay_hub::types::{InboundMessage, MessageKind, WebhookEvent};
use relay_hub::AppState;
use serde_json::json;
use sqlx::AnyPool;
use tempfile::TempDir;

pub const WORKSPACE: &str = "ws_1";
pub const OTHER_WORKSPACE: &str = "ws_2";
pub const PHONE_NUMBER_ID: &str = "PN1";
pub const PAGE_ID: &str = "PAGE1";
pub const ACCESS_TOKEN: &str = "token-1";
pub const APP_SECRET: &str = "app-secret";
pub const VERIFY_TOKEN: &str = "verify-me";
pub const ADMIN_TOKEN: &str = "admin-token";
pub const AGENT_TOKEN: &str = "agent-token";
pub const OTHER_ADMIN_TOKEN: &str = "other-admin-token";

pub struct TestHub {
    pub state: AppState,
    _dir: TempDir,
}

pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.webhook.app_secret = Some(APP_SECRET.to_string());
    cfg.webhook.verify_token = Some(VERIFY_TOKEN.to_string());
    cfg.dispatch.throttle_ms = 0;
    cfg.dispatch.backoff_ms = 5;
    cfg.graph.base_url = "http://127.0.0.1:9".to_string();
    cfg.graph.timeout_seconds = 2;
    cfg.auth.tokens = vec![
        token(ADMIN_TOKEN, WORKSPACE, "u_admin", Role::Admin),
        token(AGENT_TOKEN, WORKSPACE, "u_agent", Role::Agent),
        token(OTHER_ADMIN_TOKEN, OTHER_WORKSPACE, "u_other", Role::Admin),
    ];
    cfg
}

fn token(token: &str, workspace_id: &str, user_id: &str, role: Role) -> ApiToken {
    ApiToken {
        token: token.to_string(),
        workspace_id: workspace_id.to_string(),
        user_id: user_id.to_string(),
        role,
    }
}

pub async fn setup() -> TestHub {
    setup_with(|_| {}).await
}

pub async fn setup_with(adjust: impl FnOnce(&mut Config)) -> TestHub {
    sqlx::any::install_default_drivers();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("hub.sqlite");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await.unwrap();
    db::init_db(&pool, db_kind).await.unwrap();

    let mut cfg = test_config();
    adjust(&mut cfg);
    let state = AppState::new(cfg, pool, db_kind).unwrap();
    TestHub { state, _dir: dir }
}

pub async fn seed_channel(
    state: &AppState,
    workspace_id: &str,
    kind: &str,
    external_id: &str,
) -> ChannelRecord {
    let record = ChannelRecord {
        id: db::new_id(),
        workspace_id: workspace_id.to_string(),
        kind: kind.to_string(),
        external_id: external_id.to_string(),
        access_token: Some(ACCESS_TOKEN.to_string()),
        created_at: db::now_ms(),
    };
    db::insert_channel(&state.pool, state.db_kind, &record)
        .await
        .unwrap();
    record
}

pub async fn seed_whatsapp(state: &AppState) -> ChannelRecord {
    seed_channel(state, WORKSPACE, "whatsapp", PHONE_NUMBER_ID).await
}

pub async fn seed_contact(
    state: &AppState,
    id: &str,
    phone: Option<&str>,
    opted_in: bool,
    opted_out: bool,
) -> ContactRecord {
    let record = ContactRecord {
        id: id.to_string(),
        workspace_id: WORKSPACE.to_string(),
        phone: phone.map(String::from),
        opted_in,
        opted_out,
    };
    db::insert_contact(&state.pool, state.db_kind, &record)
        .await
        .unwrap();
    record
}

pub async fn open_thread(state: &AppState, channel: &ChannelRecord, participant: &str) -> ThreadRecord {
    let (thread, _) = db::resolve_or_create_thread(
        &state.pool,
        state.db_kind,
        &channel.workspace_id,
        &channel.id,
        participant,
        None,
    )
    .await
    .unwrap();
    thread
}

pub async fn insert_message(
    state: &AppState,
    thread: &ThreadRecord,
    direction: &str,
    provider_id: Option<&str>,
    status: &str,
    body: Option<&str>,
    created_at: i64,
) -> MessageRecord {
    let record = MessageRecord {
        id: db::new_id(),
        workspace_id: thread.workspace_id.clone(),
        thread_id: thread.id.clone(),
        provider_message_id: provider_id.map(String::from),
        direction: direction.to_string(),
        kind: "text".to_string(),
        status: status.to_string(),
        body: body.map(String::from),
        media_url: None,
        error_code: None,
        error_message: None,
        payload: None,
        created_at,
        sent_at: None,
        delivered_at: None,
        read_at: None,
        failed_at: None,
        status_updated_at: None,
    };
    assert!(db::insert_message(&state.pool, state.db_kind, &record)
        .await
        .unwrap());
    record
}

pub fn text_event(participant: &str, provider_id: &str, text: &str) -> WebhookEvent {
    WebhookEvent::Message(InboundMessage {
        channel_external_id: PHONE_NUMBER_ID.to_string(),
        participant_id: participant.to_string(),
        participant_name: Some("Dewi".to_string()),
        provider_message_id: provider_id.to_string(),
        kind: MessageKind::Text,
        text: Some(text.to_string()),
        media_url: None,
        attachments: Vec::new(),
        timestamp_ms: None,
        payload: json!({"id": provider_id}),
    })
}

pub async fn audit_actions(state: &AppState, workspace_id: &str) -> Vec<String> {
    db::list_audit_events(&state.pool, state.db_kind, workspace_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect()
}
