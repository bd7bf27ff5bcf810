use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::borrow::Cow;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql<'a>(sql: &'a str, kind: DbKind) -> Cow<'a, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn flag(value: bool) -> i64 {
    i64::from(value)
}

fn json_column(value: Option<String>) -> Option<serde_json::Value> {
    value.and_then(|v| serde_json::from_str(&v).ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    pub workspace_id: String,
    pub auto_routing: bool,
    pub sandbox_enabled: bool,
    pub sandbox_allow_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    pub workspace_id: String,
    pub kind: String,
    pub external_id: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub workspace_id: String,
    pub channel_id: String,
    pub participant_id: String,
    pub participant_name: Option<String>,
    pub status: String,
    pub unread_count: i64,
    pub last_message_at: Option<i64>,
    pub last_message_preview: Option<String>,
    pub assigned_team_id: Option<String>,
    pub assigned_member_id: Option<String>,
    pub category_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub workspace_id: String,
    pub thread_id: String,
    pub provider_message_id: Option<String>,
    pub direction: String,
    pub kind: String,
    pub status: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub status_updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: String,
    pub workspace_id: String,
    pub key: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRuleRecord {
    pub id: String,
    pub workspace_id: String,
    pub category_id: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: String,
    pub workspace_id: String,
    pub phone: Option<String>,
    pub opted_in: bool,
    pub opted_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: String,
    pub workspace_id: String,
    pub template_name: String,
    pub template_language: String,
    pub status: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub id: String,
    pub campaign_id: String,
    pub contact_id: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub error_reason: Option<String>,
    pub attempted_at: Option<i64>,
    pub provider_message_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipient {
    pub contact_id: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub workspace_id: String,
    pub action: String,
    pub meta: serde_json::Value,
    pub created_at: i64,
}

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<()> {
    let stmts = vec![
        r#"CREATE TABLE IF NOT EXISTS workspace_settings (
            workspace_id TEXT PRIMARY KEY,
            auto_routing BIGINT NOT NULL,
            sandbox_enabled BIGINT NOT NULL,
            sandbox_allow_list TEXT,
            updated_at BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            external_id TEXT NOT NULL UNIQUE,
            access_token TEXT,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            participant_id TEXT NOT NULL,
            participant_name TEXT,
            status TEXT NOT NULL,
            unread_count BIGINT NOT NULL,
            last_message_at BIGINT,
            last_message_preview TEXT,
            assigned_team_id TEXT,
            assigned_member_id TEXT,
            category_id TEXT,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )"#,
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_threads_live
           ON threads(workspace_id, channel_id, participant_id) WHERE status <> 'closed'"#,
        r#"CREATE INDEX IF NOT EXISTS idx_threads_workspace ON threads(workspace_id, updated_at)"#,
        r#"CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            provider_message_id TEXT,
            direction TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            body TEXT,
            media_url TEXT,
            error_code TEXT,
            error_message TEXT,
            payload TEXT,
            created_at BIGINT NOT NULL,
            sent_at BIGINT,
            delivered_at BIGINT,
            read_at BIGINT,
            failed_at BIGINT,
            status_updated_at BIGINT
        )"#,
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_provider
           ON messages(workspace_id, provider_message_id) WHERE provider_message_id IS NOT NULL"#,
        r#"CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, created_at)"#,
        r#"CREATE TABLE IF NOT EXISTS routing_categories (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            key TEXT NOT NULL,
            label TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS routing_rules (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            keywords TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            name TEXT NOT NULL,
            is_default BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS team_categories (
            team_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            active BIGINT NOT NULL,
            PRIMARY KEY (team_id, category_id)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS team_members (
            team_id TEXT NOT NULL,
            member_id TEXT NOT NULL,
            position BIGINT NOT NULL,
            active BIGINT NOT NULL,
            PRIMARY KEY (team_id, member_id)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS team_rr_cursors (
            team_id TEXT PRIMARY KEY,
            counter BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            phone TEXT,
            opted_in BIGINT NOT NULL,
            opted_out BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS campaigns (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            template_name TEXT NOT NULL,
            template_language TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            started_at BIGINT,
            finished_at BIGINT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS campaign_recipients (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL,
            contact_id TEXT,
            phone TEXT,
            status TEXT NOT NULL,
            error_reason TEXT,
            attempted_at BIGINT,
            provider_message_id TEXT,
            created_at BIGINT NOT NULL,
            seq BIGINT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_recipients_queue
           ON campaign_recipients(campaign_id, status, created_at, seq)"#,
        r#"CREATE TABLE IF NOT EXISTS audit_events (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            action TEXT NOT NULL,
            meta TEXT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_audit_workspace ON audit_events(workspace_id, created_at)"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }

    Ok(())
}

// ---- workspace settings -------------------------------------------------

pub async fn get_workspace_settings(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
) -> Result<Option<WorkspaceSettings>> {
    let sql = rewrite_sql(
        "SELECT workspace_id, auto_routing, sandbox_enabled, sandbox_allow_list FROM workspace_settings WHERE workspace_id = ?",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let allow_list: Option<String> = row.try_get("sandbox_allow_list")?;
    Ok(Some(WorkspaceSettings {
        workspace_id: row.try_get("workspace_id")?,
        auto_routing: row.try_get::<i64, _>("auto_routing")? != 0,
        sandbox_enabled: row.try_get::<i64, _>("sandbox_enabled")? != 0,
        sandbox_allow_list: allow_list
            .and_then(|v| serde_json::from_str(&v).ok())
            .unwrap_or_default(),
    }))
}

pub async fn upsert_workspace_settings(
    pool: &AnyPool,
    kind: DbKind,
    settings: &WorkspaceSettings,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO workspace_settings (workspace_id, auto_routing, sandbox_enabled, sandbox_allow_list, updated_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(workspace_id) DO UPDATE SET
               auto_routing=excluded.auto_routing,
               sandbox_enabled=excluded.sandbox_enabled,
               sandbox_allow_list=excluded.sandbox_allow_list,
               updated_at=excluded.updated_at"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&settings.workspace_id)
        .bind(flag(settings.auto_routing))
        .bind(flag(settings.sandbox_enabled))
        .bind(serde_json::to_string(&settings.sandbox_allow_list)?)
        .bind(now_ms())
        .execute(pool)
        .await?;
    Ok(())
}

// ---- channels -----------------------------------------------------------

fn channel_from_row(row: &AnyRow) -> Result<ChannelRecord> {
    Ok(ChannelRecord {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        kind: row.try_get("kind")?,
        external_id: row.try_get("external_id")?,
        access_token: row.try_get("access_token")?,
        created_at: row.try_get("created_at")?,
    })
}

const CHANNEL_COLUMNS: &str = "id, workspace_id, kind, external_id, access_token, created_at";

pub async fn insert_channel(pool: &AnyPool, kind: DbKind, record: &ChannelRecord) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO channels (id, workspace_id, kind, external_id, access_token, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.workspace_id)
        .bind(&record.kind)
        .bind(&record.external_id)
        .bind(record.access_token.as_deref())
        .bind(record.created_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find_channel_by_external_id(
    pool: &AnyPool,
    kind: DbKind,
    external_id: &str,
) -> Result<Option<ChannelRecord>> {
    let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE external_id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(channel_from_row).transpose()
}

pub async fn get_channel(pool: &AnyPool, kind: DbKind, id: &str) -> Result<Option<ChannelRecord>> {
    let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref()).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(channel_from_row).transpose()
}

/// The workspace's oldest channel of the given kind.
pub async fn find_workspace_channel(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    channel_kind: &str,
) -> Result<Option<ChannelRecord>> {
    let sql = format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels WHERE workspace_id = ? AND kind = ? ORDER BY created_at ASC, id ASC LIMIT 1"
    );
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .bind(channel_kind)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(channel_from_row).transpose()
}

// ---- threads ------------------------------------------------------------

const THREAD_COLUMNS: &str = "id, workspace_id, channel_id, participant_id, participant_name, status, unread_count, last_message_at, last_message_preview, assigned_team_id, assigned_member_id, category_id, created_at, updated_at";

fn thread_from_row(row: &AnyRow) -> Result<ThreadRecord> {
    Ok(ThreadRecord {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        channel_id: row.try_get("channel_id")?,
        participant_id: row.try_get("participant_id")?,
        participant_name: row.try_get("participant_name")?,
        status: row.try_get("status")?,
        unread_count: row.try_get("unread_count")?,
        last_message_at: row.try_get("last_message_at")?,
        last_message_preview: row.try_get("last_message_preview")?,
        assigned_team_id: row.try_get("assigned_team_id")?,
        assigned_member_id: row.try_get("assigned_member_id")?,
        category_id: row.try_get("category_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn get_thread(pool: &AnyPool, kind: DbKind, id: &str) -> Result<Option<ThreadRecord>> {
    let sql = format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref()).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(thread_from_row).transpose()
}

/// The live (non-closed) thread for a participant on a channel.
pub async fn find_live_thread(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    channel_id: &str,
    participant_id: &str,
) -> Result<Option<ThreadRecord>> {
    let sql = format!(
        "SELECT {THREAD_COLUMNS} FROM threads WHERE workspace_id = ? AND channel_id = ? AND participant_id = ? AND status <> 'closed' LIMIT 1"
    );
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .bind(channel_id)
        .bind(participant_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(thread_from_row).transpose()
}

/// Returns the live thread for the tuple, creating an open one when none
/// exists. The boolean is true when this call created the row.
pub async fn resolve_or_create_thread(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    channel_id: &str,
    participant_id: &str,
    participant_name: Option<&str>,
) -> Result<(ThreadRecord, bool)> {
    if let Some(thread) = find_live_thread(pool, kind, workspace_id, channel_id, participant_id).await? {
        return Ok((thread, false));
    }

    let now = now_ms();
    let sql = rewrite_sql(
        r#"INSERT INTO threads (
            id, workspace_id, channel_id, participant_id, participant_name, status, unread_count,
            last_message_at, last_message_preview, assigned_team_id, assigned_member_id, category_id,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 'open', 0, NULL, NULL, NULL, NULL, NULL, ?, ?)
        ON CONFLICT DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(new_id())
        .bind(workspace_id)
        .bind(channel_id)
        .bind(participant_id)
        .bind(participant_name)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

    let thread = find_live_thread(pool, kind, workspace_id, channel_id, participant_id)
        .await?
        .ok_or_else(|| anyhow!("thread for participant {participant_id} missing after insert"))?;
    Ok((thread, result.rows_affected() == 1))
}

pub async fn list_threads(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<ThreadRecord>> {
    let sql = format!(
        "SELECT {THREAD_COLUMNS} FROM threads WHERE workspace_id = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?"
    );
    let sql = rewrite_sql(&sql, kind);
    let rows = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.iter().map(thread_from_row).collect()
}

pub async fn record_thread_inbound(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    preview: Option<&str>,
    at: i64,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"UPDATE threads SET unread_count = unread_count + 1, last_message_at = ?,
           last_message_preview = ?, updated_at = ? WHERE id = ?"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(at)
        .bind(preview)
        .bind(now_ms())
        .bind(thread_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn record_thread_outbound(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    preview: Option<&str>,
    at: i64,
) -> Result<()> {
    let sql = rewrite_sql(
        "UPDATE threads SET last_message_at = ?, last_message_preview = ?, updated_at = ? WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(at)
        .bind(preview)
        .bind(now_ms())
        .bind(thread_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn reset_thread_unread(pool: &AnyPool, kind: DbKind, thread_id: &str) -> Result<()> {
    let sql = rewrite_sql(
        "UPDATE threads SET unread_count = 0, updated_at = ? WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(now_ms())
        .bind(thread_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_thread_status(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    status: &str,
) -> Result<bool> {
    let sql = rewrite_sql(
        "UPDATE threads SET status = ?, updated_at = ? WHERE id = ? AND status <> ?",
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(status)
        .bind(now_ms())
        .bind(thread_id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_thread_category(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    category_id: &str,
) -> Result<()> {
    let sql = rewrite_sql(
        "UPDATE threads SET category_id = ?, updated_at = ? WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(category_id)
        .bind(now_ms())
        .bind(thread_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Moves the thread to a team and clears the member so it gets reassigned.
pub async fn set_thread_team(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    team_id: &str,
) -> Result<()> {
    let sql = rewrite_sql(
        "UPDATE threads SET assigned_team_id = ?, assigned_member_id = NULL, updated_at = ? WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(team_id)
        .bind(now_ms())
        .bind(thread_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Writes the member only while the thread still belongs to `team_id`.
pub async fn set_thread_member_if_team(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    team_id: &str,
    member_id: &str,
) -> Result<bool> {
    let sql = rewrite_sql(
        "UPDATE threads SET assigned_member_id = ?, updated_at = ? WHERE id = ? AND assigned_team_id = ?",
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(member_id)
        .bind(now_ms())
        .bind(thread_id)
        .bind(team_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

// ---- messages -----------------------------------------------------------

const MESSAGE_COLUMNS: &str = "id, workspace_id, thread_id, provider_message_id, direction, kind, status, body, media_url, error_code, error_message, payload, created_at, sent_at, delivered_at, read_at, failed_at, status_updated_at";

fn message_from_row(row: &AnyRow) -> Result<MessageRecord> {
    let payload: Option<String> = row.try_get("payload")?;
    Ok(MessageRecord {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        thread_id: row.try_get("thread_id")?,
        provider_message_id: row.try_get("provider_message_id")?,
        direction: row.try_get("direction")?,
        kind: row.try_get("kind")?,
        status: row.try_get("status")?,
        body: row.try_get("body")?,
        media_url: row.try_get("media_url")?,
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        payload: json_column(payload),
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
        delivered_at: row.try_get("delivered_at")?,
        read_at: row.try_get("read_at")?,
        failed_at: row.try_get("failed_at")?,
        status_updated_at: row.try_get("status_updated_at")?,
    })
}

pub async fn message_exists(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    provider_message_id: &str,
) -> Result<bool> {
    let sql = rewrite_sql(
        "SELECT 1 FROM messages WHERE workspace_id = ? AND provider_message_id = ? LIMIT 1",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .bind(provider_message_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Inserts a message. Returns false when the (workspace, provider id) pair
/// already exists.
pub async fn insert_message(pool: &AnyPool, kind: DbKind, record: &MessageRecord) -> Result<bool> {
    let sql = rewrite_sql(
        r#"INSERT INTO messages (
            id, workspace_id, thread_id, provider_message_id, direction, kind, status, body, media_url,
            error_code, error_message, payload, created_at, sent_at, delivered_at, read_at, failed_at,
            status_updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.workspace_id)
        .bind(&record.thread_id)
        .bind(record.provider_message_id.as_deref())
        .bind(&record.direction)
        .bind(&record.kind)
        .bind(&record.status)
        .bind(record.body.as_deref())
        .bind(record.media_url.as_deref())
        .bind(record.error_code.as_deref())
        .bind(record.error_message.as_deref())
        .bind(record.payload.as_ref().map(|v| v.to_string()))
        .bind(record.created_at)
        .bind(record.sent_at)
        .bind(record.delivered_at)
        .bind(record.read_at)
        .bind(record.failed_at)
        .bind(record.status_updated_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn get_message(pool: &AnyPool, kind: DbKind, id: &str) -> Result<Option<MessageRecord>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref()).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(message_from_row).transpose()
}

pub async fn find_message_by_provider_id(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    provider_message_id: &str,
) -> Result<Option<MessageRecord>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE workspace_id = ? AND provider_message_id = ?"
    );
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .bind(provider_message_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(message_from_row).transpose()
}

pub async fn latest_inbound_message(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
) -> Result<Option<MessageRecord>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = ? AND direction = 'inbound' ORDER BY created_at DESC, id DESC LIMIT 1"
    );
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(thread_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(message_from_row).transpose()
}

pub async fn list_messages(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageRecord>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let sql = rewrite_sql(&sql, kind);
    let rows = sqlx::query(sql.as_ref())
        .bind(thread_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.iter().map(message_from_row).collect()
}

/// `queued`/`sent` → `delivered`. Later states are left alone so reordered
/// receipts never move a message backwards.
pub async fn mark_messages_delivered(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    provider_message_ids: &[String],
    at: i64,
) -> Result<u64> {
    if provider_message_ids.is_empty() {
        return Ok(0);
    }
    let base_sql = format!(
        "UPDATE messages SET status = 'delivered', delivered_at = ?, status_updated_at = ? WHERE workspace_id = ? AND status IN ('queued','sent') AND provider_message_id IN ({})",
        placeholders(provider_message_ids.len())
    );
    let sql = rewrite_sql(&base_sql, kind);
    let mut query = sqlx::query(sql.as_ref()).bind(at).bind(at).bind(workspace_id);
    for id in provider_message_ids {
        query = query.bind(id);
    }
    Ok(query.execute(pool).await?.rows_affected())
}

pub async fn mark_messages_read_by_ids(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    provider_message_ids: &[String],
    at: i64,
) -> Result<u64> {
    if provider_message_ids.is_empty() {
        return Ok(0);
    }
    let base_sql = format!(
        "UPDATE messages SET status = 'read', read_at = ?, status_updated_at = ? WHERE workspace_id = ? AND direction = 'outbound' AND status NOT IN ('read','failed') AND provider_message_id IN ({})",
        placeholders(provider_message_ids.len())
    );
    let sql = rewrite_sql(&base_sql, kind);
    let mut query = sqlx::query(sql.as_ref()).bind(at).bind(at).bind(workspace_id);
    for id in provider_message_ids {
        query = query.bind(id);
    }
    Ok(query.execute(pool).await?.rows_affected())
}

/// Marks every unread outbound message of a thread as read, optionally only
/// those created at or before `watermark`.
pub async fn mark_thread_outbound_read(
    pool: &AnyPool,
    kind: DbKind,
    thread_id: &str,
    watermark: Option<i64>,
    at: i64,
) -> Result<u64> {
    let result = match watermark {
        Some(watermark) => {
            let sql = rewrite_sql(
                "UPDATE messages SET status = 'read', read_at = ?, status_updated_at = ? WHERE thread_id = ? AND direction = 'outbound' AND status NOT IN ('read','failed') AND created_at <= ?",
                kind,
            );
            sqlx::query(sql.as_ref())
                .bind(at)
                .bind(at)
                .bind(thread_id)
                .bind(watermark)
                .execute(pool)
                .await?
        }
        None => {
            let sql = rewrite_sql(
                "UPDATE messages SET status = 'read', read_at = ?, status_updated_at = ? WHERE thread_id = ? AND direction = 'outbound' AND status NOT IN ('read','failed')",
                kind,
            );
            sqlx::query(sql.as_ref())
                .bind(at)
                .bind(at)
                .bind(thread_id)
                .execute(pool)
                .await?
        }
    };
    Ok(result.rows_affected())
}

pub async fn mark_provider_message_failed(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    provider_message_id: &str,
    error_code: Option<&str>,
    error_message: Option<&str>,
    at: i64,
) -> Result<u64> {
    let sql = rewrite_sql(
        "UPDATE messages SET status = 'failed', error_code = ?, error_message = ?, failed_at = ?, status_updated_at = ? WHERE workspace_id = ? AND provider_message_id = ? AND status <> 'read'",
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(error_code)
        .bind(error_message)
        .bind(at)
        .bind(at)
        .bind(workspace_id)
        .bind(provider_message_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn mark_outbound_sent(
    pool: &AnyPool,
    kind: DbKind,
    message_id: &str,
    provider_message_id: &str,
    at: i64,
) -> Result<()> {
    let sql = rewrite_sql(
        "UPDATE messages SET status = 'sent', provider_message_id = ?, sent_at = ?, status_updated_at = ? WHERE id = ? AND status = 'queued'",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(provider_message_id)
        .bind(at)
        .bind(at)
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_outbound_failed(
    pool: &AnyPool,
    kind: DbKind,
    message_id: &str,
    error_code: &str,
    error_message: &str,
    at: i64,
) -> Result<()> {
    let sql = rewrite_sql(
        "UPDATE messages SET status = 'failed', error_code = ?, error_message = ?, failed_at = ?, status_updated_at = ? WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(error_code)
        .bind(error_message)
        .bind(at)
        .bind(at)
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---- routing ------------------------------------------------------------

pub async fn insert_category(pool: &AnyPool, kind: DbKind, record: &CategoryRecord) -> Result<()> {
    let sql = rewrite_sql(
        "INSERT INTO routing_categories (id, workspace_id, key, label) VALUES (?, ?, ?, ?)",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.workspace_id)
        .bind(&record.key)
        .bind(&record.label)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_categories(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
) -> Result<Vec<CategoryRecord>> {
    let sql = rewrite_sql(
        "SELECT id, workspace_id, key, label FROM routing_categories WHERE workspace_id = ?",
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        result.push(CategoryRecord {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            key: row.try_get("key")?,
            label: row.try_get("label")?,
        });
    }
    Ok(result)
}

pub async fn insert_routing_rule(
    pool: &AnyPool,
    kind: DbKind,
    record: &RoutingRuleRecord,
) -> Result<()> {
    let sql = rewrite_sql(
        "INSERT INTO routing_rules (id, workspace_id, category_id, keywords) VALUES (?, ?, ?, ?)",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.workspace_id)
        .bind(&record.category_id)
        .bind(serde_json::to_string(&record.keywords)?)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_routing_rules(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
) -> Result<Vec<RoutingRuleRecord>> {
    let sql = rewrite_sql(
        "SELECT id, workspace_id, category_id, keywords FROM routing_rules WHERE workspace_id = ?",
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let keywords: String = row.try_get("keywords")?;
        result.push(RoutingRuleRecord {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            category_id: row.try_get("category_id")?,
            keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        });
    }
    Ok(result)
}

pub async fn insert_team(pool: &AnyPool, kind: DbKind, record: &TeamRecord) -> Result<()> {
    let sql = rewrite_sql(
        "INSERT INTO teams (id, workspace_id, name, is_default) VALUES (?, ?, ?, ?)",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.workspace_id)
        .bind(&record.name)
        .bind(flag(record.is_default))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn map_team_category(
    pool: &AnyPool,
    kind: DbKind,
    team_id: &str,
    category_id: &str,
    active: bool,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO team_categories (team_id, category_id, active) VALUES (?, ?, ?)
           ON CONFLICT(team_id, category_id) DO UPDATE SET active=excluded.active"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(team_id)
        .bind(category_id)
        .bind(flag(active))
        .execute(pool)
        .await?;
    Ok(())
}

/// Teams of the workspace with an active mapping to the category.
pub async fn teams_for_category(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    category_id: &str,
) -> Result<Vec<TeamRecord>> {
    let sql = rewrite_sql(
        r#"SELECT t.id, t.workspace_id, t.name, t.is_default
           FROM team_categories tc JOIN teams t ON t.id = tc.team_id
           WHERE tc.category_id = ? AND tc.active = 1 AND t.workspace_id = ?"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(category_id)
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        result.push(TeamRecord {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            name: row.try_get("name")?,
            is_default: row.try_get::<i64, _>("is_default")? != 0,
        });
    }
    Ok(result)
}

pub async fn add_team_member(
    pool: &AnyPool,
    kind: DbKind,
    team_id: &str,
    member_id: &str,
    position: i64,
    active: bool,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO team_members (team_id, member_id, position, active) VALUES (?, ?, ?, ?)
           ON CONFLICT(team_id, member_id) DO UPDATE SET position=excluded.position, active=excluded.active"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(team_id)
        .bind(member_id)
        .bind(position)
        .bind(flag(active))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn active_team_members(pool: &AnyPool, kind: DbKind, team_id: &str) -> Result<Vec<String>> {
    let sql = rewrite_sql(
        "SELECT member_id FROM team_members WHERE team_id = ? AND active = 1 ORDER BY position ASC, member_id ASC",
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).bind(team_id).fetch_all(pool).await?;
    rows.iter()
        .map(|row| row.try_get::<String, _>("member_id").map_err(Into::into))
        .collect()
}

/// Atomically advances the team's round-robin cursor and returns the new
/// value (1 on first use).
pub async fn next_round_robin_counter(pool: &AnyPool, kind: DbKind, team_id: &str) -> Result<i64> {
    let sql = rewrite_sql(
        r#"INSERT INTO team_rr_cursors (team_id, counter) VALUES (?, 1)
           ON CONFLICT(team_id) DO UPDATE SET counter = team_rr_cursors.counter + 1
           RETURNING counter"#,
        kind,
    );
    let row = sqlx::query(sql.as_ref()).bind(team_id).fetch_one(pool).await?;
    Ok(row.try_get("counter")?)
}

// ---- contacts -----------------------------------------------------------

pub async fn insert_contact(pool: &AnyPool, kind: DbKind, record: &ContactRecord) -> Result<()> {
    let sql = rewrite_sql(
        "INSERT INTO contacts (id, workspace_id, phone, opted_in, opted_out) VALUES (?, ?, ?, ?, ?)",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.workspace_id)
        .bind(record.phone.as_deref())
        .bind(flag(record.opted_in))
        .bind(flag(record.opted_out))
        .execute(pool)
        .await?;
    Ok(())
}

/// Consent flags for a set of contacts, in one query.
pub async fn load_consent(
    pool: &AnyPool,
    kind: DbKind,
    contact_ids: &[String],
) -> Result<HashMap<String, ContactRecord>> {
    if contact_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let base_sql = format!(
        "SELECT id, workspace_id, phone, opted_in, opted_out FROM contacts WHERE id IN ({})",
        placeholders(contact_ids.len())
    );
    let sql = rewrite_sql(&base_sql, kind);
    let mut query = sqlx::query(sql.as_ref());
    for id in contact_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    let mut result = HashMap::with_capacity(rows.len());
    for row in rows {
        let record = ContactRecord {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            phone: row.try_get("phone")?,
            opted_in: row.try_get::<i64, _>("opted_in")? != 0,
            opted_out: row.try_get::<i64, _>("opted_out")? != 0,
        };
        result.insert(record.id.clone(), record);
    }
    Ok(result)
}

// ---- campaigns ----------------------------------------------------------

const CAMPAIGN_COLUMNS: &str =
    "id, workspace_id, template_name, template_language, status, created_at, started_at, finished_at";
const RECIPIENT_COLUMNS: &str =
    "id, campaign_id, contact_id, phone, status, error_reason, attempted_at, provider_message_id, created_at";

fn campaign_from_row(row: &AnyRow) -> Result<CampaignRecord> {
    Ok(CampaignRecord {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        template_name: row.try_get("template_name")?,
        template_language: row.try_get("template_language")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn recipient_from_row(row: &AnyRow) -> Result<RecipientRecord> {
    Ok(RecipientRecord {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        contact_id: row.try_get("contact_id")?,
        phone: row.try_get("phone")?,
        status: row.try_get("status")?,
        error_reason: row.try_get("error_reason")?,
        attempted_at: row.try_get("attempted_at")?,
        provider_message_id: row.try_get("provider_message_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Creates a draft campaign with one queued recipient per entry.
pub async fn create_campaign(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    template_name: &str,
    template_language: &str,
    recipients: &[NewRecipient],
) -> Result<CampaignRecord> {
    let now = now_ms();
    let record = CampaignRecord {
        id: new_id(),
        workspace_id: workspace_id.to_string(),
        template_name: template_name.to_string(),
        template_language: template_language.to_string(),
        status: "draft".to_string(),
        created_at: now,
        started_at: None,
        finished_at: None,
    };
    let sql = rewrite_sql(
        r#"INSERT INTO campaigns (id, workspace_id, template_name, template_language, status, created_at, started_at, finished_at)
           VALUES (?, ?, ?, ?, ?, ?, NULL, NULL)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.workspace_id)
        .bind(&record.template_name)
        .bind(&record.template_language)
        .bind(&record.status)
        .bind(record.created_at)
        .execute(pool)
        .await?;

    let sql = rewrite_sql(
        r#"INSERT INTO campaign_recipients (id, campaign_id, contact_id, phone, status, error_reason, attempted_at, provider_message_id, created_at, seq)
           VALUES (?, ?, ?, ?, 'queued', NULL, NULL, NULL, ?, ?)"#,
        kind,
    );
    for (seq, recipient) in recipients.iter().enumerate() {
        sqlx::query(sql.as_ref())
            .bind(new_id())
            .bind(&record.id)
            .bind(recipient.contact_id.as_deref())
            .bind(recipient.phone.as_deref())
            .bind(now)
            .bind(seq as i64)
            .execute(pool)
            .await?;
    }
    Ok(record)
}

pub async fn get_campaign(pool: &AnyPool, kind: DbKind, id: &str) -> Result<Option<CampaignRecord>> {
    let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref()).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(campaign_from_row).transpose()
}

/// `draft` → `running`. Returns true when this call made the transition.
pub async fn start_campaign(pool: &AnyPool, kind: DbKind, id: &str, at: i64) -> Result<bool> {
    let sql = rewrite_sql(
        "UPDATE campaigns SET status = 'running', started_at = ? WHERE id = ? AND status = 'draft'",
        kind,
    );
    let result = sqlx::query(sql.as_ref()).bind(at).bind(id).execute(pool).await?;
    Ok(result.rows_affected() == 1)
}

/// Moves a non-terminal campaign to `finished`.
pub async fn finish_campaign(pool: &AnyPool, kind: DbKind, id: &str, at: i64) -> Result<bool> {
    let sql = rewrite_sql(
        "UPDATE campaigns SET status = 'finished', finished_at = ? WHERE id = ? AND status IN ('draft','running')",
        kind,
    );
    let result = sqlx::query(sql.as_ref()).bind(at).bind(id).execute(pool).await?;
    Ok(result.rows_affected() == 1)
}

pub async fn list_running_campaign_ids(pool: &AnyPool, kind: DbKind) -> Result<Vec<String>> {
    let sql = rewrite_sql(
        "SELECT id FROM campaigns WHERE status = 'running' ORDER BY started_at ASC, id ASC",
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).fetch_all(pool).await?;
    rows.iter()
        .map(|row| row.try_get::<String, _>("id").map_err(Into::into))
        .collect()
}

pub async fn pull_queued_recipients(
    pool: &AnyPool,
    kind: DbKind,
    campaign_id: &str,
    limit: i64,
) -> Result<Vec<RecipientRecord>> {
    let sql = format!(
        "SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients WHERE campaign_id = ? AND status = 'queued' ORDER BY created_at ASC, seq ASC LIMIT ?"
    );
    let sql = rewrite_sql(&sql, kind);
    let rows = sqlx::query(sql.as_ref())
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter().map(recipient_from_row).collect()
}

/// `queued` → `processing`, conditional on the row still being queued.
pub async fn claim_recipient(pool: &AnyPool, kind: DbKind, id: &str, at: i64) -> Result<bool> {
    let sql = rewrite_sql(
        "UPDATE campaign_recipients SET status = 'processing', attempted_at = ? WHERE id = ? AND status = 'queued'",
        kind,
    );
    let result = sqlx::query(sql.as_ref()).bind(at).bind(id).execute(pool).await?;
    Ok(result.rows_affected() == 1)
}

/// `processing` → `queued`, for rows claimed by a batch that could not go on.
pub async fn release_recipient(pool: &AnyPool, kind: DbKind, id: &str) -> Result<bool> {
    let sql = rewrite_sql(
        "UPDATE campaign_recipients SET status = 'queued', attempted_at = NULL WHERE id = ? AND status = 'processing'",
        kind,
    );
    let result = sqlx::query(sql.as_ref()).bind(id).execute(pool).await?;
    Ok(result.rows_affected() == 1)
}

pub async fn update_recipient_result(
    pool: &AnyPool,
    kind: DbKind,
    id: &str,
    status: &str,
    error_reason: Option<&str>,
    provider_message_id: Option<&str>,
) -> Result<()> {
    let sql = rewrite_sql(
        "UPDATE campaign_recipients SET status = ?, error_reason = ?, provider_message_id = ? WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(status)
        .bind(error_reason)
        .bind(provider_message_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_recipients_with_status(
    pool: &AnyPool,
    kind: DbKind,
    campaign_id: &str,
    status: &str,
) -> Result<i64> {
    let sql = rewrite_sql(
        "SELECT COUNT(*) AS n FROM campaign_recipients WHERE campaign_id = ? AND status = ?",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(campaign_id)
        .bind(status)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("n")?)
}

pub async fn recipient_status_counts(
    pool: &AnyPool,
    kind: DbKind,
    campaign_id: &str,
) -> Result<HashMap<String, i64>> {
    let sql = rewrite_sql(
        "SELECT status, COUNT(*) AS n FROM campaign_recipients WHERE campaign_id = ? GROUP BY status",
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(campaign_id)
        .fetch_all(pool)
        .await?;
    let mut result = HashMap::new();
    for row in rows {
        result.insert(row.try_get::<String, _>("status")?, row.try_get::<i64, _>("n")?);
    }
    Ok(result)
}

pub async fn list_recipients(
    pool: &AnyPool,
    kind: DbKind,
    campaign_id: &str,
) -> Result<Vec<RecipientRecord>> {
    let sql = format!(
        "SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients WHERE campaign_id = ? ORDER BY created_at ASC, seq ASC"
    );
    let sql = rewrite_sql(&sql, kind);
    let rows = sqlx::query(sql.as_ref())
        .bind(campaign_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(recipient_from_row).collect()
}

// ---- audit --------------------------------------------------------------

pub async fn insert_audit_event(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
    action: &str,
    meta: &serde_json::Value,
) -> Result<()> {
    let sql = rewrite_sql(
        "INSERT INTO audit_events (id, workspace_id, action, meta, created_at) VALUES (?, ?, ?, ?, ?)",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(new_id())
        .bind(workspace_id)
        .bind(action)
        .bind(meta.to_string())
        .bind(now_ms())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_audit_events(
    pool: &AnyPool,
    kind: DbKind,
    workspace_id: &str,
) -> Result<Vec<AuditRecord>> {
    let sql = rewrite_sql(
        "SELECT id, workspace_id, action, meta, created_at FROM audit_events WHERE workspace_id = ? ORDER BY created_at ASC, id ASC",
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let meta: String = row.try_get("meta")?;
        result.push(AuditRecord {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            action: row.try_get("action")?,
            meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(result)
}

pub async fn count_rows(pool: &AnyPool, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) AS n FROM {table}");
    let row = sqlx::query(&sql).fetch_one(pool).await?;
    Ok(row.try_get("n")?)
}
