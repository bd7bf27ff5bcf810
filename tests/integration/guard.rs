mod support;

use relay_hub::db::{self, WorkspaceSettings};
use relay_hub::error::HubError;
use relay_hub::guard::{self, DenyReason, SESSION_WINDOW_MS};
use support::*;

const LAST_INBOUND: i64 = 1_700_000_000_000;

#[tokio::test]
async fn test_session_window_edges() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = open_thread(state, &channel, "628111").await;
    insert_message(state, &thread, "inbound", Some("wamid.1"), "sent", Some("hello"), LAST_INBOUND).await;

    let just_inside = LAST_INBOUND + (23 * 3600 + 59 * 60 + 59) * 1000;
    let decision = guard::can_send_at(&state.pool, state.db_kind, &thread.id, just_inside)
        .await
        .unwrap();
    assert!(decision.allowed);
    assert!(decision.reason.is_none());

    for now in [LAST_INBOUND + SESSION_WINDOW_MS, LAST_INBOUND + SESSION_WINDOW_MS + 60_000] {
        let decision = guard::can_send_at(&state.pool, state.db_kind, &thread.id, now)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::SessionExpired));
    }
}

#[tokio::test]
async fn test_latest_inbound_counts() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = open_thread(state, &channel, "628111").await;
    insert_message(state, &thread, "inbound", Some("wamid.1"), "sent", Some("old"), LAST_INBOUND).await;
    insert_message(state, &thread, "inbound", Some("wamid.2"), "sent", Some("new"), LAST_INBOUND + SESSION_WINDOW_MS).await;
    insert_message(state, &thread, "outbound", Some("wamid.3"), "sent", Some("reply"), LAST_INBOUND + 2 * SESSION_WINDOW_MS).await;

    let decision = guard::can_send_at(
        &state.pool,
        state.db_kind,
        &thread.id,
        LAST_INBOUND + SESSION_WINDOW_MS + 1_000,
    )
    .await
    .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_no_inbound_is_expired() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = open_thread(state, &channel, "628111").await;

    let decision = guard::can_send_now(&state.pool, state.db_kind, &thread.id)
        .await
        .unwrap();
    assert_eq!(decision.reason, Some(DenyReason::SessionExpired));
}

#[tokio::test]
async fn test_opt_out_flips_thread_once() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = open_thread(state, &channel, "628111").await;
    insert_message(state, &thread, "inbound", Some("wamid.1"), "sent", Some("Please STOP."), db::now_ms()).await;

    for _ in 0..2 {
        let decision = guard::can_send_now(&state.pool, state.db_kind, &thread.id)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::RecipientOptedOut));
    }

    let thread = db::get_thread(&state.pool, state.db_kind, &thread.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.status, "opt_out");
    let opt_outs = audit_actions(state, WORKSPACE)
        .await
        .into_iter()
        .filter(|a| a == "thread.opt_out")
        .count();
    assert_eq!(opt_outs, 1);
}

#[tokio::test]
async fn test_opt_out_thread_is_denied_even_inside_window() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = open_thread(state, &channel, "628111").await;
    insert_message(state, &thread, "inbound", Some("wamid.1"), "sent", Some("thanks!"), db::now_ms()).await;
    db::set_thread_status(&state.pool, state.db_kind, &thread.id, "opt_out")
        .await
        .unwrap();

    let decision = guard::can_send_now(&state.pool, state.db_kind, &thread.id)
        .await
        .unwrap();
    assert_eq!(decision.reason, Some(DenyReason::RecipientOptedOut));
}

#[tokio::test]
async fn test_words_containing_stop_do_not_opt_out() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = open_thread(state, &channel, "628111").await;
    insert_message(state, &thread, "inbound", Some("wamid.1"), "sent", Some("my stopwatch broke"), db::now_ms()).await;

    let decision = guard::can_send_now(&state.pool, state.db_kind, &thread.id)
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_sandbox_allow_list() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    db::upsert_workspace_settings(
        &state.pool,
        state.db_kind,
        &WorkspaceSettings {
            workspace_id: WORKSPACE.to_string(),
            auto_routing: true,
            sandbox_enabled: true,
            sandbox_allow_list: vec!["+62 812-3456-7890".to_string()],
        },
    )
    .await
    .unwrap();

    let listed = open_thread(state, &channel, "6281234567890").await;
    let stranger = open_thread(state, &channel, "6289999999999").await;
    for thread in [&listed, &stranger] {
        insert_message(state, thread, "inbound", None, "sent", Some("hi"), db::now_ms()).await;
    }

    let allowed = guard::can_send_now(&state.pool, state.db_kind, &listed.id)
        .await
        .unwrap();
    assert!(allowed.allowed);
    let denied = guard::can_send_now(&state.pool, state.db_kind, &stranger.id)
        .await
        .unwrap();
    assert_eq!(denied.reason, Some(DenyReason::NotWhitelisted));
}

#[tokio::test]
async fn test_template_ignores_window_but_not_opt_out() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let quiet = open_thread(state, &channel, "628111").await;
    let decision = guard::can_send_template_now(&state.pool, state.db_kind, &quiet.id)
        .await
        .unwrap();
    assert!(decision.allowed);

    let leaving = open_thread(state, &channel, "628222").await;
    insert_message(state, &leaving, "inbound", Some("wamid.q"), "sent", Some("quit"), LAST_INBOUND).await;
    let decision = guard::can_send_template_now(&state.pool, state.db_kind, &leaving.id)
        .await
        .unwrap();
    assert_eq!(decision.reason, Some(DenyReason::RecipientOptedOut));
}

#[tokio::test]
async fn test_unknown_thread() {
    let hub = setup().await;
    let err = guard::can_send_now(&hub.state.pool, hub.state.db_kind, "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::NotFound("thread")));
}
