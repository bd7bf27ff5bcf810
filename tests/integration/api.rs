mod support;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use relay_hub::access::TOKEN_HEADER;
use relay_hub::budget::{BudgetDecision, BudgetGuard};
use relay_hub::db;
use relay_hub::webhook::{sign_body, SIGNATURE_HEADER};
use relay_hub::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(state, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(TOKEN_HEADER, token)
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn webhook_request(body: &[u8], signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/meta")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

fn whatsapp_payload() -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA1",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {"display_phone_number": "15550001111", "phone_number_id": PHONE_NUMBER_ID},
                    "contacts": [{"wa_id": "628111", "profile": {"name": "Dewi"}}],
                    "messages": [{
                        "from": "628111",
                        "id": "wamid.API1",
                        "type": "text",
                        "text": {"body": "hello there"}
                    }]
                }
            }]
        }]
    })
}

struct DenyAll;

#[async_trait]
impl BudgetGuard for DenyAll {
    async fn assert_budget(&self, _workspace_id: &str, _cost: u64) -> anyhow::Result<BudgetDecision> {
        Ok(BudgetDecision::Denied("budget_exhausted".to_string()))
    }
}

async fn create_campaign_via_api(state: &AppState, recipients: Value) -> String {
    let (status, body) = send_json(
        state,
        authed(
            "POST",
            "/v1/campaigns",
            ADMIN_TOKEN,
            Some(json!({"templateName": "order_update", "recipients": recipients})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "draft");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let hub = setup().await;
    let (status, body) = send_json(
        &hub.state,
        Request::builder().uri("/v1/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_webhook_handshake() {
    let hub = setup().await;
    let (status, body) = send(
        &hub.state,
        Request::builder()
            .uri("/v1/webhooks/meta?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"12345");

    let (status, _) = send(
        &hub.state,
        Request::builder()
            .uri("/v1/webhooks/meta?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let hub = setup().await;
    seed_whatsapp(&hub.state).await;
    let body = serde_json::to_vec(&whatsapp_payload()).unwrap();

    let (status, value) = send_json(&hub.state, webhook_request(&body, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(value["error"], "invalid_signature");

    let forged = sign_body("not-the-secret", &body);
    let (status, _) = send_json(&hub.state, webhook_request(&body, Some(forged))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(db::count_rows(&hub.state.pool, "messages").await.unwrap(), 0);
}

#[tokio::test]
async fn test_webhook_stores_signed_message() {
    let hub = setup().await;
    seed_whatsapp(&hub.state).await;
    let body = serde_json::to_vec(&whatsapp_payload()).unwrap();
    let signature = sign_body(APP_SECRET, &body);

    let (status, value) = send_json(&hub.state, webhook_request(&body, Some(signature.clone()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["ok"], true);
    assert_eq!(value["report"]["inserted"], 1);

    let stored = db::find_message_by_provider_id(&hub.state.pool, hub.state.db_kind, WORKSPACE, "wamid.API1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.direction, "inbound");
    assert_eq!(stored.body.as_deref(), Some("hello there"));

    let (status, value) = send_json(&hub.state, webhook_request(&body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["report"]["duplicates"], 1);
    assert_eq!(db::count_rows(&hub.state.pool, "messages").await.unwrap(), 1);
}

#[tokio::test]
async fn test_webhook_non_json_body_is_server_error() {
    let hub = setup().await;
    let body = b"not json at all";
    let signature = sign_body(APP_SECRET, body);
    let (status, value) = send_json(&hub.state, webhook_request(body, Some(signature))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(value["error"].is_string());
}

#[tokio::test]
async fn test_campaign_routes_require_role() {
    let hub = setup().await;
    let payload = json!({"templateName": "order_update"});

    let (status, value) = send_json(
        &hub.state,
        authed("POST", "/v1/campaigns", AGENT_TOKEN, Some(payload.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(value["error"], "role_not_permitted");

    let (status, _) = send_json(
        &hub.state,
        Request::builder()
            .method("POST")
            .uri("/v1/campaigns")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_and_run_campaign() {
    let hub = setup().await;
    let state = &hub.state;
    seed_contact(state, "ct_out", Some("+628000"), true, true).await;
    seed_contact(state, "ct_new", Some("+628001"), false, false).await;
    let campaign_id = create_campaign_via_api(
        state,
        json!([{"contactId": "ct_out"}, {"contactId": "ct_new", "phone": "+628001"}]),
    )
    .await;

    let (status, body) = send_json(
        state,
        authed("POST", &format!("/v1/campaigns/{campaign_id}/run"), ADMIN_TOKEN, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["processed"], 2);
    assert_eq!(body["queuedRemaining"], 0);
    assert_eq!(body["dryRun"], false);
    assert_eq!(body["status"], "finished");

    let (status, body) = send_json(
        state,
        authed("GET", &format!("/v1/campaigns/{campaign_id}"), AGENT_TOKEN, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["campaign"]["status"], "finished");
    assert_eq!(body["recipients"]["failed"], 2);

    let (status, _) = send_json(
        state,
        authed("POST", &format!("/v1/campaigns/{campaign_id}/run"), OTHER_ADMIN_TOKEN, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_thread_of_other_workspace_is_hidden() {
    let hub = setup().await;
    let state = &hub.state;
    let foreign = seed_channel(state, OTHER_WORKSPACE, "whatsapp", "PN_OTHER").await;
    let thread = open_thread(state, &foreign, "628999").await;

    let (status, body) = send_json(
        state,
        authed("GET", &format!("/v1/threads/{}/messages", thread.id), ADMIN_TOKEN, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "thread_not_found");

    let (status, body) = send_json(state, authed("GET", "/v1/threads", ADMIN_TOKEN, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_send_outside_session_is_conflict() {
    let hub = setup().await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = open_thread(state, &channel, "628111").await;

    let (status, body) = send_json(
        state,
        authed(
            "GET",
            &format!("/v1/threads/{}/send-check", thread.id),
            AGENT_TOKEN,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "session_expired");

    let (status, body) = send_json(
        state,
        authed(
            "POST",
            &format!("/v1/threads/{}/messages", thread.id),
            AGENT_TOKEN,
            Some(json!({"body": "are you there?"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "session_expired");
    assert_eq!(db::count_rows(&state.pool, "messages").await.unwrap(), 0);
}

async fn graph_hub(server: &MockServer) -> TestHub {
    let uri = server.uri();
    setup_with(move |cfg| {
        cfg.graph.base_url = uri;
        cfg.graph.timeout_seconds = 1;
    })
    .await
}

async fn thread_with_recent_inbound(state: &AppState, channel: &db::ChannelRecord) -> db::ThreadRecord {
    let thread = open_thread(state, channel, "628111").await;
    insert_message(state, &thread, "inbound", Some("wamid.IN"), "sent", Some("hi"), db::now_ms()).await;
    thread
}

#[tokio::test]
async fn test_guarded_text_send_is_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v21.0/PN1/messages"))
        .and(header("authorization", "Bearer token-1"))
        .and(body_partial_json(json!({
            "messaging_product": "whatsapp",
            "to": "628111",
            "type": "text",
            "text": {"body": "on its way"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": [{"id": "wamid.OUT1"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let hub = graph_hub(&server).await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = thread_with_recent_inbound(state, &channel).await;

    let (status, body) = send_json(
        state,
        authed(
            "POST",
            &format!("/v1/threads/{}/messages", thread.id),
            AGENT_TOKEN,
            Some(json!({"body": "on its way"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["direction"], "outbound");
    assert_eq!(body["status"], "sent");
    assert_eq!(body["provider_message_id"], "wamid.OUT1");

    let thread = db::get_thread(&state.pool, state.db_kind, &thread.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.last_message_preview.as_deref(), Some("on its way"));
    assert!(audit_actions(state, WORKSPACE)
        .await
        .contains(&"message.outbound".to_string()));
}

#[tokio::test]
async fn test_messenger_text_send_uses_page_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v21.0/PAGE1/messages"))
        .and(body_partial_json(json!({
            "recipient": {"id": "psid-1"},
            "messaging_type": "RESPONSE",
            "message": {"text": "thanks"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"recipient_id": "psid-1", "message_id": "m_OUT1"})))
        .expect(1)
        .mount(&server)
        .await;

    let hub = graph_hub(&server).await;
    let state = &hub.state;
    let channel = seed_channel(state, WORKSPACE, "messenger", PAGE_ID).await;
    let thread = open_thread(state, &channel, "psid-1").await;
    insert_message(state, &thread, "inbound", Some("m_IN1"), "sent", Some("hey"), db::now_ms()).await;

    let (status, body) = send_json(
        state,
        authed(
            "POST",
            &format!("/v1/threads/{}/messages", thread.id),
            AGENT_TOKEN,
            Some(json!({"body": "thanks"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider_message_id"], "m_OUT1");
}

#[tokio::test]
async fn test_template_send_to_thread() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v21.0/PN1/messages"))
        .and(body_partial_json(json!({
            "type": "template",
            "template": {"name": "order_update", "language": {"code": "id"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": [{"id": "wamid.TPL1"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let hub = graph_hub(&server).await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = open_thread(state, &channel, "628111").await;

    let (status, body) = send_json(
        state,
        authed(
            "POST",
            &format!("/v1/threads/{}/template", thread.id),
            AGENT_TOKEN,
            Some(json!({"templateName": "order_update", "language": "id"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "template");
    assert_eq!(body["status"], "sent");
    assert_eq!(body["provider_message_id"], "wamid.TPL1");
}

#[tokio::test]
async fn test_template_on_messenger_is_unsupported() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let hub = graph_hub(&server).await;
    let state = &hub.state;
    let channel = seed_channel(state, WORKSPACE, "messenger", PAGE_ID).await;
    let thread = open_thread(state, &channel, "psid-1").await;

    let (status, body) = send_json(
        state,
        authed(
            "POST",
            &format!("/v1/threads/{}/template", thread.id),
            AGENT_TOKEN,
            Some(json!({"templateName": "order_update"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "channel_unsupported");
}

#[tokio::test]
async fn test_template_status_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v21.0/TPL1"))
        .and(query_param("fields", "name,status,language,category"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "TPL1",
            "name": "order_update",
            "status": "APPROVED",
            "language": "en_US",
            "category": "UTILITY"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let hub = graph_hub(&server).await;
    let state = &hub.state;
    seed_whatsapp(state).await;

    let (status, body) = send_json(state, authed("GET", "/v1/templates/TPL1/status", AGENT_TOKEN, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "TPL1");
    assert_eq!(body["status"], "APPROVED");
    assert_eq!(body["category"], "UTILITY");
}

#[tokio::test]
async fn test_timed_out_send_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v21.0/PN1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"messages": [{"id": "wamid.LATE"}]}))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let hub = graph_hub(&server).await;
    let state = &hub.state;
    let channel = seed_whatsapp(state).await;
    let thread = thread_with_recent_inbound(state, &channel).await;

    let (status, body) = send_json(
        state,
        authed(
            "POST",
            &format!("/v1/threads/{}/messages", thread.id),
            AGENT_TOKEN,
            Some(json!({"body": "hello?"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "upstream_timeout");

    let messages = db::list_messages(&state.pool, state.db_kind, &thread.id, 10, 0)
        .await
        .unwrap();
    let outbound = messages.iter().find(|m| m.direction == "outbound").unwrap();
    assert_eq!(outbound.status, "failed");
    assert_eq!(outbound.error_code.as_deref(), Some("upstream_timeout"));
}

#[tokio::test]
async fn test_budget_denial_blocks_campaign_run() {
    let hub = setup().await;
    let mut state = hub.state.clone();
    state.budget = Arc::new(DenyAll);
    seed_contact(&state, "ct_1", Some("+628111"), true, false).await;
    let campaign_id = create_campaign_via_api(&state, json!([{"contactId": "ct_1"}])).await;

    let (status, body) = send_json(
        &state,
        authed("POST", &format!("/v1/campaigns/{campaign_id}/run"), ADMIN_TOKEN, None),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "budget_exhausted");

    let campaign = db::get_campaign(&state.pool, state.db_kind, &campaign_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, "draft");
}

#[tokio::test]
async fn test_campaign_runs_are_rate_limited() {
    let hub = setup_with(|cfg| cfg.rate_limit.campaign_runs_per_window = 1).await;
    let state = &hub.state;
    let campaign_id = create_campaign_via_api(state, json!([{"contactId": "ct_missing"}])).await;
    let uri = format!("/v1/campaigns/{campaign_id}/run");

    let (status, _) = send_json(state, authed("POST", &uri, ADMIN_TOKEN, None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(state, authed("POST", &uri, ADMIN_TOKEN, None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
}
