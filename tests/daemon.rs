use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use http_body_util::BodyExt;
use httpmock::Method::{GET, POST};
use httpmock::{Mock, MockServer};
use serde_json::{json, Value};
use tower::ServiceExt;

use wa_bot::config::{
    Config, GatewayConfig, GeminiConfig, KvConfig, Limits, MemorySettings, TwilioConfig,
};
use wa_bot::daemon::{build_router, build_state};

const ADMIN_TOKEN: &str = "admin-token";

struct Backends {
    kv: MockServer,
    gemini: MockServer,
    gateway: MockServer,
    twilio: MockServer,
}

async fn backends() -> Backends {
    Backends {
        kv: MockServer::start_async().await,
        gemini: MockServer::start_async().await,
        gateway: MockServer::start_async().await,
        twilio: MockServer::start_async().await,
    }
}

fn config(b: &Backends, admin_token: Option<&str>) -> Config {
    Config {
        twilio: TwilioConfig {
            account_sid: "ACtest".to_string(),
            auth_token: "twilio-secret".to_string(),
            whatsapp_number: "whatsapp:+14155238886".to_string(),
            base_url: b.twilio.base_url(),
        },
        kv: KvConfig {
            url: b.kv.base_url(),
            token: "kv-token".to_string(),
        },
        gemini: GeminiConfig {
            api_key: "gemini-key".to_string(),
            base_url: b.gemini.base_url(),
        },
        gateway: GatewayConfig {
            api_key: Some("gateway-key".to_string()),
            base_url: b.gateway.base_url(),
        },
        memory: MemorySettings::default(),
        limits: Limits::default(),
        admin_token: admin_token.map(str::to_string),
    }
}

fn router(b: &Backends) -> Router {
    build_router(build_state(&config(b, Some(ADMIN_TOKEN))))
}

async fn kv_mock<'a>(server: &'a MockServer, needle: &str, result: Value) -> Mock<'a> {
    let needle = needle.to_string();
    server
        .mock_async(move |when, then| {
            when.method(POST).path("/").body_includes(needle);
            then.status(200).json_body(json!({ "result": result }));
        })
        .await
}

fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {ADMIN_TOKEN}"));
    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_needs_no_token() {
    let b = backends().await;

    let response = router(&b)
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn admin_endpoints_require_the_token() {
    let b = backends().await;
    let app = router(&b);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/system-prompt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/logs")
                .header("authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn x_api_key_header_is_accepted() {
    let b = backends().await;
    kv_mock(&b.kv, r#"["GET","system:prompt"]"#, json!(null)).await;

    let response = router(&b)
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/system-prompt")
                .header("x-api-key", ADMIN_TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["prompt"].as_str().unwrap().contains("asistente"));
}

#[tokio::test]
async fn missing_admin_token_fails_closed() {
    let b = backends().await;
    let app = build_router(build_state(&config(&b, None)));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/logs")
                .header("authorization", "Bearer ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn system_prompt_updates_and_rejects_blank_input() {
    let b = backends().await;
    let app = router(&b);
    let write = kv_mock(&b.kv, r#"["SET","system:prompt"#, json!("OK")).await;

    let response = app
        .clone()
        .oneshot(admin_request(
            "POST",
            "/system-prompt",
            Some(json!({"prompt": "Eres un bot de prueba"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"success": true}));

    let response = app
        .clone()
        .oneshot(admin_request(
            "POST",
            "/system-prompt",
            Some(json!({"prompt": "   "})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    write.assert_calls(1);
}

#[tokio::test]
async fn logs_endpoint_lists_and_clears() {
    let b = backends().await;
    let app = router(&b);

    let entry = json!({
        "id": "1756400000000-1234",
        "timestamp": "2026-08-28T12:00:00Z",
        "from": "whatsapp:+5215550001234",
        "message": "hola",
        "model": "gemini",
        "response": "Hola",
        "status": "success"
    })
    .to_string();
    kv_mock(
        &b.kv,
        r#"["LRANGE","logs:messages","0","4"]"#,
        json!([entry]),
    )
    .await;
    let clear = kv_mock(&b.kv, r#"["DEL","logs:messages"]"#, json!(1)).await;

    let response = app
        .clone()
        .oneshot(admin_request("GET", "/logs?limit=5", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["logs"][0]["from"], "whatsapp:+5215550001234");
    assert_eq!(body["logs"][0]["status"], "success");

    let response = app
        .clone()
        .oneshot(admin_request("DELETE", "/logs", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    clear.assert_calls(1);
}

#[tokio::test]
async fn balances_aggregate_daily_usage_and_twilio() {
    let b = backends().await;
    let today = Utc::now().format("%Y-%m-%d");

    kv_mock(
        &b.kv,
        &format!(r#"["GET","gemini:usage:{today}"]"#),
        json!("12"),
    )
    .await;
    kv_mock(
        &b.kv,
        &format!(r#"["GET","upstash:commands:{today}"]"#),
        json!("34"),
    )
    .await;
    b.twilio
        .mock_async(|when, then| {
            when.method(GET).path("/2010-04-01/Accounts/ACtest/Balance.json");
            then.status(200)
                .json_body(json!({"balance": "-1.25", "currency": "USD"}));
        })
        .await;

    let response = router(&b)
        .oneshot(admin_request("GET", "/balances", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["gemini"]["used"], 12);
    assert_eq!(body["gemini"]["limit"], 1500);
    assert_eq!(body["upstash"]["used"], 34);
    assert_eq!(body["upstash"]["limit"], 10000);
    assert_eq!(body["twilio"]["balance"], 1.25);
    assert_eq!(body["twilio"]["currency"], "USD");
}

#[tokio::test]
async fn document_upload_stores_content_and_metadata() {
    let b = backends().await;

    let content_write = kv_mock(&b.kv, r#"["SET","wa:knowledge:content:"#, json!("OK")).await;
    let meta_write = kv_mock(&b.kv, r#"["HSET","wa:knowledge:docs"#, json!(1)).await;

    let encoded =
        general_purpose::STANDARD.encode("Horario: lunes a viernes de 9 a 18, sábado 9 a 13.");
    let response = router(&b)
        .oneshot(admin_request(
            "POST",
            "/rag/upload",
            Some(json!({"filename": "horario.txt", "content": encoded, "category": "info"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["document"]["filename"], "horario.txt");
    assert_eq!(body["document"]["category"], "info");
    assert!(body["document"]["word_count"].as_u64().unwrap() > 0);
    content_write.assert_calls(1);
    meta_write.assert_calls(1);
}

#[tokio::test]
async fn upload_rejects_unsupported_file_types() {
    let b = backends().await;

    let encoded = general_purpose::STANDARD.encode("%PDF-1.4 binary payload here");
    let response = router(&b)
        .oneshot(admin_request(
            "POST",
            "/rag/upload",
            Some(json!({"filename": "manual.pdf", "content": encoded})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("unsupported file type"));
}

#[tokio::test]
async fn upload_requires_filename_and_content() {
    let b = backends().await;

    let response = router(&b)
        .oneshot(admin_request(
            "POST",
            "/rag/upload",
            Some(json!({"filename": "", "content": ""})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

fn document_meta(id: &str, filename: &str) -> String {
    json!({
        "id": id,
        "filename": filename,
        "category": "info",
        "file_type": "txt",
        "word_count": 10,
        "char_count": 50,
        "uploaded_at": "2026-08-01T00:00:00Z"
    })
    .to_string()
}

#[tokio::test]
async fn document_list_and_search_read_from_the_store() {
    let b = backends().await;
    let app = router(&b);

    kv_mock(
        &b.kv,
        r#"["HGETALL","wa:knowledge:docs"]"#,
        json!(["horario-1", document_meta("horario-1", "horario.txt")]),
    )
    .await;
    kv_mock(
        &b.kv,
        r#"["GET","wa:knowledge:content:horario-1"]"#,
        json!("Horario: lunes a viernes de 9 a 18."),
    )
    .await;

    let response = app
        .clone()
        .oneshot(admin_request("GET", "/rag/list", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["documents"][0]["filename"], "horario.txt");

    let response = app
        .clone()
        .oneshot(admin_request(
            "POST",
            "/rag/search",
            Some(json!({"query": "horario", "topK": 3})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["filename"], "horario.txt");
    assert!(body["results"][0]["score"].as_u64().unwrap() >= 1);
    assert!(body["results"][0]["snippet"]
        .as_str()
        .unwrap()
        .contains("lunes"));
}

#[tokio::test]
async fn search_requires_a_query() {
    let b = backends().await;

    let response = router(&b)
        .oneshot(admin_request(
            "POST",
            "/rag/search",
            Some(json!({"query": "  "})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn document_delete_removes_both_keys() {
    let b = backends().await;
    let app = router(&b);

    kv_mock(
        &b.kv,
        r#"["HGET","wa:knowledge:docs","horario-1"]"#,
        json!(document_meta("horario-1", "horario.txt")),
    )
    .await;
    let content_delete =
        kv_mock(&b.kv, r#"["DEL","wa:knowledge:content:horario-1"]"#, json!(1)).await;
    let meta_delete = kv_mock(
        &b.kv,
        r#"["HDEL","wa:knowledge:docs","horario-1"]"#,
        json!(1),
    )
    .await;

    let response = app
        .clone()
        .oneshot(admin_request(
            "DELETE",
            "/rag/delete",
            Some(json!({"documentId": "horario-1"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("horario.txt"));
    content_delete.assert_calls(1);
    meta_delete.assert_calls(1);

    kv_mock(
        &b.kv,
        r#"["HGET","wa:knowledge:docs","missing-9"]"#,
        json!(null),
    )
    .await;
    let response = app
        .clone()
        .oneshot(admin_request(
            "DELETE",
            "/rag/delete",
            Some(json!({"documentId": "missing-9"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
