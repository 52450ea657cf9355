use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    routing::{get, post},
    Router,
};
use axum_test::TestServer;
use feishu_bot::{
    config::Settings,
    database::{Database, Session},
    error::{AppError, AppResult},
    handlers::AppState,
    routes::with_error_handling,
    schema::{ColumnDef, Schema, SqlType, TableDef},
    server::{Phase, Server},
    service::{WebhookService, MESSAGE_EVENT_PROCESSED},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

struct TestApp {
    server: TestServer,
    lifecycle: Server,
    _dir: TempDir,
}

fn test_settings(dir: &TempDir) -> Settings {
    Settings {
        database_url: format!("sqlite://{}", dir.path().join("test.sqlite").display()),
        ..Settings::default()
    }
}

async fn create_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut lifecycle = Server::new(test_settings(&dir));
    lifecycle.start().await.unwrap();

    let server = TestServer::new(lifecycle.router().unwrap()).unwrap();

    TestApp {
        server,
        lifecycle,
        _dir: dir,
    }
}

fn notes_table() -> TableDef {
    TableDef::new("notes")
        .column(ColumnDef::id())
        .column(ColumnDef::new("body", SqlType::Text).not_null())
        .column(ColumnDef::created_at())
        .column(ColumnDef::updated_at())
}

fn message_event() -> Value {
    json!({
        "schema": "2.0",
        "header": {
            "event_id": "5e3702a84e847582be8db7fb73283c02",
            "event_type": "im.message.receive_v1",
            "create_time": "1608725989000",
            "token": "rvaYgkND1GOiu5MM0E1rncYC6PLtF7JV",
            "app_id": "cli_9f5343c580712544",
            "tenant_key": "2ca1d211f64f6438"
        },
        "event": {
            "sender": {
                "sender_id": { "open_id": "ou_84aad35d084aa403a838cf73ee18467" },
                "sender_type": "user",
                "tenant_key": "2ca1d211f64f6438"
            },
            "message": {
                "message_id": "om_5ce6d572455d361153b7cb51da133945",
                "chat_id": "oc_5ce6d572455d361153b7xx51da133945",
                "chat_type": "p2p",
                "message_type": "text",
                "content": "{\"text\":\"@_user_1 hello\"}"
            }
        }
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app().await;

    let response = app.server.get("/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(
        body,
        json!({ "status": "healthy", "app_name": "Feishu Bot", "version": "0.1.0" })
    );
}

#[tokio::test]
async fn test_health_check_reflects_settings() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        app_name: "Ops Bot".to_string(),
        app_version: "2.3.4".to_string(),
        ..test_settings(&dir)
    };
    let mut lifecycle = Server::new(settings);
    lifecycle.start().await.unwrap();
    let server = TestServer::new(lifecycle.router().unwrap()).unwrap();

    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["app_name"], "Ops Bot");
    assert_eq!(body["version"], "2.3.4");
}

#[tokio::test]
async fn test_url_verification_echoes_challenge() {
    let app = create_test_app().await;

    let response = app
        .server
        .post("/webhook/feishu")
        .json(&json!({
            "challenge": "ajls384kdjx98XX",
            "token": "xxxxxx",
            "type": "url_verification"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body, json!({ "challenge": "ajls384kdjx98XX" }));
}

#[tokio::test]
async fn test_url_verification_preserves_challenge_exactly() {
    let app = create_test_app().await;

    for challenge in ["  padded  ", "飞书-挑战/+=", "a\"quoted\\value", ""] {
        let response = app
            .server
            .post("/webhook/feishu")
            .json(&json!({
                "challenge": challenge,
                "token": "xxxxxx",
                "type": "url_verification"
            }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["challenge"].as_str(), Some(challenge));
    }
}

#[tokio::test]
async fn test_url_verification_without_type_field() {
    let app = create_test_app().await;

    let response = app
        .server
        .post("/webhook/feishu")
        .json(&json!({ "challenge": "abc123", "token": "xxxxxx" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body, json!({ "challenge": "abc123" }));
}

#[tokio::test]
async fn test_url_verification_without_token() {
    let app = create_test_app().await;

    for body in [
        json!({ "challenge": "abc", "type": "url_verification" }),
        json!({ "challenge": "abc", "token": null, "type": "url_verification" }),
    ] {
        let response = app.server.post("/webhook/feishu").json(&body).await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body, json!({ "challenge": "abc" }));
    }
}

#[tokio::test]
async fn test_message_event_is_acknowledged() {
    let app = create_test_app().await;

    let response = app
        .server
        .post("/webhook/feishu")
        .json(&message_event())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(
        body,
        json!({ "success": true, "message": MESSAGE_EVENT_PROCESSED })
    );
}

#[tokio::test]
async fn test_unknown_shape_returns_422() {
    let app = create_test_app().await;

    let response = app
        .server
        .post("/webhook/feishu")
        .json(&json!({ "foo": "bar" }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "validation_error");

    let detail = body["detail"].as_array().unwrap();
    assert_eq!(detail.len(), 2);
    assert_eq!(detail[0]["variant"], "url_verification");
    assert_eq!(detail[1]["variant"], "event_callback");

    let event_fields: Vec<&str> = detail[1]["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|error| error["field"].as_str().unwrap())
        .collect();
    assert_eq!(event_fields, vec!["schema", "header", "event"]);
}

#[tokio::test]
async fn test_explicit_verification_type_is_decisive() {
    let app = create_test_app().await;

    let response = app
        .server
        .post("/webhook/feishu")
        .json(&json!({ "type": "url_verification", "token": "xxxxxx" }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = response.json();
    let detail = body["detail"].as_array().unwrap();
    assert_eq!(detail.len(), 1);
    assert_eq!(detail[0]["variant"], "url_verification");
    assert_eq!(detail[0]["errors"][0]["field"], "challenge");
    assert_eq!(detail[0]["errors"][0]["message"], "field required");
}

#[tokio::test]
async fn test_incomplete_event_header_lists_missing_fields() {
    let app = create_test_app().await;

    let mut event = message_event();
    let header = event["header"].as_object_mut().unwrap();
    header.remove("event_id");
    header.insert("tenant_key".to_string(), json!(42));

    let response = app.server.post("/webhook/feishu").json(&event).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = response.json();
    let event_errors = body["detail"][1]["errors"].as_array().unwrap();
    assert!(event_errors
        .iter()
        .any(|e| e["field"] == "header.event_id" && e["message"] == "field required"));
    assert!(event_errors
        .iter()
        .any(|e| e["field"] == "header.tenant_key" && e["message"] == "expected a string"));
}

#[tokio::test]
async fn test_non_object_json_returns_422() {
    let app = create_test_app().await;

    let response = app
        .server
        .post("/webhook/feishu")
        .json(&json!(["challenge", "token"]))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["detail"][0]["errors"][0]["field"], "body");
}

#[tokio::test]
async fn test_malformed_json_returns_400() {
    let app = create_test_app().await;

    let response = app.server.post("/webhook/feishu").text("not-json").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "invalid_json");
}

#[tokio::test]
async fn test_empty_body_returns_400() {
    let app = create_test_app().await;

    let response = app.server.post("/webhook/feishu").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request_body");
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = create_test_app().await;

    let response = app
        .server
        .method(Method::OPTIONS, "/webhook/feishu")
        .add_header(
            header::ORIGIN,
            HeaderValue::from_static("http://localhost:3000"),
        )
        .add_header(
            header::ACCESS_CONTROL_REQUEST_METHOD,
            HeaderValue::from_static("POST"),
        )
        .await;

    assert!(response.status_code() == 200 || response.status_code() == 204);
    assert_eq!(
        response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        "http://localhost:3000"
    );
    assert_eq!(
        response.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
        "true"
    );
}

async fn failing_handler() -> AppResult<&'static str> {
    Err(AppError::Internal("disk on fire".to_string()))
}

async fn panicking_handler() -> &'static str {
    panic!("handler exploded")
}

fn error_router(debug: bool) -> TestServer {
    let settings = Arc::new(Settings {
        debug,
        ..Settings::default()
    });
    let router = Router::new()
        .route("/boom", get(failing_handler))
        .route("/panic", get(panicking_handler));

    TestServer::new(with_error_handling(router, settings)).unwrap()
}

#[tokio::test]
async fn test_unhandled_error_envelope_in_debug() {
    let server = error_router(true);

    let response = server.get("/boom").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["path"], "/boom");
    assert!(body["error"].as_str().unwrap().contains("disk on fire"));
}

#[tokio::test]
async fn test_unhandled_error_envelope_hides_detail_in_production() {
    let server = error_router(false);

    let response = server.get("/boom").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = response.json();
    assert_eq!(
        body,
        json!({ "success": false, "error": "服务器内部错误", "path": "/boom" })
    );
}

#[tokio::test]
async fn test_error_envelope_reports_bare_request_path() {
    let server = error_router(false);

    let response = server.get("/boom").add_query_param("verbose", "1").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = response.json();
    assert_eq!(body["path"], "/boom");
}

#[tokio::test]
async fn test_panic_becomes_error_envelope() {
    let server = error_router(true);

    let response = server.get("/panic").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = response.json();
    assert_eq!(body["path"], "/panic");
    assert!(body["error"].as_str().unwrap().contains("handler exploded"));
}

async fn insert_and_commit(mut session: Session) -> AppResult<StatusCode> {
    sqlx::query("INSERT INTO notes (body) VALUES ('kept')")
        .execute(session.connection())
        .await?;
    session.commit().await?;
    Ok(StatusCode::CREATED)
}

async fn insert_then_fail(mut session: Session) -> AppResult<StatusCode> {
    sqlx::query("INSERT INTO notes (body) VALUES ('discarded')")
        .execute(session.connection())
        .await?;
    Err(AppError::Internal("abort after insert".to_string()))
}

#[tokio::test]
async fn test_request_session_commits_or_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let mut lifecycle = Server::with_schema(settings, Schema::new().table(notes_table()));
    lifecycle.start().await.unwrap();

    let db = lifecycle.database().unwrap().clone();
    let state = AppState {
        settings: lifecycle.settings().clone(),
        db: db.clone(),
        service: WebhookService::new(),
    };
    let router = Router::new()
        .route("/notes", post(insert_and_commit))
        .route("/notes/fail", post(insert_then_fail))
        .with_state(state);
    let router = with_error_handling(router, lifecycle.settings().clone());
    let server = TestServer::new(router).unwrap();

    server.post("/notes").await.assert_status(StatusCode::CREATED);
    server
        .post("/notes/fail")
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let bodies: Vec<String> = sqlx::query_scalar("SELECT body FROM notes ORDER BY id")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(bodies, vec!["kept".to_string()]);
}

#[tokio::test]
async fn test_lifecycle_start_and_stop() {
    let mut app = create_test_app().await;
    assert_eq!(app.lifecycle.phase(), Phase::SchemaReady);

    let db = app.lifecycle.database().unwrap().clone();
    assert!(!db.is_closed());

    app.lifecycle.stop().await;
    assert_eq!(app.lifecycle.phase(), Phase::Disposed);
    assert!(db.is_closed());
    assert!(app.lifecycle.database().is_none());

    // Second stop is a no-op.
    app.lifecycle.stop().await;
    assert_eq!(app.lifecycle.phase(), Phase::Disposed);
}

#[tokio::test]
async fn test_lifecycle_rejects_second_start() {
    let mut app = create_test_app().await;

    let err = app.lifecycle.start().await.unwrap_err();
    assert!(matches!(err, AppError::Lifecycle(_)));
    assert_eq!(app.lifecycle.phase(), Phase::SchemaReady);
}

#[tokio::test]
async fn test_router_requires_started_server() {
    let dir = tempfile::tempdir().unwrap();
    let lifecycle = Server::new(test_settings(&dir));

    assert_eq!(lifecycle.phase(), Phase::Uninitialized);
    assert!(matches!(lifecycle.router(), Err(AppError::Lifecycle(_))));
}

#[tokio::test]
async fn test_startup_fails_fast_when_database_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        database_url: format!(
            "sqlite://{}",
            dir.path().join("missing").join("nested").join("db.sqlite").display()
        ),
        database_pool_timeout_secs: 1,
        ..Settings::default()
    };

    let mut lifecycle = Server::new(settings);
    let err = lifecycle.start().await.unwrap_err();

    assert!(matches!(err, AppError::Database(_)));
    assert_eq!(lifecycle.phase(), Phase::Uninitialized);
    assert!(lifecycle.database().is_none());
}

#[tokio::test]
async fn test_create_all_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&test_settings(&dir).database_url).await.unwrap();
    let schema = Schema::new().table(notes_table());

    db.create_all(&schema).await.unwrap();
    sqlx::query("INSERT INTO notes (body) VALUES ('first')")
        .execute(db.pool())
        .await
        .unwrap();

    db.create_all(&schema).await.unwrap();
    db.create_all(&Schema::registered()).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);

    let stamped: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notes WHERE created_at IS NOT NULL")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(stamped, 1);

    db.dispose().await;
    assert!(db.is_closed());
}

#[tokio::test]
async fn test_scoped_session_commits_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&test_settings(&dir).database_url).await.unwrap();
    db.create_all(&Schema::new().table(notes_table())).await.unwrap();

    let inserted = db
        .scoped(|session| {
            Box::pin(async move {
                let result = sqlx::query("INSERT INTO notes (body) VALUES ('committed')")
                    .execute(session.connection())
                    .await?;
                Ok::<u64, AppError>(result.rows_affected())
            })
        })
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let failed: AppResult<()> = db
        .scoped(|session| {
            Box::pin(async move {
                sqlx::query("INSERT INTO notes (body) VALUES ('rolled back')")
                    .execute(session.connection())
                    .await?;
                Err::<(), AppError>(AppError::Internal("boom".to_string()))
            })
        })
        .await;
    assert!(failed.is_err());

    let bodies: Vec<String> = sqlx::query_scalar("SELECT body FROM notes")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(bodies, vec!["committed".to_string()]);
}

#[tokio::test]
async fn test_dropped_session_is_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    // A single connection, so the check reads through the same connection the
    // dropped session used and would see its row if it were still open.
    let settings = Settings {
        database_pool_size: 1,
        ..test_settings(&dir)
    };
    let db = Database::connect(&settings).await.unwrap();
    db.create_all(&Schema::new().table(notes_table())).await.unwrap();

    {
        let mut session = db.session().await.unwrap();
        sqlx::query("INSERT INTO notes (body) VALUES ('never committed')")
            .execute(session.connection())
            .await
            .unwrap();
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);

    let mut session = db.session().await.unwrap();
    sqlx::query("INSERT INTO notes (body) VALUES ('committed')")
        .execute(session.connection())
        .await
        .unwrap();
    session.commit().await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}
