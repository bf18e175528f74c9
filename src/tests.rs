use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::tempdir;
use tower::ServiceExt;
use uuid::Uuid;

use crate::build_router;
use crate::build_router_with_observability;
use crate::config::Config;
use crate::observability::{Observability, RecordingAuditSink};
use crate::session::SessionIssuer;
use crate::store::UserRecord;

fn test_config() -> Config {
    Config::for_tests()
}

fn test_app() -> Router {
    build_router(test_config())
}

async fn read_json(response: axum::response::Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    let value = serde_json::from_slice::<Value>(&bytes)?;
    Ok(value)
}

fn json_request(
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };
    Ok(request)
}

async fn register(app: &Router) -> Result<String> {
    let request = json_request("POST", "/register", None, Some(json!({"code": "mock-code"})))?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await?;
    let token = body["token"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("register response missing token"))?;
    Ok(token.to_string())
}

async fn create_memory(
    app: &Router,
    token: &str,
    content: &str,
    is_public: bool,
) -> Result<Value> {
    let request = json_request(
        "POST",
        "/memories",
        Some(token),
        Some(json!({
            "content": content,
            "coverUrl": "https://images.example/cover.jpg",
            "isPublic": is_public,
        })),
    )?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

/// A structurally valid token for a user the store has never seen.
/// Verification is stateless, so this models a session from another
/// account without routing a second identity through the mock provider.
fn foreign_token() -> Result<String> {
    let issuer = SessionIssuer::from_config(&test_config());
    let stranger = UserRecord {
        id: Uuid::new_v4(),
        provider_user_id: 999_999,
        login: "stranger".to_string(),
        name: "A Stranger".to_string(),
        avatar_url: "https://avatars.example/stranger.png".to_string(),
        created_at: Utc::now(),
    };
    Ok(issuer.issue(&stranger)?.token)
}

#[tokio::test]
async fn healthz_reports_ok() -> Result<()> {
    let app = test_app();
    let response = app
        .oneshot(json_request("GET", "/healthz", None, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "memoria-service");
    assert_eq!(body["identity_provider"], "mock");
    assert!(body["version"].is_string());
    Ok(())
}

#[tokio::test]
async fn register_returns_a_signed_session_token() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;
    assert_eq!(token.split('.').count(), 3);
    Ok(())
}

#[tokio::test]
async fn register_twice_reuses_the_same_user() -> Result<()> {
    let app = test_app();
    let first = register(&app).await?;
    let second = register(&app).await?;

    let memory = create_memory(&app, &first, "written with the first token", false).await?;

    // The second login must resolve to the same account, so the record
    // created with the first token is visible through the second.
    let response = app
        .clone()
        .oneshot(json_request("GET", "/memories", Some(&second), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await?;
    let listed = body
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("expected an array"))?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], memory["id"]);
    Ok(())
}

#[tokio::test]
async fn register_with_rejected_code_issues_no_token() -> Result<()> {
    let app = test_app();
    let request = json_request("POST", "/register", None, Some(json!({"code": "consumed"})))?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "upstream_auth");
    assert!(body.get("token").is_none());
    Ok(())
}

#[tokio::test]
async fn register_with_blank_code_is_a_validation_error() -> Result<()> {
    let app = test_app();
    let request = json_request("POST", "/register", None, Some(json!({"code": "   "})))?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "invalid_request");
    Ok(())
}

#[tokio::test]
async fn memory_crud_round_trip() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;

    let created = create_memory(&app, &token, "a quiet afternoon by the lake", false).await?;
    assert_eq!(created["content"], "a quiet afternoon by the lake");
    assert_eq!(created["coverUrl"], "https://images.example/cover.jpg");
    assert_eq!(created["isPublic"], false);
    let id = created["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("created memory missing id"))?
        .to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "GET",
            &format!("/memories/{id}"),
            Some(&token),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = read_json(response).await?;
    assert_eq!(fetched["id"], created["id"]);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/memories/{id}"),
            Some(&token),
            Some(json!({
                "content": "a loud afternoon by the lake",
                "coverUrl": "https://images.example/cover2.jpg",
                "isPublic": true,
            })),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = read_json(response).await?;
    assert_eq!(updated["content"], "a loud afternoon by the lake");
    assert_eq!(updated["coverUrl"], "https://images.example/cover2.jpg");
    assert_eq!(updated["isPublic"], true);
    assert_eq!(updated["id"], created["id"]);
    assert_eq!(updated["ownerId"], created["ownerId"]);
    assert_eq!(updated["createdAt"], created["createdAt"]);

    let response = app
        .clone()
        .oneshot(json_request(
            "DELETE",
            &format!("/memories/{id}"),
            Some(&token),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(json_request(
            "GET",
            &format!("/memories/{id}"),
            Some(&token),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn create_defaults_to_private() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;
    let request = json_request(
        "POST",
        "/memories",
        Some(&token),
        Some(json!({
            "content": "no visibility flag supplied",
            "coverUrl": "https://images.example/cover.jpg",
        })),
    )?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await?;
    assert_eq!(body["isPublic"], false);
    Ok(())
}

#[tokio::test]
async fn list_projects_summaries_oldest_first() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;

    let long_content = "m".repeat(300);
    let first = create_memory(&app, &token, &long_content, false).await?;
    let second = create_memory(&app, &token, "short one", true).await?;

    let response = app
        .oneshot(json_request("GET", "/memories", Some(&token), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await?;
    let listed = body
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("expected an array"))?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["id"], first["id"]);
    assert_eq!(listed[1]["id"], second["id"]);

    // Summaries carry the projection only, never the full content.
    let summary = &listed[0];
    assert!(summary.get("content").is_none());
    assert!(summary.get("ownerId").is_none());
    assert!(summary.get("isPublic").is_none());
    let excerpt = summary["excerpt"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("summary missing excerpt"))?;
    assert_eq!(excerpt.chars().count(), 118);
    assert!(excerpt.ends_with("..."));
    assert_eq!(listed[1]["excerpt"], "short one...");
    Ok(())
}

#[tokio::test]
async fn list_requires_authentication() -> Result<()> {
    let app = test_app();
    let response = app
        .oneshot(json_request("GET", "/memories", None, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "unauthenticated");
    Ok(())
}

#[tokio::test]
async fn garbage_token_is_unauthenticated() -> Result<()> {
    let app = test_app();
    let response = app
        .oneshot(json_request("GET", "/memories", Some("garbage"), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "unauthenticated");
    Ok(())
}

#[tokio::test]
async fn authorization_header_without_bearer_scheme_is_rejected() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;

    // A valid credential sent without the `Bearer ` scheme must not
    // authenticate, and neither may another scheme's payload.
    for header_value in [token.clone(), format!("Basic {token}")] {
        let request = Request::builder()
            .method("GET")
            .uri("/memories")
            .header("authorization", header_value)
            .body(Body::empty())?;
        let response = app.clone().oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = read_json(response).await?;
        assert_eq!(body["error"]["code"], "unauthenticated");
    }
    Ok(())
}

#[tokio::test]
async fn anonymous_caller_can_read_a_public_memory() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;
    let memory = create_memory(&app, &token, "open to everyone", true).await?;
    let id = memory["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .oneshot(json_request("GET", &format!("/memories/{id}"), None, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await?;
    assert_eq!(body["content"], "open to everyone");
    Ok(())
}

#[tokio::test]
async fn anonymous_private_read_is_denied_not_missing() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;
    let memory = create_memory(&app, &token, "for my eyes only", false).await?;
    let id = memory["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .oneshot(json_request("GET", &format!("/memories/{id}"), None, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "forbidden");
    Ok(())
}

#[tokio::test]
async fn other_users_cannot_read_a_private_memory() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;
    let memory = create_memory(&app, &token, "for my eyes only", false).await?;
    let id = memory["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .oneshot(json_request(
            "GET",
            &format!("/memories/{id}"),
            Some(&foreign_token()?),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "forbidden");
    Ok(())
}

#[tokio::test]
async fn public_visibility_never_grants_writes() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;
    let memory = create_memory(&app, &token, "public but still mine", true).await?;
    let id = memory["id"].as_str().unwrap_or_default().to_string();
    let stranger = foreign_token()?;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/memories/{id}"),
            Some(&stranger),
            Some(json!({
                "content": "hijacked",
                "coverUrl": "https://images.example/evil.jpg",
                "isPublic": true,
            })),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "forbidden");

    let response = app
        .clone()
        .oneshot(json_request(
            "DELETE",
            &format!("/memories/{id}"),
            Some(&stranger),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The record is untouched after both denied writes.
    let response = app
        .oneshot(json_request(
            "GET",
            &format!("/memories/{id}"),
            Some(&token),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let unchanged = read_json(response).await?;
    assert_eq!(unchanged["content"], "public but still mine");
    Ok(())
}

#[tokio::test]
async fn list_is_scoped_to_the_caller() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;
    create_memory(&app, &token, "mine, and public", true).await?;

    let response = app
        .oneshot(json_request(
            "GET",
            "/memories",
            Some(&foreign_token()?),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await?;
    assert_eq!(body.as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn memory_id_must_be_a_uuid() -> Result<()> {
    let app = test_app();
    let response = app
        .oneshot(json_request("GET", "/memories/not-a-uuid", None, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "invalid_request");
    Ok(())
}

#[tokio::test]
async fn updating_a_missing_memory_is_not_found() -> Result<()> {
    let app = test_app();
    let token = register(&app).await?;
    let response = app
        .oneshot(json_request(
            "PUT",
            &format!("/memories/{}", Uuid::new_v4()),
            Some(&token),
            Some(json!({
                "content": "nothing here",
                "coverUrl": "https://images.example/cover.jpg",
                "isPublic": false,
            })),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["code"], "not_found");
    Ok(())
}

#[tokio::test]
async fn snapshot_survives_a_restart() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config();
    config.store_path = Some(dir.path().join("memoria.json"));

    let app = build_router(config.clone());
    let token = register(&app).await?;
    let memory = create_memory(&app, &token, "persisted across restarts", false).await?;
    drop(app);

    let relaunched = build_router(config);
    let token = register(&relaunched).await?;
    let response = relaunched
        .oneshot(json_request("GET", "/memories", Some(&token), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await?;
    let listed = body
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("expected an array"))?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], memory["id"]);
    Ok(())
}

#[tokio::test]
async fn audit_trail_covers_login_and_writes() -> Result<()> {
    let sink = Arc::new(RecordingAuditSink::default());
    let app = build_router_with_observability(test_config(), Observability::with_sink(sink.clone()));

    let token = register(&app).await?;
    let memory = create_memory(&app, &token, "audited", false).await?;
    let id = memory["id"].as_str().unwrap_or_default().to_string();
    let response = app
        .oneshot(json_request(
            "DELETE",
            &format!("/memories/{id}"),
            Some(&token),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let names: Vec<String> = sink
        .events()
        .into_iter()
        .map(|event| event.name)
        .collect();
    assert!(names.contains(&"auth.register.completed".to_string()));
    assert!(names.contains(&"memory.created".to_string()));
    assert!(names.contains(&"memory.deleted".to_string()));
    Ok(())
}

#[tokio::test]
async fn failed_register_is_audited_with_a_reason() -> Result<()> {
    let sink = Arc::new(RecordingAuditSink::default());
    let app = build_router_with_observability(test_config(), Observability::with_sink(sink.clone()));

    let request = json_request("POST", "/register", None, Some(json!({"code": "consumed"})))?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let events = sink.events();
    let failure = events
        .iter()
        .find(|event| event.name == "auth.register.failed")
        .ok_or_else(|| anyhow::anyhow!("missing failure event"))?;
    assert_eq!(failure.outcome.as_deref(), Some("failure"));
    assert!(
        failure
            .attributes
            .iter()
            .any(|(key, value)| key == "reason" && value == "upstream_auth")
    );
    Ok(())
}
