use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub mod assistant;
pub mod auth;
pub mod health;
pub mod relay;
pub mod tasks;

/// Relay and health at the root, the enveloped application API under `/api`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(auth::router())
        .merge(tasks::router())
        .merge(assistant::router());

    Router::new()
        .merge(health::router())
        .merge(relay::router())
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use chrono::{Duration, FixedOffset, Utc};
    use db::DBService;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use services::services::{
        auth::{AuthError, IdentityProvider, IdpAccount, SessionTokens},
        config::secret,
        gemini_api::{GeminiApiError, TextGenerator},
    };
    use tower::ServiceExt;

    use super::*;

    struct StubGenerator {
        fail: bool,
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GeminiApiError> {
            if self.fail {
                return Err(GeminiApiError::InvalidApiKey);
            }
            Ok(format!("echo: {prompt}"))
        }

        async fn generate_with_image(
            &self,
            _prompt: &str,
            _mime_type: &str,
            _image: &[u8],
        ) -> Result<String, GeminiApiError> {
            Ok(r#"[{"title": "From image", "value": "high"}]"#.to_string())
        }
    }

    #[derive(Default)]
    struct StubIdentity {
        accounts: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl IdentityProvider for StubIdentity {
        async fn sign_up(&self, email: &str, password: &str) -> Result<String, AuthError> {
            let mut accounts = self.accounts.lock().unwrap();
            if accounts.contains_key(email) {
                return Err(AuthError::EmailExists);
            }
            accounts.insert(email.to_string(), password.to_string());
            Ok(format!("uid-{email}"))
        }

        async fn sign_in(&self, email: &str, password: &str) -> Result<String, AuthError> {
            match self.accounts.lock().unwrap().get(email) {
                Some(stored) if stored == password => Ok(format!("uid-{email}")),
                _ => Err(AuthError::InvalidCredentials),
            }
        }

        async fn sign_in_with_idp(&self, google_id_token: &str) -> Result<IdpAccount, AuthError> {
            let email = google_id_token
                .strip_prefix("google:")
                .ok_or(AuthError::InvalidCredentials)?;
            Ok(IdpAccount {
                uid: format!("uid-{email}"),
                email: Some(email.to_string()),
                display_name: Some("Google User".to_string()),
            })
        }
    }

    async fn state_with(fail: bool, identity: bool) -> (AppState, DBService) {
        let db = DBService::new_in_memory().await.unwrap();
        let identity = identity.then(|| Arc::new(StubIdentity::default()) as Arc<dyn IdentityProvider>);
        let state = AppState::new(
            &db,
            Arc::new(StubGenerator { fail }),
            identity,
            SessionTokens::new(&secret("router-test".to_string()), 1),
            200,
            FixedOffset::east_opt(0).unwrap(),
        );
        (state, db)
    }

    async fn app_with(fail: bool, identity: bool) -> Router {
        router(state_with(fail, identity).await.0)
    }

    async fn app() -> Router {
        app_with(false, true).await
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn register(app: &Router, email: &str) -> String {
        let (status, body) = send_json(
            app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "email": email, "password": "123456", "name": "Tester" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["token"].as_str().unwrap().to_string()
    }

    async fn next_text_frame(body: &mut Body) -> String {
        let frame = body.frame().await.unwrap().unwrap();
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
    }

    fn task_json(id: &str, title: &str, days: i64) -> Value {
        json!({
            "id": id,
            "title": title,
            "deadline": (Utc::now() + Duration::days(days)).to_rfc3339(),
            "value": "high",
            "complexity": "low",
            "priority": "high",
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app().await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn generate_relays_text() {
        let app = app().await;
        let (status, body) = send_json(
            &app,
            json_request("POST", "/generate", None, json!({ "prompt": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "text": "echo: hello" }));

        let (_, body) = send_json(&app, json_request("POST", "/generate", None, json!({}))).await;
        assert_eq!(body["text"], "echo: Xin chào Gemini!");
    }

    #[tokio::test]
    async fn generate_failure_is_plain_500() {
        let app = app_with(true, true).await;
        let (status, body) = send(
            &app,
            json_request("POST", "/generate", None, json!({ "prompt": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(String::from_utf8(body).unwrap(), "invalid api key");
    }

    fn multipart_request(field: &str) -> Request<Body> {
        let boundary = "taskmind-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"list.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&[0x89, b'P', b'N', b'G']);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/parse-image")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn parse_image_returns_tasks() {
        let app = app().await;
        let (status, body) = send_json(&app, multipart_request("image")).await;
        assert_eq!(status, StatusCode::OK);
        let tasks = body["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["title"], "From image");
        assert_eq!(tasks[0]["priority"], "high");

        let (status, _) = send(&app, multipart_request("photo")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn task_routes_require_a_session() {
        let app = app().await;
        let request = Request::builder().uri("/api/tasks").body(Body::empty()).unwrap();
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = send(&app, get_request("/api/tasks", "not-a-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_without_identity_provider_is_unavailable() {
        let app = app_with(false, false).await;
        let (status, body) = send_json(
            &app,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({ "email": "a@example.com", "password": "x" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn register_requires_all_fields() {
        let app = app().await;
        let (status, body) = send_json(
            &app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "email": "a@example.com", "password": "", "name": "A" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "All fields are required");
    }

    #[tokio::test]
    async fn task_lifecycle() {
        let app = app().await;
        let token = register(&app, "life@example.com").await;

        let deadline = (Utc::now() + Duration::days(5)).to_rfc3339();
        let (status, body) = send_json(
            &app,
            json_request(
                "POST",
                "/api/tasks",
                Some(&token),
                json!({ "title": "  Write report ", "deadline": deadline, "value": "low", "complexity": "low" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let task = &body["data"];
        assert_eq!(task["title"], "Write report");
        assert_eq!(task["priority"], "low");
        let id = task["id"].as_str().unwrap().to_string();

        let (status, body) = send_json(
            &app,
            json_request("POST", &format!("/api/tasks/{id}/toggle"), Some(&token), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["completed"], true);
        assert!(body["data"]["completedAt"].is_string());

        let (_, body) = send_json(&app, get_request("/api/tasks/stats", &token)).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["completed"], 1);

        let (_, body) = send_json(&app, get_request("/api/tasks?order=do_now", &token)).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let (status, body) = send_json(
            &app,
            json_request(
                "PUT",
                &format!("/api/tasks/{id}"),
                Some(&token),
                json!({ "title": "" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Task name cannot be empty");

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/api/tasks/{id}"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, delete).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            json_request("POST", &format!("/api/tasks/{id}/toggle"), Some(&token), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn past_deadline_is_rejected() {
        let app = app().await;
        let token = register(&app, "past@example.com").await;
        let deadline = (Utc::now() - Duration::days(2)).to_rfc3339();
        let (status, body) = send_json(
            &app,
            json_request(
                "POST",
                "/api/tasks",
                Some(&token),
                json!({ "title": "Late", "deadline": deadline }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Deadline cannot be in the past");
    }

    #[tokio::test]
    async fn login_returns_stored_tasks() {
        let app = app().await;
        let token = register(&app, "back@example.com").await;
        let deadline = (Utc::now() + Duration::days(1)).to_rfc3339();
        send(
            &app,
            json_request(
                "POST",
                "/api/tasks",
                Some(&token),
                json!({ "title": "Pay rent", "deadline": deadline }),
            ),
        )
        .await;

        let (status, body) = send_json(
            &app,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({ "email": "back@example.com", "password": "123456" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["tasks"][0]["title"], "Pay rent");
    }

    #[tokio::test]
    async fn assistant_answers_with_context() {
        let app = app().await;
        let token = register(&app, "ask@example.com").await;
        let (status, body) = send_json(
            &app,
            json_request(
                "POST",
                "/api/assistant",
                Some(&token),
                json!({ "prompt": "What first?" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            body["data"]["text"]
                .as_str()
                .unwrap()
                .starts_with("echo: What first?")
        );

        let (status, _) = send_json(
            &app,
            json_request("POST", "/api/assistant", Some(&token), json!({ "prompt": " " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_starts_with_current_snapshot() {
        let app = app().await;
        let token = register(&app, "sse@example.com").await;

        let response = app
            .clone()
            .oneshot(get_request("/api/tasks/stream", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let mut body = response.into_body();
        let text = next_text_frame(&mut body).await;
        assert!(text.starts_with("event: tasks\n"));
        assert!(text.contains("data: []"));
    }

    #[tokio::test]
    async fn stream_pushes_snapshot_after_write() {
        let app = app().await;
        let token = register(&app, "push@example.com").await;

        let response = app
            .clone()
            .oneshot(get_request("/api/tasks/stream", &token))
            .await
            .unwrap();
        let mut body = response.into_body();
        assert!(next_text_frame(&mut body).await.contains("data: []"));

        let deadline = (Utc::now() + Duration::days(2)).to_rfc3339();
        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/tasks",
                Some(&token),
                json!({ "title": "Streamed", "deadline": deadline }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let text = next_text_frame(&mut body).await;
        assert!(text.starts_with("event: tasks\n"));
        assert!(text.contains("\"title\":\"Streamed\""));
    }

    #[tokio::test]
    async fn failed_stream_setup_leaves_no_subscription() {
        let (state, db) = state_with(false, true).await;
        let app = router(state.clone());
        let token = register(&app, "closed@example.com").await;
        db.pool.close().await;

        let (status, _) = send(&app, get_request("/api/tasks/stream", &token)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!state.tasks.is_watched("uid-closed@example.com"));
    }

    #[tokio::test]
    async fn replace_overwrites_whole_list() {
        let app = app().await;
        let token = register(&app, "bulk@example.com").await;
        let tasks = json!([task_json("task_2", "Second", 3), task_json("task_1", "First", 1)]);

        let (status, body) = send_json(
            &app,
            json_request("PUT", "/api/tasks", Some(&token), tasks),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, body) = send_json(&app, get_request("/api/tasks", &token)).await;
        let titles: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, ["First", "Second"]);

        let (status, _) = send(
            &app,
            json_request("PUT", "/api/tasks", Some(&token), json!([])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send_json(&app, get_request("/api/tasks", &token)).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn calendar_groups_by_deadline_date() {
        let app = app().await;
        let token = register(&app, "cal@example.com").await;
        let first = task_json("task_1", "First", 1);
        let same_day = json!({
            "id": "task_2",
            "title": "Same day",
            "deadline": first["deadline"],
        });
        let later = task_json("task_3", "Later", 4);
        let day = chrono::DateTime::parse_from_rfc3339(first["deadline"].as_str().unwrap())
            .unwrap()
            .date_naive()
            .to_string();
        send(
            &app,
            json_request("PUT", "/api/tasks", Some(&token), json!([first, same_day, later])),
        )
        .await;

        let (status, body) = send_json(&app, get_request("/api/tasks/calendar", &token)).await;
        assert_eq!(status, StatusCode::OK);
        let groups = body["data"].as_object().unwrap();
        assert_eq!(groups.len(), 2);

        let group = groups[&day].as_array().unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group[1]["title"], "Same day");
    }

    #[tokio::test]
    async fn analytics_summarises_tasks() {
        let app = app().await;
        let token = register(&app, "charts@example.com").await;
        send(
            &app,
            json_request(
                "PUT",
                "/api/tasks",
                Some(&token),
                json!([task_json("task_1", "Ship", 2), task_json("task_2", "Plan", 5)]),
            ),
        )
        .await;
        send(
            &app,
            json_request("POST", "/api/tasks/task_1/toggle", Some(&token), json!({})),
        )
        .await;

        let (status, body) = send_json(&app, get_request("/api/tasks/analytics", &token)).await;
        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert_eq!(data["stats"]["total"], 2);
        assert_eq!(data["stats"]["completed"], 1);
        assert_eq!(data["by_priority"]["high"], 2);
        assert_eq!(data["heatmap"].as_array().unwrap().len(), 3);
        assert_eq!(data["completion_trend"][0]["count"], 1);

        let matrix = data["matrix"].as_array().unwrap();
        assert_eq!(matrix.len(), 2);
        let shipped = matrix.iter().find(|p| p["id"] == "task_1").unwrap();
        assert_eq!(shipped["status"], "done");
    }

    #[tokio::test]
    async fn logout_succeeds() {
        let app = app().await;
        let (status, body) = send_json(
            &app,
            json_request("POST", "/api/auth/logout", None, json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn google_sign_in_creates_then_restores_document() {
        let app = app().await;
        let google = |token: &str| {
            json_request("POST", "/api/auth/google", None, json!({ "id_token": token }))
        };

        let (status, body) = send_json(&app, google("google:gee@example.com")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["uid"], "uid-gee@example.com");
        assert_eq!(body["data"]["user"]["name"], "Google User");
        assert!(body["data"]["user"]["tasks"].as_array().unwrap().is_empty());
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let deadline = (Utc::now() + Duration::days(1)).to_rfc3339();
        send(
            &app,
            json_request(
                "POST",
                "/api/tasks",
                Some(&token),
                json!({ "title": "Via Google", "deadline": deadline }),
            ),
        )
        .await;

        let (status, body) = send_json(&app, google("google:gee@example.com")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["tasks"][0]["title"], "Via Google");

        let (status, body) = send_json(&app, google("")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Google ID token is required");

        let (status, _) = send_json(&app, google("forged")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
