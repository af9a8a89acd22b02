use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .nest("/user", auth::router(&state))
                .route("/health", get(|| async { "ok" })),
        )
        .fallback(not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=15552000; includeSubDomains"),
        ))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

/// `*` allows any origin without credentials; anything else is an explicit
/// allowlist with credentials.
fn cors_layer(origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origin.trim() == "*" {
        base.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origin
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();
        base.allow_origin(origins).allow_credentials(true)
    }
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Welcome to Invoice Backend" })),
    )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutting down gracefully");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        response::Response,
    };
    use serde_json::Value;
    use time::Duration as TimeDuration;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::state::test_support::TestHarness;

    const EMAIL: &str = "alice@example.com";
    const PASSWORD: &str = "Str0ngP@ss1!";

    async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register(app: &Router) {
        let res = send(
            app,
            "POST",
            "/api/v1/user/register",
            None,
            Some(json!({ "email": EMAIL, "password": PASSWORD, "name": "Alice" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    async fn login(app: &Router, password: &str) -> Response {
        send(
            app,
            "POST",
            "/api/v1/user/login",
            None,
            Some(json!({ "email": EMAIL, "password": password })),
        )
        .await
    }

    async fn token(app: &Router, password: &str) -> String {
        let res = login(app, password).await;
        assert_eq!(res.status(), StatusCode::OK);
        json_body(res).await["token"].as_str().unwrap().to_string()
    }

    fn relaxed_limits() -> AppConfig {
        let mut config = AppConfig::for_tests();
        config.rate_limit.max_requests = 1_000;
        config
    }

    #[tokio::test]
    async fn health_and_fallback() {
        let harness = TestHarness::new();
        let app = build_app(harness.state.clone());
        let res = send(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = send(&app, "GET", "/nope", None, None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(json_body(res).await["message"].is_string());
    }

    #[tokio::test]
    async fn security_headers_and_configured_cors_origin() {
        let mut config = AppConfig::for_tests();
        config.cors_origin = "https://app.example.com, https://admin.example.com".into();
        let harness = TestHarness::with_config(config);
        let app = build_app(harness.state.clone());

        let res = send(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(res.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(res.headers()[header::X_FRAME_OPTIONS], "DENY");

        let preflight = |origin: &'static str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/user/login")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap()
        };

        let res = app.clone().oneshot(preflight("https://admin.example.com")).await.unwrap();
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://admin.example.com"
        );
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let res = app.clone().oneshot(preflight("https://evil.example.com")).await.unwrap();
        assert!(res
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn register_conflict_and_validation() {
        let harness = TestHarness::new();
        let app = build_app(harness.state.clone());
        register(&app).await;

        let res = send(
            &app,
            "POST",
            "/api/v1/user/register",
            None,
            Some(json!({ "email": "ALICE@example.com", "password": PASSWORD, "name": "Alice" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(res).await["error"], "Email already in use");

        let res = send(
            &app,
            "POST",
            "/api/v1/user/register",
            None,
            Some(json!({ "email": "bob@example.com", "password": "weak", "name": "Bob" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(res).await;
        assert_eq!(body["errors"][0], "Password must be strong");
    }

    #[tokio::test]
    async fn profile_requires_a_session() {
        let harness = TestHarness::new();
        let app = build_app(harness.state.clone());
        register(&app).await;

        let res = send(&app, "GET", "/api/v1/user/me", None, None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"], "Authentication required");

        let res = send(&app, "GET", "/api/v1/user/me", Some("garbage"), None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let token = token(&app, PASSWORD).await;
        let res = send(&app, "GET", "/api/v1/user/me", Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["email"], EMAIL);
        assert_eq!(body["name"], "Alice");
        assert_eq!(body["role"], "owner");
        assert!(body["lastLogin"].is_string());
    }

    #[tokio::test]
    async fn lockout_over_http() {
        let harness = TestHarness::with_config(relaxed_limits());
        let app = build_app(harness.state.clone());
        register(&app).await;
        token(&app, PASSWORD).await;

        for _ in 0..5 {
            let res = login(&app, "Wr0ngP@ss!").await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
        let res = login(&app, PASSWORD).await;
        assert_eq!(res.status(), StatusCode::LOCKED);

        harness.clock.advance(TimeDuration::minutes(15) + TimeDuration::seconds(1));
        let token = token(&app, PASSWORD).await;

        let res = send(&app, "GET", "/api/v1/user/activity", Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["loginAttempts"], 0);
        assert!(body["lockUntil"].is_null());
    }

    #[tokio::test]
    async fn password_change_retires_old_sessions() {
        let harness = TestHarness::new();
        let app = build_app(harness.state.clone());
        register(&app).await;
        let old = token(&app, PASSWORD).await;

        harness.clock.advance(TimeDuration::milliseconds(10));
        let res = send(
            &app,
            "PATCH",
            "/api/v1/user/password",
            Some(&old),
            Some(json!({ "oldPassword": "Wr0ngP@ss!", "newPassword": "N3wP@ssword!" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = send(
            &app,
            "PATCH",
            "/api/v1/user/password",
            Some(&old),
            Some(json!({ "oldPassword": PASSWORD, "newPassword": "N3wP@ssword!" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, "GET", "/api/v1/user/me", Some(&old), None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(res).await["error"],
            "Session expired. Please login again."
        );

        harness.clock.advance(TimeDuration::milliseconds(1));
        let fresh = token(&app, "N3wP@ssword!").await;
        let res = send(&app, "GET", "/api/v1/user/me", Some(&fresh), None).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forgot_and_reset_flow() {
        let harness = TestHarness::new();
        let app = build_app(harness.state.clone());
        register(&app).await;

        let known = send(
            &app,
            "POST",
            "/api/v1/user/forgot",
            None,
            Some(json!({ "email": EMAIL })),
        )
        .await;
        assert_eq!(known.status(), StatusCode::OK);
        let known = json_body(known).await;

        let unknown = send(
            &app,
            "POST",
            "/api/v1/user/forgot",
            None,
            Some(json!({ "email": "nobody@example.com" })),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::OK);
        assert_eq!(json_body(unknown).await, known);

        let raw = harness.mailer.last_token().unwrap();
        let uri = format!("/api/v1/user/reset/{raw}");
        let res = send(&app, "POST", &uri, None, Some(json!({ "password": "N3wP@ssword!" }))).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, "POST", &uri, None, Some(json!({ "password": "An0therP@ss!" }))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(res).await["error"],
            "Invalid or expired password reset token"
        );

        let fresh = token(&app, "N3wP@ssword!").await;
        let res = send(&app, "GET", "/api/v1/user/me", Some(&fresh), None).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    async fn send_raw(app: &Router, uri: &str, body: &'static str) -> Response {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn malformed_bodies_answer_with_json_errors() {
        let harness = TestHarness::new();
        let app = build_app(harness.state.clone());

        for (uri, body) in [
            ("/api/v1/user/register", "{not json"),
            ("/api/v1/user/login", r#"{"email":123}"#),
        ] {
            let res = send_raw(&app, uri, body).await;
            assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(
                res.headers()[header::CONTENT_TYPE],
                "application/json"
            );
            let body = json_body(res).await;
            assert_eq!(body["error"], "validation failed");
            assert!(body["errors"][0].is_string());
        }

        let res = send(&app, "POST", "/api/v1/user/forgot", None, None).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(res).await["error"], "validation failed");
    }

    #[tokio::test]
    async fn login_and_forgot_share_one_rate_limit() {
        let mut config = AppConfig::for_tests();
        config.rate_limit.max_requests = 3;
        let harness = TestHarness::with_config(config);
        let app = build_app(harness.state.clone());
        register(&app).await;

        assert_eq!(login(&app, PASSWORD).await.status(), StatusCode::OK);
        assert_eq!(login(&app, PASSWORD).await.status(), StatusCode::OK);
        let res = send(
            &app,
            "POST",
            "/api/v1/user/forgot",
            None,
            Some(json!({ "email": EMAIL })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        assert_eq!(login(&app, PASSWORD).await.status(), StatusCode::TOO_MANY_REQUESTS);
        let res = send(&app, "GET", "/api/v1/user/me", None, None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
