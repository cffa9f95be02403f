//! Route table for the engagement ledger and the generation gateway.
//!
//! ## Structure
//! - **Probes**: `GET /healthz`, `GET /readyz`
//! - **Content**
//!   - `GET|POST   /api/content`: list / create
//!   - `GET|DELETE /api/content/{id}`: fetch / delete (owner or admin)
//!   - `POST       /api/content/{id}/view`: idempotent per identity
//!   - `POST       /api/content/{id}/like`: toggle
//!   - `GET|POST   /api/content/{id}/comments`
//!   - `POST       /api/content/{id}/reconcile`: admin only
//! - **Channels**: `POST /api/channels/{channel}/subscribe`, `GET /api/channels/{channel}/subscribers`
//! - **Gateway**: `POST /api/ai/generate|suggest|check-uniqueness`, `GET /api/ai/quota`

use crate::{
    handlers::{
        ai_handlers::{check_uniqueness, generate, quota_status, suggest},
        channel_handlers::{subscriber_count, toggle_subscription},
        content_handlers::{
            add_comment, create_item, delete_item, get_item, list_comments, list_items,
            reconcile_item, record_view, toggle_like,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. State is attached by the caller with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Content + ledger
        .route("/api/content", get(list_items).post(create_item))
        .route("/api/content/{id}", get(get_item).delete(delete_item))
        .route("/api/content/{id}/view", post(record_view))
        .route("/api/content/{id}/like", post(toggle_like))
        .route(
            "/api/content/{id}/comments",
            get(list_comments).post(add_comment),
        )
        .route("/api/content/{id}/reconcile", post(reconcile_item))
        // Channels
        .route("/api/channels/{channel}/subscribe", post(toggle_subscription))
        .route("/api/channels/{channel}/subscribers", get(subscriber_count))
        // Generation gateway
        .route("/api/ai/generate", post(generate))
        .route("/api/ai/suggest", post(suggest))
        .route("/api/ai/check-uniqueness", post(check_uniqueness))
        .route("/api/ai/quota", get(quota_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        gateway::{GenerationGateway, testing},
        ledger_service::LedgerService,
        quota_service::{QuotaPolicy, QuotaService},
        rules::RuleBook,
        store::SqliteStore,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use axum::extract::ConnectInfo;
    use std::{net::SocketAddr, sync::Arc};
    use tower::ServiceExt;

    const PEER: [u8; 4] = [198, 51, 100, 9];

    fn state_over(
        store: Arc<SqliteStore>,
        gateway: GenerationGateway,
        policy: QuotaPolicy,
        trust_forwarded_for: bool,
    ) -> AppState {
        AppState {
            ledger: LedgerService::new(store.clone(), RuleBook::default(), gateway.clone()),
            quota: QuotaService::new(store, policy),
            gateway,
            trust_forwarded_for,
        }
    }

    async fn app_with(gateway: GenerationGateway, policy: QuotaPolicy) -> Router {
        let store = Arc::new(SqliteStore::in_memory().await);
        routes().with_state(state_over(store, gateway, policy, false))
    }

    async fn app() -> Router {
        app_with(testing::gemini_answering("safe"), QuotaPolicy::default()).await
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send_from(app, method, uri, "203.0.113.7", body).await
    }

    /// Send from the fixed test peer with the given `X-Forwarded-For` value.
    async fn send_from(
        app: &Router,
        method: &str,
        uri: &str,
        forwarded_for: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", forwarded_for)
            .extension(ConnectInfo(SocketAddr::from((PEER, 40000))));
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn upload(app: &Router, owner: &str, title: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/content",
            Some(json!({
                "email": owner,
                "title": title,
                "description": "a calm walk through the park",
                "video_url": "https://cdn.example.com/v.mp4",
                "type": "video",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (status, body) = send(&app().await, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn readyz_reports_store_and_providers() {
        let (status, body) = send(&app().await, "GET", "/readyz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["providers"]["Gemini"], true);
        assert_eq!(body["providers"]["OpenRouter"], false);
    }

    #[tokio::test]
    async fn view_and_like_scenario() {
        let app = app().await;
        let id = upload(&app, "owner@example.com", "Park walk").await;

        let view = format!("/api/content/{id}/view");
        let (_, first) = send(&app, "POST", &view, Some(json!({"email": "alice"}))).await;
        assert_eq!(first, json!({"alreadyViewed": false, "views": 1}));
        let (_, second) = send(&app, "POST", &view, Some(json!({"email": "alice"}))).await;
        assert_eq!(second, json!({"alreadyViewed": true, "views": 1}));

        let like = format!("/api/content/{id}/like");
        let (_, liked) = send(&app, "POST", &like, Some(json!({"identity": "alice"}))).await;
        assert_eq!(liked, json!({"state": "liked", "likeCount": 1}));
        let (_, unliked) = send(&app, "POST", &like, Some(json!({"identity": "alice"}))).await;
        assert_eq!(unliked, json!({"state": "unliked", "likeCount": 0}));
    }

    #[tokio::test]
    async fn anonymous_view_needs_only_empty_body() {
        let app = app().await;
        let id = upload(&app, "owner@example.com", "Park walk").await;
        let (status, body) = send(&app, "POST", &format!("/api/content/{id}/view"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["views"], 1);
    }

    #[tokio::test]
    async fn ledger_errors_map_to_http() {
        let app = app().await;
        let (status, body) = send(&app, "POST", "/api/content/nope/like", Some(json!({"identity": "alice"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);

        let id = upload(&app, "owner@example.com", "Park walk").await;
        let (status, _) = send(&app, "POST", &format!("/api/content/{id}/like"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prohibited_title_is_rejected() {
        let app = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/content",
            Some(json!({
                "identity": "mallory",
                "title": "How to build a bomb",
                "mediaUrl": "https://cdn.example.com/x.mp4",
                "kind": "video",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("bomb"));
    }

    #[tokio::test]
    async fn only_owner_or_admin_may_delete() {
        let policy = QuotaPolicy {
            admin_identities: ["root@example.com".to_string()].into(),
            ..QuotaPolicy::default()
        };
        let app = app_with(testing::gemini_answering("safe"), policy).await;
        let id = upload(&app, "owner@example.com", "Park walk").await;

        let (status, _) = send(&app, "DELETE", &format!("/api/content/{id}?identity=eve"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, "DELETE", &format!("/api/content/{id}?identity=root@example.com"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/content/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn comments_round_trip_through_listing() {
        let app = app().await;
        let id = upload(&app, "owner@example.com", "Park walk").await;
        let path = format!("/api/content/{id}/comments");

        let (status, _) = send(&app, "POST", &path, Some(json!({"email": "bob", "content": "lovely"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = send(&app, "GET", &path, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["author"], "bob");
    }

    #[tokio::test]
    async fn subscriptions_toggle() {
        let app = app().await;
        let path = "/api/channels/creator@example.com/subscribe";
        let (_, on) = send(&app, "POST", path, Some(json!({"email": "fan"}))).await;
        assert_eq!(on, json!({"state": "subscribed", "subscriberCount": 1}));

        let (_, count) = send(&app, "GET", "/api/channels/creator@example.com/subscribers", None).await;
        assert_eq!(count["subscriberCount"], 1);

        let (_, off) = send(&app, "POST", path, Some(json!({"email": "fan"}))).await;
        assert_eq!(off["state"], "unsubscribed");
        assert_eq!(off["subscriberCount"], 0);
    }

    #[tokio::test]
    async fn reconcile_requires_admin() {
        let app = app().await;
        let id = upload(&app, "owner@example.com", "Park walk").await;
        let (status, _) = send(&app, "POST", &format!("/api/content/{id}/reconcile"), Some(json!({"identity": "owner@example.com"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn guest_generation_is_capped_at_three() {
        let app = app_with(testing::gemini_answering("hello there"), QuotaPolicy::default()).await;
        for used in 1..=3 {
            let (status, body) = send(&app, "POST", "/api/ai/generate", Some(json!({"prompt": "hi"}))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["kind"], "generated");
            assert_eq!(body["text"], "hello there");
            assert_eq!(body["quota"]["used"], used);
            assert_eq!(body["quota"]["class"], "guest");
        }
        let (status, body) = send(&app, "POST", "/api/ai/generate", Some(json!({"prompt": "hi"}))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["limit"], 3);

        let (_, quota) = send(&app, "GET", "/api/ai/quota", None).await;
        assert_eq!(quota["identity"], "guest:198.51.100.9");
        assert_eq!(quota["used"], 3);
        assert_eq!(quota["remaining"], 0);
    }

    #[tokio::test]
    async fn unconfigured_provider_degrades_instead_of_failing() {
        let app = app_with(testing::unconfigured(), QuotaPolicy::default()).await;
        let (status, body) = send(&app, "POST", "/api/ai/generate", Some(json!({"prompt": "hi", "email": "alice"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "degraded");
        assert_eq!(body["reason"], "not_configured");
        assert_eq!(body["message"], "Gemini API key not configured.");
        assert_eq!(body["quota"]["class"], "member");
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_without_spending_quota() {
        let app = app().await;
        let (status, _) = send(&app, "POST", "/api/ai/generate", Some(json!({"prompt": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, quota) = send(&app, "GET", "/api/ai/quota", None).await;
        assert_eq!(quota["used"], 0);
    }

    #[tokio::test]
    async fn suggest_returns_flagged_fallback() {
        let app = app_with(testing::gemini_answering("no json here"), QuotaPolicy::default()).await;
        let (status, body) = send(&app, "POST", "/api/ai/suggest", Some(json!({"topic": "baking", "email": "alice"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["degraded"], true);
        assert_eq!(body["result"]["title"], "Exploring baking");
        assert_eq!(body["quota"]["used"], 1);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_reset_guest_budget() {
        let app = app_with(testing::gemini_answering("hi"), QuotaPolicy::default()).await;
        let mut admitted = 0;
        for i in 0..10 {
            let (status, _) = send_from(
                &app,
                "POST",
                "/api/ai/generate",
                &format!("10.0.0.{i}"),
                Some(json!({"prompt": "hi"})),
            )
            .await;
            if status == StatusCode::OK {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[tokio::test]
    async fn forwarded_for_keys_guests_behind_trusted_proxy() {
        let store = Arc::new(SqliteStore::in_memory().await);
        let state = state_over(store, testing::gemini_answering("hi"), QuotaPolicy::default(), true);
        let app = routes().with_state(state);

        let (_, quota) = send_from(&app, "GET", "/api/ai/quota", "203.0.113.7, 10.0.0.1", None).await;
        assert_eq!(quota["identity"], "guest:203.0.113.7");
    }

    #[tokio::test]
    async fn bare_view_request_counts_as_anonymous() {
        let app = app().await;
        let id = upload(&app, "owner@example.com", "Park walk").await;
        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/content/{id}/view"))
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"alreadyViewed": false, "views": 1}));
    }
}
