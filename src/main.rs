use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

mod auth;
mod config;
mod db;
mod dto;
mod error;
mod handlers;
mod models;
mod services;

use auth::rate_limit::RateLimitState;
use config::Config;
use services::{
    analyzer::{GeminiSkinAnalyzer, SkinAnalyzer},
    blob_store::{BlobStore, ObjectStorageConfig, S3BlobStore},
    entry_store::{EntryStore, PgEntryStore},
};

/// Multipart envelope allowance on top of the 10 MiB raw image ceiling.
const ANALYZE_BODY_LIMIT: usize = 12 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub entries: Arc<dyn EntryStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub analyzer: Arc<dyn SkinAnalyzer>,
    pub rate_limiter: RateLimitState,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skintrack_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env()?);

    let db = db::pool::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    db::pool::run_migrations(&db)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let blobs = S3BlobStore::new(ObjectStorageConfig {
        endpoint: config.storage_endpoint.clone(),
        region: config.storage_region.clone(),
        access_key: config.storage_access_key.clone(),
        secret_key: config.storage_secret_key.clone(),
        bucket: config.storage_bucket.clone(),
    });

    if config.gemini_api_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY not set; entries will be stored with fallback analysis");
    }
    let analyzer = GeminiSkinAnalyzer::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
        Duration::from_secs(config.gemini_timeout_secs),
    )
    .context("Failed to build analysis client")?
    .with_base_url(config.gemini_base_url.clone());

    let rate_limiter =
        RateLimitState::new(config.submissions_per_hour, Duration::from_secs(3600));
    auth::rate_limit::spawn_cleanup_worker(rate_limiter.clone());

    let state = AppState {
        config: config.clone(),
        entries: Arc::new(PgEntryStore::new(db)),
        blobs: Arc::new(blobs),
        analyzer: Arc::new(analyzer),
        rate_limiter,
    };

    let app = build_router(state)?;

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn build_router(state: AppState) -> anyhow::Result<Router> {
    let submission_routes = Router::new()
        .route(
            "/api/analyze",
            post(handlers::analyze::analyze).layer(DefaultBodyLimit::max(ANALYZE_BODY_LIMIT)),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rate_limit::rate_limit_submissions,
        ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz));

    // require_auth must wrap the submission limiter, which keys on the caller.
    let protected_routes = Router::new()
        .route("/api/entries", get(handlers::entries::list_entries))
        .route("/api/signed-url", get(handlers::media::signed_url))
        .route("/api/dashboard", get(handlers::dashboard::get_dashboard))
        .merge(submission_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    let cors = cors_layer(&state.config)?;
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Ok(Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state))
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = vec![config
        .frontend_url
        .parse::<HeaderValue>()
        .context("FRONTEND_URL is not a valid origin")?];
    if let Ok(extra) = std::env::var("CORS_EXTRA_ORIGINS") {
        for o in extra.split(',') {
            if let Ok(hv) = o.trim().parse::<HeaderValue>() {
                origins.push(hv);
            }
        }
    }

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::{sign, test_config};
    use crate::models::entry::AnalysisResult;
    use crate::services::{
        fakes::{entry_on, MemoryBlobStore, MemoryEntryStore, ScriptedAnalyzer},
        image_prep::tests::small_png,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BOUNDARY: &str = "skintrack-test-boundary";

    struct Harness {
        router: Router,
        config: Arc<Config>,
        entries: Arc<MemoryEntryStore>,
        blobs: Arc<MemoryBlobStore>,
        analyzer: Arc<ScriptedAnalyzer>,
    }

    impl Harness {
        fn new(entries: MemoryEntryStore, analyzer: ScriptedAnalyzer) -> Self {
            Self::with_budget(entries, analyzer, 20)
        }

        fn with_budget(entries: MemoryEntryStore, analyzer: ScriptedAnalyzer, budget: u32) -> Self {
            let config = Arc::new(test_config());
            let entries = Arc::new(entries);
            let blobs = Arc::new(MemoryBlobStore::default());
            let analyzer = Arc::new(analyzer);

            let state = AppState {
                config: config.clone(),
                entries: entries.clone(),
                blobs: blobs.clone(),
                analyzer: analyzer.clone(),
                rate_limiter: RateLimitState::new(budget, Duration::from_secs(3600)),
            };

            Self {
                router: build_router(state).unwrap(),
                config,
                entries,
                blobs,
                analyzer,
            }
        }

        fn bearer(&self, user_id: Uuid) -> String {
            format!("Bearer {}", sign(user_id, 900, &self.config))
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }

        async fn get(&self, uri: &str, user_id: Uuid) -> (StatusCode, Value) {
            let req = Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, self.bearer(user_id))
                .body(Body::empty())
                .unwrap();
            self.send(req).await
        }

        async fn submit(&self, user_id: Uuid, body: Vec<u8>) -> (StatusCode, Value) {
            let req = Request::builder()
                .method(Method::POST)
                .uri("/api/analyze")
                .header(header::AUTHORIZATION, self.bearer(user_id))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap();
            self.send(req).await
        }
    }

    fn multipart(image: Option<(&str, &[u8])>, lifestyle: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some((content_type, bytes)) = image {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"face\"\r\nContent-Type: {}\r\n\r\n",
                    BOUNDARY, content_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(json) = lifestyle {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"lifestyle\"\r\n\r\n{}\r\n",
                    BOUNDARY, json
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = h.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "skintrack-api");
    }

    #[tokio::test]
    async fn test_readyz_reports_store_failure() {
        let h = Harness::new(MemoryEntryStore::failing(), ScriptedAnalyzer::failing());
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();

        let (status, body) = h.send(req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["database"], "failed");
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());

        for uri in ["/api/entries", "/api/signed-url?path=x", "/api/dashboard"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, body) = h.send(req).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(body["error"], "Unauthorized");
        }

        let req = Request::builder()
            .uri("/api/entries")
            .header(header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let (status, _) = h.send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_entries_newest_first_and_scoped_to_caller() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let h = Harness::new(
            MemoryEntryStore::with_rows(vec![
                entry_on(user, "2024-03-01", 4),
                entry_on(user, "2024-03-03", 6),
                entry_on(other, "2024-03-04", 9),
                entry_on(user, "2024-03-02", 5),
            ]),
            ScriptedAnalyzer::failing(),
        );

        let (status, body) = h.get("/api/entries?limit=2", user).await;
        assert_eq!(status, StatusCode::OK);
        let dates: Vec<&str> = body["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["date"].as_str().unwrap())
            .collect();
        assert_eq!(dates, vec!["2024-03-03", "2024-03-02"]);
    }

    #[tokio::test]
    async fn test_entries_empty_history_and_bad_limit() {
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());

        let (status, body) = h.get("/api/entries?limit=lots", Uuid::new_v4()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"], Value::Array(vec![]));
    }

    #[tokio::test]
    async fn test_entries_store_failure_is_500() {
        let h = Harness::new(MemoryEntryStore::failing(), ScriptedAnalyzer::failing());

        let (status, body) = h.get("/api/entries", Uuid::new_v4()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to fetch entries");
    }

    #[tokio::test]
    async fn test_signed_url_checks_path() {
        let user = Uuid::new_v4();
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());

        let (status, body) = h.get("/api/signed-url", user).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Path required");

        let foreign = format!("/api/signed-url?path={}/2024-01-01-a.jpg", Uuid::new_v4());
        let (status, body) = h.get(&foreign, user).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Forbidden");

        let own = format!("{}/2024-01-01-a.jpg", user);
        let (status, body) = h.get(&format!("/api/signed-url?path={}", own), user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expiresIn"], 3600);
        assert!(body["url"].as_str().unwrap().contains(&own));
        assert_eq!(h.blobs.presigned(), vec![(own, Duration::from_secs(3600))]);
    }

    #[tokio::test]
    async fn test_analyze_stores_fallback_when_analysis_fails() {
        let user = Uuid::new_v4();
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());
        let png = small_png();

        let (status, body) = h
            .submit(
                user,
                multipart(Some(("image/png", &png)), Some(r#"{"sleep_hours": 7.5}"#)),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["aiAvailable"], false);
        assert_eq!(body["entry"]["overall_severity_score"], 1);
        assert_eq!(body["entry"]["sleep_hours"], 7.5);

        let keys = h.blobs.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with(&format!("{}/", user)));
        assert_eq!(body["entry"]["image_url"], keys[0].as_str());
        assert_eq!(h.entries.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_records_analysis() {
        let user = Uuid::new_v4();
        let result = AnalysisResult {
            papules: 3,
            overall_severity_score: 6,
            confidence_score: 0.8,
            ..AnalysisResult::fallback()
        };
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::returning(result));
        let png = small_png();

        let (status, body) = h.submit(user, multipart(Some(("image/png", &png)), None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["aiAvailable"], true);
        assert_eq!(body["entry"]["papules"], 3);
        assert_eq!(body["entry"]["overall_severity_score"], 6);
        assert_eq!(h.analyzer.calls(), 1);
    }

    #[tokio::test]
    async fn test_analyze_without_image_is_rejected() {
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());

        let (status, body) = h
            .submit(Uuid::new_v4(), multipart(None, Some("{}")))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image provided");
        assert!(h.blobs.keys().is_empty());
        assert_eq!(h.analyzer.calls(), 0);
    }

    #[tokio::test]
    async fn test_analyze_rejects_bad_lifestyle() {
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());
        let png = small_png();

        let (status, body) = h
            .submit(
                Uuid::new_v4(),
                multipart(Some(("image/png", &png)), Some("not json")),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid lifestyle data");
    }

    #[tokio::test]
    async fn test_analyze_budget_is_per_user() {
        let user = Uuid::new_v4();
        let h = Harness::with_budget(MemoryEntryStore::default(), ScriptedAnalyzer::failing(), 1);
        let png = small_png();

        let (status, _) = h.submit(user, multipart(Some(("image/png", &png)), None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = h.submit(user, multipart(Some(("image/png", &png)), None)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Too many submissions");

        let (status, _) = h
            .submit(Uuid::new_v4(), multipart(Some(("image/png", &png)), None))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejected_submissions_do_not_spend_budget() {
        let user = Uuid::new_v4();
        let h = Harness::with_budget(MemoryEntryStore::default(), ScriptedAnalyzer::failing(), 1);
        let png = small_png();

        for _ in 0..2 {
            let (status, body) = h.submit(user, multipart(None, Some("{}"))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "No image provided");
        }

        let (status, _) = h.submit(user, multipart(Some(("image/png", &png)), None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = h.submit(user, multipart(Some(("image/png", &png)), None)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_oversized_body_reports_raw_size_limit() {
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());
        let huge = vec![0u8; ANALYZE_BODY_LIMIT + 1024];

        let (status, body) = h
            .submit(Uuid::new_v4(), multipart(Some(("image/png", &huge)), None))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Image must be under 10MB before compression");
        assert!(h.blobs.keys().is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_summarizes_history() {
        let user = Uuid::new_v4();
        let mut first = entry_on(user, "2024-05-01", 8);
        first.image_url = Some(format!("{}/2024-05-01-a.jpg", user));
        let middle = entry_on(user, "2024-05-02", 6);
        let mut last = entry_on(user, "2024-05-03", 4);
        last.image_url = Some(format!("{}/2024-05-03-b.jpg", user));
        last.papules = 2;

        let h = Harness::new(
            MemoryEntryStore::with_rows(vec![last, first, middle]),
            ScriptedAnalyzer::failing(),
        );

        let (status, body) = h.get("/api/dashboard", user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entry_count"], 3);
        assert_eq!(body["avg_7"], 6.0);
        assert_eq!(body["latest"]["date"], "2024-05-03");
        assert_eq!(body["latest"]["total_lesions"], 2);
        assert_eq!(body["latest"]["confidence_pct"], 90);
        assert_eq!(body["severity"][0]["date"], "2024-05-01");
        assert_eq!(body["severity"][2]["avg7"], 6.0);
        assert_eq!(body["before_after"]["before"]["date"], "2024-05-01");
        assert_eq!(body["before_after"]["after"]["date"], "2024-05-03");
        assert!(body["before_after"]["after"]["url"]
            .as_str()
            .unwrap()
            .contains("2024-05-03-b.jpg"));
    }

    #[tokio::test]
    async fn test_dashboard_empty_history() {
        let h = Harness::new(MemoryEntryStore::default(), ScriptedAnalyzer::failing());

        let (status, body) = h.get("/api/dashboard", Uuid::new_v4()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entry_count"], 0);
        assert_eq!(body["latest"], Value::Null);
        assert_eq!(body["avg_7"], 0.0);
        assert_eq!(body["before_after"], Value::Null);
    }
}
