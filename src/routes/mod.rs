//! API Routes
//!
//! - `POST /api/v1/ask` - Submit a question, returns 202 with a job id
//! - `GET /api/v1/ask/{job_id}` - Poll a job
//! - `GET /health` - Store and queue reachability

pub mod ask;
pub mod error;
pub mod health;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::{build_rate_limiter, cors_layer, rate_limiter_middleware};
use crate::models::AppState;

pub use error::ApiError;

/// Create the main application router
///
/// The rate limiter only guards the ask endpoints so health probes keep
/// working under load.
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let mut ask_router = ask::router(state.clone());
    if let Some(limiter) = build_rate_limiter(&state.config.rate_limit) {
        ask_router = ask_router.layer(middleware::from_fn_with_state(limiter, rate_limiter_middleware));
    }

    Router::new()
        .merge(ask_router)
        .merge(health::router(state.clone()))
        .layer(cors_layer(&state.config.server.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::agents::testing::{pipeline, StubLLM};
    use crate::config::Config;
    use crate::db::{InMemoryJobStore, JobStore};
    use crate::models::{Citation, JobId, JobStatus, JobUpdate};
    use crate::queue::{InMemoryDispatcher, JobOrchestrator, TaskDispatcher, WorkerPool};

    struct TestApp {
        router: Router,
        store: Arc<InMemoryJobStore>,
        queue: Arc<InMemoryDispatcher>,
    }

    fn app() -> TestApp {
        let config = Config::for_tests();

        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryDispatcher::new(Duration::from_secs(30)));
        let state = AppState {
            store: store.clone(),
            dispatcher: queue.clone(),
            config,
        };

        TestApp {
            router: create_router(state),
            store,
            queue,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn ask(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/ask")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn poll(job_id: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/api/v1/ask/{}", job_id))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_then_poll() {
        let app = app();

        let (status, body) = send(&app.router, ask(r#"{"question":"What is RRF?"}"#)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["message"], ask::ACCEPTED_MESSAGE);
        let job_id = body["job_id"].as_str().unwrap().to_string();

        assert_eq!(app.queue.depth().await.unwrap(), 1);

        let (status, body) = send(&app.router, poll(&job_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], job_id);
        assert_eq!(body["question"], "What is RRF?");
        assert_eq!(body["status"], "PENDING");
        assert!(body["result_text"].is_null());
        assert!(body["sources_metadata"].is_null());
        assert!(body["error"].is_null());
    }

    #[tokio::test]
    async fn test_submitted_question_is_answered_with_retrieved_citations() {
        let app = app();
        let llm = Arc::new(StubLLM::answering("c2 covers it [Source: doc-c2, Chunk: c2]."));
        let (retriever, generator) = pipeline(llm.clone());
        let orchestrator = Arc::new(JobOrchestrator::new(
            app.store.clone(),
            retriever,
            generator,
            Config::for_tests().queue.retry_policy(),
        ));
        let pool = WorkerPool::spawn(2, app.queue.clone(), orchestrator, Duration::from_millis(20));

        let (status, body) = send(&app.router, ask(r#"{"question":"What is c2?"}"#)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let mut body = Value::Null;
        for _ in 0..200 {
            let (status, polled) = send(&app.router, poll(&job_id)).await;
            assert_eq!(status, StatusCode::OK);
            let state = polled["status"].as_str().unwrap().to_string();
            assert!(["PENDING", "PROCESSING", "COMPLETED"].contains(&state.as_str()), "status: {state}");
            body = polled;
            if state == "COMPLETED" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.shutdown().await;

        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["result_text"], "c2 covers it [Source: doc-c2, Chunk: c2].");
        assert!(body["error"].is_null());
        assert!(body["processing_time_seconds"].is_number());

        // Chunk ids come from what the retriever returned; c2 is in both lists.
        let citations = body["sources_metadata"].as_array().unwrap();
        assert!(!citations.is_empty());
        assert_eq!(citations[0]["chunk_id"], "c2");
        assert!(citations
            .iter()
            .all(|c| c["chunk_id"] == "c1" || c["chunk_id"] == "c2"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_poll_completed_job_shows_citations() {
        let app = app();
        let job = app.store.create("What is RRF?").await.unwrap();
        app.store
            .transition(job.id, JobStatus::Pending, JobUpdate::Processing)
            .await
            .unwrap();
        app.store
            .transition(
                job.id,
                JobStatus::Processing,
                JobUpdate::Completed {
                    answer: "Rank fusion.".to_string(),
                    citations: vec![Citation {
                        source_id: "doc-1".to_string(),
                        chunk_id: "doc-1#3".to_string(),
                        relevance_score: 0.032,
                        url: None,
                    }],
                    processing_time_seconds: 1.25,
                },
            )
            .await
            .unwrap();

        let (status, body) = send(&app.router, poll(&job.id.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["result_text"], "Rank fusion.");
        assert_eq!(body["sources_metadata"][0]["chunk_id"], "doc-1#3");
        assert_eq!(body["processing_time_seconds"], 1.25);
    }

    #[tokio::test]
    async fn test_invalid_questions_are_rejected() {
        let app = app();

        for body in [
            r#"{"question":"hi"}"#.to_string(),
            r#"{"question":"      "}"#.to_string(),
            format!(r#"{{"question":"{}"}}"#, "x".repeat(1001)),
            r#"{}"#.to_string(),
        ] {
            let (status, response) = send(&app.router, ask(&body)).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body: {body}");
            assert!(response["error"].is_string());
        }

        assert_eq!(app.store.len().await, 0);
        assert_eq!(app.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_are_404() {
        let app = app();

        let (status, _) = send(&app.router, poll(&JobId::new().to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app.router, poll("not-a-uuid")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_storage_outage_is_503() {
        let app = app();
        app.store.set_available(false);

        let (status, body) = send(&app.router, ask(r#"{"question":"What is RRF?"}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "service_unavailable");
    }

    #[tokio::test]
    async fn test_enqueue_failure_fails_the_job() {
        let app = app();
        app.queue.set_available(false);

        let (status, _) = send(&app.router, ask(r#"{"question":"What is RRF?"}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let jobs = app.store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(!jobs[0].error.as_deref().unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_dependencies() {
        let app = app();
        let health = || Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = send(&app.router, health()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "connected");
        assert_eq!(body["queue_depth"], 0);

        app.store.set_available(false);
        let (status, body) = send(&app.router, health()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["database"], "unavailable");

        app.store.set_available(true);
        app.queue.set_available(false);
        let (status, body) = send(&app.router, health()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["queue"], "unavailable");
        assert!(body["queue_depth"].is_null());
    }
}
