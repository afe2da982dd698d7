use std::sync::Arc;
use std::time::Duration;

use reelgate_client::{
    BackendError, HttpBackendConfig, HttpJobBackend, JobBackend, SubmissionError, TaskSubmitter,
};
use reelgate_models::{TaskId, TaskStatus};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn job_backend(server: &MockServer) -> HttpJobBackend {
    HttpJobBackend::new(HttpBackendConfig::job_backend(server.uri())).unwrap()
}

fn gateway(server: &MockServer) -> HttpJobBackend {
    HttpJobBackend::new(HttpBackendConfig::gateway(server.uri(), Some("tok".to_string()))).unwrap()
}

#[tokio::test]
async fn test_job_backend_submit_passes_url_as_query() {
    let server = MockServer::start().await;
    let source = "https://www.reddit.com/r/AskReddit/comments/abc/title/";

    Mock::given(method("POST"))
        .and(path("/api/py/reddit/reddit-commentary"))
        .and(query_param("url", source))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "task-42"})))
        .expect(1)
        .mount(&server)
        .await;

    let submission = job_backend(&server).submit(source).await.unwrap();
    assert_eq!(submission.task_id.as_str(), "task-42");
    assert!(submission.admission.is_none());
}

#[tokio::test]
async fn test_gateway_submit_sends_token_and_reads_quota_headers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/jobs"))
        .and(header("Authorization", "Bearer tok"))
        .and(body_json(json!({"source_reference": "https://redd.it/abc"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-RateLimit-Limit", "3")
                .insert_header("X-RateLimit-Remaining", "2")
                .insert_header("X-RateLimit-Reset", "1700000000000")
                .set_body_json(json!({"task_id": "task-1"})),
        )
        .mount(&server)
        .await;

    let submission = gateway(&server).submit("https://redd.it/abc").await.unwrap();
    let admission = submission.admission.unwrap();
    assert!(admission.allowed);
    assert_eq!(admission.limit, 3);
    assert_eq!(admission.remaining, 2);
    assert_eq!(admission.reset_at_ms(), 1_700_000_000_000);
}

#[tokio::test]
async fn test_gateway_quota_denial() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/jobs"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("X-RateLimit-Limit", "3")
                .insert_header("X-RateLimit-Remaining", "0")
                .insert_header("X-RateLimit-Reset", "1700000000000")
                .set_body_json(json!({"detail": "Rate limit exceeded", "code": "quota_exceeded"})),
        )
        .mount(&server)
        .await;

    let err = gateway(&server).submit("https://redd.it/abc").await.unwrap_err();
    match err {
        BackendError::QuotaExceeded(decision) => {
            assert!(!decision.allowed);
            assert_eq!(decision.remaining, 0);
        }
        other => panic!("expected QuotaExceeded, got {:?}", other),
    }
}

#[tokio::test]
async fn test_gateway_unauthenticated() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/jobs"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "Authentication required", "code": "unauthenticated"})),
        )
        .mount(&server)
        .await;

    let err = gateway(&server).submit("https://redd.it/abc").await.unwrap_err();
    assert!(matches!(err, BackendError::Unauthenticated(ref d) if d == "Authentication required"));
}

#[tokio::test]
async fn test_gateway_backend_unreachable_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/jobs"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"detail": "Job backend unavailable", "code": "backend_unreachable"})),
        )
        .mount(&server)
        .await;

    let err = gateway(&server).submit("https://redd.it/abc").await.unwrap_err();
    assert!(matches!(err, BackendError::Unreachable(_)));
}

#[tokio::test]
async fn test_unreadable_success_is_unconfirmed_not_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/py/reddit/reddit-commentary"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let submitter = TaskSubmitter::new(Arc::new(job_backend(&server)));
    let err = submitter.submit("https://redd.it/abc").await.unwrap_err();
    assert!(
        matches!(err, SubmissionError::Unconfirmed(_)),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_backend_rejection_keeps_status_and_detail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/py/reddit/reddit-commentary"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "bad url"})))
        .mount(&server)
        .await;

    let err = job_backend(&server).submit("nope").await.unwrap_err();
    match err {
        BackendError::Rejected { status, detail } => {
            assert_eq!(status, 422);
            assert_eq!(detail, "bad url");
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_status_completed_with_video_url_alias() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/py/reddit/reddit-commentary/status/task-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "video_url": "https://cdn.example.com/v.mp4",
            "error": ""
        })))
        .mount(&server)
        .await;

    let record = job_backend(&server)
        .get_status(&TaskId::from("task-1"))
        .await
        .unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.result_url.as_deref(), Some("https://cdn.example.com/v.mp4"));
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_status_unknown_tag_is_in_progress() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/jobs/task-1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "task_id": "task-1",
            "status": "uploading_to_mars",
            "message": "almost"
        })))
        .mount(&server)
        .await;

    let record = gateway(&server).get_status(&TaskId::from("task-1")).await.unwrap();
    assert!(matches!(record.status, TaskStatus::InProgress(ref tag) if tag.as_str() == "uploading_to_mars"));
    assert_eq!(record.message.as_deref(), Some("almost"));
}

#[tokio::test]
async fn test_status_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/py/reddit/reddit-commentary/status/gone"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "not_found"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/py/reddit/reddit-commentary/status/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let backend = job_backend(&server);
    let err = backend.get_status(&TaskId::from("gone")).await.unwrap_err();
    assert!(matches!(err, BackendError::TaskNotFound(_)));
    let err = backend.get_status(&TaskId::from("missing")).await.unwrap_err();
    assert!(matches!(err, BackendError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/py/reddit/reddit-commentary/status/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(json!({"status": "rendering"})),
        )
        .mount(&server)
        .await;

    let config = HttpBackendConfig::job_backend(server.uri()).with_timeout(Duration::from_millis(200));
    let backend = HttpJobBackend::new(config).unwrap();
    let err = backend.get_status(&TaskId::from("slow")).await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout(200)));
}
