use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use classroom::api::router;
use classroom::config::{CourseConfig, CourseConfigFile};
use classroom::github::InMemoryRemote;
use classroom::services::LifecycleController;
use classroom::state::AppState;

fn app() -> (Arc<InMemoryRemote>, Router) {
    let file: CourseConfigFile = serde_json::from_value(serde_json::json!({
        "org": "uni-course",
        "org_username": "course-admin",
        "prefix": "cs101",
        "repo_instructors": "instructors",
        "repo_update_branch": "updates",
        "team_instructors": "staff",
        "team_students": "students",
        "repo_instructors_path_config": "config"
    }))
    .unwrap();
    let remote = Arc::new(InMemoryRemote::new());
    let controller = LifecycleController::new(CourseConfig::from(file), remote.clone());
    (remote, router(AppState::new(controller)))
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (_, app) = app();
    let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_configure_and_read_status() {
    let (remote, app) = app();

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/course/init"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(
        remote
            .repository_names()
            .unwrap()
            .contains(&"cs101_instructors".to_string())
    );

    let defs = serde_json::json!({
        "hw1": {
            "main-dir": "hw1",
            "deadline": "2024-01-01 23:59:59",
            "deadline-utc-offset": 0,
            "max-group-size": 1
        }
    });
    let response = app
        .clone()
        .oneshot(json_request("PUT", "/assessments", defs))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({ "hw1": "Unprepared" }));

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/assessments/status"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, serde_json::json!({ "hw1": "Unprepared" }));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/assessments/hw1/release",
            serde_json::json!({ "permission": "push" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(json_request(
            "POST",
            "/assessments/hw9/prepare",
            serde_json::json!({ "overwrite": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("hw9"));
}

#[tokio::test]
async fn test_bad_student_csv_is_a_bad_request() {
    let (_, app) = app();
    app.clone()
        .oneshot(empty_request("POST", "/course/init"))
        .await
        .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/students")
        .header("content-type", "text/csv")
        .body(Body::from("id,login\n1,alice,extra\n"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_out_of_range_offset_is_a_bad_request() {
    let (_, app) = app();
    app.clone()
        .oneshot(empty_request("POST", "/course/init"))
        .await
        .unwrap();

    let defs = serde_json::json!({
        "hw1": {
            "main-dir": "hw1",
            "deadline": "2024-01-01 23:59:59",
            "deadline-utc-offset": 1_000_000_000_000i64,
            "max-group-size": 1
        }
    });
    let response = app
        .oneshot(json_request("PUT", "/assessments", defs))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
