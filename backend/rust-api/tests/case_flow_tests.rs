use axum::http::StatusCode;
use serde_json::json;

use mediscope_api::services::case_store::{CaseStore, ProfileStore};

mod common;
use common::*;

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let app = create_test_app().await;
    let (status, _) = send(&app.router, "GET", "/api/v1/cases", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_role_is_forbidden() {
    let app = create_test_app().await;
    let token = token_for("u1", "guest");
    let (status, body) = send(&app.router, "GET", "/api/v1/cases", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn list_cases_marks_completed_ones() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");

    let (status, body) = send(&app.router, "GET", "/api/v1/cases", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cases"][0]["id"], CASE_ID);
    assert_eq!(body["cases"][0]["total_steps"], 3);
    assert_eq!(body["completed_case_ids"], json!([]));

    complete_case(&app.router, &token, CASE_ID).await;

    let (_, body) = send(&app.router, "GET", "/api/v1/cases", Some(&token), None).await;
    assert_eq!(body["completed_case_ids"], json!([CASE_ID]));
}

#[tokio::test]
async fn start_returns_first_step_without_rewards() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/api/v1/cases/{}/attempts", CASE_ID),
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["current_step"], 1);
    assert_eq!(body["total_steps"], 3);
    assert_eq!(body["step"]["number"], 1);
    let first_choice = &body["step"]["choices"][0];
    assert!(first_choice.get("xp_reward").is_none());
    assert!(first_choice.get("is_correct").is_none());
}

#[tokio::test]
async fn starting_unknown_case_is_not_found() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/v1/cases/no-such-case/attempts",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn perfect_walkthrough_scores_one_hundred() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;

    let (_, first) = choose(&app.router, &token, &attempt_id, "s1-good").await;
    assert_eq!(first["status"], "continue");
    assert_eq!(first["next_step"], 2);
    assert_eq!(first["total_xp_earned"], 10);

    let (_, second) = choose(&app.router, &token, &attempt_id, "s2-good").await;
    assert_eq!(second["next_step"], 3);
    assert_eq!(second["total_xp_earned"], 25);

    let (_, view) = send(
        &app.router,
        "GET",
        &format!("/api/v1/attempts/{}", attempt_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(view["step_number"], 3);
    assert_eq!(view["progress_percent"], 100);
    assert_eq!(view["is_completed"], false);

    let (_, third) = choose(&app.router, &token, &attempt_id, "s3-good").await;
    assert_eq!(third["status"], "completed");
    assert_eq!(third["next_step"], json!(null));
    assert_eq!(third["total_xp_earned"], 45);

    let (status, summary) = send(
        &app.router,
        "GET",
        &format!("/api/v1/attempts/{}/summary", attempt_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["performance_score"], 100);
    assert_eq!(summary["max_possible_xp"], 45);
    assert_eq!(summary["choices_made"].as_array().unwrap().len(), 3);
    assert!(summary["completed_at"].is_string());
}

#[tokio::test]
async fn missing_the_first_reward_lowers_the_score() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;

    for choice in ["s1-bad", "s2-good", "s3-good"] {
        let (status, _) = choose(&app.router, &token, &attempt_id, choice).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, summary) = send(
        &app.router,
        "GET",
        &format!("/api/v1/attempts/{}/summary", attempt_id),
        Some(&token),
        None,
    )
    .await;
    // floor(35 * 100 / 45)
    assert_eq!(summary["performance_score"], 77);
    assert_eq!(summary["total_xp_earned"], 35);
}

#[tokio::test]
async fn choice_from_another_step_is_rejected_without_changes() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;

    let (status, body) = choose(&app.router, &token, &attempt_id, "s2-good").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_choice");

    let attempt = app.store.find_attempt(&attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.current_step, 1);
    assert!(attempt.choices_made.is_empty());
    assert_eq!(attempt.total_xp_earned, 0);
}

#[tokio::test]
async fn replaying_a_step_does_not_double_count() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;

    let (status, _) = choose(&app.router, &token, &attempt_id, "s1-good").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = choose(&app.router, &token, &attempt_id, "s1-good").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let profile = app.store.find_profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.total_xp, 10);
}

#[tokio::test]
async fn concurrent_submissions_credit_one_winner() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;

    let (a, b) = tokio::join!(
        choose(&app.router, &token, &attempt_id, "s1-good"),
        choose(&app.router, &token, &attempt_id, "s1-good"),
    );

    let statuses = [a.0, b.0];
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::OK).count(),
        1,
        "statuses: {:?}",
        statuses
    );
    for status in statuses.iter().filter(|s| **s != StatusCode::OK) {
        assert!(
            *status == StatusCode::CONFLICT || *status == StatusCode::BAD_REQUEST,
            "unexpected status {}",
            status
        );
    }

    let profile = app.store.find_profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.total_xp, 10);
}

#[tokio::test]
async fn submitting_after_completion_conflicts() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;
    for choice in ["s1-good", "s2-good", "s3-good"] {
        choose(&app.router, &token, &attempt_id, choice).await;
    }
    let completed_at = app
        .store
        .find_attempt(&attempt_id)
        .await
        .unwrap()
        .unwrap()
        .completed_at;

    let (status, body) = choose(&app.router, &token, &attempt_id, "s3-good").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_completed");

    let attempt = app.store.find_attempt(&attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.completed_at, completed_at);
}

#[tokio::test]
async fn summary_before_completion_conflicts() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;

    let (status, body) = send(
        &app.router,
        "GET",
        &format!("/api/v1/attempts/{}/summary", attempt_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "not_completed");
}

#[tokio::test]
async fn another_users_attempt_is_not_found() {
    let app = create_test_app().await;
    let owner = token_for("owner", "student");
    let intruder = token_for("intruder", "student");
    let attempt_id = start_attempt(&app.router, &owner, CASE_ID).await;

    let (status, _) = send(
        &app.router,
        "GET",
        &format!("/api/v1/attempts/{}", attempt_id),
        Some(&intruder),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = choose(&app.router, &intruder, &attempt_id, "s1-good").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profile_failure_rolls_back_the_whole_submission() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;

    app.store.set_fail_profile_writes(true);
    let (status, body) = choose(&app.router, &token, &attempt_id, "s1-good").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "storage_error");

    let attempt = app.store.find_attempt(&attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.current_step, 1);
    assert!(attempt.choices_made.is_empty());
    assert!(app.store.find_profile("u1").await.unwrap().is_none());

    app.store.set_fail_profile_writes(false);
    let (status, _) = choose(&app.router, &token, &attempt_id, "s1-good").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn removed_step_completes_attempt_without_counting_it() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;
    choose(&app.router, &token, &attempt_id, "s1-good").await;

    app.store.remove_step(CASE_ID, 2).await;

    let (status, view) = send(
        &app.router,
        "GET",
        &format!("/api/v1/attempts/{}", attempt_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["is_completed"], true);
    assert_eq!(view["step"], json!(null));

    let attempt = app.store.find_attempt(&attempt_id).await.unwrap().unwrap();
    assert!(attempt.completed);
    assert!(attempt.completed_at.is_some());

    let profile = app.store.find_profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.total_xp, 10);
    assert_eq!(profile.cases_completed, 0);
}

#[tokio::test]
async fn malformed_and_invalid_bodies_are_json_errors() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    let attempt_id = start_attempt(&app.router, &token, CASE_ID).await;
    let uri = format!("/api/v1/attempts/{}/choices", attempt_id);

    let (status, body) = send(&app.router, "POST", &uri, Some(&token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = send(
        &app.router,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "choice_id": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn responses_carry_trace_id_and_csp() {
    let app = create_test_app().await;
    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        axum::http::Request::builder()
            .uri("/health")
            .header("x-trace-id", "trace-123")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-trace-id"], "trace-123");
    assert!(response
        .headers()
        .contains_key(axum::http::header::CONTENT_SECURITY_POLICY));
}
