use axum::http::StatusCode;
use serde_json::{json, Value};

use mediscope_api::config::Config;

mod common;
use common::*;

fn achievement_types(body: &Value) -> Vec<String> {
    body["achievements"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["achievement_type"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn new_user_has_zero_profile() {
    let app = create_test_app().await;
    let token = token_for("fresh", "student");

    let (status, body) = send(&app.router, "GET", "/api/v1/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_xp"], 0);
    assert_eq!(body["level"], 1);
    assert_eq!(body["cases_completed"], 0);
    assert_eq!(body["rank"], 1);
}

#[tokio::test]
async fn first_completion_grants_first_case_and_logs_activity() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");

    let last = complete_case(&app.router, &token, CASE_ID).await;
    assert_eq!(last["achievements_unlocked"], json!(["first_case"]));

    let (_, profile) = send(&app.router, "GET", "/api/v1/profile", Some(&token), None).await;
    assert_eq!(profile["total_xp"], 45);
    assert_eq!(profile["cases_completed"], 1);

    let (_, achievements) = send(
        &app.router,
        "GET",
        "/api/v1/profile/achievements",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(achievement_types(&achievements), vec!["first_case"]);

    let (_, activities) = send(
        &app.router,
        "GET",
        "/api/v1/profile/activities",
        Some(&token),
        None,
    )
    .await;
    let kinds: Vec<&str> = activities["activities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["kind"].as_str().unwrap())
        .collect();
    // Newest first
    assert_eq!(kinds, vec!["achievement_earned", "case_completed"]);
    assert_eq!(activities["activities"][1]["xp_earned"], 45);
}

#[tokio::test]
async fn activities_respect_limit() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");
    complete_case(&app.router, &token, CASE_ID).await;
    complete_case(&app.router, &token, CASE_ID).await;

    let (_, body) = send(
        &app.router,
        "GET",
        "/api/v1/profile/activities?limit=2",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["activities"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn crossing_a_level_grants_level_up_once() {
    let app = create_test_app_with(
        Config::for_tests(JWT_SECRET),
        vec![case_with_rewards("marathon", "Marathon shift", [400, 400, 400])],
    )
    .await;
    let token = token_for("u1", "student");

    let attempt_id = start_attempt(&app.router, &token, "marathon").await;
    let (_, first) = choose(&app.router, &token, &attempt_id, "s1-good").await;
    assert_eq!(first["achievements_unlocked"], json!([]));
    choose(&app.router, &token, &attempt_id, "s2-good").await;
    let (_, third) = choose(&app.router, &token, &attempt_id, "s3-good").await;
    let unlocked = third["achievements_unlocked"].as_array().unwrap();
    assert!(unlocked.contains(&json!("level_up")));

    // Second run crosses into level 3 but the type is already held
    let last = complete_case(&app.router, &token, "marathon").await;
    assert!(!last["achievements_unlocked"]
        .as_array()
        .unwrap()
        .contains(&json!("level_up")));

    let (_, profile) = send(&app.router, "GET", "/api/v1/profile", Some(&token), None).await;
    assert_eq!(profile["total_xp"], 2400);
    assert_eq!(profile["level"], 3);
    assert_eq!(profile["xp_to_next_level"], 600);

    let (_, achievements) = send(
        &app.router,
        "GET",
        "/api/v1/profile/achievements",
        Some(&token),
        None,
    )
    .await;
    let types = achievement_types(&achievements);
    assert_eq!(types.iter().filter(|t| *t == "level_up").count(), 1);
}

#[tokio::test]
async fn twentieth_completion_grants_case_master_exactly_once() {
    let app = create_test_app().await;
    let token = token_for("u1", "student");

    for run in 1..=21 {
        let last = complete_case(&app.router, &token, CASE_ID).await;
        let unlocked = last["achievements_unlocked"].as_array().unwrap();
        let granted = unlocked.contains(&json!("case_master"));
        assert_eq!(granted, run == 20, "run {}", run);
    }

    let (_, achievements) = send(
        &app.router,
        "GET",
        "/api/v1/profile/achievements",
        Some(&token),
        None,
    )
    .await;
    let types = achievement_types(&achievements);
    assert_eq!(types.iter().filter(|t| *t == "case_master").count(), 1);
    assert_eq!(types.iter().filter(|t| *t == "first_case").count(), 1);
}

#[tokio::test]
async fn leaderboard_orders_by_xp_and_matches_profile_rank() {
    let app = create_test_app().await;
    let leader = token_for("leader", "student");
    let runner_up = token_for("runner-up", "teacher");

    complete_case(&app.router, &leader, CASE_ID).await;
    complete_case(&app.router, &leader, CASE_ID).await;
    complete_case(&app.router, &runner_up, CASE_ID).await;

    let (status, board) = send(
        &app.router,
        "GET",
        "/api/v1/leaderboard?limit=5",
        Some(&runner_up),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = board["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["user_id"], "leader");
    assert_eq!(entries[0]["rank"], 1);
    assert_eq!(entries[0]["total_xp"], 90);
    assert_eq!(entries[1]["user_id"], "runner-up");
    assert_eq!(entries[1]["rank"], 2);

    let (_, profile) = send(&app.router, "GET", "/api/v1/profile", Some(&runner_up), None).await;
    assert_eq!(profile["rank"], 2);
}
