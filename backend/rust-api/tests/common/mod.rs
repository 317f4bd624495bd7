#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use mediscope_api::{
    config::Config,
    create_router,
    middlewares::auth::JwtService,
    models::case::{CaseDefinition, CaseStep, Choice, Difficulty},
    services::{memory_store::MemoryStore, AppState},
};

pub const JWT_SECRET: &str = "integration-test-secret";
pub const CASE_ID: &str = "chest-pain";

pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(Config::for_tests(JWT_SECRET), vec![chest_pain_case()]).await
}

pub async fn create_test_app_with(config: Config, cases: Vec<CaseDefinition>) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = MemoryStore::with_cases(cases).await;
    let state = Arc::new(AppState::with_store(config, Arc::new(store.clone())));

    TestApp {
        router: create_router(state),
        store,
    }
}

fn choice(id: &str, xp_reward: u32, is_correct: bool) -> Choice {
    Choice {
        id: id.to_string(),
        text: format!("Option {}", id),
        xp_reward,
        is_correct,
        consequence: format!("You chose {}", id),
    }
}

fn step(number: u32, choices: Vec<Choice>) -> CaseStep {
    CaseStep {
        number,
        title: format!("Step {}", number),
        description: "What do you do next?".to_string(),
        patient_info: String::new(),
        choices,
    }
}

/// Rewards {10,0},{0,15},{20,0}; the rewarded choice is the correct one.
pub fn chest_pain_case() -> CaseDefinition {
    case_with_rewards(CASE_ID, "Chest pain in the ED", [10, 15, 20])
}

/// Three-step case where the correct choice at step n is `s{n}-good`
/// worth `rewards[n-1]` and `s{n}-bad` is worth nothing.
pub fn case_with_rewards(id: &str, title: &str, rewards: [u32; 3]) -> CaseDefinition {
    CaseDefinition {
        id: id.to_string(),
        title: title.to_string(),
        description: "Test case".to_string(),
        difficulty: Difficulty::Medium,
        category: "Cardiology".to_string(),
        patient_info: "BP 150/95, HR 110".to_string(),
        total_xp: rewards.iter().sum(),
        is_active: true,
        created_at: Utc::now(),
        steps: rewards
            .iter()
            .enumerate()
            .map(|(index, reward)| {
                let number = index as u32 + 1;
                step(
                    number,
                    vec![
                        choice(&format!("s{}-good", number), *reward, true),
                        choice(&format!("s{}-bad", number), 0, false),
                    ],
                )
            })
            .collect(),
    }
}

pub fn token_for(user_id: &str, role: &str) -> String {
    JwtService::new(JWT_SECRET)
        .issue(user_id, role, 3600)
        .expect("token")
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).to_string())
        })
    };

    (status, json)
}

/// Starts `case_id` for the token's user and returns the attempt id.
pub async fn start_attempt(app: &Router, token: &str, case_id: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/cases/{}/attempts", case_id),
        Some(token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "start failed: {}", body);
    body["attempt_id"].as_str().unwrap().to_string()
}

pub async fn choose(app: &Router, token: &str, attempt_id: &str, choice_id: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/api/v1/attempts/{}/choices", attempt_id),
        Some(token),
        Some(serde_json::json!({ "choice_id": choice_id })),
    )
    .await
}

/// Plays the case through picking the rewarded choice at every step.
pub async fn complete_case(app: &Router, token: &str, case_id: &str) -> Value {
    let attempt_id = start_attempt(app, token, case_id).await;
    let mut last = Value::Null;
    for number in 1..=3 {
        let (status, body) = choose(app, token, &attempt_id, &format!("s{}-good", number)).await;
        assert_eq!(status, StatusCode::OK, "choice failed: {}", body);
        last = body;
    }
    last
}
