//! Loading authored cases from JSON into a store.

use anyhow::{Context, Result};

use crate::models::case::CaseDefinition;

use super::case_store::CaseStore;

/// Parses a JSON array of cases, rejecting the whole file if any case is
/// malformed.
pub fn parse_cases(json: &str) -> Result<Vec<CaseDefinition>> {
    let cases: Vec<CaseDefinition> =
        serde_json::from_str(json).context("Case file is not a JSON array of cases")?;
    for case in &cases {
        case.validate()
            .with_context(|| format!("Case {} failed validation", case.id))?;
    }
    Ok(cases)
}

/// Upserts every case by id and returns how many were written.
pub async fn seed_cases<S>(store: &S, cases: &[CaseDefinition]) -> Result<usize>
where
    S: CaseStore + ?Sized,
{
    for case in cases {
        store.upsert_case(case).await?;
        tracing::info!(
            "Seeded case {} ({} steps, max {} XP)",
            case.id,
            case.total_steps(),
            case.max_possible_reward()
        );
    }
    Ok(cases.len())
}
