use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// An authored clinical case together with its ordered steps.
///
/// Steps and choices are embedded: a case is read and written as a single
/// document. Step numbers are 1-based and contiguous; the engine treats
/// "no step at `n`" as the end of the case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDefinition {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub patient_info: String,
    /// Authored headline reward shown in listings. Scoring uses
    /// [`CaseDefinition::max_possible_reward`] instead.
    #[serde(default)]
    pub total_xp: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub steps: Vec<CaseStep>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseStep {
    pub number: u32,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub patient_info: String,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub xp_reward: u32,
    #[serde(default)]
    pub is_correct: bool,
    pub consequence: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaseValidationError {
    #[error("case id must not be blank")]
    BlankId,
    #[error("case {0} has a blank title")]
    BlankTitle(String),
    #[error("case {0} has no steps")]
    NoSteps(String),
    #[error("case {case_id}: expected step {expected}, found {found}")]
    StepGap {
        case_id: String,
        expected: u32,
        found: u32,
    },
    #[error("case {case_id}: step {step} has no choices")]
    EmptyStep { case_id: String, step: u32 },
    #[error("case {case_id}: choice id {choice_id} is used more than once")]
    DuplicateChoice { case_id: String, choice_id: String },
}

impl CaseDefinition {
    pub fn step(&self, number: u32) -> Option<&CaseStep> {
        self.steps.iter().find(|step| step.number == number)
    }

    pub fn has_step(&self, number: u32) -> bool {
        self.step(number).is_some()
    }

    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Sum of rewards over every choice flagged correct, across all steps.
    pub fn max_possible_reward(&self) -> i64 {
        self.steps
            .iter()
            .flat_map(|step| step.choices.iter())
            .filter(|choice| choice.is_correct)
            .map(|choice| i64::from(choice.xp_reward))
            .sum()
    }

    /// Authoring checks run before a case is stored.
    pub fn validate(&self) -> Result<(), CaseValidationError> {
        if self.id.trim().is_empty() {
            return Err(CaseValidationError::BlankId);
        }
        if self.title.trim().is_empty() {
            return Err(CaseValidationError::BlankTitle(self.id.clone()));
        }
        if self.steps.is_empty() {
            return Err(CaseValidationError::NoSteps(self.id.clone()));
        }

        let mut numbers: Vec<u32> = self.steps.iter().map(|step| step.number).collect();
        numbers.sort_unstable();
        for (index, found) in numbers.into_iter().enumerate() {
            let expected = index as u32 + 1;
            if found != expected {
                return Err(CaseValidationError::StepGap {
                    case_id: self.id.clone(),
                    expected,
                    found,
                });
            }
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.choices.is_empty() {
                return Err(CaseValidationError::EmptyStep {
                    case_id: self.id.clone(),
                    step: step.number,
                });
            }
            for choice in &step.choices {
                if !seen.insert(choice.id.as_str()) {
                    return Err(CaseValidationError::DuplicateChoice {
                        case_id: self.id.clone(),
                        choice_id: choice.id.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl CaseStep {
    pub fn choice(&self, choice_id: &str) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.id == choice_id)
    }
}

// API views

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub total_xp: u32,
    pub total_steps: u32,
}

impl From<&CaseDefinition> for CaseSummary {
    fn from(case: &CaseDefinition) -> Self {
        Self {
            id: case.id.clone(),
            title: case.title.clone(),
            description: case.description.clone(),
            difficulty: case.difficulty,
            category: case.category.clone(),
            total_xp: case.total_xp,
            total_steps: case.total_steps(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseListResponse {
    pub cases: Vec<CaseSummary>,
    pub completed_case_ids: Vec<String>,
}

/// A choice as shown to the learner. Reward and correctness stay hidden.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChoiceView {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StepView {
    pub number: u32,
    pub title: String,
    pub description: String,
    pub patient_info: String,
    pub choices: Vec<ChoiceView>,
}

impl From<&CaseStep> for StepView {
    fn from(step: &CaseStep) -> Self {
        Self {
            number: step.number,
            title: step.title.clone(),
            description: step.description.clone(),
            patient_info: step.patient_info.clone(),
            choices: step
                .choices
                .iter()
                .map(|choice| ChoiceView {
                    id: choice.id.clone(),
                    text: choice.text.clone(),
                })
                .collect(),
        }
    }
}
