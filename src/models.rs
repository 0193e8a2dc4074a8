use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::config::Config;
use crate::db::JobStore;
use crate::queue::TaskDispatcher;
use crate::types::{AppError, AppResult};

pub const MIN_QUESTION_LEN: u64 = 3;
pub const MAX_QUESTION_LEN: u64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub config: Config,
}

/// Opaque job identifier. Rendered as a hyphenated UUID on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| AppError::NotFound(format!("job {}", s)))
    }
}

/// Lifecycle of a job: PENDING → PROCESSING → {COMPLETED, FAILED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(AppError::Internal(format!("unknown job status '{}'", other))),
        }
    }
}

/// Reference from a completed answer back to the chunk that backed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source_id: String,
    pub chunk_id: String,
    pub relevance_score: f64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub question: String,
    pub status: JobStatus,
    pub answer: Option<String>,
    pub citations: Option<Vec<Citation>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_time_seconds: Option<f64>,
}

impl Job {
    pub fn new(question: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            question: question.into(),
            status: JobStatus::Pending,
            answer: None,
            citations: None,
            error: None,
            created_at: now,
            updated_at: now,
            processing_time_seconds: None,
        }
    }

    /// Apply an update in place. Callers check the expected status first.
    pub fn apply(&mut self, update: JobUpdate) {
        self.status = update.target_status();
        self.updated_at = Utc::now();
        match update {
            JobUpdate::Processing => {}
            JobUpdate::Completed {
                answer,
                citations,
                processing_time_seconds,
            } => {
                self.answer = Some(answer);
                self.citations = Some(citations);
                self.error = None;
                self.processing_time_seconds = Some(processing_time_seconds);
            }
            JobUpdate::Failed {
                error,
                processing_time_seconds,
            } => {
                self.answer = None;
                self.citations = None;
                self.error = Some(error);
                self.processing_time_seconds = processing_time_seconds;
            }
        }
    }
}

/// Fields written alongside a status change. The variant fixes the target
/// status, so a COMPLETED job always carries an answer and citations and a
/// FAILED job always carries an error.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Processing,
    Completed {
        answer: String,
        citations: Vec<Citation>,
        processing_time_seconds: f64,
    },
    Failed {
        error: String,
        processing_time_seconds: Option<f64>,
    },
}

impl JobUpdate {
    pub fn failed(error: impl Into<String>, processing_time_seconds: Option<f64>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "job failed without a reported cause".to_string()
        } else {
            error
        };
        JobUpdate::Failed {
            error,
            processing_time_seconds,
        }
    }

    pub fn target_status(&self) -> JobStatus {
        match self {
            JobUpdate::Processing => JobStatus::Processing,
            JobUpdate::Completed { .. } => JobStatus::Completed,
            JobUpdate::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Hit returned by one search modality. Its rank is its position in the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub text: String,
    pub url: Option<String>,
    pub score: f64,
}

/// A chunk after rank fusion. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub text: String,
    pub url: Option<String>,
    pub semantic_score: Option<f64>,
    pub keyword_score: Option<f64>,
    pub semantic_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
    pub fused_score: f64,
}

impl RetrievedChunk {
    pub fn to_citation(&self) -> Citation {
        Citation {
            source_id: self.source_id.clone(),
            chunk_id: self.chunk_id.clone(),
            relevance_score: self.fused_score,
            url: self.url.clone(),
        }
    }
}

// API Request/Response types

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(custom(function = "trimmed_length"))]
    pub question: String,
}

/// Length bounds apply to the question as stored, i.e. after trimming.
fn trimmed_length(value: &str) -> Result<(), ValidationError> {
    match question_error(value.trim()) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn question_error(trimmed: &str) -> Option<ValidationError> {
    if trimmed.is_empty() {
        return Some(
            ValidationError::new("blank")
                .with_message(Cow::from("question cannot be empty or just whitespace")),
        );
    }

    let len = trimmed.chars().count() as u64;
    if !(MIN_QUESTION_LEN..=MAX_QUESTION_LEN).contains(&len) {
        return Some(ValidationError::new("length").with_message(Cow::from(format!(
            "question must be between {} and {} characters",
            MIN_QUESTION_LEN, MAX_QUESTION_LEN
        ))));
    }
    None
}

/// The question as a job stores it: trimmed and within bounds.
pub fn normalize_question(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    match question_error(trimmed) {
        Some(error) => Err(AppError::Validation(
            error.message.map(|m| m.into_owned()).unwrap_or_else(|| error.code.into_owned()),
        )),
        None => Ok(trimmed.to_string()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobCreateResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

/// Poll response. Null fields are serialized explicitly.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResultResponse {
    pub id: String,
    pub question: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result_text: Option<String>,
    pub sources_metadata: Option<Vec<Citation>>,
    pub processing_time_seconds: Option<f64>,
    pub error: Option<String>,
}

impl From<Job> for JobResultResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            question: job.question,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            result_text: job.answer,
            sources_metadata: job.citations,
            processing_time_seconds: job.processing_time_seconds,
            error: job.error,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub database: String,
    pub queue: String,
    pub queue_depth: Option<u64>,
}
