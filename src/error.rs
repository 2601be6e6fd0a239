use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::{Action, AssessmentState};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("GitHub API error {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cannot {action} assessment {assessment} while it is {from}")]
    InvalidTransition {
        assessment: String,
        from: AssessmentState,
        action: Action,
    },

    #[error("Write to {repo}:{path} was accepted but the file does not hold the new content")]
    WriteNotApplied { repo: String, path: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("{action} failed for {} group(s): {}", groups.len(), groups.join(", "))]
    GroupsFailed { action: Action, groups: Vec<String> },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Input rejected before any remote write took place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("row {row} has {found} columns, header has {expected}")]
    ColumnCount { row: usize, expected: usize, found: usize },

    #[error("row {row} needs at least {expected} columns")]
    MissingColumns { row: usize, expected: usize },

    #[error("document has no header row")]
    MissingHeader,

    #[error("group name is not unique: {0}")]
    DuplicateGroup(String),

    #[error("user is in more than one group: {0}")]
    MultipleGroups(String),

    #[error("user is listed twice in group {group}: {login}")]
    DuplicateMember { group: String, login: String },

    #[error("user is not part of the student team: {0}")]
    NotStudent(String),

    #[error("group {group} has {size} members, the limit is {max}")]
    GroupTooLarge { group: String, size: usize, max: i64 },

    #[error("group {0} has no members")]
    EmptyGroup(String),

    #[error("main-dir of {assessment} cannot change from {current} to {requested}")]
    MainDirChanged {
        assessment: String,
        current: String,
        requested: String,
    },

    #[error("assessment names {first} and {second} both become {normalized}")]
    NameCollision {
        first: String,
        second: String,
        normalized: String,
    },

    #[error("assessment has not been configured: {0}")]
    UnknownAssessment(String),

    #[error("assessment {0} is not configured for group work (max-group-size <= 1)")]
    NotGroupWork(String),

    #[error("invalid deadline {value}: {reason}")]
    InvalidDeadline { value: String, reason: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Remote { .. } | AppError::Http(_) | AppError::WriteNotApplied { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
