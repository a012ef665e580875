//! Caller-facing result of one agent invocation.

use serde::Serialize;

use crate::{
    classify::{ClassifiedOutcome, FailureKind},
    error::EngineError,
    extract::ExtractedSections,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    MissingDependency,
    MissingCredential,
    Generic,
    SetupRequired,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum AgentResponse {
    Success {
        sections: ExtractedSections,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Error {
        category: ErrorCategory,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        package_hint: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl AgentResponse {
    pub fn error(category: ErrorCategory, message: impl Into<String>) -> Self {
        AgentResponse::Error {
            category,
            message: message.into(),
            package_hint: None,
            detail: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AgentResponse::Success { .. })
    }

    /// Attach warnings gathered around the run. On an error they are
    /// appended to the detail so the caller still sees them.
    pub fn with_warnings(mut self, extra: Vec<String>) -> Self {
        if extra.is_empty() {
            return self;
        }
        match &mut self {
            AgentResponse::Success { warnings, .. } => warnings.extend(extra),
            AgentResponse::Error { detail, .. } => {
                let mut lines: Vec<String> = detail.take().into_iter().collect();
                lines.extend(extra);
                *detail = Some(lines.join("\n"));
            }
        }
        self
    }

    /// Render a classified outcome. `timeout_secs` is only used in the
    /// timeout message.
    pub fn from_outcome(outcome: ClassifiedOutcome, timeout_secs: u64) -> Self {
        match outcome {
            ClassifiedOutcome::Success { sections, warnings } => {
                AgentResponse::Success { sections, warnings }
            }
            ClassifiedOutcome::Timeout => AgentResponse::error(
                ErrorCategory::Timeout,
                format!(
                    "The operation timed out after {timeout_secs} seconds. This could be due to slow processing or missing AI model API keys."
                ),
            ),
            ClassifiedOutcome::RateLimited { detail } => AgentResponse::Error {
                category: ErrorCategory::RateLimit,
                message: "API rate limit exceeded. Please try again later or check your API usage quotas."
                    .into(),
                package_hint: None,
                detail: Some(detail),
            },
            ClassifiedOutcome::MissingDependency {
                module_name,
                package_hint,
            } => AgentResponse::Error {
                category: ErrorCategory::MissingDependency,
                message: format!(
                    "Missing Python dependency: {package_hint} (module '{module_name}'). It will be installed before the next run; please try again."
                ),
                package_hint: Some(package_hint),
                detail: None,
            },
            ClassifiedOutcome::MissingCredential { detail } => AgentResponse::Error {
                category: ErrorCategory::MissingCredential,
                message: "API key is missing or invalid".into(),
                package_hint: None,
                detail: Some(detail),
            },
            ClassifiedOutcome::GenericFailure {
                exit_code,
                stderr_excerpt,
                kind: FailureKind::NonZeroExit,
            } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".into());
                AgentResponse::Error {
                    category: ErrorCategory::Generic,
                    message: format!("Process exited with code {code}"),
                    package_hint: None,
                    detail: Some(stderr_excerpt).filter(|s| !s.is_empty()),
                }
            }
            ClassifiedOutcome::ReportedFailure { message } => AgentResponse::Error {
                category: ErrorCategory::Generic,
                message: format!("The agent reported an error: {message}"),
                package_hint: None,
                detail: None,
            },
            ClassifiedOutcome::GenericFailure {
                stderr_excerpt,
                kind: FailureKind::EmptyOutput,
                ..
            } => AgentResponse::Error {
                category: ErrorCategory::Generic,
                message: "The script executed but produced no output. Check the script implementation."
                    .into(),
                package_hint: None,
                detail: Some(stderr_excerpt).filter(|s| !s.is_empty()),
            },
        }
    }
}

impl From<EngineError> for AgentResponse {
    fn from(err: EngineError) -> Self {
        let category = match &err {
            EngineError::PathNotFound { .. }
            | EngineError::SpawnFailed { .. }
            | EngineError::Preflight(_) => ErrorCategory::SetupRequired,
            EngineError::InvalidInput(_) => ErrorCategory::InvalidInput,
            EngineError::Io(_) => ErrorCategory::Generic,
        };
        AgentResponse::error(category, err.to_string())
    }
}
