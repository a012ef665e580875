//! Turn a finished worker run into exactly one classified outcome.

use std::{borrow::Cow, collections::HashMap};

use serde::Serialize;

use crate::{
    extract::{ExtractedSections, SectionExtractor},
    preflight::is_installable_name,
    process::ExecutionResult,
};

pub mod signatures;

/// Lines of stderr kept in a generic failure.
const STDERR_EXCERPT_LINES: usize = 20;

/// Module name used when a missing-module error names none.
pub const UNKNOWN_MODULE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    NonZeroExit,
    /// The worker finished but printed nothing usable.
    EmptyOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedOutcome {
    Success {
        sections: ExtractedSections,
        warnings: Vec<String>,
    },
    Timeout,
    RateLimited {
        detail: String,
    },
    MissingDependency {
        module_name: String,
        package_hint: String,
    },
    MissingCredential {
        detail: String,
    },
    GenericFailure {
        exit_code: Option<i32>,
        stderr_excerpt: String,
        kind: FailureKind,
    },
    /// The worker printed an error document instead of content.
    ReportedFailure {
        message: String,
    },
}

impl ClassifiedOutcome {
    /// Caller-facing category tag.
    pub fn category(&self) -> &'static str {
        match self {
            ClassifiedOutcome::Success { .. } => "success",
            ClassifiedOutcome::Timeout => "timeout",
            ClassifiedOutcome::RateLimited { .. } => "rate-limit",
            ClassifiedOutcome::MissingDependency { .. } => "missing-dependency",
            ClassifiedOutcome::MissingCredential { .. } => "missing-credential",
            ClassifiedOutcome::GenericFailure { .. } | ClassifiedOutcome::ReportedFailure { .. } => {
                "generic"
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ClassifiedOutcome::Success { .. })
    }

    /// The package worth installing before the next run, if this outcome
    /// names one that an installer will accept.
    pub fn pending_package(&self) -> Option<&str> {
        match self {
            ClassifiedOutcome::MissingDependency {
                module_name,
                package_hint,
            } if module_name != UNKNOWN_MODULE && is_installable_name(package_hint) => {
                Some(package_hint.as_str())
            }
            _ => None,
        }
    }
}

/// Stderr noise that looks like a failure but is known to be harmless when
/// every marker is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnorableSignature {
    markers: Vec<String>,
    warning: String,
}

impl IgnorableSignature {
    pub fn new<I, S>(markers: I, warning: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
            warning: warning.into(),
        }
    }

    /// faiss falling back from its AVX2 build, which it reports as a
    /// missing module.
    pub fn faiss_avx2() -> Self {
        Self::new(
            signatures::FAISS_AVX2_FALLBACK.iter().copied(),
            "Using standard faiss library without AVX2 optimization. This is normal but may be slightly slower.",
        )
    }

    fn matches(&self, stderr: &str) -> bool {
        !self.markers.is_empty() && self.markers.iter().all(|m| stderr.contains(m.as_str()))
    }

    fn covers(&self, line: &str) -> bool {
        self.markers.iter().any(|m| line.contains(m.as_str()))
    }
}

/// Ordered classification rules for one kind of worker.
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Import name -> installable package name.
    known_dependencies: HashMap<String, String>,
    /// Stdout text proving useful output was produced.
    success_markers: Vec<String>,
    ignorable: Vec<IgnorableSignature>,
    extractor: SectionExtractor,
}

impl Classifier {
    pub fn new(extractor: SectionExtractor) -> Self {
        Self {
            known_dependencies: HashMap::new(),
            success_markers: Vec::new(),
            ignorable: Vec::new(),
            extractor,
        }
    }

    pub fn known_dependencies<I, K, V>(mut self, table: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.known_dependencies
            .extend(table.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn success_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_markers.extend(markers.into_iter().map(Into::into));
        self
    }

    pub fn ignorable(mut self, signature: IgnorableSignature) -> Self {
        self.ignorable.push(signature);
        self
    }

    /// First matching rule wins: timeout, rate limit, missing module,
    /// credentials, failed exit without output, empty output, success.
    pub fn classify(&self, result: &ExecutionResult) -> ClassifiedOutcome {
        let outcome = self.decide(result);
        tracing::debug!(category = outcome.category(), exit_code = ?result.exit_code, "classified worker run");
        outcome
    }

    fn decide(&self, result: &ExecutionResult) -> ClassifiedOutcome {
        if result.timed_out {
            return ClassifiedOutcome::Timeout;
        }

        let ignored: Vec<&IgnorableSignature> = self
            .ignorable
            .iter()
            .filter(|sig| sig.matches(&result.stderr))
            .collect();
        let stderr: Cow<'_, str> = if ignored.is_empty() {
            Cow::Borrowed(&result.stderr)
        } else {
            tracing::info!(count = ignored.len(), "ignoring known harmless stderr");
            Cow::Owned(
                result
                    .stderr
                    .lines()
                    .filter(|line| !ignored.iter().any(|sig| sig.covers(line)))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        };
        let stderr = stderr.as_ref();

        if let Some(sig) = signatures::find(signatures::RATE_LIMIT, stderr) {
            return ClassifiedOutcome::RateLimited {
                detail: signatures::line_containing(stderr, sig),
            };
        }

        if signatures::find(signatures::MISSING_MODULE, stderr).is_some() {
            let module_name = signatures::MODULE_NAME
                .captures(stderr)
                .map(|caps| caps[1].to_string())
                .unwrap_or_else(|| UNKNOWN_MODULE.to_string());
            let package_hint = self.package_for(&module_name);
            tracing::error!(module = %module_name, package = %package_hint, "worker is missing a python dependency");
            return ClassifiedOutcome::MissingDependency {
                module_name,
                package_hint,
            };
        }

        if signatures::find(signatures::CREDENTIAL, stderr).is_some() {
            return ClassifiedOutcome::MissingCredential {
                detail: stderr.trim().to_string(),
            };
        }

        let has_marker = self
            .success_markers
            .iter()
            .any(|m| result.stdout.contains(m.as_str()));
        if !result.succeeded() && !has_marker {
            return generic(result, FailureKind::NonZeroExit);
        }

        if result.stdout.trim().is_empty() {
            return generic(result, FailureKind::EmptyOutput);
        }

        let sections = self.extractor.extract(&result.stdout);
        if let Some(message) = sections.worker_error() {
            tracing::error!(message, "worker reported an error");
            return ClassifiedOutcome::ReportedFailure {
                message: message.to_string(),
            };
        }
        if sections.is_empty() {
            return generic(result, FailureKind::EmptyOutput);
        }

        let mut warnings = Vec::new();
        if !result.succeeded() {
            let code = result
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".into());
            tracing::warn!(exit_code = %code, "worker failed after producing output");
            warnings.push(format!(
                "The worker exited with code {code} after producing output; the result may be incomplete."
            ));
        }
        if signatures::find(signatures::SOFT_THROTTLE, stderr).is_some() {
            warnings.push(
                "Rate limiting was encountered during generation. The result may be incomplete or less optimal."
                    .to_string(),
            );
        }
        warnings.extend(ignored.iter().map(|sig| sig.warning.clone()));

        ClassifiedOutcome::Success { sections, warnings }
    }

    /// Full module name first, then its top-level package, then the
    /// top-level package name itself.
    fn package_for(&self, module: &str) -> String {
        let base = module.split('.').next().unwrap_or(module);
        self.known_dependencies
            .get(module)
            .or_else(|| self.known_dependencies.get(base))
            .cloned()
            .unwrap_or_else(|| base.to_string())
    }
}

fn generic(result: &ExecutionResult, kind: FailureKind) -> ClassifiedOutcome {
    ClassifiedOutcome::GenericFailure {
        exit_code: result.exit_code,
        stderr_excerpt: excerpt(&result.stderr),
        kind,
    }
}

fn excerpt(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_EXCERPT_LINES);
    lines[start..].join("\n")
}
