//! Run external agent worker scripts with a bounded lifetime and turn their
//! output into structured results or classified errors.
//!
//! The pipeline is: [`resolver`] locates the script, [`preflight`] makes sure
//! its Python packages import, [`process`] runs it under a timeout,
//! [`classify`] decides what happened and [`extract`] shapes successful
//! output into named sections. [`handlers`] ties these together per agent.

pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod preflight;
pub mod printer;
pub mod process;
pub mod resolver;

pub use classify::{ClassifiedOutcome, Classifier, FailureKind, IgnorableSignature};
pub use error::{EngineError, EngineResult};
pub use extract::{ExtractedSections, JsonDocument, SectionExtractor, SectionPattern};
pub use handlers::{
    AgentProfile, AgentResponse, AgentRun, CredentialCheck, Engine, ErrorCategory, FallbackMemo, FallbackScript,
    WorkerArgs,
};
pub use preflight::{DependencySpec, PendingInstalls, Preflight, PreflightError, PreflightMode};
pub use process::{ExecutionRequest, ExecutionResult};
pub use resolver::PathResolver;
