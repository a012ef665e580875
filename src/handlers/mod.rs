//! Agent handlers and the pipeline they share: resolve the worker script,
//! preflight its dependencies, run it, classify the result.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tempfile::TempDir;

use crate::{
    classify::{ClassifiedOutcome, Classifier},
    config::Config,
    error::{EngineError, EngineResult},
    preflight::{DependencySpec, DepsStamp, PendingInstalls, Preflight, PreflightMode},
    process::{self, python, ExecutionRequest},
    resolver::PathResolver,
};

pub mod blog;
pub mod case_study;
pub mod credentials;
pub mod email;
pub mod fallback;
pub mod job_agent;
pub mod response;
pub mod web_crawler;
pub mod youtube;

pub use credentials::CredentialCheck;
pub use fallback::{FallbackMemo, FallbackScript};
pub use response::{AgentResponse, ErrorCategory};

/// Which interpreter runs a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpreter {
    /// `PYTHON_COMMAND` from the config.
    Configured,
    /// A virtualenv relative to the agents root, falling back to the
    /// configured interpreter when it does not exist.
    Venv(PathBuf),
}

/// Everything the pipeline needs to know about one agent's worker.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub id: &'static str,
    /// Candidate script locations, most specific first.
    pub script_candidates: Vec<PathBuf>,
    pub interpreter: Interpreter,
    pub timeout: Duration,
    /// Run the worker with its script directory as working directory.
    pub run_in_script_dir: bool,
    pub preflight: PreflightMode,
    pub dependencies: Vec<DependencySpec>,
    pub deps_stamp: Option<DepsStamp>,
    pub credentials: Option<CredentialCheck>,
    pub fallback: Option<FallbackScript>,
    pub classifier: Classifier,
}

impl AgentProfile {
    fn venv(&self, cfg: &Config) -> Option<PathBuf> {
        match &self.interpreter {
            Interpreter::Configured => None,
            Interpreter::Venv(rel) => Some(cfg.agents_root().join(rel)),
        }
    }

    fn python(&self, cfg: &Config) -> String {
        match self.venv(cfg) {
            None => cfg.python_command(),
            Some(venv) => {
                let candidate = python::venv_python(&venv);
                if candidate.exists() {
                    candidate.display().to_string()
                } else {
                    tracing::debug!(venv = %candidate.display(), "agent venv missing, using configured python");
                    cfg.python_command()
                }
            }
        }
    }

    /// The venv's own pip when the agent has one, so installs land there.
    fn pip(&self, cfg: &Config) -> String {
        self.venv(cfg)
            .map(|venv| python::venv_pip(&venv))
            .filter(|pip| pip.exists())
            .map(|pip| pip.display().to_string())
            .unwrap_or_else(|| cfg.pip_command())
    }
}

/// Per-invocation worker arguments, plus any scratch directory they point
/// into. The scratch directory is deleted when this value drops, after the
/// result has been classified.
#[derive(Debug, Default)]
pub struct WorkerArgs {
    pub args: Vec<String>,
    entry_point: Option<PathBuf>,
    scratch: Option<TempDir>,
}

impl WorkerArgs {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            entry_point: None,
            scratch: None,
        }
    }

    pub fn with_scratch(mut self, dir: TempDir) -> Self {
        self.scratch = Some(dir);
        self
    }

    /// Run `script` instead of the resolved worker script. The worker's
    /// directory still provides the working directory and search path.
    pub fn with_entry_point(mut self, script: impl Into<PathBuf>) -> Self {
        self.entry_point = Some(script.into());
        self
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

/// A classified run plus the warnings gathered around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    pub outcome: ClassifiedOutcome,
    pub warnings: Vec<String>,
}

/// Shared pipeline state: configuration, the script path cache, the
/// pending-install set and the fallback memo.
#[derive(Debug, Clone)]
pub struct Engine<'a> {
    cfg: Config,
    resolver: &'a PathResolver,
    pending: &'a PendingInstalls,
    fallbacks: &'a FallbackMemo,
}

impl<'a> Engine<'a> {
    /// The fallback memo starts as the process-wide one; see
    /// [`Engine::with_fallbacks`].
    pub fn with_state(cfg: Config, resolver: &'a PathResolver, pending: &'a PendingInstalls) -> Self {
        Self {
            cfg,
            resolver,
            pending,
            fallbacks: FallbackMemo::global(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: &'a FallbackMemo) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Locate `profile`'s script, from cache when possible.
    pub async fn resolve_script(&self, profile: &AgentProfile) -> EngineResult<PathBuf> {
        self.resolver.resolve(profile.id, &profile.script_candidates).await
    }

    /// Check the agent's API key without running anything.
    pub async fn check_credentials(&self, profile: &AgentProfile) -> EngineResult<Result<(), String>> {
        let script = self.resolve_script(profile).await?;
        let script_dir = script_dir(&script, &self.cfg);
        Ok(match &profile.credentials {
            Some(check) => check.verify(&script_dir),
            None => Ok(()),
        })
    }

    /// Run the full pipeline and render the outcome for the caller.
    pub async fn run(&self, profile: &AgentProfile, args: WorkerArgs) -> AgentResponse {
        match self.execute(profile, args).await {
            Ok(run) => AgentResponse::from_outcome(run.outcome, profile.timeout.as_secs()).with_warnings(run.warnings),
            Err(e) => {
                tracing::error!(agent = profile.id, error = %e, "agent run failed before classification");
                AgentResponse::from(e)
            }
        }
    }

    /// Resolve, preflight, run and classify, switching to the agent's
    /// fallback worker when the full one cannot run. `args` (and its scratch
    /// directory) lives until the outcome is known.
    pub async fn execute(&self, profile: &AgentProfile, args: WorkerArgs) -> EngineResult<AgentRun> {
        let started = std::time::Instant::now();
        let script = self.resolve_script(profile).await?;
        let script_dir = script_dir(&script, &self.cfg);

        if let Some(check) = &profile.credentials {
            if let Err(detail) = check.verify(&script_dir) {
                tracing::error!(agent = profile.id, key = check.key, "credential missing, worker not started");
                return Ok(AgentRun {
                    outcome: ClassifiedOutcome::MissingCredential { detail },
                    warnings: Vec::new(),
                });
            }
        }

        let python = profile.python(&self.cfg);
        let pending = self.pending.peek(profile.id);
        let preflight = Preflight::new(python.clone(), profile.pip(&self.cfg))
            .with_timeouts(
                self.cfg.timeout("PREFLIGHT_TIMEOUT", 60),
                self.cfg.timeout("INSTALL_TIMEOUT", 300),
            )
            .with_stamp(profile.deps_stamp.clone());
        let report = preflight
            .run(profile.preflight, &profile.dependencies, &pending, &script_dir)
            .await
            .map_err(EngineError::from)?;
        if !report.pending_settled.is_empty() {
            self.pending.clear(profile.id, &report.pending_settled);
        }
        let mut warnings = report.warnings;

        let entry = args.entry_point.clone().unwrap_or_else(|| script.clone());
        let outcome = match &profile.fallback {
            Some(fallback) if self.fallbacks.prefers(profile.id) => {
                self.attempt_fallback(profile, fallback, &python, &script_dir, &args, &mut warnings)
                    .await?
            }
            fallback => {
                let outcome = self.attempt(profile, &python, &entry, &script_dir, &args).await?;
                match fallback {
                    Some(fallback) if FallbackScript::applies_to(&outcome) => {
                        self.fallbacks.prefer(profile.id);
                        match self
                            .attempt_fallback(profile, fallback, &python, &script_dir, &args, &mut warnings)
                            .await
                        {
                            Ok(lite) => lite,
                            Err(e) => {
                                tracing::warn!(agent = profile.id, error = %e, "fallback worker unavailable");
                                outcome
                            }
                        }
                    }
                    _ => outcome,
                }
            }
        };

        tracing::info!(
            agent = profile.id,
            category = outcome.category(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "agent request finished"
        );
        drop(args);
        Ok(AgentRun { outcome, warnings })
    }

    async fn attempt_fallback(
        &self,
        profile: &AgentProfile,
        fallback: &FallbackScript,
        python: &str,
        script_dir: &Path,
        args: &WorkerArgs,
        warnings: &mut Vec<String>,
    ) -> EngineResult<ClassifiedOutcome> {
        let lite = self.resolver.resolve(fallback.id, &fallback.script_candidates).await?;
        tracing::info!(agent = profile.id, script = %lite.display(), "running fallback worker");
        let outcome = self.attempt(profile, python, &lite, script_dir, args).await?;
        warnings.push(fallback.note.clone());
        Ok(outcome)
    }

    async fn attempt(
        &self,
        profile: &AgentProfile,
        python: &str,
        entry: &Path,
        script_dir: &Path,
        args: &WorkerArgs,
    ) -> EngineResult<ClassifiedOutcome> {
        let mut request = ExecutionRequest::new(python, profile.timeout)
            .arg(entry.display().to_string())
            .args(args.args.iter().cloned())
            .envs(python::worker_env(Some(script_dir)));
        if profile.run_in_script_dir {
            request = request.current_dir(script_dir);
        }

        let result = process::run(&request).await?;
        let outcome = profile.classifier.classify(&result);
        if let Some(package) = outcome.pending_package() {
            self.pending.record(profile.id, package);
        }
        Ok(outcome)
    }
}

fn script_dir(script: &Path, cfg: &Config) -> PathBuf {
    script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cfg.agents_root())
}

/// Reject blank required input before any process work happens.
pub(crate) fn require(value: &str, what: &str) -> EngineResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidInput(format!("{what} is required")));
    }
    Ok(trimmed.to_string())
}
