//! Dependency preflight: check that a worker's Python packages import, and
//! install the missing ones in one batch before the worker runs.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{LazyLock, Mutex},
    time::{Duration, SystemTime},
};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::{
    error::EngineError,
    process::{self, ExecutionRequest, ExecutionResult},
};

pub mod strategy;

pub use strategy::InstallStrategy;

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("valid regex")
});

/// Whether `name` is something an installer can be asked for.
pub fn is_installable_name(name: &str) -> bool {
    name != "unknown" && PACKAGE_NAME.is_match(name)
}

/// A package a worker needs, and the module name that proves it is present.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DependencySpec {
    pub package: String,
    pub constraint: Option<String>,
    pub module: String,
    /// Install on every preflight, present or not.
    pub always_install: bool,
}

impl DependencySpec {
    /// Package whose import name is the package name with `-` as `_`.
    pub fn new(package: impl Into<String>) -> Self {
        let package = package.into();
        let module = package.replace('-', "_");
        Self {
            package,
            constraint: None,
            module,
            always_install: false,
        }
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Version constraint including its operator, e.g. `==0.0.11`.
    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn always_install(mut self) -> Self {
        self.always_install = true;
        self
    }

    /// Argument handed to the installer.
    pub fn install_target(&self) -> String {
        match &self.constraint {
            Some(c) => format!("{}{}", self.package, c),
            None => self.package.clone(),
        }
    }
}

/// How a failed preflight affects the run that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightMode {
    /// Errors abort the run.
    Abort,
    /// Errors become warnings and the run proceeds.
    Warn,
    /// No declared dependencies to check.
    Skip,
}

#[derive(Debug, Error)]
pub enum PreflightError {
    /// The interpreter itself cannot be used; nothing can be checked.
    #[error("Python is not properly installed or accessible ({python}): {reason}")]
    RuntimeUnavailable { python: String, reason: String },

    /// A presence check could not reach a verdict.
    #[error("dependency check for '{module}' failed: {reason}")]
    CheckFailed { module: String, reason: String },

    /// Every install strategy failed.
    #[error("failed to install {}: {}", .packages.join(" "), .attempts.join("; "))]
    InstallFailed {
        packages: Vec<String>,
        attempts: Vec<String>,
    },
}

/// What a preflight did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub installed: Vec<String>,
    /// Skipped thanks to a fresh stamp file.
    pub skipped: bool,
    pub warnings: Vec<String>,
    /// Pending packages that were attempted, installed or not. None of
    /// them should be tried again.
    pub pending_settled: Vec<String>,
}

/// Marker file recording a recent successful preflight.
#[derive(Debug, Clone)]
pub struct DepsStamp {
    pub path: PathBuf,
    pub ttl: Duration,
}

impl DepsStamp {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    fn is_fresh(&self) -> bool {
        let modified = std::fs::metadata(&self.path).and_then(|m| m.modified());
        match modified {
            Ok(at) => SystemTime::now()
                .duration_since(at)
                .map(|age| age < self.ttl)
                .unwrap_or(true),
            Err(_) => false,
        }
    }

    fn touch(&self) {
        if let Err(e) = std::fs::write(&self.path, chrono::Utc::now().to_rfc3339()) {
            tracing::warn!(path = %self.path.display(), error = %e, "could not write dependency stamp");
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preflight {
    python: String,
    strategies: Vec<InstallStrategy>,
    check_timeout: Duration,
    install_timeout: Duration,
    stamp: Option<DepsStamp>,
}

impl Preflight {
    /// Default strategy order: `pip`, then `<python> -m pip`.
    pub fn new(python: impl Into<String>, pip: impl Into<String>) -> Self {
        let python = python.into();
        let strategies = vec![
            InstallStrategy::pip(pip.into()),
            InstallStrategy::python_module(python.clone()),
        ];
        Self {
            python,
            strategies,
            check_timeout: Duration::from_secs(60),
            install_timeout: Duration::from_secs(300),
            stamp: None,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<InstallStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_timeouts(mut self, check: Duration, install: Duration) -> Self {
        self.check_timeout = check;
        self.install_timeout = install;
        self
    }

    pub fn with_stamp(mut self, stamp: Option<DepsStamp>) -> Self {
        self.stamp = stamp;
        self
    }

    /// Preflight under `mode`. In [`PreflightMode::Warn`] a failure is logged
    /// and returned as a warning on an `Ok` report.
    ///
    /// `pending` packages are installed afterwards in their own batch. That
    /// batch never fails the preflight: packages it cannot install are
    /// reported in `pending_settled` and turned into a warning.
    pub async fn run(
        &self,
        mode: PreflightMode,
        deps: &[DependencySpec],
        pending: &[String],
        work_dir: &Path,
    ) -> Result<PreflightReport, PreflightError> {
        let mut report = match mode {
            PreflightMode::Skip => PreflightReport::default(),
            PreflightMode::Abort => self.ensure(deps, work_dir).await?,
            PreflightMode::Warn => match self.ensure(deps, work_dir).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(error = %e, "dependency preflight failed, continuing anyway");
                    PreflightReport {
                        warnings: vec![format!("Dependency setup incomplete: {e}")],
                        ..Default::default()
                    }
                }
            },
        };
        if !pending.is_empty() {
            self.install_pending(pending, work_dir, &mut report).await;
        }
        Ok(report)
    }

    /// Check every declared dependency and install whatever is missing in a
    /// single installer invocation.
    pub async fn ensure(&self, deps: &[DependencySpec], work_dir: &Path) -> Result<PreflightReport, PreflightError> {
        if let Some(stamp) = self.stamp.as_ref().filter(|s| s.is_fresh()) {
            tracing::info!(stamp = %stamp.path.display(), "using recently verified dependencies");
            return Ok(PreflightReport {
                skipped: true,
                ..Default::default()
            });
        }

        self.verify_runtime(work_dir).await?;

        let mut targets: Vec<String> = Vec::new();
        for dep in deps {
            if dep.always_install || !self.is_present(dep, work_dir).await? {
                push_unique(&mut targets, dep.install_target());
            }
        }

        if !targets.is_empty() {
            self.install(&targets, work_dir).await?;
        }
        if let Some(stamp) = &self.stamp {
            stamp.touch();
        }
        Ok(PreflightReport {
            installed: targets,
            ..Default::default()
        })
    }

    async fn install_pending(&self, pending: &[String], work_dir: &Path, report: &mut PreflightReport) {
        let mut targets = Vec::new();
        for pkg in pending {
            if !is_installable_name(pkg) {
                tracing::warn!(package = %pkg, "dropping pending package with an unusable name");
            } else if !report.installed.contains(pkg) {
                push_unique(&mut targets, pkg.clone());
            }
        }
        report.pending_settled = pending.to_vec();
        if targets.is_empty() {
            return;
        }

        match self.install(&targets, work_dir).await {
            Ok(()) => report.installed.extend(targets),
            Err(e) => {
                tracing::warn!(error = %e, "previously missing packages could not be installed, dropping them");
                report.warnings.push(format!(
                    "Could not install previously missing packages ({}); they will not be retried.",
                    targets.join(", ")
                ));
            }
        }
    }

    async fn verify_runtime(&self, work_dir: &Path) -> Result<(), PreflightError> {
        let req = ExecutionRequest::new(&self.python, self.check_timeout)
            .arg("--version")
            .current_dir(work_dir);
        let unavailable = |reason: String| PreflightError::RuntimeUnavailable {
            python: self.python.clone(),
            reason,
        };
        match process::run(&req).await {
            Ok(r) if r.succeeded() => {
                let version = if r.stdout.trim().is_empty() { &r.stderr } else { &r.stdout };
                tracing::debug!(python = %self.python, version = %version.trim(), "python runtime verified");
                Ok(())
            }
            Ok(r) => Err(unavailable(describe_failure(&r))),
            Err(e) => Err(unavailable(e.to_string())),
        }
    }

    async fn is_present(&self, dep: &DependencySpec, work_dir: &Path) -> Result<bool, PreflightError> {
        let req = ExecutionRequest::new(&self.python, self.check_timeout)
            .arg("-c")
            .arg(format!("import {}", dep.module))
            .current_dir(work_dir);
        match process::run(&req).await {
            Ok(r) if r.timed_out => Err(PreflightError::CheckFailed {
                module: dep.module.clone(),
                reason: "timed out".into(),
            }),
            Ok(r) => {
                let present = r.succeeded();
                tracing::debug!(module = %dep.module, present, "dependency presence check");
                Ok(present)
            }
            Err(EngineError::SpawnFailed { source, .. }) => Err(PreflightError::RuntimeUnavailable {
                python: self.python.clone(),
                reason: source.to_string(),
            }),
            Err(e) => Err(PreflightError::CheckFailed {
                module: dep.module.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn install(&self, packages: &[String], work_dir: &Path) -> Result<(), PreflightError> {
        let mut attempts = Vec::new();
        for strategy in &self.strategies {
            tracing::info!(strategy = %strategy.label, packages = ?packages, "installing python dependencies");
            let req = strategy.request(packages, work_dir, self.install_timeout);
            match process::run(&req).await {
                Ok(r) if r.succeeded() => {
                    tracing::info!(strategy = %strategy.label, "python dependencies installed");
                    return Ok(());
                }
                Ok(r) => attempts.push(format!("{}: {}", strategy.label, describe_failure(&r))),
                Err(e) => attempts.push(format!("{}: {}", strategy.label, e)),
            }
            tracing::warn!(strategy = %strategy.label, "install strategy failed");
        }
        Err(PreflightError::InstallFailed {
            packages: packages.to_vec(),
            attempts,
        })
    }
}

fn push_unique(targets: &mut Vec<String>, target: String) {
    if !targets.contains(&target) {
        targets.push(target);
    }
}

fn describe_failure(result: &ExecutionResult) -> String {
    if result.timed_out {
        return "timed out".to_string();
    }
    let code = result
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".into());
    let stderr = result.stderr.trim();
    match stderr.lines().last() {
        Some(last) => format!("exit {code}: {last}"),
        None => format!("exit {code}"),
    }
}

/// Packages a worker was seen missing, keyed by agent id, waiting for that
/// agent's next preflight. A persistent set is mirrored to a JSON file so the
/// next process sees it.
#[derive(Debug, Default)]
pub struct PendingInstalls {
    inner: Mutex<BTreeMap<String, BTreeSet<String>>>,
    path: Option<PathBuf>,
}

impl PendingInstalls {
    /// Load from `path`, starting empty when the file is missing or unreadable.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let inner = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable pending installs file");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read pending installs file");
                BTreeMap::new()
            }
        };
        Self {
            inner: Mutex::new(inner),
            path: Some(path),
        }
    }

    /// Remember `package` for `agent`. Names an installer would reject are
    /// refused so they can never stall later preflights.
    pub fn record(&self, agent: &str, package: &str) -> bool {
        if !is_installable_name(package) {
            tracing::debug!(agent, package, "not recording pending package");
            return false;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let added = inner
            .entry(agent.to_string())
            .or_default()
            .insert(package.to_string());
        if added {
            self.save(&inner);
        }
        true
    }

    pub fn peek(&self, agent: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .get(agent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget packages that were installed or given up on.
    pub fn clear(&self, agent: &str, settled: &[String]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(set) = inner.get_mut(agent) else {
            return;
        };
        let before = set.len();
        for pkg in settled {
            set.remove(pkg);
        }
        let changed = set.len() != before;
        if set.is_empty() {
            inner.remove(agent);
        }
        if changed {
            self.save(&inner);
        }
    }

    fn save(&self, inner: &BTreeMap<String, BTreeSet<String>>) {
        let Some(path) = &self.path else {
            return;
        };
        let written = serde_json::to_string_pretty(inner)
            .map_err(std::io::Error::from)
            .and_then(|raw| std::fs::write(path, raw));
        if let Err(e) = written {
            tracing::warn!(path = %path.display(), error = %e, "could not save pending installs");
        }
    }
}
