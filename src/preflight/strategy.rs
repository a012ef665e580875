//! Package installation strategies, tried in order until one succeeds.

use std::{path::Path, time::Duration};

use crate::process::ExecutionRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStrategy {
    pub label: String,
    pub program: String,
    /// Arguments placed before the package list.
    pub args: Vec<String>,
}

impl InstallStrategy {
    /// `<pip> install --upgrade <packages>`
    pub fn pip(pip: impl Into<String>) -> Self {
        let program = pip.into();
        Self {
            label: program.clone(),
            program,
            args: vec!["install".into(), "--upgrade".into()],
        }
    }

    /// `<python> -m pip install --upgrade <packages>`
    pub fn python_module(python: impl Into<String>) -> Self {
        let program = python.into();
        Self {
            label: format!("{program} -m pip"),
            program,
            args: vec!["-m".into(), "pip".into(), "install".into(), "--upgrade".into()],
        }
    }

    pub fn request(&self, packages: &[String], work_dir: &Path, timeout: Duration) -> ExecutionRequest {
        ExecutionRequest::new(&self.program, timeout)
            .args(self.args.iter().cloned())
            .args(packages.iter().cloned())
            .current_dir(work_dir)
    }
}
