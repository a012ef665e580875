//! Python interpreter selection and environment for worker scripts.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Default interpreter name for the host platform.
pub fn default_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

/// Interpreter inside a virtualenv rooted at `venv`.
pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

/// pip inside a virtualenv rooted at `venv`.
pub fn venv_pip(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("pip.exe")
    } else {
        venv.join("bin").join("pip")
    }
}

/// Environment overrides every worker gets: UTF-8 stdio, unbuffered
/// output, and the script directory prepended to the module search path.
pub fn worker_env(script_dir: Option<&Path>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());
    env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
    if let Some(dir) = script_dir {
        let existing = std::env::var("PYTHONPATH").unwrap_or_default();
        env.insert("PYTHONPATH".to_string(), join_search_path(dir, &existing));
    }
    env
}

fn join_search_path(dir: &Path, existing: &str) -> String {
    let sep = if cfg!(windows) { ';' } else { ':' };
    let dir = dir.display().to_string();
    if existing.is_empty() {
        dir
    } else {
        format!("{dir}{sep}{existing}")
    }
}
