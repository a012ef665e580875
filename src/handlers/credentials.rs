//! API keys a worker reads from its environment or a `.env` file next to
//! the script. Checked before the worker starts so a missing key costs no
//! interpreter launch.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w-]+$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCheck {
    pub key: &'static str,
    /// Dotenv file, relative to the script directory.
    pub env_file: Option<&'static str>,
    /// Values shipped in templates that are not real keys.
    pub placeholders: &'static [&'static str],
}

impl CredentialCheck {
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            env_file: None,
            placeholders: &[],
        }
    }

    pub fn env_file(mut self, name: &'static str) -> Self {
        self.env_file = Some(name);
        self
    }

    pub fn placeholders(mut self, values: &'static [&'static str]) -> Self {
        self.placeholders = values;
        self
    }

    /// `Err` carries a message telling the user where to put the key.
    pub fn verify(&self, script_dir: &Path) -> Result<(), String> {
        if std::env::var(self.key).is_ok_and(|v| self.usable(&v)) {
            tracing::debug!(key = self.key, "credential found in environment");
            return Ok(());
        }
        if let Some(path) = self.env_path(script_dir) {
            if self.read_env_file(&path).is_some_and(|v| self.usable(&v)) {
                tracing::debug!(key = self.key, file = %path.display(), "credential found in env file");
                return Ok(());
            }
            return Err(format!(
                "{} is missing or invalid. Please add a valid key to {} or set it in the environment.",
                self.key,
                path.display()
            ));
        }
        Err(format!(
            "{} is missing or invalid. Please set it in the environment.",
            self.key
        ))
    }

    fn env_path(&self, script_dir: &Path) -> Option<PathBuf> {
        self.env_file.map(|name| script_dir.join(name))
    }

    fn read_env_file(&self, path: &Path) -> Option<String> {
        let entries = match dotenvy::from_path_iter(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "env file not readable");
                return None;
            }
        };
        entries
            .filter_map(Result::ok)
            .find(|(k, _)| k == self.key)
            .map(|(_, v)| v)
    }

    fn usable(&self, value: &str) -> bool {
        let value = value.trim();
        !value.is_empty() && !self.placeholders.contains(&value) && KEY_VALUE.is_match(value)
    }
}
