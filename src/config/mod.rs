use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

use crate::process::python::default_python;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    /// Defaults, then `.agentrc`, then environment variables.
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Environment takes precedence
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    /// Defaults only; ignores the rc file and the environment.
    pub fn defaults() -> Self {
        Self {
            inner: default_map(),
            config_path: default_config_path(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// Directory holding the agent script folders.
    pub fn agents_root(&self) -> PathBuf {
        match self.get_path("AGENTS_ROOT") {
            Some(p) if p.is_absolute() => p,
            Some(p) => env::current_dir().map(|d| d.join(&p)).unwrap_or(p),
            None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn python_command(&self) -> String {
        match self.get("PYTHON_COMMAND") {
            Some(cmd) if cmd != "auto" && !cmd.is_empty() => cmd,
            _ => default_python().to_string(),
        }
    }

    pub fn pip_command(&self) -> String {
        self.get("PIP_COMMAND").unwrap_or_else(|| "pip".to_string())
    }

    /// Seconds under `key`, or `default_secs`.
    pub fn timeout(&self, key: &str, default_secs: u64) -> Duration {
        Duration::from_secs(self.get_u64(key).unwrap_or(default_secs))
    }

    /// JSON file holding packages to install before an agent's next run.
    pub fn pending_installs_path(&self) -> PathBuf {
        self.get_path("PENDING_INSTALLS_PATH")
            .unwrap_or_else(|| env::temp_dir().join("agent_runner_pending_installs.json"))
    }

    pub fn deps_stamp_ttl(&self) -> Duration {
        Duration::from_secs(self.get_u64("DEPS_STAMP_TTL_HOURS").unwrap_or(24) * 3600)
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "AGENTS_ROOT",
        "PYTHON_COMMAND",
        "PIP_COMMAND",
        "CASE_STUDY_TIMEOUT",
        "EMAIL_TIMEOUT",
        "WEB_CRAWLER_TIMEOUT",
        "YOUTUBE_TIMEOUT",
        "BLOG_TIMEOUT",
        "JOB_AGENT_TIMEOUT",
        "PREFLIGHT_TIMEOUT",
        "INSTALL_TIMEOUT",
        "DEPS_STAMP_TTL_HOURS",
        "PENDING_INSTALLS_PATH",
        "PRETTIFY_MARKDOWN",
    ];

    KEYS.contains(&k) || k.starts_with("AGENT_RUNNER_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("agent_runner").join(".agentrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Commands
    m.insert("PYTHON_COMMAND".into(), "auto".into());
    m.insert("PIP_COMMAND".into(), "pip".into());

    // Seconds
    m.insert("CASE_STUDY_TIMEOUT".into(), "180".into());
    m.insert("EMAIL_TIMEOUT".into(), "300".into());
    m.insert("WEB_CRAWLER_TIMEOUT".into(), "240".into());
    m.insert("YOUTUBE_TIMEOUT".into(), "300".into());
    m.insert("BLOG_TIMEOUT".into(), "300".into());
    m.insert("JOB_AGENT_TIMEOUT".into(), "90".into());
    m.insert("PREFLIGHT_TIMEOUT".into(), "60".into());
    m.insert("INSTALL_TIMEOUT".into(), "300".into());
    m.insert("DEPS_STAMP_TTL_HOURS".into(), "24".into());

    // Bools as strings
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_platform_python() {
        let cfg = Config::defaults();
        assert_eq!(cfg.python_command(), default_python());
        assert_eq!(cfg.pip_command(), "pip");
        assert_eq!(cfg.timeout("CASE_STUDY_TIMEOUT", 1), Duration::from_secs(180));
        assert_eq!(cfg.deps_stamp_ttl(), Duration::from_secs(24 * 3600));
        assert!(cfg.get_bool("PRETTIFY_MARKDOWN"));
    }

    #[test]
    fn overrides_and_fallbacks() {
        let mut cfg = Config::defaults();
        cfg.set("PYTHON_COMMAND", "/opt/py/bin/python");
        cfg.set("EMAIL_TIMEOUT", "not a number");
        assert_eq!(cfg.python_command(), "/opt/py/bin/python");
        assert_eq!(cfg.timeout("EMAIL_TIMEOUT", 42), Duration::from_secs(42));
    }

    #[test]
    fn pending_installs_default_to_temp_dir() {
        let mut cfg = Config::defaults();
        assert_eq!(
            cfg.pending_installs_path(),
            env::temp_dir().join("agent_runner_pending_installs.json")
        );
        cfg.set("PENDING_INSTALLS_PATH", "/var/lib/agents/pending.json");
        assert_eq!(cfg.pending_installs_path(), PathBuf::from("/var/lib/agents/pending.json"));
        assert!(is_config_key("JOB_AGENT_TIMEOUT"));
    }

    #[test]
    fn relative_root_is_anchored_at_cwd() {
        let mut cfg = Config::defaults();
        cfg.set("AGENTS_ROOT", "agents");
        assert!(cfg.agents_root().is_absolute());
        assert!(cfg.agents_root().ends_with("agents"));
    }

    #[test]
    fn accepts_prefixed_keys() {
        assert!(is_config_key("AGENT_RUNNER_LOG"));
        assert!(is_config_key("AGENTS_ROOT"));
        assert!(!is_config_key("HOME"));
    }
}
