#![cfg(unix)]

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use agent_runner::{
    config::Config,
    handlers::{
        blog, case_study, email,
        job_agent::{self, JobRequest, JobTask},
        youtube, AgentResponse, Engine, ErrorCategory, FallbackMemo,
    },
    preflight::PendingInstalls,
    resolver::PathResolver,
};
use tempfile::TempDir;

fn script(path: &Path, body: &str) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_path_buf()
}

/// An agents root with a fake interpreter: every import succeeds, installs
/// are appended to install.log and anything else runs the "script" with sh.
/// The installers reject package names containing an underscore, the way
/// an index rejects a module name that is not a distribution.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("install.log");
        let install = format!(
            r#"for pkg in "$@"; do
  case "$pkg" in *_*) echo "ERROR: No matching distribution found for $pkg" >&2; exit 1 ;; esac
done
echo "$@" >> {log}"#,
            log = log.display()
        );
        script(
            &dir.path().join("bin").join("python"),
            &format!(
                r#"#!/bin/sh
case "$1" in
  --version) echo "Python 3.11.4" ;;
  -c) exit 0 ;;
  -m) shift 2
{install} ;;
  *) exec /bin/sh "$@" ;;
esac
"#
            ),
        );
        script(
            &dir.path().join("bin").join("pip"),
            &format!("#!/bin/sh\n{install}\n"),
        );
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn install_log(&self) -> Option<String> {
        std::fs::read_to_string(self.root().join("install.log")).ok()
    }

    fn config(&self) -> Config {
        let mut cfg = Config::defaults();
        cfg.set("AGENTS_ROOT", self.root().display().to_string());
        cfg.set("PYTHON_COMMAND", self.root().join("bin/python").display().to_string());
        cfg.set("PIP_COMMAND", self.root().join("bin/pip").display().to_string());
        cfg
    }

    fn case_study_script(&self, body: &str) {
        script(
            &self.root().join("CaseStudyAgent").join("casestudy.py"),
            &format!("#!/bin/sh\n{body}\n"),
        );
    }
}

fn warnings(response: &AgentResponse) -> Vec<String> {
    match response {
        AgentResponse::Success { warnings, .. } => warnings.clone(),
        other => panic!("expected success, got {other:?}"),
    }
}

fn sections(response: &AgentResponse) -> Vec<(String, String)> {
    match response {
        AgentResponse::Success { sections, .. } => sections
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect(),
        other => panic!("expected success, got {other:?}"),
    }
}

fn category(response: &AgentResponse) -> ErrorCategory {
    match response {
        AgentResponse::Error { category, .. } => *category,
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn case_study_sections_come_back_in_order() {
    let sandbox = Sandbox::new();
    sandbox.case_study_script(
        r#"echo "Researching $1..."
echo "OUTLINE:"
echo "--------------------"
echo "1. Background"
echo "--------------------"
echo "CASE STUDY:"
echo "--------------------"
echo "Acme cut costs by 30%."
echo "--------------------""#,
    );
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let response = case_study::run(&engine, "logistics", None).await;
    assert_eq!(
        sections(&response),
        [
            ("outline".to_string(), "1. Background".to_string()),
            ("case_study".to_string(), "Acme cut costs by 30%.".to_string()),
        ]
    );
    assert!(resolver.cached(case_study::AGENT_ID).is_some());
}

#[tokio::test]
async fn slow_worker_times_out() {
    let sandbox = Sandbox::new();
    sandbox.case_study_script("sleep 30");
    let mut cfg = sandbox.config();
    cfg.set("CASE_STUDY_TIMEOUT", "1");
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(cfg, &resolver, &pending);

    let started = Instant::now();
    let response = case_study::run(&engine, "logistics", None).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(category(&response), ErrorCategory::Timeout);
    match response {
        AgentResponse::Error { message, .. } => assert!(message.contains("1 seconds")),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn missing_module_is_installed_before_the_next_run() {
    let sandbox = Sandbox::new();
    let log = sandbox.root().join("install.log");
    sandbox.case_study_script(&format!(
        r#"if [ ! -f {log} ]; then
  echo "ModuleNotFoundError: No module named 'dotenv'" >&2
  exit 1
fi
echo "CASE STUDY:"
echo "-----"
echo "Recovered."
echo "-----""#,
        log = log.display()
    ));
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let first = case_study::run(&engine, "retail", None).await;
    match &first {
        AgentResponse::Error {
            category,
            package_hint,
            ..
        } => {
            assert_eq!(*category, ErrorCategory::MissingDependency);
            assert_eq!(package_hint.as_deref(), Some("python-dotenv"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(pending.peek(case_study::AGENT_ID), ["python-dotenv"]);

    let second = case_study::run(&engine, "retail", None).await;
    assert_eq!(
        sections(&second),
        [("case_study".to_string(), "Recovered.".to_string())]
    );
    assert_eq!(sandbox.install_log().unwrap().trim(), "install --upgrade python-dotenv");
    assert!(pending.peek(case_study::AGENT_ID).is_empty());
}

#[tokio::test]
async fn email_prompt_file_is_removed_after_the_run() {
    let sandbox = Sandbox::new();
    let seen = sandbox.root().join("seen_prompt_path");
    script(
        &sandbox
            .root()
            .join("Email_Generator_Agent")
            .join("email_generator.py"),
        &format!(
            r#"#!/bin/sh
echo "$1" > {seen}
echo "Loading model..."
echo "==== GENERATED EMAIL ===="
echo "Dear Ana,"
echo
cat "$1"
echo
echo "Thank you for using Email Generator AI!"
"#,
            seen = seen.display()
        ),
    );
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let response = email::run(&engine, "Let's meet on Friday.").await;
    let body = &sections(&response)[0];
    assert_eq!(body.0, "email");
    assert!(body.1.ends_with("Dear Ana,\n\nLet's meet on Friday."));
    assert!(agent_runner::extract::starts_with_date(&body.1));
    assert!(!body.1.contains("Thank you for using"));

    let prompt_path = PathBuf::from(std::fs::read_to_string(&seen).unwrap().trim());
    assert!(prompt_path.ends_with("prompt.txt"));
    assert!(!prompt_path.exists());
    assert!(!prompt_path.parent().unwrap().exists());

    // The pinned package is reinstalled on every run.
    assert!(sandbox
        .install_log()
        .unwrap()
        .contains("langchain-google-genai==0.0.11"));
}

#[tokio::test]
async fn missing_script_is_a_setup_error() {
    let sandbox = Sandbox::new();
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let response = case_study::run(&engine, "logistics", None).await;
    assert_eq!(category(&response), ErrorCategory::SetupRequired);
    match response {
        AgentResponse::Error { message, .. } => assert!(message.contains("casestudy.py")),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn blank_input_never_touches_the_filesystem() {
    let sandbox = Sandbox::new();
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let response = email::run(&engine, "   ").await;
    assert_eq!(category(&response), ErrorCategory::InvalidInput);
    assert_eq!(resolver.lookup_count(), 0);
}

#[tokio::test]
async fn uninstallable_submodule_does_not_lock_the_agent_out() {
    let sandbox = Sandbox::new();
    let seen = sandbox.root().join("seen");
    sandbox.case_study_script(&format!(
        r#"if [ ! -f {seen} ]; then
  touch {seen}
  echo "ModuleNotFoundError: No module named 'acme_internal.messages'" >&2
  exit 1
fi
echo "CASE STUDY:"
echo "-----"
echo "Fine."
echo "-----""#,
        seen = seen.display()
    ));
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let first = case_study::run(&engine, "retail", None).await;
    assert_eq!(category(&first), ErrorCategory::MissingDependency);
    assert_eq!(pending.peek(case_study::AGENT_ID), ["acme_internal"]);

    // The installer refuses the name; the run goes ahead and the package is
    // dropped.
    let second = case_study::run(&engine, "retail", None).await;
    assert_eq!(sections(&second), [("case_study".to_string(), "Fine.".to_string())]);
    assert!(warnings(&second).iter().any(|w| w.contains("acme_internal")));
    assert!(pending.peek(case_study::AGENT_ID).is_empty());

    let third = case_study::run(&engine, "retail", None).await;
    assert!(warnings(&third).is_empty());
    assert!(sandbox.install_log().is_none());
}

#[tokio::test]
async fn unnamed_missing_module_is_not_recorded() {
    let sandbox = Sandbox::new();
    sandbox.case_study_script("echo 'ModuleNotFoundError while loading plugins' >&2\nexit 1");
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let response = case_study::run(&engine, "retail", None).await;
    assert_eq!(category(&response), ErrorCategory::MissingDependency);
    assert!(pending.peek(case_study::AGENT_ID).is_empty());
}

#[tokio::test]
async fn unlaunchable_interpreter_is_a_setup_error() {
    let sandbox = Sandbox::new();
    sandbox.case_study_script("echo never");
    let mut cfg = sandbox.config();
    cfg.set("PYTHON_COMMAND", sandbox.root().join("bin/no-such-python").display().to_string());
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(cfg, &resolver, &pending);

    let response = case_study::run(&engine, "logistics", None).await;
    assert_eq!(category(&response), ErrorCategory::SetupRequired);
    match response {
        AgentResponse::Error { message, .. } => assert!(message.contains("failed to spawn")),
        _ => unreachable!(),
    }
}

fn ruled(label: &str, body: &str) -> String {
    format!(r#"echo "{label}"; echo "{rule}"; echo; echo "{body}""#, rule = "=".repeat(80))
}

#[tokio::test]
async fn job_agent_switches_to_the_lite_worker_and_stays_there() {
    let sandbox = Sandbox::new();
    let full_runs = sandbox.root().join("full.log");
    let lite_runs = sandbox.root().join("lite.log");
    script(
        &sandbox.root().join("JobAgent").join("JobAgent").join("JobAgent.py"),
        &format!(
            "#!/bin/sh\necho run >> {}\necho \"ModuleNotFoundError: No module named 'faiss'\" >&2\nexit 1\n",
            full_runs.display()
        ),
    );
    script(
        &sandbox.root().join("JobAgent").join("JobAgent_lite.py"),
        &format!(
            "#!/bin/sh\necho \"$@\" >> {}\n{}\n",
            lite_runs.display(),
            ruled("JOB DESCRIPTION SUMMARY", "Backend role, Rust and Kafka.")
        ),
    );
    let (resolver, pending, memo) = (PathResolver::new(), PendingInstalls::default(), FallbackMemo::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending).with_fallbacks(&memo);
    let request = JobRequest {
        job_input: "https://jobs.example.com/42",
        task: JobTask::Summary,
        ..Default::default()
    };

    let first = job_agent::run(&engine, &request).await;
    assert_eq!(
        sections(&first),
        [("summary".to_string(), "Backend role, Rust and Kafka.".to_string())]
    );
    assert_eq!(warnings(&first), [job_agent::LITE_NOTE]);
    assert!(memo.prefers(job_agent::AGENT_ID));
    assert_eq!(pending.peek(job_agent::AGENT_ID), ["faiss-cpu"]);

    let second = job_agent::run(&engine, &request).await;
    assert!(second.is_success());
    assert_eq!(std::fs::read_to_string(&full_runs).unwrap().lines().count(), 1);
    let lite = std::fs::read_to_string(&lite_runs).unwrap();
    assert_eq!(lite.lines().count(), 2);
    assert!(lite.starts_with("https://jobs.example.com/42 --task summary"));
    assert_eq!(sandbox.install_log().unwrap().trim(), "install --upgrade faiss-cpu");
}

#[tokio::test]
async fn harmless_faiss_noise_keeps_the_full_worker() {
    let sandbox = Sandbox::new();
    script(
        &sandbox.root().join("JobAgent").join("JobAgent").join("JobAgent.py"),
        &format!(
            r#"#!/bin/sh
echo "Could not load library with AVX2 support due to:" >&2
echo "ModuleNotFoundError(\"No module named 'faiss.swigfaiss_avx2'\")" >&2
echo "Successfully loaded faiss." >&2
{}
"#,
            ruled("INTERVIEW PREPARATION GUIDE", "Review ownership and lifetimes.")
        ),
    );
    let (resolver, pending, memo) = (PathResolver::new(), PendingInstalls::default(), FallbackMemo::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending).with_fallbacks(&memo);
    let request = JobRequest {
        job_input: "Senior Rust engineer",
        task: JobTask::InterviewPrep,
        ..Default::default()
    };

    let response = job_agent::run(&engine, &request).await;
    assert_eq!(
        sections(&response),
        [("interview_prep".to_string(), "Review ownership and lifetimes.".to_string())]
    );
    let warnings = warnings(&response);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("without AVX2 optimization"));
    assert!(!memo.prefers(job_agent::AGENT_ID));
    assert!(pending.peek(job_agent::AGENT_ID).is_empty());
}

#[tokio::test]
async fn blog_without_a_key_never_starts_the_worker() {
    if std::env::var("GROQ_API_KEY").is_ok() {
        return;
    }
    let sandbox = Sandbox::new();
    let ran = sandbox.root().join("ran");
    script(
        &sandbox.root().join("blog").join("blog.py"),
        &format!("#!/bin/sh\ntouch {}\n", ran.display()),
    );
    std::fs::write(
        sandbox.root().join("blog").join(".env"),
        "GROQ_API_KEY=your-groq-api-key-here\n",
    )
    .unwrap();
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let response = blog::run(&engine, "Rust at work").await;
    assert_eq!(category(&response), ErrorCategory::MissingCredential);
    match &response {
        AgentResponse::Error { detail, .. } => {
            assert!(detail.as_deref().unwrap().contains("GROQ_API_KEY"))
        }
        _ => unreachable!(),
    }
    assert!(!ran.exists());
    assert!(sandbox.install_log().is_none());

    let verdict = engine.check_credentials(&blog::profile(engine.config())).await.unwrap();
    assert!(verdict.is_err());
}

#[tokio::test]
async fn youtube_summary_comes_with_video_metadata() {
    let sandbox = Sandbox::new();
    script(
        &sandbox
            .root()
            .join("YTSummarizer")
            .join("YTSummarizer")
            .join("ytsummarizer.py"),
        r#"#!/bin/sh
url=$(cat "$1")
echo "Processing video ID: from $url"
echo "RESULT_JSON_START"
echo '{"success": true, "title": "Intro to Tokio", "summary": "Tasks are cheap."}'
echo "RESULT_JSON_END"
"#,
    );
    let (resolver, pending) = (PathResolver::new(), PendingInstalls::default());
    let engine = Engine::with_state(sandbox.config(), &resolver, &pending);

    let response = youtube::run(&engine, "https://www.youtube.com/watch?v=dQw4w9WgXcQ").await;
    assert_eq!(
        sections(&response),
        [
            ("title".to_string(), "Intro to Tokio".to_string()),
            ("summary".to_string(), "Tasks are cheap.".to_string()),
            (
                "thumbnail_url".to_string(),
                "https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".to_string()
            ),
            ("video_id".to_string(), "dQw4w9WgXcQ".to_string()),
        ]
    );

    let bad = youtube::run(&engine, "https://example.com/video").await;
    assert_eq!(category(&bad), ErrorCategory::InvalidInput);
}
