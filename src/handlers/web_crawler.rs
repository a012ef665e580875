//! Web-site analysis and Q&A through `website_agent.py`.

use std::path::Path;

use crate::{
    classify::Classifier,
    config::Config,
    error::EngineResult,
    extract::{SectionExtractor, SectionPattern},
    preflight::{DependencySpec, DepsStamp, PreflightMode},
};

use super::{require, AgentProfile, AgentResponse, Engine, Interpreter, WorkerArgs};

pub const AGENT_ID: &str = "web-crawler";

const VECTOR_STORE_DIR: &str = "vector_store";

/// Log prefixes and status lines the crawler prints between results.
const NOISE: &[&str] = &[
    r"^\[[^\]\n]*\] - (?:INFO|DEBUG|WARNING) - ",
    r"^.*executed with code 0 in.*$",
];

pub fn dependencies() -> Vec<DependencySpec> {
    vec![
        DependencySpec::new("langchain").constraint("==0.1.0"),
        DependencySpec::new("langchain-community").constraint("==0.0.14"),
        DependencySpec::new("langchain-google-genai").constraint("==0.0.5"),
        DependencySpec::new("google-generativeai")
            .constraint("==0.3.1")
            .module("google.generativeai"),
        DependencySpec::new("python-dotenv")
            .constraint("==1.0.0")
            .module("dotenv"),
        DependencySpec::new("requests").constraint("==2.31.0"),
        DependencySpec::new("beautifulsoup4")
            .constraint("==4.12.2")
            .module("bs4"),
        DependencySpec::new("lxml").constraint("==4.9.3"),
    ]
}

pub fn profile(cfg: &Config) -> AgentProfile {
    let root = cfg.agents_root();
    let extractor = SectionExtractor::new(vec![SectionPattern::after_line_marker("answer", "Answer:")])
        .fallback_section("analysis")
        .cues(&[])
        .noise_lines(NOISE);

    AgentProfile {
        id: AGENT_ID,
        script_candidates: vec![root.join("webcrawler").join("website_agent.py")],
        interpreter: Interpreter::Venv(Path::new("webcrawler").join("venv")),
        timeout: cfg.timeout("WEB_CRAWLER_TIMEOUT", 240),
        run_in_script_dir: true,
        preflight: PreflightMode::Warn,
        dependencies: dependencies(),
        deps_stamp: Some(DepsStamp::new(
            std::env::temp_dir().join("webcrawler_deps_installed.txt"),
            cfg.deps_stamp_ttl(),
        )),
        credentials: None,
        fallback: None,
        classifier: Classifier::new(extractor).known_dependencies([
            ("bs4", "beautifulsoup4"),
            ("dotenv", "python-dotenv"),
            ("langchain_community", "langchain-community"),
            ("langchain_google_genai", "langchain-google-genai"),
            ("faiss", "faiss-cpu"),
        ]),
    }
}

/// Arguments for `website_agent.py`; the vector store lives next to the
/// script and is reused when it already exists.
pub fn args(url: &str, query: Option<&str>, script_dir: &Path) -> EngineResult<WorkerArgs> {
    let url = require(url, "Website URL")?;
    let mut args = vec!["--urls".to_string(), url];
    if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
        args.push("--query".to_string());
        args.push(q.to_string());
    }

    let store = script_dir.join(VECTOR_STORE_DIR);
    args.push("--save_path".to_string());
    args.push(store.display().to_string());
    if store.exists() {
        tracing::debug!(store = %store.display(), "reusing existing vector store");
        args.push("--load_path".to_string());
        args.push(store.display().to_string());
    }
    args.push("--verbose".to_string());
    Ok(WorkerArgs::new(args))
}

pub async fn run(engine: &Engine<'_>, url: &str, query: Option<&str>) -> AgentResponse {
    let profile = profile(engine.config());
    let script = match engine.resolve_script(&profile).await {
        Ok(s) => s,
        Err(e) => return e.into(),
    };
    let script_dir = script.parent().unwrap_or_else(|| Path::new("."));
    let args = match args(url, query, script_dir) {
        Ok(a) => a,
        Err(e) => return e.into(),
    };
    engine.run(&profile, args).await
}
