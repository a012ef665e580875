//! Case-study generation: `casestudy.py <topic> [--context <url>]`.

use std::path::PathBuf;

use crate::{
    classify::Classifier,
    config::Config,
    error::EngineResult,
    extract::{SectionExtractor, SectionPattern},
    preflight::PreflightMode,
};

use super::{require, AgentProfile, AgentResponse, Engine, Interpreter, WorkerArgs};

pub const AGENT_ID: &str = "case-study";

/// Import names the case-study worker uses that install under another name.
pub const KNOWN_DEPENDENCIES: &[(&str, &str)] = &[
    ("langchain", "langchain"),
    ("langchain_core", "langchain-core"),
    ("langchain_community", "langchain-community"),
    ("dotenv", "python-dotenv"),
    ("google", "google-api-python-client"),
    ("google_api_core", "google-api-core"),
    ("langchain_google_genai", "langchain-google-genai"),
];

pub fn profile(cfg: &Config) -> AgentProfile {
    let root = cfg.agents_root();
    let extractor = SectionExtractor::new(vec![
        SectionPattern::ruled("outline", "OUTLINE:"),
        SectionPattern::ruled("case_study", "CASE STUDY:"),
    ])
    .fallback_section("case_study");

    AgentProfile {
        id: AGENT_ID,
        script_candidates: vec![
            root.join("CaseStudyAgent").join("CaseStudyAgent").join("casestudy.py"),
            root.join("CaseStudyAgent").join("casestudy.py"),
        ],
        interpreter: Interpreter::Configured,
        timeout: cfg.timeout("CASE_STUDY_TIMEOUT", 180),
        run_in_script_dir: false,
        preflight: PreflightMode::Skip,
        dependencies: Vec::new(),
        deps_stamp: None,
        credentials: None,
        fallback: None,
        classifier: Classifier::new(extractor)
            .known_dependencies(KNOWN_DEPENDENCIES.iter().copied())
            .success_markers(["OUTLINE:", "CASE STUDY:"]),
    }
}

pub fn args(topic: &str, context_url: Option<&str>) -> EngineResult<WorkerArgs> {
    let topic = require(topic, "Topic")?;
    let mut args = vec![topic];
    if let Some(url) = context_url.map(str::trim).filter(|u| !u.is_empty()) {
        args.push("--context".to_string());
        args.push(url.to_string());
    }
    Ok(WorkerArgs::new(args))
}

pub async fn run(engine: &Engine<'_>, topic: &str, context_url: Option<&str>) -> AgentResponse {
    let args = match args(topic, context_url) {
        Ok(a) => a,
        Err(e) => return e.into(),
    };
    engine.run(&profile(engine.config()), args).await
}

/// Where the worker is looked for, for setup messages.
pub fn script_candidates(cfg: &Config) -> Vec<PathBuf> {
    profile(cfg).script_candidates
}
