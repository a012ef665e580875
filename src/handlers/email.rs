//! Email drafting: the prompt goes to `email_generator.py` through a
//! request-scoped temp file.

use crate::{
    classify::Classifier,
    config::Config,
    error::EngineResult,
    extract::{SectionExtractor, SectionPattern},
    preflight::{DependencySpec, PreflightMode},
};

use super::{require, AgentProfile, AgentResponse, Engine, Interpreter, WorkerArgs};

pub const AGENT_ID: &str = "email";

const PROMPT_FILE: &str = "prompt.txt";

/// Lines the generator leaks into its output that never belong in an email.
const NOISE_LINES: &[&str] = &[
    r"^Debug: .*$",
    r"^Warning: .*$",
    r"^Pydantic .*$",
    r"^.*pydantic.*$",
    r"^.*langchain.*$",
    r"^.*_modify_schema_.*$",
    r"^For further information.*errors\.pydantic\.dev.*$",
    r"^Thank you for using Email Generator AI.*$",
    r"^Email Generator AI terminated.*$",
];

pub fn dependencies() -> Vec<DependencySpec> {
    vec![
        DependencySpec::new("langchain"),
        // Newer releases break on the pinned pydantic; always reinstall.
        DependencySpec::new("langchain-google-genai")
            .constraint("==0.0.11")
            .always_install(),
        DependencySpec::new("python-dotenv").module("dotenv"),
        DependencySpec::new("colorama"),
        DependencySpec::new("google-generativeai").module("google.generativeai"),
    ]
}

pub fn profile(cfg: &Config) -> AgentProfile {
    let root = cfg.agents_root();
    let extractor = SectionExtractor::new(vec![SectionPattern::header("email", "GENERATED EMAIL")])
        .fallback_section("email")
        .noise_lines(NOISE_LINES)
        .date_stamped();

    AgentProfile {
        id: AGENT_ID,
        script_candidates: vec![root.join("Email_Generator_Agent").join("email_generator.py")],
        interpreter: Interpreter::Configured,
        timeout: cfg.timeout("EMAIL_TIMEOUT", 300),
        run_in_script_dir: true,
        preflight: PreflightMode::Abort,
        dependencies: dependencies(),
        deps_stamp: None,
        credentials: None,
        fallback: None,
        classifier: Classifier::new(extractor)
            .known_dependencies([
                ("dotenv", "python-dotenv"),
                ("langchain_google_genai", "langchain-google-genai"),
                ("google", "google-generativeai"),
            ])
            .success_markers(["GENERATED EMAIL"]),
    }
}

/// Write `prompt` into a fresh scratch directory and pass its path.
pub fn args(prompt: &str) -> EngineResult<WorkerArgs> {
    let prompt = require(prompt, "Prompt")?;
    let scratch = tempfile::Builder::new().prefix("email-generator-").tempdir()?;
    let prompt_path = scratch.path().join(PROMPT_FILE);
    std::fs::write(&prompt_path, prompt)?;
    tracing::debug!(path = %prompt_path.display(), "prompt written for email generator");
    Ok(WorkerArgs::new([prompt_path.display().to_string()]).with_scratch(scratch))
}

pub async fn run(engine: &Engine<'_>, prompt: &str) -> AgentResponse {
    let args = match args(prompt) {
        Ok(a) => a,
        Err(e) => return e.into(),
    };
    engine.run(&profile(engine.config()), args).await
}
