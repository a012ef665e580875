//! Blog posts through the `BlogGenerator` class in `blog/blog.py`, driven by
//! a small launcher that prints the finished post as JSON.

use std::path::Path;

use serde_json::Value;

use crate::{
    classify::Classifier,
    config::Config,
    error::EngineResult,
    extract::{ExtractedSections, JsonDocument, SectionExtractor},
    preflight::{DependencySpec, PreflightMode},
};

use super::{require, AgentProfile, AgentResponse, CredentialCheck, Engine, Interpreter, WorkerArgs};

pub const AGENT_ID: &str = "blog";

const TOPIC_FILE: &str = "topic.txt";
const LAUNCHER_FILE: &str = "run_blog.py";

/// Runs with the blog directory as working directory and on the module
/// search path; `argv[1]` is the topic file.
const LAUNCHER: &str = r#"import asyncio
import json
import os
import sys

from dotenv import load_dotenv

from blog import BlogGenerator

load_dotenv(os.path.join(os.getcwd(), ".env"))


async def main():
    api_key = os.getenv("GROQ_API_KEY")
    if not api_key:
        print(json.dumps({"error": "GROQ API key not found"}))
        return
    with open(sys.argv[1], encoding="utf-8") as f:
        topic = f.read().strip()
    try:
        post = await BlogGenerator(api_key).generate_blog(
            topic=topic, style="technical", tone="informative", length="medium"
        )
        print(json.dumps(post))
    except Exception as e:
        print(json.dumps({"error": str(e)}))


asyncio.run(main())
"#;

pub fn credentials() -> CredentialCheck {
    CredentialCheck::new("GROQ_API_KEY")
        .env_file(".env")
        .placeholders(&["your-groq-api-key-here"])
}

pub fn dependencies() -> Vec<DependencySpec> {
    vec![
        DependencySpec::new("langchain"),
        // The groq client moves fast; keep it current.
        DependencySpec::new("langchain-groq").always_install(),
        DependencySpec::new("python-dotenv").module("dotenv"),
        DependencySpec::new("rich"),
        DependencySpec::new("pydantic"),
    ]
}

/// `{title, meta_description, sections: [{heading, content}]}` or `{error}`.
fn render_post(doc: &Value) -> Result<ExtractedSections, String> {
    if let Some(error) = doc.get("error") {
        return Err(error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string()));
    }
    let mut sections = ExtractedSections::new();
    for key in ["title", "meta_description"] {
        if let Some(text) = doc.get(key).and_then(Value::as_str) {
            sections.insert(key, text.trim());
        }
    }
    let body = doc
        .get("sections")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| {
                    let heading = part.get("heading").and_then(Value::as_str)?;
                    let content = part.get("content").and_then(Value::as_str).unwrap_or_default();
                    Some(format!("## {}\n\n{}", heading.trim(), content.trim()))
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default();
    sections.insert("body", body);
    Ok(sections)
}

pub fn profile(cfg: &Config) -> AgentProfile {
    let root = cfg.agents_root();
    let extractor = SectionExtractor::new(vec![])
        .json_document(JsonDocument::outermost_object(render_post).required());

    AgentProfile {
        id: AGENT_ID,
        script_candidates: vec![root.join("blog").join("blog.py")],
        interpreter: Interpreter::Venv(Path::new("blog").join("venv")),
        timeout: cfg.timeout("BLOG_TIMEOUT", 300),
        run_in_script_dir: true,
        preflight: PreflightMode::Abort,
        dependencies: dependencies(),
        deps_stamp: None,
        credentials: Some(credentials()),
        fallback: None,
        classifier: Classifier::new(extractor).known_dependencies([
            ("langchain_groq", "langchain-groq"),
            ("dotenv", "python-dotenv"),
        ]),
    }
}

/// Write the topic and the launcher into a fresh scratch directory.
pub fn args(topic: &str) -> EngineResult<WorkerArgs> {
    let topic = require(topic, "A blog topic")?;
    let scratch = tempfile::Builder::new().prefix("blog-generator-").tempdir()?;
    let topic_path = scratch.path().join(TOPIC_FILE);
    let launcher_path = scratch.path().join(LAUNCHER_FILE);
    std::fs::write(&topic_path, topic)?;
    std::fs::write(&launcher_path, LAUNCHER)?;
    tracing::debug!(dir = %scratch.path().display(), "blog launcher written");
    Ok(WorkerArgs::new([topic_path.display().to_string()])
        .with_entry_point(launcher_path)
        .with_scratch(scratch))
}

pub async fn run(engine: &Engine<'_>, topic: &str) -> AgentResponse {
    let args = match args(topic) {
        Ok(a) => a,
        Err(e) => return e.into(),
    };
    engine.run(&profile(engine.config()), args).await
}
