//! Video summaries through `ytsummarizer.py`. The URL goes to the worker in
//! a scratch file; the worker answers with a JSON block between
//! `RESULT_JSON_START` and `RESULT_JSON_END`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{
    classify::Classifier,
    config::Config,
    error::{EngineError, EngineResult},
    extract::{ExtractedSections, JsonDocument, SectionExtractor},
    preflight::{DependencySpec, DepsStamp, PreflightMode},
};

use super::{require, AgentProfile, AgentResponse, Engine, Interpreter, WorkerArgs};

pub const AGENT_ID: &str = "youtube";

const URL_FILE: &str = "youtube_url.txt";

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:youtube\.com/(?:[^/]+/.+/|(?:v|e(?:mbed)?)/|.*[?&]v=)|youtu\.be/)([^"&?/\s]{11})"#,
    )
    .expect("valid regex")
});

/// Progress chatter removed when the worker printed plain text.
const NOISE: &[&str] = &[
    r"^(?:Processing video ID|Extracting transcript|Transcript extracted successfully).+$",
    r"^=+$",
    r"^(?:YouTube Transcript to Detailed Notes Converter|DETAILED NOTES:|Processing video ID:).+$",
    r"^Generating summary\.\.\.$",
    r"(?s)RESULT_JSON_START.*RESULT_JSON_END",
];

pub fn video_id(url: &str) -> Option<&str> {
    VIDEO_ID.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}

pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg")
}

pub fn dependencies() -> Vec<DependencySpec> {
    vec![
        DependencySpec::new("youtube-transcript-api").constraint("==0.6.1"),
        DependencySpec::new("google-generativeai")
            .constraint(">=0.3.0")
            .module("google.generativeai"),
        DependencySpec::new("python-dotenv")
            .constraint("==1.0.0")
            .module("dotenv"),
    ]
}

fn render_result(doc: &Value) -> Result<ExtractedSections, String> {
    if !doc.get("success").and_then(Value::as_bool).unwrap_or(false) {
        let error = doc
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("the summarizer did not report success");
        return Err(error.to_string());
    }
    let mut sections = ExtractedSections::new();
    for key in ["title", "summary"] {
        if let Some(text) = doc.get(key).and_then(Value::as_str) {
            sections.insert(key, text.trim());
        }
    }
    Ok(sections)
}

pub fn profile(cfg: &Config) -> AgentProfile {
    let root = cfg.agents_root();
    let extractor = SectionExtractor::new(vec![])
        .json_document(JsonDocument::between("RESULT_JSON_START", "RESULT_JSON_END", render_result))
        .fallback_section("summary")
        .cues(&[])
        .noise_lines(NOISE);

    AgentProfile {
        id: AGENT_ID,
        script_candidates: vec![root.join("YTSummarizer").join("YTSummarizer").join("ytsummarizer.py")],
        interpreter: Interpreter::Configured,
        timeout: cfg.timeout("YOUTUBE_TIMEOUT", 300),
        run_in_script_dir: true,
        preflight: PreflightMode::Abort,
        dependencies: dependencies(),
        deps_stamp: Some(DepsStamp::new(
            std::env::temp_dir().join("youtube_deps_installed.txt"),
            cfg.deps_stamp_ttl(),
        )),
        credentials: None,
        fallback: None,
        classifier: Classifier::new(extractor).known_dependencies([
            ("youtube_transcript_api", "youtube-transcript-api"),
            ("google", "google-generativeai"),
            ("dotenv", "python-dotenv"),
        ]),
    }
}

/// Validate `url` and write it into a fresh scratch file for the worker.
pub fn args(url: &str) -> EngineResult<(WorkerArgs, String)> {
    let url = require(url, "Video URL")?;
    let id = video_id(&url)
        .ok_or_else(|| EngineError::InvalidInput("Invalid YouTube URL".into()))?
        .to_string();
    let scratch = tempfile::Builder::new().prefix("youtube-summarizer-").tempdir()?;
    let url_path = scratch.path().join(URL_FILE);
    std::fs::write(&url_path, &url)?;
    Ok((
        WorkerArgs::new([url_path.display().to_string()]).with_scratch(scratch),
        id,
    ))
}

pub async fn run(engine: &Engine<'_>, url: &str) -> AgentResponse {
    let (args, id) = match args(url) {
        Ok(a) => a,
        Err(e) => return e.into(),
    };
    let mut response = engine.run(&profile(engine.config()), args).await;
    if let AgentResponse::Success { sections, .. } = &mut response {
        sections.insert("thumbnail_url", thumbnail_url(&id));
        sections.insert("video_id", id);
    }
    response
}
