//! Job-application help through `JobAgent.py`: a summary of the posting, a
//! cold email, interview preparation, or all three. Falls back to
//! `JobAgent_lite.py` when the full agent cannot run.

use std::{fmt, str::FromStr};

use crate::{
    classify::{Classifier, IgnorableSignature},
    config::Config,
    error::{EngineError, EngineResult},
    extract::{SectionExtractor, SectionPattern},
    preflight::PreflightMode,
};

use super::{require, AgentProfile, AgentResponse, Engine, FallbackScript, Interpreter, WorkerArgs};

pub const AGENT_ID: &str = "job-agent";
pub const LITE_ID: &str = "job-agent-lite";

pub const LITE_NOTE: &str = "[Note: Using simplified mode. For full AI analysis, please install all requirements: pip install -r JobAgent/requirements.txt (Add --user flag if you're not using a virtual environment)]";

pub const KNOWN_DEPENDENCIES: &[(&str, &str)] = &[
    ("faiss", "faiss-cpu"),
    ("faiss.swigfaiss_avx2", "faiss-cpu"),
    ("langchain", "langchain"),
    ("langchain_core", "langchain-core"),
    ("langchain_text_splitters", "langchain-text-splitters"),
    ("langchain_community", "langchain-community"),
    ("PyPDF2", "PyPDF2"),
    ("bs4", "beautifulsoup4"),
    ("dotenv", "python-dotenv"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobTask {
    #[default]
    Summary,
    ColdEmail,
    InterviewPrep,
    All,
}

impl JobTask {
    pub fn as_str(self) -> &'static str {
        match self {
            JobTask::Summary => "summary",
            JobTask::ColdEmail => "cold_email",
            JobTask::InterviewPrep => "interview_prep",
            JobTask::All => "all",
        }
    }

    fn needs_candidate(self) -> bool {
        matches!(self, JobTask::ColdEmail | JobTask::All)
    }

    /// Section that receives unstructured output.
    fn fallback_section(self) -> &'static str {
        match self {
            JobTask::Summary | JobTask::All => "summary",
            JobTask::ColdEmail => "cold_email",
            JobTask::InterviewPrep => "interview_prep",
        }
    }
}

impl fmt::Display for JobTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobTask {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "summary" => Ok(JobTask::Summary),
            "cold_email" => Ok(JobTask::ColdEmail),
            "interview_prep" => Ok(JobTask::InterviewPrep),
            "all" => Ok(JobTask::All),
            other => Err(EngineError::InvalidInput(format!("Unknown task type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobRequest<'a> {
    /// Posting URL or pasted description.
    pub job_input: &'a str,
    pub task: JobTask,
    pub candidate_name: Option<&'a str>,
    pub candidate_experience: Option<&'a str>,
    pub interview_date: Option<&'a str>,
}

pub fn profile(cfg: &Config, task: JobTask) -> AgentProfile {
    let root = cfg.agents_root();
    let extractor = SectionExtractor::new(vec![
        SectionPattern::ruled("summary", "JOB DESCRIPTION SUMMARY"),
        SectionPattern::ruled("cold_email", "COLD EMAIL"),
        SectionPattern::ruled("interview_prep", "INTERVIEW PREPARATION GUIDE"),
    ])
    .fallback_section(task.fallback_section())
    .cues(&[]);

    AgentProfile {
        id: AGENT_ID,
        script_candidates: vec![
            root.join("JobAgent").join("JobAgent").join("JobAgent.py"),
            root.join("JobAgent").join("JobAgent.py"),
        ],
        interpreter: Interpreter::Configured,
        timeout: cfg.timeout("JOB_AGENT_TIMEOUT", 90),
        run_in_script_dir: false,
        preflight: PreflightMode::Skip,
        dependencies: Vec::new(),
        deps_stamp: None,
        credentials: None,
        fallback: Some(FallbackScript {
            id: LITE_ID,
            script_candidates: vec![
                root.join("JobAgent").join("JobAgent_lite.py"),
                root.join("JobAgent").join("JobAgent").join("JobAgent_lite.py"),
            ],
            note: LITE_NOTE.to_string(),
        }),
        classifier: Classifier::new(extractor)
            .known_dependencies(KNOWN_DEPENDENCIES.iter().copied())
            .ignorable(IgnorableSignature::faiss_avx2()),
    }
}

pub fn args(req: &JobRequest<'_>) -> EngineResult<WorkerArgs> {
    let job_input = require(req.job_input, "Job description URL or text")?;
    let present = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
    let name = present(req.candidate_name);
    let experience = present(req.candidate_experience);
    if req.task.needs_candidate() && (name.is_none() || experience.is_none()) {
        return Err(EngineError::InvalidInput(
            "Candidate name and experience are required for cold email generation".into(),
        ));
    }

    let mut args = vec![job_input, "--task".to_string(), req.task.to_string()];
    for (flag, value) in [
        ("--candidate-name", name),
        ("--candidate-exp", experience),
        ("--interview-date", present(req.interview_date)),
    ] {
        if let Some(value) = value {
            args.push(flag.to_string());
            args.push(value);
        }
    }
    Ok(WorkerArgs::new(args))
}

pub async fn run(engine: &Engine<'_>, req: &JobRequest<'_>) -> AgentResponse {
    let args = match args(req) {
        Ok(a) => a,
        Err(e) => return e.into(),
    };
    engine.run(&profile(engine.config(), req.task), args).await
}
