use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "agent-runner", about = "Run AI agent worker scripts and classify their output", version)]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory containing the agent script folders (overrides AGENTS_ROOT).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Worker timeout in seconds (overrides the per-agent default).
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Print the result as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Render sections as Markdown.
    #[arg(long, global = true)]
    pub md: bool,
    /// Print sections as plain text.
    #[arg(long = "no-md", global = true)]
    pub no_md: bool,

    /// Verbose logging (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate an outline and case study for a topic.
    CaseStudy {
        topic: String,
        /// URL giving extra context.
        #[arg(long)]
        context: Option<String>,
    },

    /// Draft an email from a prompt (read from stdin when omitted).
    Email {
        #[arg(value_name = "PROMPT")]
        prompt: Option<String>,
    },

    /// Analyze a web site, or answer a question about it.
    WebCrawler {
        url: String,
        #[arg(long)]
        query: Option<String>,
    },

    /// Summarize a YouTube video.
    Youtube { url: String },

    /// Write a blog post on a topic.
    Blog { topic: String },

    /// Summarize a job posting, draft a cold email, or prepare for the interview.
    Job {
        /// Posting URL or pasted description.
        job_input: String,
        #[arg(long, default_value = "summary", value_parser = JOB_TASKS)]
        task: String,
        #[arg(long)]
        candidate_name: Option<String>,
        #[arg(long = "candidate-exp")]
        candidate_experience: Option<String>,
        #[arg(long)]
        interview_date: Option<String>,
    },

    /// Check that an agent's API key is configured, without running it.
    CheckKey {
        #[arg(value_parser = ["blog"])]
        agent: String,
    },

    /// Print where an agent's worker script is found.
    Resolve {
        #[arg(value_parser = AGENTS)]
        agent: String,
    },
}

const AGENTS: [&str; 6] = ["case-study", "email", "web-crawler", "youtube", "blog", "job"];
const JOB_TASKS: [&str; 4] = ["summary", "cold_email", "interview_prep", "all"];

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
