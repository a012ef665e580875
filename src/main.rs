mod cli;

use std::{
    io::{self, Read},
    process::ExitCode,
};

use agent_runner::{
    config::Config,
    handlers::{
        blog, case_study, email, job_agent, web_crawler, youtube, AgentProfile, AgentResponse, Engine,
    },
    preflight::PendingInstalls,
    printer::ResponsePrinter,
    resolver::PathResolver,
};
use anyhow::{bail, Context, Result};
use cli::Command;
use is_terminal::IsTerminal;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    let mut cfg = Config::load();
    if let Some(root) = &args.root {
        cfg.set("AGENTS_ROOT", root.display().to_string());
    }
    if let Some(secs) = args.timeout {
        for key in [
            "CASE_STUDY_TIMEOUT",
            "EMAIL_TIMEOUT",
            "WEB_CRAWLER_TIMEOUT",
            "YOUTUBE_TIMEOUT",
            "BLOG_TIMEOUT",
            "JOB_AGENT_TIMEOUT",
        ] {
            cfg.set(key, secs.to_string());
        }
    }

    let markdown = if args.no_md {
        false
    } else if args.md {
        true
    } else {
        cfg.get_bool("PRETTIFY_MARKDOWN") && io::stdout().is_terminal()
    };

    // Missing packages seen by one invocation are installed by the next.
    let pending = PendingInstalls::persistent(cfg.pending_installs_path());
    let engine = Engine::with_state(cfg, PathResolver::global(), &pending);
    let response = match args.command {
        Command::CaseStudy { topic, context } => {
            case_study::run(&engine, &topic, context.as_deref()).await
        }
        Command::Email { prompt } => {
            let prompt = match prompt {
                Some(p) => p,
                None => read_stdin_prompt()?,
            };
            email::run(&engine, &prompt).await
        }
        Command::WebCrawler { url, query } => {
            web_crawler::run(&engine, &url, query.as_deref()).await
        }
        Command::Youtube { url } => youtube::run(&engine, &url).await,
        Command::Blog { topic } => blog::run(&engine, &topic).await,
        Command::Job {
            job_input,
            task,
            candidate_name,
            candidate_experience,
            interview_date,
        } => {
            let request = job_agent::JobRequest {
                job_input: &job_input,
                task: task.parse()?,
                candidate_name: candidate_name.as_deref(),
                candidate_experience: candidate_experience.as_deref(),
                interview_date: interview_date.as_deref(),
            };
            job_agent::run(&engine, &request).await
        }
        Command::CheckKey { agent } => {
            let profile = profile_for(&agent, engine.config());
            let verdict = engine
                .check_credentials(&profile)
                .await
                .with_context(|| format!("resolving {agent} script"))?;
            return Ok(match verdict {
                Ok(()) => {
                    println!("{agent}: API key found");
                    ExitCode::SUCCESS
                }
                Err(detail) => {
                    eprintln!("{agent}: {detail}");
                    ExitCode::FAILURE
                }
            });
        }
        Command::Resolve { agent } => {
            let profile = profile_for(&agent, engine.config());
            let path = engine
                .resolve_script(&profile)
                .await
                .with_context(|| format!("resolving {agent} script"))?;
            println!("{}", path.display());
            return Ok(ExitCode::SUCCESS);
        }
    };

    emit(&response, args.json, markdown)?;
    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn profile_for(agent: &str, cfg: &Config) -> AgentProfile {
    match agent {
        "case-study" => case_study::profile(cfg),
        "email" => email::profile(cfg),
        "youtube" => youtube::profile(cfg),
        "blog" => blog::profile(cfg),
        "job" => job_agent::profile(cfg, Default::default()),
        _ => web_crawler::profile(cfg),
    }
}

fn emit(response: &AgentResponse, json: bool, markdown: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
    } else {
        let printer = ResponsePrinter {
            markdown,
            color: io::stderr().is_terminal(),
        };
        printer.print(response);
    }
    Ok(())
}

fn read_stdin_prompt() -> Result<String> {
    if io::stdin().is_terminal() {
        bail!("Provide a prompt argument or pipe one via stdin");
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading prompt from stdin")?;
    Ok(buf)
}

/// Logs go to stderr; stdout carries results only.
fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = std::env::var("AGENT_RUNNER_LOG").unwrap_or_else(|_| {
        match verbose {
            0 => "agent_runner=warn",
            1 => "agent_runner=info",
            2 => "agent_runner=debug",
            _ => "agent_runner=trace",
        }
        .to_string()
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(EnvFilter::new(filter)),
        )
        .init();
}
