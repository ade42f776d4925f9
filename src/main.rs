mod config;
mod devops;
mod http;
mod pipeline;
mod report;
mod review;
mod webhook;

use clap::Parser;
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, ConfigError};
use devops::{DevOpsClient, PrEvent};
use http::{HttpClient, ReqwestClient};
use pipeline::{FileJournal, Journal, MemoryJournal, Orchestrator, ReviewActivities};
use report::{CommentPublisher, MarkdownPublisher};
use review::{AzureOpenAiClient, CodeAnalyzer, ContextLimits, PromptAssembler, SearchContextRetriever};

/// Exit status for a malformed or incomplete PR event.
const EXIT_BAD_EVENT: i32 = 2;
/// Exit status when required configuration is missing.
const EXIT_CONFIG_MISSING: i32 = 3;
const EXIT_INTERRUPTED: i32 = 130;

/// Reviews the changed files of an Azure DevOps pull request
/// against layered-architecture rules and posts the verdict as a PR comment.
#[derive(Parser, Debug)]
#[command(name = "arch-reviewer", version, about)]
struct Cli {
    /// Service-hook payload file, or `-` to read it from stdin
    #[arg(long, conflicts_with_all = ["pr_id", "repository_id", "project_id"])]
    payload: Option<PathBuf>,

    /// Pull request id (instead of --payload)
    #[arg(long)]
    pr_id: Option<u32>,

    #[arg(long)]
    repository_id: Option<String>,

    #[arg(long)]
    project_id: Option<String>,

    /// Source branch ref, e.g. refs/heads/feature/core/orders
    #[arg(long, default_value = "")]
    source_ref: String,

    /// Config file (defaults to .arch-reviewer.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Journal file; an interrupted run resumes from it
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Render the comment locally instead of posting it to the PR
    #[arg(long)]
    dry_run: bool,

    /// With --dry-run, write the comment to this file instead of stdout
    #[arg(short, long, requires = "dry_run")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let event = match read_event(&cli) {
        Ok(event) => event,
        Err(e) => {
            eprintln!("{} {}", "Invalid PR event:".red().bold(), e);
            std::process::exit(EXIT_BAD_EVENT);
        }
    };
    debug!(pr = event.pull_request_id, repo = %event.repository_id, project = %event.project_id, "parsed PR event");

    info!("loading configuration");
    let config = Config::load(cli.config.as_deref())?;
    match config.check_required() {
        Ok(()) => {}
        Err(ConfigError::Missing { keys }) => {
            warn!(missing = keys.len(), "required configuration is missing");
            println!(
                "{}",
                serde_json::json!({ "status": "configurationMissing", "missing": keys })
            );
            std::process::exit(EXIT_CONFIG_MISSING);
        }
        Err(e) => return Err(e.into()),
    }

    let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(&config.http)?);
    let devops = Arc::new(DevOpsClient::new(http.clone(), config.devops_settings()?));

    let search = config.search_settings();
    if search.is_none() {
        info!("search index not configured, reviewing without project context");
    }
    let retriever = Arc::new(SearchContextRetriever::new(
        http.clone(),
        search,
        ContextLimits::from(&config.search),
    ));
    let model = Arc::new(AzureOpenAiClient::new(http, config.model_settings()?));
    let assembler = PromptAssembler::from_config(&config, config.rules()?);
    let analyzer = CodeAnalyzer::new(retriever, assembler, model, config.pipeline.strict_contract);

    let publisher: Arc<dyn CommentPublisher> = if cli.dry_run {
        info!("dry run, comment will not be posted");
        Arc::new(MarkdownPublisher::new(cli.output.clone()))
    } else {
        devops.clone()
    };

    let activities = ReviewActivities::new(devops, analyzer, publisher, config.pipeline.footer.clone());
    let orchestrator = Orchestrator::new(Arc::new(activities), &config.pipeline);

    let mut journal: Box<dyn Journal> = match &cli.journal {
        Some(path) => Box::new(FileJournal::new(path)),
        None => Box::new(MemoryJournal::new()),
    };

    info!("starting review run");
    let result = tokio::select! {
        result = orchestrator.run(&event, journal.as_mut()) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, journal kept at the last completed step");
            report::print_failure(&event, "interrupted");
            std::process::exit(EXIT_INTERRUPTED);
        }
    };

    match result {
        Ok(outcome) => {
            report::print_outcome(&event, outcome);
            println!(
                "{}",
                serde_json::json!({ "status": outcome, "pullRequestId": event.pull_request_id })
            );
            Ok(())
        }
        Err(e) => {
            report::print_failure(&event, &e.to_string());
            println!(
                "{}",
                serde_json::json!({ "status": "failed", "pullRequestId": event.pull_request_id, "error": e.to_string() })
            );
            std::process::exit(1);
        }
    }
}

/// Build the PR event from `--payload` or from the explicit id flags.
fn read_event(cli: &Cli) -> Result<PrEvent, Box<dyn std::error::Error>> {
    if let Some(source) = &cli.payload {
        let body = if source.as_os_str() == "-" {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body)?;
            body
        } else {
            std::fs::read_to_string(source)?
        };
        return Ok(webhook::parse_payload(&body)?);
    }

    let pr_id = cli
        .pr_id
        .ok_or("either --payload or --pr-id with --repository-id and --project-id is required")?;
    let repository_id = cli
        .repository_id
        .as_deref()
        .ok_or("--repository-id is required with --pr-id")?;
    let project_id = cli
        .project_id
        .as_deref()
        .ok_or("--project-id is required with --pr-id")?;

    Ok(PrEvent::new(pr_id, repository_id, project_id, cli.source_ref.as_str())?)
}
