//! `kiln` command line
//!
//! Runs jobs against the configured engines and prints canonical events as
//! JSON lines on stdout. Logs go to stderr, filtered by `KILN_LOG`.

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use kiln_artifact::{CallerId, ProjectId, VersionId};
use kiln_core::{JobOrchestrator, KilnConfig, SubmitRequest};
use kiln_gate::ContractCheck;
use kiln_stream::EventKind;
use std::path::PathBuf;
use tracing_subscriber::{prelude::*, EnvFilter};

fn project_arg() -> Arg {
    Arg::new("project")
        .long("project")
        .short('p')
        .required(true)
        .help("Project id")
}

fn cli() -> Command {
    Command::new("kiln")
        .version(kiln_core::VERSION)
        .about("Generation job orchestrator")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("classify")
                .about("Show the intent a request would get")
                .arg(Arg::new("text").required(true)),
        )
        .subcommand(
            Command::new("submit")
                .about("Run one job and print its events as JSON lines")
                .arg(project_arg())
                .arg(
                    Arg::new("caller")
                        .long("caller")
                        .default_value("cli")
                        .help("Caller id"),
                )
                .arg(Arg::new("text").required(true)),
        )
        .subcommand(
            Command::new("restore")
                .about("Restore a version as the new head")
                .arg(project_arg())
                .arg(
                    Arg::new("version")
                        .value_parser(value_parser!(VersionId))
                        .help("Version to restore; defaults to the parent of the head"),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("List a project's versions, oldest first")
                .arg(project_arg()),
        )
        .subcommand(
            Command::new("diff")
                .about("Show what a version changed against its parent")
                .arg(
                    Arg::new("version")
                        .required(true)
                        .value_parser(value_parser!(VersionId)),
                ),
        )
        .subcommand(Command::new("gate").about("Probe the candidate engine's contract"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| {
        EnvFilter::new("warn,kiln=info,kiln_core=info,kiln_engine=info,kiln_gate=info")
    });
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<KilnConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            KilnConfig::load(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(KilnConfig::default()),
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a String> {
    args.get_one::<String>(name)
        .with_context(|| format!("missing argument <{name}>"))
}

/// Run a job to its terminal event; returns whether it completed
async fn run_job(orchestrator: &JobOrchestrator, request: SubmitRequest) -> Result<bool> {
    let mut handle = orchestrator.submit(request)?;
    tracing::info!(job = %handle.job_id(), intent = %handle.intent(), "submitted");

    let mut completed = false;
    while let Some(event) = handle.next_event().await {
        println!("{}", serde_json::to_string(&event)?);
        completed = event.kind == EventKind::Completed;
    }
    Ok(completed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("classify", args)) => {
            let orchestrator = JobOrchestrator::from_config(&config).await?;
            let classification = orchestrator.classify(required(args, "text")?);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Some(("submit", args)) => {
            let orchestrator = JobOrchestrator::from_config(&config).await?;
            let request = SubmitRequest::new(
                ProjectId::new(required(args, "project")?),
                CallerId::new(required(args, "caller")?),
                required(args, "text")?,
            );
            if !run_job(&orchestrator, request).await? {
                std::process::exit(1);
            }
        }
        Some(("restore", args)) => {
            let orchestrator = JobOrchestrator::from_config(&config).await?;
            let mut request = SubmitRequest::new(
                ProjectId::new(required(args, "project")?),
                CallerId::new("cli"),
                "restore previous version",
            );
            if let Some(version) = args.get_one::<VersionId>("version") {
                request = request.with_restore_to(*version);
            }
            if !run_job(&orchestrator, request).await? {
                std::process::exit(1);
            }
        }
        Some(("history", args)) => {
            let orchestrator = JobOrchestrator::from_config(&config).await?;
            let project = ProjectId::new(required(args, "project")?);
            for version in orchestrator.store().list(&project).await? {
                let parent = version.parent().map_or_else(|| "-".to_string(), |p| p.short());
                println!(
                    "{}  parent={}  {}  {}",
                    version.id().short(),
                    parent,
                    version.created_at().to_rfc3339(),
                    version.summary()
                );
            }
        }
        Some(("diff", args)) => {
            let orchestrator = JobOrchestrator::from_config(&config).await?;
            let version = args
                .get_one::<VersionId>("version")
                .context("missing argument <version>")?;
            let summary = orchestrator.store().diff(*version).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some(("gate", _)) => {
            let orchestrator = JobOrchestrator::from_config(&config).await?;
            let Some(gate) = orchestrator.gate() else {
                bail!("no candidate engine configured; set [shadow] enabled and url");
            };
            let verdict = gate.verify().await;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.is_pass() {
                std::process::exit(1);
            }
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn submit_parses() {
        let matches = cli()
            .try_get_matches_from(["kiln", "submit", "-p", "breakout", "make the paddle wider"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "submit");
        assert_eq!(required(args, "project").unwrap(), "breakout");
        assert_eq!(required(args, "caller").unwrap(), "cli");
    }

    #[test]
    fn restore_version_is_optional() {
        let matches = cli()
            .try_get_matches_from(["kiln", "restore", "--project", "p"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert!(args.get_one::<VersionId>("version").is_none());
    }
}
