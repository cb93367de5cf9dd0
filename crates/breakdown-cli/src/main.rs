//! `breakdown` command-line tool

mod logging;

use anyhow::{Context, Result};
use breakdown_core::prelude::*;
use clap::parser::ValueSource;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("breakdown")
        .version(breakdown_core::VERSION)
        .about("Break a feature issue down into epics and stories")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging on stderr"),
        )
        .subcommand(
            Command::new("run")
                .about("Run a breakdown and print pipeline events as JSON lines")
                .arg(
                    Arg::new("issue")
                        .required_unless_present("request")
                        .help("Issue identifier, e.g. RHOAIENG-123"),
                )
                .arg(
                    Arg::new("request")
                        .long("request")
                        .conflicts_with_all(["issue", "description", "user", "create-items"])
                        .help("Full request as a JSON object"),
                )
                .arg(
                    Arg::new("description")
                        .long("description")
                        .help("Additional context appended to the feature description"),
                )
                .arg(Arg::new("user").long("user").help("Requesting user"))
                .arg(
                    Arg::new("create-items")
                        .long("create-items")
                        .action(ArgAction::SetTrue)
                        .help("Write the epics and stories back to the tracker"),
                )
                .arg(personas_arg())
                .arg(
                    Arg::new("persona")
                        .long("persona")
                        .action(ArgAction::Append)
                        .help("Only consult this persona (repeatable)"),
                )
                .arg(config_arg())
                .arg(
                    Arg::new("issues")
                        .long("issues")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON or YAML file of issues to serve instead of placeholders"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_parser(value_parser!(usize))
                        .help("Personas analyzed at once"),
                ),
        )
        .subcommand(
            Command::new("personas")
                .about("List the personas found in a directory")
                .arg(personas_arg()),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a configuration file and print the effective values")
                .arg(config_arg()),
        )
}

const DEFAULT_PERSONA_DIR: &str = "agents";

fn personas_arg() -> Arg {
    Arg::new("personas")
        .long("personas")
        .default_value(DEFAULT_PERSONA_DIR)
        .value_parser(value_parser!(PathBuf))
        .help("Directory of persona YAML files")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Pipeline configuration (TOML)")
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    logging::init(matches.get_flag("verbose"));

    let outcome = match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("personas", args)) => list_personas(args).map(|()| ExitCode::SUCCESS),
        Some(("check-config", args)) => check_config(args).map(|()| ExitCode::SUCCESS),
        _ => Ok(ExitCode::FAILURE),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &ArgMatches) -> Result<ExitCode> {
    let request = request_from(args)?;
    let config = config_from(args)?;

    let mut personas = personas_from(args)?;
    if let Some(names) = args.get_many::<String>("persona") {
        let names: Vec<&String> = names.collect();
        personas = personas.select(&names)?;
    }
    if personas.is_empty() {
        tracing::warn!("no personas configured, the breakdown will be generic");
    }

    let mut builder = BreakdownPipeline::builder()
        .with_config(config)
        .with_personas(personas);
    builder = match args.get_one::<PathBuf>("issues") {
        Some(path) => {
            let tracker = Arc::new(
                InMemoryTracker::from_path(path)
                    .with_context(|| format!("loading issues from {}", path.display()))?,
            );
            builder.with_fetcher(tracker.clone()).with_writer(tracker)
        }
        None => {
            let tracker = Arc::new(PlaceholderTracker::new());
            builder.with_fetcher(tracker.clone()).with_writer(tracker)
        }
    };
    let pipeline = Arc::new(builder.build()?);

    tracing::info!(issue_id = %request.issue_id, "starting breakdown");
    let mut handle = pipeline.stream(request);
    let mut stdout = std::io::stdout().lock();
    let mut code = ExitCode::SUCCESS;

    while let Some(event) = handle.next_event().await {
        writeln!(stdout, "{}", event.to_json_line()?)?;
        if let PipelineEvent::Error { data } = &event {
            tracing::error!(kind = ?data.kind, "{}", data.message);
            code = ExitCode::FAILURE;
        }
    }
    stdout.flush()?;

    Ok(code)
}

fn request_from(args: &ArgMatches) -> Result<BreakdownRequest> {
    if let Some(raw) = args.get_one::<String>("request") {
        return BreakdownRequest::parse(raw).context("parsing --request");
    }

    let issue = args
        .get_one::<String>("issue")
        .context("an issue identifier is required")?;
    let mut request =
        BreakdownRequest::new(issue.clone()).with_create_items(args.get_flag("create-items"));
    if let Some(description) = args.get_one::<String>("description") {
        request = request.with_description(description.clone());
    }
    if let Some(user) = args.get_one::<String>("user") {
        request = request.with_user(user.clone());
    }
    Ok(request)
}

fn config_from(args: &ArgMatches) -> Result<BreakdownConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => BreakdownConfig::load(path)?,
        None => BreakdownConfig::default(),
    };
    // Only `run` defines --concurrency
    if let Ok(Some(concurrency)) = args.try_get_one::<usize>("concurrency") {
        config = config.with_max_concurrent_personas(*concurrency);
        config.validate()?;
    }
    Ok(config)
}

/// Load personas, tolerating a missing default directory
fn personas_from(args: &ArgMatches) -> Result<PersonaRegistry> {
    let dir = args
        .get_one::<PathBuf>("personas")
        .map_or_else(|| Path::new(DEFAULT_PERSONA_DIR), PathBuf::as_path);
    let defaulted = args.value_source("personas") == Some(ValueSource::DefaultValue);
    load_personas(dir, defaulted)
}

fn load_personas(dir: &Path, defaulted: bool) -> Result<PersonaRegistry> {
    if defaulted && !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "default persona directory not found");
        return Ok(PersonaRegistry::new());
    }
    Ok(PersonaRegistry::load_dir(dir)?)
}

fn list_personas(args: &ArgMatches) -> Result<()> {
    let personas = personas_from(args)?;
    let mut stdout = std::io::stdout().lock();
    for persona in personas.iter() {
        writeln!(
            stdout,
            "{:<24} {:<32} {} keyword(s), {} component(s)",
            persona.persona,
            persona.display_name(),
            persona.keywords.len(),
            persona.components.len(),
        )?;
    }
    Ok(())
}

fn check_config(args: &ArgMatches) -> Result<()> {
    let config = config_from(args)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
