//! Deckgen CLI - command-line bridge to the conversion engine
//!
//! Commands: templates, validate, convert
//! Exit codes: 0 clean, 2 failed or stale pairs, 1 fatal setup error

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deckgen_core::{
    BatchRequest, BatchResult, Config, ConversionPipeline, DiskStorage, PairResult, Selection,
    WriteStatus, CONFIG_FILE_NAME,
    pipeline::{LanguageStatus, LanguageSummary},
};

#[derive(Parser, Debug)]
#[command(name = "deckgen-cli", version)]
#[command(about = "Deckgen CLI - render per-language deck sources through target templates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./deckgen.yaml when it exists)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding `<language>.yaml` sources
    #[arg(long, global = true)]
    source_root: Option<PathBuf>,

    /// Directory holding `*.tmpl` templates
    #[arg(long, global = true)]
    template_root: Option<PathBuf>,

    /// Directory receiving `<target>/<artifact>` outputs
    #[arg(long, global = true)]
    output_root: Option<PathBuf>,

    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available templates as JSON
    Templates,

    /// Load, validate and build the IR without rendering
    Validate {
        /// Languages: `all` or a comma-separated list
        #[arg(short, long, default_value = "all")]
        language: Selection,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render the language x target matrix
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Languages: `all` or a comma-separated list
    #[arg(short, long, default_value = "all")]
    language: Selection,

    /// Targets: `all` or a comma-separated list
    #[arg(short, long, default_value = "all")]
    target: Selection,

    /// Abort on the first failure
    #[arg(long)]
    strict: bool,

    /// Compare with existing outputs instead of writing
    #[arg(long)]
    check: bool,

    /// Also write `<output_root>/manifest.json`
    #[arg(long)]
    manifest: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let default_path = Path::new(CONFIG_FILE_NAME);
    let mut config = match &cli.config {
        Some(path) => Config::load(&DiskStorage, path)?,
        None if default_path.is_file() => Config::load(&DiskStorage, default_path)?,
        None => Config::default(),
    };

    if let Some(root) = &cli.source_root {
        config.source_root = root.clone();
    }
    if let Some(root) = &cli.template_root {
        config.template_root = root.clone();
    }
    if let Some(root) = &cli.output_root {
        config.output_root = root.clone();
    }
    Ok(config)
}

fn run(cli: &Cli) -> anyhow::Result<u8> {
    let config = load_config(cli)?;
    let storage = DiskStorage;
    let pipeline = ConversionPipeline::from_config(&storage, &config)
        .context("failed to initialize conversion engine")?;

    match &cli.command {
        Commands::Templates => {
            let templates: Vec<_> = pipeline
                .templates()
                .list()
                .iter()
                .map(|t| t.summary())
                .collect();
            println!("{}", serde_json::to_string_pretty(&templates)?);
            Ok(0)
        }

        Commands::Validate { language, json } => {
            let summaries = match pipeline.validate(language) {
                Ok(summaries) => summaries,
                Err(e) if !e.is_fatal() => {
                    eprintln!("error: {e}");
                    return Ok(2);
                }
                Err(e) => return Err(e.into()),
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print_languages(&summaries);
            }
            Ok(if summaries.iter().all(LanguageSummary::is_built) { 0 } else { 2 })
        }

        Commands::Convert(args) => convert(&pipeline, args, config.strict),
    }
}

fn convert(pipeline: &ConversionPipeline<'_>, args: &ConvertArgs, strict: bool) -> anyhow::Result<u8> {
    let request = BatchRequest {
        languages: args.language.clone(),
        targets: args.target.clone(),
        strict: args.strict || strict,
        check: args.check,
    };

    let result = match pipeline.run(&request) {
        Ok(result) => result,
        // Strict aborts on a per-pair error; global template errors stay fatal.
        Err(e) if !e.is_fatal() => {
            eprintln!("error: {e}");
            return Ok(2);
        }
        Err(e) => return Err(e.into()),
    };

    let mut clean = result.is_clean();
    if args.manifest {
        let manifest = result.manifest()?;
        let outcome = pipeline.write_manifest(&manifest, args.check)?;
        clean &= outcome.status != WriteStatus::Stale;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_report(&result);
    }
    Ok(if clean { 0 } else { 2 })
}

fn print_languages(summaries: &[LanguageSummary]) {
    for summary in summaries {
        match &summary.status {
            LanguageStatus::Built { entries, fingerprint } => println!(
                "ok    {:<8} {entries} entries, ir {}",
                summary.language,
                fingerprint.get(..12).unwrap_or(fingerprint)
            ),
            LanguageStatus::Failed { kind, message, violations } => {
                println!("FAIL  {:<8} [{kind}] {message}", summary.language);
                for violation in violations {
                    println!("        {violation}");
                }
            }
        }
    }
}

fn print_report(result: &BatchResult) {
    for outcome in &result.outcomes {
        let pair = format!("{}/{}", outcome.language, outcome.target);
        match &outcome.result {
            PairResult::Success { path, status, .. } => {
                let tag = if *status == WriteStatus::Stale { "STALE" } else { "ok" };
                println!("{tag:<5} {pair:<20} {} ({status})", path.display());
            }
            PairResult::Failure { kind, message } => {
                println!("FAIL  {pair:<20} [{kind}] {message}");
            }
        }
    }
    println!(
        "{} pair(s), {} failed, {} stale",
        result.outcomes.len(),
        result.failures().count(),
        result.stale().count()
    );
}
