//! opsbook CLI - run, lint, format and scaffold runbooks.
//!
//! Usage:
//!   opsbook run <patterns...>      Run runbooks and print a tally
//!   opsbook lint <files...>        Check runbooks without running them
//!   opsbook fmt [--write] <file>   Reorder top-level keys canonically
//!   opsbook new [tokens...]        Generate a runbook from curl/command args
//!   opsbook reportportal <xml>     Upload JUnit results to ReportPortal

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use opsbook::capture::CmdOut;
use opsbook::{Operator, Options, RunbookBuilder};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "opsbook")]
#[command(version)]
#[command(about = "Declarative runbook scenario runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run runbooks matching the given paths or glob patterns
    Run {
        /// Runbook files or glob patterns (e.g. books/**/*.yml)
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Print per-step results
        #[arg(short, long)]
        verbose: bool,

        /// Print every protocol interaction
        #[arg(long)]
        debug: bool,

        /// Abort the batch on the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Skip test: hooks
        #[arg(long)]
        skip_test: bool,

        /// Skip books that are included from other loaded books
        #[arg(long)]
        skip_included: bool,

        /// Sleep between steps (e.g. 500ms)
        #[arg(long)]
        interval: Option<String>,

        /// Total number of shards
        #[arg(long)]
        shard_n: Option<usize>,

        /// Index of the shard to run (0-based)
        #[arg(long)]
        shard_index: Option<usize>,

        /// Run a random sample of N books
        #[arg(long)]
        sample: Option<usize>,

        /// Seed for sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Record per-step timing spans
        #[arg(long)]
        profile: bool,

        /// Write the profile to this file instead of stderr
        #[arg(long)]
        profile_out: Option<PathBuf>,

        /// Override a variable (key:value, repeatable)
        #[arg(long = "var")]
        vars: Vec<String>,
    },
    /// Check runbooks for build errors without running them
    Lint {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Reorder top-level keys to (desc, runners, vars, steps)
    Fmt {
        file: PathBuf,

        /// Rewrite the file in place
        #[arg(long)]
        write: bool,
    },
    /// Generate a runbook step from a curl command line or exec tokens
    New {
        /// Raw tokens: `curl …` becomes an HTTP step, anything else exec
        #[arg(required = true, trailing_var_arg = true)]
        tokens: Vec<String>,

        /// Runbook description
        #[arg(long, default_value = "generated runbook")]
        desc: String,
    },
    /// Send JUnit XML test results to ReportPortal
    #[command(alias = "rp")]
    Reportportal {
        /// JUnit XML file to upload
        xml_file: PathBuf,

        /// ReportPortal endpoint URL (or RP_ENDPOINT env)
        #[arg(long)]
        endpoint: Option<String>,

        /// API token (or RP_TOKEN env)
        #[arg(long)]
        token: Option<String>,

        /// Project name (or RP_PROJECT env)
        #[arg(long)]
        project: Option<String>,

        /// Launch name (defaults to the file stem)
        #[arg(long)]
        launch: Option<String>,

        /// Launch description
        #[arg(long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run {
            patterns,
            verbose,
            debug,
            fail_fast,
            skip_test,
            skip_included,
            interval,
            shard_n,
            shard_index,
            sample,
            seed,
            profile,
            profile_out,
            vars,
        } => {
            let mut opts = Options::new()
                .debug(debug)
                .fail_fast(fail_fast)
                .skip_test(skip_test)
                .skip_included(skip_included)
                .profile(profile);
            if let Some(interval) = interval {
                opts = opts.interval(parse_interval(&interval)?);
            }
            match (shard_n, shard_index) {
                (Some(n), Some(i)) => opts = opts.shard(n, i),
                (None, None) => {}
                _ => anyhow::bail!("--shard-n and --shard-index must be given together"),
            }
            if let Some(n) = sample {
                opts = opts.sample(n);
            }
            if let Some(s) = seed {
                opts = opts.seed(s);
            }
            for var in &vars {
                let (key, value) = var
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("--var needs key:value, got {var:?}"))?;
                let value: serde_yaml::Value = serde_yaml::from_str(value.trim())?;
                opts = opts.var(key.trim(), opsbook::book::yaml_to_json(&value)?);
            }

            let mut batch = opsbook::load(&patterns, &opts)?;
            for op in batch.operators_mut() {
                op.append_capturer(Box::new(CmdOut::stderr(verbose)));
            }

            let cancel = CancellationToken::new();
            let canceler = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceler.cancel();
                }
            });

            let outcome = batch.run_all(&cancel).await;
            eprintln!("{}", batch.result().summary());

            if profile {
                let spans: Vec<_> = batch
                    .operators()
                    .iter()
                    .flat_map(|op| op.profiler().records().iter().cloned())
                    .collect();
                let rendered = serde_json::to_string_pretty(&spans)?;
                match &profile_out {
                    Some(path) => std::fs::write(path, rendered)?,
                    None => eprintln!("{rendered}"),
                }
            }

            if let Err(e) = outcome {
                eprintln!("{} {}", "Error:".red().bold(), e);
                return Ok(1);
            }
            Ok(if batch.result().has_failure() { 1 } else { 0 })
        }
        Commands::Lint { files } => {
            let mut failures = 0;
            for file in &files {
                match Operator::new(Options::new().book(file)) {
                    Ok(_) => println!("{} {}", "ok".green(), file.display()),
                    Err(e) => {
                        failures += 1;
                        println!("{} {}: {e}", "error".red(), file.display());
                    }
                }
            }
            Ok(if failures > 0 { 1 } else { 0 })
        }
        Commands::Fmt { file, write } => {
            let (formatted, changed) = opsbook::fmt::format_file(&file, write)?;
            if !write {
                print!("{formatted}");
            } else if changed {
                eprintln!("rewrote {}", file.display());
            }
            Ok(0)
        }
        Commands::New { tokens, desc } => {
            let mut builder = RunbookBuilder::new(desc);
            builder.append_step(&tokens)?;
            print!("{}", builder.to_yaml()?);
            Ok(0)
        }
        Commands::Reportportal {
            xml_file,
            endpoint,
            token,
            project,
            launch,
            description,
        } => {
            let cfg = opsbook::reportportal::ImportConfig::resolve(
                endpoint,
                token,
                project,
                launch,
                description,
            )?;
            eprintln!("Sending test results to ReportPortal...");
            eprintln!("  Endpoint: {}", cfg.endpoint);
            eprintln!("  Project:  {}", cfg.project);
            eprintln!("  File:     {}", xml_file.display());
            let body = opsbook::reportportal::import_junit(&cfg, &xml_file).await?;
            println!("{} {body}", "Success!".green());
            Ok(0)
        }
    }
}

fn parse_interval(s: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(s.trim())
        .map_err(|e| anyhow::anyhow!("invalid --interval {s:?}: {e}"))
}
