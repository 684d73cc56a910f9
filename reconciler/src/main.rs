//! Reconcile / predict / verify loop for tracked work items.
//!
//! Items live under `.reconciler/items/`; each `pass` reacts to one signal,
//! records what it expects to observe next time and verifies the previous
//! pass's expectations first.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;

use reconciler::core::signal::Signal;
use reconciler::core::tree::PredictableTree;
use reconciler::core::types::Target;
use reconciler::exit_codes;
use reconciler::io::StatePaths;
use reconciler::io::agent::CommandAgent;
use reconciler::io::config::load_config;
use reconciler::io::init::{InitOptions, init_state};
use reconciler::io::store::ItemStore;
use reconciler::io::system::IssueSystem;
use reconciler::logging;
use reconciler::pass::{PassOptions, plan, run_pass, verify_recorded};

#[derive(Parser)]
#[command(
    name = "reconciler",
    version,
    about = "Reconcile, predict and verify tracked work items"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.reconciler/` with a default config.
    Init {
        /// Overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the transition a signal would trigger.
    Derive {
        #[arg(long)]
        item: u64,
        /// Signal as JSON, e.g. `{"type":"ci-completed","result":"failure"}`.
        #[arg(long)]
        signal: String,
    },
    /// Print the predicted outcome set for a signal.
    Predict {
        #[arg(long)]
        item: u64,
        #[arg(long)]
        signal: String,
    },
    /// Run one full pass: verify, derive, predict, execute.
    Pass {
        #[arg(long)]
        item: u64,
        #[arg(long)]
        signal: String,
        /// Record every action as skipped.
        #[arg(long)]
        dry_run: bool,
    },
    /// Verify recorded expectations against the item's current state.
    Verify {
        #[arg(long)]
        item: u64,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Derive { item, signal } => cmd_derive(&root, item, &signal),
        Command::Predict { item, signal } => cmd_predict(&root, item, &signal),
        Command::Pass {
            item,
            signal,
            dry_run,
        } => cmd_pass(&root, item, &signal, dry_run),
        Command::Verify { item } => cmd_verify(&root, item),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_state(root, &InitOptions { force })?;
    println!("initialized {}", paths.dir.display());
    Ok(exit_codes::OK)
}

fn cmd_derive(root: &Path, item: u64, signal: &str) -> Result<i32> {
    let (paths, store) = open_store(root)?;
    let config = load_config(&paths.config_path)?;
    let (transition, _) = plan(&store, &config, item, &parse_signal(signal)?)?;
    print_json(&transition)?;
    Ok(exit_codes::OK)
}

fn cmd_predict(root: &Path, item: u64, signal: &str) -> Result<i32> {
    let (paths, store) = open_store(root)?;
    let config = load_config(&paths.config_path)?;
    let (_, outcomes) = plan(&store, &config, item, &parse_signal(signal)?)?;
    print_json(&outcomes)?;
    Ok(exit_codes::OK)
}

fn cmd_pass(root: &Path, item: u64, signal: &str, dry_run: bool) -> Result<i32> {
    let (paths, mut store) = open_store(root)?;
    let config = load_config(&paths.config_path)?;
    let agent = CommandAgent::new(root, &config);
    let outcome = run_pass(
        &paths,
        &mut store,
        &agent,
        &config,
        item,
        parse_signal(signal)?,
        &PassOptions {
            dry_run: dry_run || config.dry_run,
        },
    )?;
    print_json(&outcome)?;
    Ok(match outcome.target {
        Target::Blocked | Target::Error => exit_codes::BLOCKED,
        _ => exit_codes::OK,
    })
}

#[derive(Serialize)]
struct VerifyOutput {
    item: u64,
    current: PredictableTree,
    #[serde(flatten)]
    verification: reconciler::core::verify::Verification,
}

fn cmd_verify(root: &Path, item: u64) -> Result<i32> {
    let (paths, store) = open_store(root)?;
    let (_, verification) = verify_recorded(&paths, &store, item)?
        .ok_or_else(|| anyhow!("no expectations recorded for #{item}"))?;
    let current = PredictableTree::from_snapshot(&store.fetch(item)?);
    let pass = verification.pass;
    print_json(&VerifyOutput {
        item,
        current,
        verification,
    })?;
    Ok(if pass {
        exit_codes::OK
    } else {
        exit_codes::MISMATCH
    })
}

fn open_store(root: &Path) -> Result<(StatePaths, ItemStore)> {
    let paths = StatePaths::new(root);
    if !paths.dir.is_dir() {
        return Err(anyhow!(
            "{} not found (run `reconciler init` first)",
            paths.dir.display()
        ));
    }
    let config = load_config(&paths.config_path)?;
    let store = ItemStore::open(&paths, config.repo.clone(), &config.bot_login)?;
    Ok((paths, store))
}

fn parse_signal(raw: &str) -> Result<Signal> {
    serde_json::from_str(raw).with_context(|| format!("parse signal {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{out}");
    Ok(())
}
