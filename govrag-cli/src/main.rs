//! # govrag CLI entry point
//!
//! Evaluates proposed actions against a policy document, either one-shot or
//! in an interactive loop, and manages the policy index and decision log.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use govrag_agent::{DecisionMemory, WorkflowEngine, WorkflowState};
use govrag_cli::{GovragConfig, build_engine, engine, join_lines, parse_input};
use govrag_index::PolicyIndex;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

const RULE: &str = "============================================================";

/// Retrieval-augmented policy compliance decisions.
#[derive(Parser, Debug)]
#[command(name = "govrag", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a YAML configuration file.
    #[arg(long, global = true, env = "GOVRAG_CONFIG")]
    config: Option<PathBuf>,

    /// Policy document to evaluate against.
    #[arg(long, global = true, env = "GOVRAG_POLICY")]
    policy: Option<PathBuf>,

    /// Directory holding the persisted policy index.
    #[arg(long, global = true, env = "GOVRAG_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Decision log (JSON Lines).
    #[arg(long, global = true, env = "GOVRAG_MEMORY")]
    memory: Option<PathBuf>,

    /// Base URL of an OpenAI-compatible chat completions server.
    #[arg(long, global = true, env = "GOVRAG_LLM_URL")]
    llm_url: Option<String>,

    /// Model name to request from the language model server.
    #[arg(long, global = true, env = "GOVRAG_LLM_MODEL")]
    llm_model: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a single action and print the decision as JSON.
    Evaluate {
        /// The proposed action.
        action: String,
        /// The context the action is taken in.
        #[arg(short, long)]
        context: String,
    },

    /// Read actions interactively (the default).
    Interactive,

    /// Rebuild the policy index regardless of staleness.
    Reindex,

    /// Show recent decisions from the log.
    History {
        /// Number of entries to show.
        #[arg(short = 'n', long, default_value_t = 8)]
        limit: usize,
    },
}

impl Cli {
    fn load_config(&self) -> Result<GovragConfig> {
        let mut config = GovragConfig::load(self.config.as_deref())?;
        if let Some(policy) = &self.policy {
            config.policy_path = policy.clone();
        }
        if let Some(index_dir) = &self.index_dir {
            config.index.index_dir = index_dir.clone();
        }
        if let Some(memory) = &self.memory {
            config.memory_path = memory.clone();
        }
        if let Some(url) = &self.llm_url {
            config.llm.base_url = Some(url.clone());
        }
        if let Some(model) = &self.llm_model {
            config.llm.model = model.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,govrag=info")),
        1 => EnvFilter::new("warn,govrag=debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.load_config()?;
    tracing::debug!(policy = %config.policy_path.display(), index_dir = %config.index.index_dir.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Interactive) {
        Commands::Evaluate { action, context } => {
            let engine = build_engine(&config).await?;
            let state = engine.run(&action, &context).await;
            Ok(if report(&state)? { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Interactive => {
            let engine = build_engine(&config).await?;
            interactive(&engine).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reindex => {
            reindex(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { limit } => {
            history(&config, limit).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn interactive(engine: &WorkflowEngine) -> Result<()> {
    let mut editor = DefaultEditor::new()?;

    println!("{RULE}");
    println!("govrag - policy compliance evaluation");
    println!("{RULE}");
    println!("Enter an action in one of these formats:");
    println!("  1. JSON: {{\"action\": \"...\", \"context\": \"...\"}}");
    println!("  2. Plain: Action description [Context description]");
    println!("Without a context you are asked for one.");
    println!("Finish with an empty line. Submit nothing to exit.\n");

    loop {
        let Some(block) = read_block(&mut editor)? else {
            break;
        };
        let mut input = parse_input(&block);
        if input.is_empty() {
            break;
        }
        let _ = editor.add_history_entry(block.as_str());

        if input.needs_context() {
            match editor.readline("context> ") {
                Ok(line) => input = input.with_context(&line),
                Err(ReadlineError::Eof | ReadlineError::Interrupted) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let state = engine.run(&input.action, &input.context).await;
        report(&state)?;
        println!("\n{RULE}");
    }

    println!("Exiting.");
    Ok(())
}

/// Read lines until an empty line follows some input. `None` on EOF or
/// interrupt with nothing entered.
fn read_block(editor: &mut DefaultEditor) -> Result<Option<String>> {
    let mut lines: Vec<String> = Vec::new();
    loop {
        let prompt = if lines.is_empty() { "govrag> " } else { "   ...> " };
        match editor.readline(prompt) {
            Ok(line) if line.trim().is_empty() => {
                if !lines.is_empty() {
                    break;
                }
            }
            Ok(line) => lines.push(line),
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                if lines.is_empty() {
                    return Ok(None);
                }
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(join_lines(lines.iter().map(String::as_str))))
}

/// Print the retrieved clauses and the decision. Returns whether the run
/// completed.
fn report(state: &WorkflowState) -> Result<bool> {
    if !state.retrieved_clauses.is_empty() {
        println!("\nRetrieved policy clauses:");
        for (i, clause) in state.retrieved_clauses.iter().enumerate() {
            println!("  {}. [{}] score {:.3}", i + 1, clause.reference, clause.score);
            println!("     {}", preview(&clause.text, 100));
        }
    }

    if let Some(failure) = &state.error {
        eprintln!("\nEvaluation failed: {failure}");
        return Ok(false);
    }
    if let Some(decision) = &state.decision {
        if state.used_fallback {
            println!("\n(language model unavailable, placeholder decision)");
        }
        println!("\nDecision:");
        println!("{}", serde_json::to_string_pretty(decision)?);
    }
    Ok(true)
}

async fn reindex(config: &GovragConfig) -> Result<()> {
    let text = tokio::fs::read_to_string(&config.policy_path)
        .await
        .with_context(|| format!("cannot read policy document {}", config.policy_path.display()))?;
    let index = PolicyIndex::new(config.index.clone(), engine::embedder(&config.embedding)?)?;
    let manifest = index.rebuild(&text).await?;
    println!(
        "Rebuilt policy index at {}: {} chunks, {} dimensions, generation {}",
        config.index.index_dir.display(),
        manifest.chunk_count,
        manifest.embedding_dim,
        manifest.generation
    );
    Ok(())
}

async fn history(config: &GovragConfig, limit: usize) -> Result<()> {
    let memory = DecisionMemory::open(&config.memory_path).await?;
    let entries = memory.recent(limit).await;
    if entries.is_empty() {
        println!("No decisions recorded in {}.", config.memory_path.display());
    }
    for entry in entries {
        println!(
            "{} [{}] {} ({})",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.decision.decision,
            entry.action,
            entry.context
        );
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_interactive() {
        let cli = Cli::try_parse_from(["govrag"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn evaluate_takes_action_and_context() {
        let cli = Cli::try_parse_from([
            "govrag",
            "evaluate",
            "Store user data on an analytics server",
            "--context",
            "fast reporting",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Evaluate { action, context }) => {
                assert_eq!(action, "Store user data on an analytics server");
                assert_eq!(context, "fast reporting");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "govrag",
            "--policy",
            "policies/p.txt",
            "--llm-url",
            "http://localhost:11434/v1",
            "history",
            "-n",
            "3",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.policy_path, PathBuf::from("policies/p.txt"));
        assert_eq!(config.llm.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert!(matches!(cli.command, Some(Commands::History { limit: 3 })));
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\n\nb", 10), "a b");
        assert_eq!(preview(&"x".repeat(20), 5), "xxxxx...");
    }
}
