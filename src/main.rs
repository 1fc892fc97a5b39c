use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use trellis::config::Config;
use trellis::core::graph::{Graph, NodeKind};
use trellis::core::loader::load_graph;
use trellis::orchestration::{CommandWorker, ExecutionPlan, GraphExecutor, RunResult};
use trellis::util::truncate_chars;
use trellis::{tlog, Result};

/// Trellis - run graphs of worker calls
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TRELLIS_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.trellis/trellis.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Load and validate a graph file
    Validate {
        /// Graph definition (.toml or .json)
        graph: PathBuf,
    },

    /// Show the execution order and parallel groups of a graph
    Plan {
        /// Graph definition (.toml or .json)
        graph: PathBuf,
    },

    /// Run a graph for a task
    Run {
        /// Graph definition (.toml or .json)
        graph: PathBuf,

        /// The task handed to every entry node
        task: String,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,

        /// Worker command (overrides the config file)
        #[arg(long)]
        command: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    trellis::log::init_with_debug(cli.debug);
    if cli.debug {
        tlog!("Trellis starting (debug mode enabled)");
    } else {
        tlog!("Trellis starting");
    }

    match cli.command {
        Command::Validate { graph } => run_validate(graph),
        Command::Plan { graph } => run_plan(graph),
        Command::Run {
            graph,
            task,
            json,
            command,
        } => run_graph(graph, task, json, command),
    }
}

/// Load a graph and print its shape.
fn run_validate(path: PathBuf) -> Result<()> {
    tlog!("Validate command: graph={}", path.display());
    let graph = load_graph(&path)?;

    println!("Graph {:?} is valid", graph.name);
    println!("  Nodes:   {}", graph.node_count());
    for node in graph.nodes() {
        println!("    • {} ({})", node.id, node.kind_name());
    }
    println!("  Edges:   {}", graph.edges().len());
    println!("  Entry:   {}", graph.entry_nodes().join(", "));
    println!("  Exit:    {}", graph.exit_nodes().join(", "));
    Ok(())
}

/// Print the topological order and the parallel groups.
fn run_plan(path: PathBuf) -> Result<()> {
    tlog!("Plan command: graph={}", path.display());
    let graph = load_graph(&path)?;
    let plan = ExecutionPlan::for_graph(&graph);

    println!("Graph {:?}", graph.name);
    println!("  Order:   {}", plan.order.join(" -> "));
    println!("  Groups:");
    for (i, group) in plan.groups.iter().enumerate() {
        println!("    {}. {}", i + 1, describe_group(&graph, group));
    }
    Ok(())
}

/// Run a graph with the configured worker command.
fn run_graph(path: PathBuf, task: String, json: bool, command: Option<String>) -> Result<()> {
    tlog!(
        "Run command: graph={}, task={:?}, json={}, command={:?}",
        path.display(),
        task,
        json,
        command
    );

    let mut config = Config::load()?;
    if command.is_some() {
        config.command = command;
    }

    let graph = load_graph(&path)?;
    let worker = CommandWorker::new(config.effective_command(), config.effective_args())?;
    let generator = CommandWorker::new(
        config.effective_generator_command(),
        config.effective_generator_args(),
    )?;
    let executor = GraphExecutor::new(graph, Arc::new(worker), Arc::new(generator))?
        .with_default_transform(config.effective_transform());

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(executor.run(&task))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(result: &RunResult) {
    println!();
    println!("  Graph:    {}", result.graph_name);
    println!("  Run:      {}", result.context_id.short());
    println!("  Status:   {}", format_status(result.success));
    println!("  Elapsed:  {} ms", result.metadata.elapsed_ms);
    println!();

    for r in &result.results {
        match &r.error {
            Some(error) => println!("  \x1b[31m✗\x1b[0m {}: {}", r.label, error),
            None => println!(
                "  \x1b[32m✓\x1b[0m {} ({} chars)",
                r.label,
                r.output.chars().count()
            ),
        }
    }
    if !result.skipped.is_empty() {
        println!("  Skipped:  {}", result.skipped.join(", "));
    }

    println!();
    println!("─────────────────────────────────────────────────────────────");
    println!("{}", result.final_output());
}

fn format_status(success: bool) -> String {
    if success {
        "\x1b[32mcompleted\x1b[0m".to_string()
    } else {
        "\x1b[31mfailed\x1b[0m".to_string()
    }
}

fn describe_group(graph: &Graph, group: &[String]) -> String {
    group
        .iter()
        .map(|id| match graph.node(id).map(|n| &n.kind) {
            Some(NodeKind::Dynamic(spec)) => {
                let prompt = spec
                    .generator
                    .as_ref()
                    .map(|g| truncate_chars(&g.prompt, 40))
                    .unwrap_or_default();
                format!("{} [dynamic: {:?}]", id, prompt)
            }
            _ => id.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
