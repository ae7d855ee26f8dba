//! Sentra CLI - scan DAG planner, validator and runner

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use sentra::error::{FixSuggestion, Result};
use sentra::{
    dag, modules, DagSchema, ModuleRegistry, NodeStatus, Orchestrator, Planner, ScanIntent,
    ScanLevel, ScanProfile,
};

#[derive(Parser)]
#[command(name = "sentra")]
#[command(about = "Sentra - modular vulnerability-scan orchestration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan (or load) a scan DAG and run it
    Scan {
        #[command(flatten)]
        intent: IntentArgs,

        /// Run a DAG file instead of planning from the intent
        #[arg(long)]
        dag: Option<String>,

        /// Print the run event trace as JSON after the scan
        #[arg(long)]
        trace: bool,
    },

    /// Work with DAG files
    Dag {
        #[command(subcommand)]
        action: DagAction,
    },

    /// Inspect registered modules
    Modules {
        #[command(subcommand)]
        action: ModulesAction,
    },
}

#[derive(Subcommand)]
enum DagAction {
    /// Validate a DAG file and print every error and warning
    Validate {
        /// Path to a .yaml/.yml/.json DAG file
        file: String,
    },

    /// Plan a DAG from an intent and write it to a file
    Export {
        /// Output path; format is picked from the extension
        out: String,

        #[command(flatten)]
        intent: IntentArgs,
    },

    /// Print the topological execution layers of a DAG file
    Order {
        /// Path to a .yaml/.yml/.json DAG file
        file: String,
    },
}

#[derive(Subcommand)]
enum ModulesAction {
    /// List registered modules with their data contracts
    List,
}

#[derive(Args)]
struct IntentArgs {
    /// Target host, CIDR block or dash range (repeatable)
    #[arg(short, long = "target")]
    targets: Vec<String>,

    /// Selection preset: quick_discovery or full_scan
    #[arg(long)]
    profile: Option<String>,

    /// Refinement: light, comprehensive or intrusive
    #[arg(long)]
    level: Option<String>,

    /// Keep only modules carrying at least one of these tags (repeatable)
    #[arg(long = "include-tag")]
    include_tags: Vec<String>,

    /// Drop modules carrying any of these tags (repeatable)
    #[arg(long = "exclude-tag")]
    exclude_tags: Vec<String>,

    /// Include evaluation-type modules
    #[arg(long = "vuln-checks")]
    enable_vuln_checks: bool,

    /// Port spec override, e.g. "22,80,8000-8100"
    #[arg(long)]
    ports: Option<String>,

    /// Timeout override in seconds for timeout-shaped module params
    #[arg(long)]
    timeout: Option<u64>,

    /// Discovery probe repetition budget
    #[arg(long)]
    ping_count: Option<u32>,

    /// Keep loopback targets instead of filtering them
    #[arg(long)]
    allow_loopback: bool,

    /// Per-module concurrency override
    #[arg(long)]
    concurrency: Option<usize>,
}

impl IntentArgs {
    fn into_intent(self) -> Result<ScanIntent> {
        Ok(ScanIntent {
            targets: self.targets,
            profile: self
                .profile
                .as_deref()
                .map(|s| s.parse::<ScanProfile>())
                .transpose()?,
            level: self
                .level
                .as_deref()
                .map(|s| s.parse::<ScanLevel>())
                .transpose()?,
            include_tags: self.include_tags,
            exclude_tags: self.exclude_tags,
            enable_vuln_checks: self.enable_vuln_checks,
            custom_port_config: self.ports,
            custom_timeout: self.timeout,
            ping_count: self.ping_count,
            allow_loopback: self.allow_loopback,
            concurrency: self.concurrency,
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    modules::register_builtins(ModuleRegistry::global());

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Scan { intent, dag, trace } => run_scan(intent, dag, trace).await,
        Commands::Dag { action } => match action {
            DagAction::Validate { file } => validate_dag(&file),
            DagAction::Export { out, intent } => export_dag(&out, intent),
            DagAction::Order { file } => print_order(&file),
        },
        Commands::Modules { action } => match action {
            ModulesAction::List => list_modules(),
        },
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(e.exit_code());
    }
}

/// Plan or load a schema, validate it, print warnings
fn prepare_schema(intent: &ScanIntent, dag_file: Option<&str>) -> Result<DagSchema> {
    let schema = match dag_file {
        Some(path) => dag::load_schema(path)?,
        None => {
            let plan = Planner::from_global().plan(intent)?;
            for diag in &plan.diagnostics {
                if diag.unmet_keys.is_empty() {
                    println!(
                        "  {} module '{}' left out (type already planned)",
                        "!".yellow(),
                        diag.module
                    );
                } else {
                    println!(
                        "  {} module '{}' left out, unmet keys: {}",
                        "!".yellow(),
                        diag.module,
                        diag.unmet_keys.join(", ")
                    );
                }
            }
            plan.schema
        }
    };

    let result = dag::validate(&schema);
    for warning in &result.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    result.ensure_valid()?;
    Ok(schema)
}

async fn run_scan(intent: IntentArgs, dag_file: Option<String>, trace: bool) -> Result<()> {
    let intent = intent.into_intent()?;
    let schema = prepare_schema(&intent, dag_file.as_deref())?;

    println!(
        "{} Running '{}' ({} nodes)...",
        "→".cyan(),
        schema.name.cyan().bold(),
        schema.nodes.len()
    );

    let mut orchestrator = Orchestrator::from_global(&schema)?;
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let outcome = orchestrator.run(cancel, intent.initial_inputs()).await;

    for node in orchestrator.nodes() {
        let (symbol, detail) = match node.status {
            NodeStatus::Completed => ("✓".green(), String::new()),
            NodeStatus::Failed => (
                "✗".red(),
                node.error.clone().unwrap_or_default(),
            ),
            _ => ("-".dimmed(), "not run".to_string()),
        };
        if detail.is_empty() {
            println!("  {} {}", symbol, node.id);
        } else {
            println!("  {} {} ({})", symbol, node.id, detail.dimmed());
        }
    }

    let snapshot = outcome?;

    if let Some(summary) = snapshot.get("report.summary") {
        // streamed values land in the context as lists; show the payload
        let summary = summary
            .as_array()
            .and_then(|list| list.last())
            .unwrap_or(summary);
        println!("\n{}", "Report:".cyan().bold());
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
    } else {
        println!("\n{} {} context keys", "✓".green(), snapshot.len());
        let mut keys: Vec<&String> = snapshot.keys().collect();
        keys.sort();
        for key in keys {
            println!("  {}", key);
        }
    }

    if trace {
        println!("\n{}", "Trace:".cyan().bold());
        println!(
            "{}",
            serde_json::to_string_pretty(&orchestrator.event_log().to_json()).unwrap_or_default()
        );
    }

    Ok(())
}

fn validate_dag(file: &str) -> Result<()> {
    let schema = dag::load_schema(file)?;
    let result = dag::validate(&schema);

    for error in &result.errors {
        println!("  {} {}", "error:".red(), error);
    }
    for warning in &result.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    result.ensure_valid()?;

    println!(
        "{} DAG '{}' is valid ({} nodes, {} warnings)",
        "✓".green(),
        schema.name,
        schema.nodes.len(),
        result.warnings.len()
    );
    Ok(())
}

fn export_dag(out: &str, intent: IntentArgs) -> Result<()> {
    let intent = intent.into_intent()?;
    let plan = Planner::from_global().plan(&intent)?;
    dag::validate(&plan.schema).ensure_valid()?;
    dag::save_schema(&plan.schema, out)?;

    println!(
        "{} Wrote '{}' ({} nodes) to {}",
        "✓".green(),
        plan.schema.name,
        plan.schema.nodes.len(),
        out
    );
    Ok(())
}

fn print_order(file: &str) -> Result<()> {
    let schema = dag::load_schema(file)?;
    let layers = dag::execution_order(&schema)?;

    for (i, layer) in layers.iter().enumerate() {
        println!("  {} {}", format!("[{}]", i).cyan(), layer.join(", "));
    }
    Ok(())
}

fn list_modules() -> Result<()> {
    let registry = ModuleRegistry::global();
    for name in registry.module_names() {
        let Some(meta) = registry.metadata(&name) else { continue };
        let consumes: Vec<&str> = meta.consumes.iter().map(|c| c.key.as_str()).collect();
        let produces: Vec<&str> = meta.produces.iter().map(|c| c.key.as_str()).collect();
        println!(
            "{} {} ({}, tags: {})",
            name.cyan().bold(),
            format!("v{}", meta.version).dimmed(),
            meta.module_type,
            meta.tags.join(",")
        );
        println!(
            "    {} -> {}",
            if consumes.is_empty() {
                "(nothing)".to_string()
            } else {
                consumes.join(", ")
            },
            if produces.is_empty() {
                "(nothing)".to_string()
            } else {
                produces.join(", ")
            }
        );
    }
    Ok(())
}
