use std::{
    path::{Path, PathBuf},
    process,
    str::FromStr,
    sync::Arc,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use schemars::schema_for;
use siphon::{
    config::{APP_NAME, APP_VERSION, AppConfig, resolve_root_dir},
    flow::{FlowFile, FlowManager},
    logger::init_tracing,
    metrics::{self, MetricsRegistry},
    plugins::PluginRegistry,
    scheduler::Scheduler,
};
use siphon_plugin::LogLevel;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "siphon",
    about = "Scheduled content pipelines",
    version
)]
struct Cli {
    /// Root directory holding `config/` and `flows/`
    #[arg(long, env = "SIPHON_ROOT", global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load every flow and schedule them until interrupted (default)
    Run(RunArgs),

    /// Check that a flow file loads
    Validate { file: PathBuf },

    /// Print the JSON Schema of the flow file format
    Schema,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Log level override (trace, debug, info, warn, error, critical)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(resolve_root_dir);

    let code = match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(root, args),
        Commands::Validate { file } => validate(root, file),
        Commands::Schema => schema(),
    };
    process::exit(code);
}

fn load_config(root: &Path) -> Option<AppConfig> {
    match AppConfig::load(root) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("could not load configuration from {}: {e:#}", root.display());
            None
        }
    }
}

fn run(root: PathBuf, args: RunArgs) -> i32 {
    let Some(mut config) = load_config(&root) else {
        return 1;
    };
    if let Some(level) = args.log_level {
        match LogLevel::from_str(&level) {
            Ok(level) => config.log_level = level,
            Err(_) => {
                eprintln!("invalid log level `{level}`");
                return 1;
            }
        }
    }

    if let Err(e) = init_tracing(config.log_level, config.log_dir.as_deref()) {
        eprintln!("could not set up logging: {e:#}");
        return 1;
    }
    info!("{APP_NAME} {APP_VERSION}");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.proc_num.max(1))
        .thread_name("siphon-worker")
        .enable_all()
        .build()
        .context("could not start the async runtime");
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{e:#}");
            return 1;
        }
    };

    runtime.block_on(serve(root, Arc::new(config)))
}

async fn serve(root: PathBuf, config: Arc<AppConfig>) -> i32 {
    let metrics = MetricsRegistry::new();
    if let Err(e) = metrics::serve(&config.exporter_listen, metrics.clone()).await {
        error!(error = %format!("{e:#}"), "could not start the metrics exporter");
        return 1;
    }

    let manager = FlowManager::new(Arc::new(PluginRegistry::with_builtins()), config.clone());
    let flow_dir = config.flow_dir();
    let flows = match manager.load_all_flows_from_dir(&flow_dir) {
        Ok(flows) => flows,
        Err(e) => {
            error!(root = %root.display(), error = %e, "could not read flows");
            return 1;
        }
    };

    let scheduler = match Scheduler::new(flows, metrics, config.loop_sleep()) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!(flow_dir = %flow_dir.display(), error = %e, "nothing to do");
            return 1;
        }
    };

    tokio::select! {
        _ = scheduler.run() => 0,
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("shutting down");
                0
            }
            Err(e) => {
                error!(error = %e, "could not listen for ctrl-c");
                1
            }
        },
    }
}

fn validate(root: PathBuf, file: PathBuf) -> i32 {
    let Some(config) = load_config(&root) else {
        return 1;
    };
    let manager = FlowManager::new(Arc::new(PluginRegistry::with_builtins()), Arc::new(config));
    match manager.load_flow_from_file(&file) {
        Ok(flow) => {
            println!("✅ Flow file is valid.");
            println!("   name: {}  hash: {}", flow.name(), flow.hash());
            0
        }
        Err(e) => {
            eprintln!("❌ {}: {e}", file.display());
            1
        }
    }
}

fn schema() -> i32 {
    let schema = schema_for!(FlowFile);
    match serde_json::to_string_pretty(&schema) {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(e) => {
            eprintln!("could not render schema: {e}");
            1
        }
    }
}
