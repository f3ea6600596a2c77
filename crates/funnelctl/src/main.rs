//! funnelctl - route natural-language requests to local operations

mod operations;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use funnel::{
    ChatMessage, DispatchRequest, Dispatcher, EmbeddingRetriever, OpenAiBackend,
    OperationRegistry, Retriever, TokenHashEmbedder,
};
use funnelconf::{ConfigSources, FunnelConfig};
use tracing::info;

/// Route natural-language requests to local operations through LLM function calling
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, replaces ./funnel.toml
    #[arg(long, global = true, env = "FUNNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Load operations from the operation.toml manifests under this directory
    #[arg(long, global = true)]
    operations_dir: Option<PathBuf>,

    /// Use the local token-hash embedder instead of the embeddings API
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every registered operation schema as JSON
    Operations,

    /// Show which operations a query would shortlist
    Search {
        query: String,

        /// Number of results (defaults to dispatch.default_k)
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Dispatch a message: shortlist, ask the model, run the chosen operation
    Dispatch {
        message: String,

        /// Function-calling model (defaults to openai.function_calling_model)
        #[arg(long)]
        model: Option<String>,

        /// Shortlist size (defaults to dispatch.default_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// System message placed before the user message
        #[arg(long)]
        system: Option<String>,
    },

    /// Run an operation directly with JSON arguments
    Run {
        name: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Print the effective configuration and where it came from
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = FunnelConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let telemetry = telemetry::init(&config.telemetry).context("Failed to initialize logging")?;
    let result = run(cli, config, sources).await;
    telemetry.shutdown();
    result
}

async fn run(cli: Cli, config: FunnelConfig, sources: ConfigSources) -> Result<()> {
    match cli.command {
        Command::Config => {
            print_config(&config, &sources);
        }
        Command::Operations => {
            let registry = load_registry(cli.operations_dir.as_deref(), &config)?;
            print_json(&registry.schemas())?;
        }
        Command::Search { ref query, k } => {
            let host = Host::new(&cli, &config).await?;
            let k = k.unwrap_or(config.dispatch.default_k);
            let names = host.retriever.search(query, k).await?;
            print_json(&names)?;
        }
        Command::Dispatch {
            ref message,
            ref model,
            k,
            ref system,
        } => {
            let host = Host::new(&cli, &config).await?;
            let request = DispatchRequest::new(
                model
                    .clone()
                    .unwrap_or_else(|| config.openai.function_calling_model.clone()),
                build_messages(system.clone(), message.clone()),
                k.unwrap_or(config.dispatch.default_k),
            );
            let result = host.dispatcher(&config).dispatch(request).await?;
            print_json(&result)?;
        }
        Command::Run { ref name, ref args } => {
            let arguments: serde_json::Value =
                serde_json::from_str(args).context("--args is not valid JSON")?;
            let host = Host::unindexed(&cli, &config)?;
            let result = host.dispatcher(&config).run_operation(name, arguments).await;
            print_json(&result)?;
        }
    }

    Ok(())
}

/// Registry, OpenAI backend and retriever wired from config
struct Host {
    registry: Arc<OperationRegistry>,
    backend: OpenAiBackend,
    retriever: Arc<dyn Retriever>,
}

impl Host {
    fn unindexed(cli: &Cli, config: &FunnelConfig) -> Result<Self> {
        let registry = Arc::new(load_registry(cli.operations_dir.as_deref(), config)?);
        let backend = OpenAiBackend::from_config(&config.openai)?;
        let retriever: Arc<dyn Retriever> = if cli.offline {
            Arc::new(EmbeddingRetriever::new(TokenHashEmbedder::new()))
        } else {
            Arc::new(EmbeddingRetriever::new(backend.clone()))
        };

        Ok(Self {
            registry,
            backend,
            retriever,
        })
    }

    async fn new(cli: &Cli, config: &FunnelConfig) -> Result<Self> {
        let host = Self::unindexed(cli, config)?;
        host.retriever
            .index(&host.registry)
            .await
            .context("Failed to index operations")?;
        Ok(host)
    }

    fn dispatcher(self, config: &FunnelConfig) -> Dispatcher {
        Dispatcher::new(self.registry, self.retriever, Arc::new(self.backend)).configured(config)
    }
}

/// Manifests from `--operations-dir` or the configured directory when it
/// exists, otherwise every built-in operation.
fn load_registry(operations_dir: Option<&Path>, config: &FunnelConfig) -> Result<OperationRegistry> {
    let catalog = operations::catalog()?;

    let root = match operations_dir {
        Some(dir) => Some(dir.to_path_buf()),
        None => Some(config.registry.operations_dir.clone()).filter(|d| d.is_dir()),
    };

    let registry = match root {
        Some(root) => {
            info!("Loading operations from {}", root.display());
            OperationRegistry::load(&root, catalog)?
        }
        None => {
            info!("Using built-in operations");
            OperationRegistry::from_operations(catalog.into_descriptors())?
        }
    };
    Ok(registry)
}

fn build_messages(system: Option<String>, message: String) -> Vec<ChatMessage> {
    system
        .map(ChatMessage::system)
        .into_iter()
        .chain(std::iter::once(ChatMessage::user(message)))
        .collect()
}

fn print_config(config: &FunnelConfig, sources: &ConfigSources) {
    println!("# Config files (in load order):");
    if sources.files.is_empty() {
        println!("#   (none, using defaults)");
    }
    for file in &sources.files {
        println!("#   {}", file.display());
    }
    if !sources.env_overrides.is_empty() {
        println!("# Environment overrides: {}", sources.env_overrides.join(", "));
    }
    println!();
    print!("{}", config.to_toml());
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
