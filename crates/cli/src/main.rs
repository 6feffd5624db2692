use anyhow::Context;
use clap::{Parser, Subcommand};
use lib::channels::{DetachedTransport, SlackClient};
use lib::store::{MappingRecord, MappingStore};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "wsbridge")]
#[command(about = "WhatsApp-Slack relay bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: WSBRIDGE_CONFIG_PATH or ~/.wsbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the bridge engine: open the store, verify the Slack token, and
    /// start the relay workers. The platform transports of the deployment
    /// feed the event queues.
    Run {
        /// Config file path (default: WSBRIDGE_CONFIG_PATH or ~/.wsbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Inspect or edit the mapping document directly.
    Maps {
        #[command(subcommand)]
        action: MapsAction,
    },
}

#[derive(Subcommand)]
enum MapsAction {
    /// List all conversation-channel pairs.
    List {
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
    /// Bind a WhatsApp conversation to a Slack channel.
    Add {
        /// WhatsApp conversation id (e.g. 12345@g.us)
        source: String,
        /// Slack channel id (e.g. C042ABCDE)
        channel: String,
        /// Human-readable channel name (defaults to the channel id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
    /// Remove the binding for a WhatsApp conversation.
    Remove {
        source: String,
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("wsbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Run { config }) => run_bridge(config).await,
        Some(Commands::Maps { action }) => run_maps(action).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating config directory {}", dir.display()))?;
    if !path.exists() {
        std::fs::write(&path, b"{}")
            .with_context(|| format!("writing default config to {}", path.display()))?;
        log::info!("created default config at {}", path.display());
    }
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn open_store(config_path: Option<std::path::PathBuf>) -> anyhow::Result<Arc<MappingStore>> {
    let (config, _) = lib::config::load_config(config_path)?;
    let store_path = lib::config::resolve_store_path(&config);
    let store = MappingStore::open(&store_path)
        .await
        .with_context(|| format!("opening bridge document {}", store_path.display()))?;
    Ok(Arc::new(store))
}

async fn run_bridge(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let store_path = lib::config::resolve_store_path(&config);
    let store = Arc::new(
        MappingStore::open(&store_path)
            .await
            .with_context(|| format!("opening bridge document {}", store_path.display()))?,
    );

    let token = lib::config::resolve_slack_token(&config)
        .context("no Slack bot token: set slack.botToken or SLACK_BOT_TOKEN")?;
    let slack = Arc::new(SlackClient::new(token));
    match slack.auth_test().await {
        Ok(identity) => log::info!("connected to Slack as {}", identity),
        Err(e) => anyhow::bail!("slack auth check failed: {}", e),
    }

    // The WhatsApp client is attached by the embedding deployment; until it
    // is, the bridge reports it as disconnected and refuses sends.
    let whatsapp = Arc::new(DetachedTransport);
    let (handles, _tasks) = lib::bridge::start(&config, store, slack.clone(), whatsapp);

    let main_channel = lib::config::resolve_main_channel(&config);
    lib::bridge::notify_connection_change(slack.as_ref(), main_channel.as_deref(), false).await;

    log::info!("bridge engine running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    drop(handles);
    log::info!("shutting down");
    Ok(())
}

async fn run_maps(action: MapsAction) -> anyhow::Result<()> {
    match action {
        MapsAction::List { config } => {
            let store = open_store(config).await?;
            let mappings = store.list_all().await;
            if mappings.is_empty() {
                println!("no mappings");
                return Ok(());
            }
            for (source, record) in mappings {
                println!(
                    "{} -> {} ({})",
                    source, record.slack_channel_id, record.slack_channel_name
                );
            }
            Ok(())
        }
        MapsAction::Add {
            source,
            channel,
            name,
            config,
        } => {
            let store = open_store(config).await?;
            let record = MappingRecord {
                slack_channel_id: channel.clone(),
                slack_channel_name: name.unwrap_or_else(|| channel.clone()),
                whatsapp_chat_name: source.clone(),
            };
            store.put(&source, record).await?;
            println!("mapped {} -> {}", source, channel);
            Ok(())
        }
        MapsAction::Remove { source, config } => {
            let store = open_store(config).await?;
            store.remove(&source).await?;
            println!("unmapped {}", source);
            Ok(())
        }
    }
}
