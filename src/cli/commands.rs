//! CLI commands implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use reqwest::Method;
use serde_json::Value;

use anidesk::config::{load_settings_with_options, LoadOptions, Settings};
use anidesk::requests::{OperationKind, RequestConfig};
use anidesk::store::preferences::ENABLE_CACHING_KEY;
use anidesk::store::{apply_default_preferences, get_or};

use super::helpers::{format_millis, parse_headers, truncate, AppContext};
use super::history::{run_history, HistoryCommands};

#[derive(Parser)]
#[command(name = "anidesk")]
#[command(about = "Metadata request queue and watch history for anime tracking")]
#[command(version)]
pub struct Cli {
    /// Data directory
    #[arg(long, global = true, env = "ANIDESK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Config file (auto-discovered when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and default preferences
    Init,

    /// Show effective settings and store status
    Status,

    /// Send a GraphQL query to the metadata API through the request queue
    Query {
        /// Query document
        query: String,
        /// Variables as a JSON object
        #[arg(long, default_value = "{}")]
        variables: String,
        /// Operation tag (inferred from the query when omitted)
        #[arg(long, value_enum)]
        operation: Option<OperationArg>,
    },

    /// Search the metadata API by title
    Search {
        /// Title to search for
        text: String,
    },

    /// List trending titles
    Trending,

    /// Send a direct request to any other endpoint, with retries
    Fetch {
        url: String,
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Extra header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
        /// Retry attempts on transient failures
        #[arg(short, long, default_value = "2")]
        retries: u32,
        /// Cache the response
        #[arg(long)]
        cache: bool,
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Inspect and manage local watch history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OperationArg {
    Viewer,
    UserProfile,
    ListCollection,
    CurrentList,
    Trending,
    Popular,
    Other,
}

impl From<OperationArg> for OperationKind {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Viewer => OperationKind::Viewer,
            OperationArg::UserProfile => OperationKind::UserProfile,
            OperationArg::ListCollection => OperationKind::ListCollection,
            OperationArg::CurrentList => OperationKind::CurrentList,
            OperationArg::Trending => OperationKind::Trending,
            OperationArg::Popular => OperationKind::Popular,
            OperationArg::Other => OperationKind::Other,
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (settings, _config) = load_settings_with_options(LoadOptions {
        config_path: cli.config,
        data_dir: cli.data_dir,
    })
    .await;

    match cli.command {
        Commands::Init => cmd_init(settings),
        Commands::Status => cmd_status(settings),
        Commands::Query {
            query,
            variables,
            operation,
        } => cmd_query(settings, &query, &variables, operation.map(Into::into)).await,
        Commands::Search { text } => cmd_search(settings, &text).await,
        Commands::Trending => cmd_trending(settings).await,
        Commands::Fetch {
            url,
            method,
            headers,
            body,
            retries,
            cache,
            timeout,
        } => {
            cmd_fetch(
                settings,
                &url,
                &method,
                &headers,
                body.as_deref(),
                retries,
                cache,
                timeout,
            )
            .await
        }
        Commands::History { command } => run_history(AppContext::open(settings)?, command).await,
    }
}

fn cmd_init(settings: Settings) -> anyhow::Result<()> {
    let ctx = AppContext::open(settings)?;
    let written = apply_default_preferences(ctx.store.as_ref())?;

    println!(
        "{} Initialized {}",
        style("✓").green(),
        ctx.settings.database_path().display()
    );
    if written > 0 {
        println!("  {} default preferences written", written);
    }
    Ok(())
}

fn cmd_status(settings: Settings) -> anyhow::Result<()> {
    let ctx = AppContext::open(settings)?;
    let caching: bool = get_or(ctx.store.as_ref(), ENABLE_CACHING_KEY, true);

    println!("\n{}", style("anidesk Status").bold());
    println!("{}", "-".repeat(40));
    println!("{:<22} {}", "Data Directory:", ctx.settings.data_dir.display());
    println!("{:<22} {}", "Database:", ctx.settings.database_path().display());
    println!("{:<22} {}", "Metadata Endpoint:", ctx.settings.metadata_endpoint);
    println!("{:<22} {}", "Request Budget:", ctx.settings.max_requests);
    println!(
        "{:<22} {}",
        "Response Cache:",
        if caching { "enabled" } else { "disabled" }
    );
    println!(
        "{:<22} {}",
        "Tracked Titles:",
        ctx.history.get_history_entries().len()
    );
    println!(
        "{:<22} {}",
        "History Updated:",
        format_millis(ctx.history.last_updated())
    );
    if ctx.history.is_unreadable() {
        println!(
            "\n{} Stored watch history could not be read; edits are disabled until `history clear`",
            style("!").yellow()
        );
    }
    Ok(())
}

async fn cmd_query(
    settings: Settings,
    query: &str,
    variables: &str,
    operation: Option<OperationKind>,
) -> anyhow::Result<()> {
    let variables: Value =
        serde_json::from_str(variables).context("--variables must be a JSON object")?;
    let ctx = AppContext::open(settings)?;

    let operation = operation.unwrap_or_else(|| {
        OperationKind::classify(&Value::String(query.to_string()))
    });
    let body = ctx
        .metadata()
        .query(operation, query, variables)
        .await
        .context("Metadata request failed")?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cmd_search(settings: Settings, text: &str) -> anyhow::Result<()> {
    let ctx = AppContext::open(settings)?;
    let results = ctx.metadata().search(text).await;
    print_media_list(&format!("Results for \"{}\"", text), &results);
    Ok(())
}

async fn cmd_trending(settings: Settings) -> anyhow::Result<()> {
    let ctx = AppContext::open(settings)?;
    let results = ctx.metadata().trending().await;
    print_media_list("Trending", &results);
    Ok(())
}

fn print_media_list(heading: &str, media: &[anidesk::history::Media]) {
    if media.is_empty() {
        println!("{} Nothing found", style("!").yellow());
        return;
    }

    println!("\n{}", style(heading).bold());
    println!("{}", "-".repeat(60));
    println!("{:<10} {:<40} Episodes", "ID", "Title");
    println!("{}", "-".repeat(60));
    for m in media {
        println!(
            "{:<10} {:<40} {}",
            m.id.map(|id| id.to_string()).unwrap_or_default(),
            truncate(&m.display_title(), 39),
            m.episodes
                .map(|e| e.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_fetch(
    settings: Settings,
    url: &str,
    method: &str,
    headers: &[String],
    body: Option<&str>,
    retries: u32,
    cache: bool,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", method))?;
    let headers = parse_headers(headers)?;
    let body: Value = match body {
        Some(raw) => serde_json::from_str(raw).context("--body must be valid JSON")?,
        None => Value::Null,
    };

    let mut config = RequestConfig::new().retries(retries).cache(cache);
    if let Some(secs) = timeout {
        config = config.timeout(Duration::from_secs(secs));
    }

    let ctx = AppContext::open(settings)?;
    let response = ctx
        .service
        .make_request(method, url, headers, body, config)
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    match response {
        Value::String(text) => println!("{}", text),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}
