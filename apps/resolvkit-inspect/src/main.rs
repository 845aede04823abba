use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use resolvkit::{
    ContextId, HandlerRole, MetadataTable, ProviderContainer, RawArg, RawArgs, ResolverGroups,
    ResolversExplorer,
};
use resolvkit_bootstrap::{AppConfig, AppConfigProvider, CliArgs};
use serde::Serialize;
use serde_json::{json, Value};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// resolvkit-inspect - discover resolvers and exercise them outside a GraphQL server
#[derive(Parser, Debug)]
#[command(name = "resolvkit-inspect")]
#[command(about = "Discover resolver handlers and run them under simulated requests")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only scan these modules (overrides config)
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Print the discovered handlers grouped by role
    Explore,
    /// Validate configuration and wiring, then exit
    Check,
    /// Invoke every query once per simulated user and observe one live event
    Simulate {
        /// Users issuing the simulated requests
        #[arg(long = "user", default_values_t = [String::from("alice"), String::from("bob")])]
        users: Vec<String>,
    },
}

struct Runtime {
    container: Arc<ProviderContainer>,
    groups: Arc<ResolverGroups>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        include: cli.include.clone(),
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    resolvkit_bootstrap::logging::init_logging(&logging_config, Path::new(&config.home_dir));

    tracing::info!(home_dir = %config.home_dir, "resolvkit-inspect starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Explore) {
        Commands::Explore => explore(config).await,
        Commands::Check => check(config).await,
        Commands::Simulate { users } => simulate(config, &users).await,
    }
}

/// Build the container, run its static providers and discover handlers.
async fn start(config: &AppConfig) -> Result<Runtime> {
    let mut builder = ProviderContainer::builder();
    catalog::register(&mut builder).with_config(Arc::new(AppConfigProvider::new(config.clone())));

    let container = Arc::new(builder.build().context("container wiring is invalid")?);
    container.init().await.context("container initialization failed")?;

    let metadata = Arc::new(MetadataTable::discover_and_build()?);
    tracing::debug!(types = metadata.len(), "resolver metadata collected");

    let explorer = ResolversExplorer::new(container.clone(), metadata, config.explorer_options());
    let groups = explorer.explore()?;
    Ok(Runtime { container, groups })
}

async fn explore(config: AppConfig) -> Result<()> {
    let rt = start(&config).await?;
    println!("{}", serde_yaml::to_string(&rt.groups.summary())?);
    Ok(())
}

async fn check(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let rt = start(&config).await?;

    println!("Configuration is valid");
    for (role, descriptors) in rt.groups.iter() {
        println!("  {role}: {}", descriptors.len());
    }
    Ok(())
}

#[derive(Serialize)]
struct Invocation<'a> {
    user: &'a str,
    context: String,
    field: &'a str,
    result: Value,
}

fn request_args(user: &str, args: Value, context: ContextId) -> RawArgs {
    RawArgs::resolver(
        Value::Null,
        args,
        RawArg::object(catalog::CatalogRequest::new(user)),
        Value::Null,
    )
    .with_context_id(context)
}

async fn simulate(config: AppConfig, users: &[String]) -> Result<()> {
    let rt = start(&config).await?;

    for user in users {
        let context = ContextId::new();
        for descriptor in rt.groups.get(HandlerRole::Query) {
            let Some(handler) = descriptor.callback().and_then(|c| c.as_resolve()) else {
                continue;
            };
            let result = match handler(request_args(user, json!({}), context)).await {
                Ok(v) => v,
                Err(e) => json!({ "error": format!("{e:#}") }),
            };
            let row = Invocation {
                user,
                context: context.to_string(),
                field: &descriptor.field_name,
                result,
            };
            println!("{}", serde_json::to_string(&row)?);
        }
        rt.container.dispose_context(context);
    }
    tracing::info!(live_contexts = rt.container.live_contexts(), "simulated requests disposed");

    observe_book_added(&rt, users.first().map(String::as_str).unwrap_or("anonymous")).await
}

/// Subscribe to `bookAdded`, add one book and print the delivered event.
async fn observe_book_added(rt: &Runtime, user: &str) -> Result<()> {
    let subscription = rt
        .groups
        .find(HandlerRole::Subscription, "bookAdded")
        .and_then(|d| d.callback())
        .and_then(|c| c.as_subscription());
    let add = rt
        .groups
        .find(HandlerRole::Mutation, "addBook")
        .and_then(|d| d.callback())
        .and_then(|c| c.as_resolve());
    let (Some(subscription), Some(add)) = (subscription, add) else {
        tracing::warn!("bookAdded/addBook not discovered; skipping event simulation");
        return Ok(());
    };

    let context = ContextId::new();
    let mut events = (subscription.subscribe)(request_args(user, json!({}), context)).await?;
    add(request_args(
        user,
        json!({ "title": "Simulated Book", "author": user }),
        context,
    ))
    .await?;

    let event = tokio::time::timeout(Duration::from_secs(1), events.next())
        .await
        .context("no book event within 1s")?
        .context("event stream closed")?;
    let payload = match &subscription.resolve {
        Some(resolve) => resolve(event, &RawArgs::default())?,
        None => event,
    };
    println!("{}", json!({ "event": "bookAdded", "payload": payload }));

    rt.container.dispose_context(context);
    Ok(())
}
