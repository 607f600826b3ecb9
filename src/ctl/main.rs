//! bucketchainctl - Control CLI for the bucket chain store
//!
//! Provides administrative commands operating directly on the durable
//! store: inspect a conversation's chain, verify chain invariants, page
//! history, and seed synthetic appends.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info};
use serde::{Deserialize, Serialize};

use bucketchain::chain::{
    BucketChainManager, ChainConfig, ChainError, DEFAULT_BUCKET_CAPACITY,
    DEFAULT_MAX_APPEND_ATTEMPTS,
};
use bucketchain::db::Database;
use bucketchain::history::HistoryReader;
use bucketchain::ids::NanoidGenerator;
use bucketchain::store::SqliteChainStore;

const APP_NAME: &str = "bucketchain";

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config file: {}", ctx.paths.config_file.display());

    match cli.command {
        Command::Stats(cmd) => handle_stats(&ctx, cmd).await,
        Command::Verify(cmd) => handle_verify(&ctx, cmd).await,
        Command::History(cmd) => handle_history(&ctx, cmd).await,
        Command::Seed(cmd) => handle_seed(&ctx, cmd).await,
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "bucketchainctl",
    author,
    version,
    about = "Control CLI for the bucket chain store - inspect, verify, and seed conversation chains.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Override the database file path
    #[arg(long, value_name = "PATH", global = true, env = "BUCKETCHAIN_DB")]
    database: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show chain statistics for a conversation
    Stats(StatsCommand),
    /// Walk chains and report invariant violations
    Verify(VerifyCommand),
    /// Page backward through a conversation's history
    History(HistoryCommand),
    /// Append synthetic messages through the real chain manager
    Seed(SeedCommand),
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Args)]
struct StatsCommand {
    /// Conversation identifier
    #[arg(long, short = 'c')]
    conversation: String,
}

#[derive(Debug, Clone, Args)]
struct VerifyCommand {
    /// Verify a single conversation (default: all)
    #[arg(long, short = 'c')]
    conversation: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct HistoryCommand {
    /// Conversation identifier
    #[arg(long, short = 'c')]
    conversation: String,
    /// Maximum number of pages to print (default: all)
    #[arg(long)]
    pages: Option<usize>,
    /// Requested page size ceiling
    #[arg(long, default_value = "50")]
    page_size: usize,
}

#[derive(Debug, Clone, Args)]
struct SeedCommand {
    /// Conversation identifier
    #[arg(long, short = 'c')]
    conversation: String,
    /// Number of synthetic messages to append
    #[arg(long, short = 'n', default_value = "1")]
    count: usize,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_config(&paths)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("bucketchain={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(io::stderr().is_terminal() && env::var_os("NO_COLOR").is_none())
                        .with_target(false),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.common.database {
            return expand_path(path.clone());
        }
        if let Some(ref path) = self.config.storage.database_path {
            return expand_str_path(path);
        }
        Ok(default_data_dir()?.join("chain.db"))
    }

    async fn open_chain(&self) -> Result<(Database, Arc<SqliteChainStore>, Arc<BucketChainManager>)> {
        let db_path = self.database_path()?;
        debug!("opening chain database at {}", db_path.display());
        let db = Database::open(&db_path).await?;

        let store = Arc::new(SqliteChainStore::new(db.pool().clone()));
        let manager = Arc::new(BucketChainManager::new(
            store.clone(),
            store.clone(),
            Arc::new(NanoidGenerator),
            ChainConfig {
                bucket_capacity: self.config.chain.bucket_capacity,
                max_append_attempts: self.config.chain.max_append_attempts,
            },
        ));

        Ok((db, store, manager))
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self { config_file })
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    storage: StorageSection,
    chain: ChainSection,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct StorageSection {
    /// Path to the chain database file. Defaults to the platform data dir.
    database_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ChainSection {
    /// Maximum message identifiers per bucket before rotation.
    bucket_capacity: usize,
    /// Retry budget for the append loop.
    max_append_attempts: u32,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            max_append_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
        }
    }
}

fn load_config(paths: &AppPaths) -> Result<AppConfig> {
    let built = Config::builder()
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix("BUCKETCHAIN").separator("__"))
        .build()?;

    built.try_deserialize().context("deserializing configuration")
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push('\n');
    body.push('\n');
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

/// One traversed chain: page lengths from newest to oldest.
struct ChainWalk {
    newest_bucket_id: String,
    buckets: Vec<(String, usize)>,
    violations: Vec<String>,
}

/// Walk a conversation's chain from the head to the terminus, collecting
/// per-bucket fill and invariant violations (missing buckets, cycles,
/// overfull buckets, underfull sealed buckets, duplicate message ids).
async fn walk_chain(
    manager: &BucketChainManager,
    conversation_id: &str,
) -> Result<ChainWalk> {
    let newest_bucket_id = manager.newest_bucket_id(conversation_id).await?;
    let capacity = manager.bucket_capacity();

    let mut walk = ChainWalk {
        newest_bucket_id,
        buckets: Vec::new(),
        violations: Vec::new(),
    };

    let mut seen_buckets: HashSet<String> = HashSet::new();
    let mut seen_messages: HashSet<String> = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        let bucket_id = cursor
            .clone()
            .unwrap_or_else(|| walk.newest_bucket_id.clone());

        if !seen_buckets.insert(bucket_id.clone()) {
            walk.violations
                .push(format!("cycle: bucket {bucket_id} reachable twice"));
            break;
        }

        let page = match manager.read_page(conversation_id, cursor.as_deref()).await {
            Ok(page) => page,
            Err(ChainError::Corruption { bucket_id, referrer }) => {
                walk.violations.push(format!(
                    "corruption: bucket {bucket_id} referenced by {referrer} is missing"
                ));
                break;
            }
            Err(err) => return Err(err.into()),
        };

        if page.message_ids.len() > capacity {
            walk.violations.push(format!(
                "overfull: bucket {} holds {} entries (capacity {})",
                bucket_id,
                page.message_ids.len(),
                capacity
            ));
        }
        // Every bucket but the newest is sealed and must be exactly full
        if cursor.is_some() && page.message_ids.len() < capacity {
            walk.violations.push(format!(
                "underfull sealed bucket {} holds {} entries (capacity {})",
                bucket_id,
                page.message_ids.len(),
                capacity
            ));
        }
        for message_id in &page.message_ids {
            if !seen_messages.insert(message_id.clone()) {
                walk.violations
                    .push(format!("duplicate message id {message_id} in bucket {bucket_id}"));
            }
        }

        walk.buckets.push((bucket_id, page.message_ids.len()));

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(walk)
}

async fn handle_stats(ctx: &RuntimeContext, cmd: StatsCommand) -> Result<()> {
    let (db, _, manager) = ctx.open_chain().await?;
    let walk = walk_chain(&manager, &cmd.conversation).await?;
    db.close().await;

    let total: usize = walk.buckets.iter().map(|(_, len)| len).sum();

    if ctx.common.json {
        let buckets: Vec<_> = walk
            .buckets
            .iter()
            .map(|(id, len)| serde_json::json!({ "bucket_id": id, "messages": len }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "conversation_id": cmd.conversation,
                "newest_bucket_id": walk.newest_bucket_id,
                "chain_length": walk.buckets.len(),
                "total_messages": total,
                "capacity": manager.bucket_capacity(),
                "buckets": buckets,
            }))?
        );
    } else {
        println!("Conversation: {}", cmd.conversation);
        println!("  Head bucket: {}", walk.newest_bucket_id);
        println!("  Chain length: {} bucket(s)", walk.buckets.len());
        println!("  Total messages: {}", total);
        println!();
        println!("{:<20} {:>10}", "BUCKET", "MESSAGES");
        println!("{}", "-".repeat(32));
        for (bucket_id, len) in &walk.buckets {
            println!("{:<20} {:>10}", bucket_id, len);
        }
    }
    Ok(())
}

async fn handle_verify(ctx: &RuntimeContext, cmd: VerifyCommand) -> Result<()> {
    let (db, store, manager) = ctx.open_chain().await?;

    let conversations = match cmd.conversation {
        Some(id) => vec![id],
        None => store.conversation_ids().await?,
    };

    let mut total_violations = 0usize;
    let mut reports = Vec::new();

    for conversation_id in &conversations {
        let walk = walk_chain(&manager, conversation_id).await?;
        total_violations += walk.violations.len();
        reports.push((conversation_id.clone(), walk));
    }
    db.close().await;

    if ctx.common.json {
        let output: Vec<_> = reports
            .iter()
            .map(|(id, walk)| {
                serde_json::json!({
                    "conversation_id": id,
                    "chain_length": walk.buckets.len(),
                    "violations": walk.violations,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for (conversation_id, walk) in &reports {
            if walk.violations.is_empty() {
                println!(
                    "ok   {} ({} bucket(s))",
                    conversation_id,
                    walk.buckets.len()
                );
            } else {
                println!("FAIL {}", conversation_id);
                for violation in &walk.violations {
                    println!("     {}", violation);
                }
            }
        }
        println!();
        println!(
            "Verified {} conversation(s), {} violation(s)",
            conversations.len(),
            total_violations
        );
    }

    if total_violations > 0 {
        anyhow::bail!("{} chain invariant violation(s) found", total_violations);
    }
    Ok(())
}

async fn handle_history(ctx: &RuntimeContext, cmd: HistoryCommand) -> Result<()> {
    let (db, _, manager) = ctx.open_chain().await?;
    let reader = HistoryReader::new(manager);

    let max_pages = cmd.pages.unwrap_or(usize::MAX);
    let mut cursor: Option<String> = None;
    let mut printed = 0usize;

    while printed < max_pages {
        let page = reader
            .page(&cmd.conversation, cursor.as_deref(), cmd.page_size)
            .await?;
        printed += 1;

        if ctx.common.json {
            println!("{}", serde_json::to_string(&page)?);
        } else {
            println!("Page {} ({} message(s)):", printed, page.message_ids.len());
            for message_id in &page.message_ids {
                println!("  {}", message_id);
            }
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => {
                if !ctx.common.json {
                    println!("(end of history)");
                }
                break;
            }
        }
    }

    db.close().await;
    Ok(())
}

async fn handle_seed(ctx: &RuntimeContext, cmd: SeedCommand) -> Result<()> {
    let (db, _, manager) = ctx.open_chain().await?;

    let mut appended = 0usize;
    let mut rotations = 0usize;

    for _ in 0..cmd.count {
        let message_id = format!("seed_{}", uuid::Uuid::new_v4());
        let receipt = manager
            .append_message(&cmd.conversation, &message_id)
            .await
            .with_context(|| format!("seeding conversation {}", cmd.conversation))?;
        appended += 1;
        if receipt.rotated {
            rotations += 1;
        }
    }
    db.close().await;

    info!(
        "seeded {} message(s) into {} ({} rotation(s))",
        appended, cmd.conversation, rotations
    );
    if ctx.common.json {
        println!(
            r#"{{"conversation_id": "{}", "appended": {}, "rotations": {}}}"#,
            cmd.conversation, appended, rotations
        );
    } else {
        println!(
            "Appended {} message(s) to {} ({} rotation(s))",
            appended, cmd.conversation, rotations
        );
    }
    Ok(())
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    write_default_config(&ctx.paths.config_file)?;
    println!("Wrote {}", ctx.paths.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
    }
}
