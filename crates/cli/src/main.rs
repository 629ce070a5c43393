use anyhow::{Context as AnyhowContext, Result};
use apiview_cli::server_security::listen_addr;
use apiview_cli::{router, ApiState, AuthToken, AUTH_TOKEN_ENV};
use apiview_ingest::{export_guidelines, SyncOptions};
use apiview_protocol::{review_schema, ExistingCommentInput, Language, ReviewRequest};
use apiview_review::MentionRequest;
use apiview_sectioner::SectionedDocument;
use apiview_service::{CopilotConfig, ServiceContext};
use apiview_store::ContainerName;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const GC_INTERVAL: Duration = Duration::from_secs(900);

#[derive(Parser)]
#[command(name = "apiview")]
#[command(about = "AI review of API surfaces against language guidelines", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (overrides APIVIEW_CONFIG and ./apiview.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Review an API surface (or the diff against a base surface)
    Review(ReviewArgs),

    /// Sync guidelines and examples from the upstream corpus
    #[command(name = "ingest-guidelines")]
    IngestGuidelines(IngestArgs),

    /// Hard-delete soft-deleted rows the search index no longer serves
    Gc(GcArgs),

    /// Probe the store, indices, prompts and LLM configuration
    Health,

    /// Serve the review API over HTTP
    Serve(ServeArgs),

    /// Search guidelines, examples and memories
    Search(SearchArgs),

    /// Read a stored record, or soft-delete an example or memory
    #[command(subcommand)]
    Db(DbCommand),

    /// Rebuild search indices from the store
    Reindex(ReindexArgs),

    /// Export a language's guidelines in the downstream layout
    Guidelines(GuidelinesArgs),

    /// Print the section of an API surface that contains a line
    #[command(name = "extract-section")]
    ExtractSection(ExtractSectionArgs),

    /// Route an @-mention to a workflow
    Mention(MentionArgs),

    /// Print the metrics of this process in the Prometheus text format
    Metrics,

    /// Print the JSON schema of a review result
    Schema,
}

#[derive(Args)]
struct ReviewArgs {
    /// API surface text to review
    path: PathBuf,

    /// Language of the surface, e.g. python or golang
    language: String,

    /// Previous surface; only changed lines are reviewed
    #[arg(long)]
    base: Option<PathBuf>,

    /// JSON array of existing comments to avoid repeating
    #[arg(long)]
    comments: Option<PathBuf>,
}

#[derive(Args)]
struct IngestArgs {
    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,

    /// Reprocess every corpus file regardless of the stored commit
    #[arg(long)]
    force: bool,

    /// Restrict the sync to one language (defaults to ingest.language_filter)
    #[arg(long)]
    language: Option<String>,
}

#[derive(Args)]
struct GcArgs {
    /// guidelines, examples or memories; every indexed container when omitted
    container: Option<ContainerName>,
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Allow binding to a non-loopback address (requires an auth token)
    #[arg(long)]
    public: bool,

    /// Bearer token required on every route but /health
    #[arg(long)]
    auth_token: Option<String>,
}

#[derive(Args)]
struct SearchArgs {
    query: String,

    #[arg(long)]
    language: Option<String>,

    /// Print the linked context as Markdown instead of ranked JSON
    #[arg(long)]
    markdown: bool,
}

#[derive(Subcommand)]
enum DbCommand {
    /// Print a raw stored document, including soft-deleted ones
    Get { container: ContainerName, id: String },
    /// Soft-delete a record; `gc` purges it later
    Delete { container: ContainerName, id: String },
}

#[derive(Args)]
struct ReindexArgs {
    /// Reindex only this container
    container: Option<ContainerName>,
}

#[derive(Args)]
struct GuidelinesArgs {
    language: String,
}

#[derive(Args)]
struct ExtractSectionArgs {
    path: PathBuf,

    /// 1-based line number
    line: usize,
}

#[derive(Args)]
struct MentionArgs {
    /// JSON file holding the mention request
    path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Schema => print_json(&review_schema()?),
        Commands::ExtractSection(args) => run_extract_section(args, config),
        Commands::Serve(args) => run_serve(args, config).await,
        Commands::Review(args) => run_review(&open_context(config).await?, args).await,
        Commands::IngestGuidelines(args) => run_ingest(&open_context(config).await?, args).await,
        Commands::Gc(args) => run_gc(&open_context(config).await?, args).await,
        Commands::Health => run_health(&open_context(config).await?).await,
        Commands::Search(args) => run_search(&open_context(config).await?, args).await,
        Commands::Db(command) => run_db(&open_context(config).await?, command).await,
        Commands::Reindex(args) => run_reindex(&open_context(config).await?, args).await,
        Commands::Guidelines(args) => run_guidelines(&open_context(config).await?, args).await,
        Commands::Mention(args) => run_mention(&open_context(config).await?, args).await,
        Commands::Metrics => {
            let ctx = open_context(config).await?;
            print!("{}", ctx.metrics().render()?);
            Ok(())
        }
    }
}

async fn open_context(config: Option<&Path>) -> Result<ServiceContext> {
    let config = CopilotConfig::load(config)?;
    Ok(ServiceContext::open(config).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn parse_language(raw: &str) -> Result<Language> {
    raw.parse::<Language>().map_err(anyhow::Error::msg)
}

/// Token cancelled on Ctrl-C so in-flight calls stop early.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn run_review(ctx: &ServiceContext, args: ReviewArgs) -> Result<()> {
    let target = read_text(&args.path)?;
    let base = args.base.as_deref().map(read_text).transpose()?;
    let comments: Vec<ExistingCommentInput> = match &args.comments {
        Some(path) => serde_json::from_str(&read_text(path)?)
            .with_context(|| format!("Invalid comments file {}", path.display()))?,
        None => Vec::new(),
    };
    let request = ReviewRequest {
        target,
        base,
        language: args.language,
        comments,
    };

    let review = ctx.engine.review(&request, &ctrl_c_token()).await?;
    log::info!(
        "review finished: {} comments from {} sections",
        review.comments.len(),
        review.stats.sections
    );
    print_json(&serde_json::json!({ "result": review }))
}

async fn run_ingest(ctx: &ServiceContext, args: IngestArgs) -> Result<()> {
    let language_filter = match &args.language {
        Some(raw) => Some(parse_language(raw)?),
        None => ctx.config.language_filter().map_err(anyhow::Error::msg)?,
    };
    let options = SyncOptions {
        dry_run: args.dry_run,
        force: args.force,
        language_filter,
    };
    let report = ctx.ingestor()?.sync(&options, &ctrl_c_token()).await?;
    log::info!("{}", report.summary());
    print_json(&report)
}

async fn run_gc(ctx: &ServiceContext, args: GcArgs) -> Result<()> {
    let gc = ctx.garbage_collector();
    let reports = match args.container {
        Some(container) => vec![gc.collect(container).await?],
        None => gc.collect_all().await?,
    };
    print_json(&reports)
}

async fn run_health(ctx: &ServiceContext) -> Result<()> {
    let report = ctx.health().await;
    print_json(&report)?;
    if !report.is_healthy() {
        anyhow::bail!("service is unhealthy: {}", report.problems.join("; "))
    }
    Ok(())
}

async fn run_search(ctx: &ServiceContext, args: SearchArgs) -> Result<()> {
    let language = args.language.as_deref().map(parse_language).transpose()?;
    let results = ctx
        .search
        .search_all(&args.query, language, &ctrl_c_token())
        .await?;
    for failure in &results.failures {
        log::warn!("partial results: {failure}");
    }
    if args.markdown {
        let context = ctx.search.build_context(&results).await?;
        println!("{}", context.to_markdown());
        return Ok(());
    }
    print_json(&results)
}

async fn run_db(ctx: &ServiceContext, command: DbCommand) -> Result<()> {
    match command {
        DbCommand::Get { container, id } => match ctx.store.get_raw(container, &id).await? {
            Some(doc) => print_json(&doc),
            None => anyhow::bail!("{container}/{id} not found"),
        },
        DbCommand::Delete { container, id } => {
            if !container.is_user_deletable() {
                anyhow::bail!("{container} records cannot be deleted by hand; only examples and memories can")
            }
            let deleted = ctx.store.soft_delete(container, &id).await?;
            if !deleted {
                anyhow::bail!("{container}/{id} not found")
            }
            log::info!("soft-deleted {container}/{id}; run `apiview gc {container}` to purge it");
            print_json(&serde_json::json!({ "container": container.as_str(), "id": id, "deleted": true }))
        }
    }
}

async fn run_reindex(ctx: &ServiceContext, args: ReindexArgs) -> Result<()> {
    let reports = match args.container {
        Some(container) => vec![ctx.indexer.run(container).await?],
        None => ctx.indexer.run_all().await?,
    };
    print_json(&reports)
}

async fn run_guidelines(ctx: &ServiceContext, args: GuidelinesArgs) -> Result<()> {
    let language = parse_language(&args.language)?;
    let layouts = export_guidelines(&ctx.store, language).await?;
    print_json(&layouts)
}

fn run_extract_section(args: ExtractSectionArgs, config: Option<&Path>) -> Result<()> {
    let config = CopilotConfig::load(config)?;
    let text = read_text(&args.path)?;
    let doc = SectionedDocument::from_text(&text, config.sectioner())?;
    let section = doc
        .sections()
        .iter()
        .find(|s| s.contains_line(args.line))
        .with_context(|| format!("line {} is outside {}", args.line, args.path.display()))?;
    log::debug!(
        "section {} spans lines {}-{}",
        section.chunk_index,
        section.first_line_no(),
        section.last_line_no()
    );
    print!("{}", section.numbered());
    Ok(())
}

async fn run_mention(ctx: &ServiceContext, args: MentionArgs) -> Result<()> {
    let request: MentionRequest = serde_json::from_str(&read_text(&args.path)?)
        .with_context(|| format!("Invalid mention request {}", args.path.display()))?;
    let outcome = ctx.dispatcher.dispatch(&request, &ctrl_c_token()).await?;
    print_json(&outcome)
}

async fn run_serve(args: ServeArgs, config: Option<&Path>) -> Result<()> {
    let auth = AuthToken::resolve(args.auth_token.as_deref())?;
    if args.public && auth.is_none() {
        anyhow::bail!("--public requires an auth token (--auth-token or {AUTH_TOKEN_ENV})")
    }
    let addr = listen_addr(&args.bind, args.public).await?;

    let ctx = open_context(config).await?;
    let shutdown = CancellationToken::new();
    let sweeper = ctx.jobs.spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());
    let gc = Arc::new(ctx.garbage_collector()).spawn(GC_INTERVAL, shutdown.clone());

    let app = router(ApiState { ctx, auth });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    log::info!("serving review API on http://{}", listener.local_addr()?);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = tokio::join!(sweeper, gc);
    Ok(())
}
