use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use mergewise_core::AppBuilder;
use mergewise_core::bootstrap::resolve_config_path;
use mergewise_index::context::{display_header, render_context_block};
use mergewise_index::languages::is_interesting_path;
use mergewise_index::source::{LocalTreeSource, RepositorySource};
use mergewise_index::types::content_hash;
use mergewise_index::{DiffHunk, IndexReport, RepositoryKey, RetrievalQuery, parse_unified_diff};
use tokio::io::AsyncReadExt;

const DEFAULT_COMMIT: &str = "WORKTREE";

#[derive(Parser)]
#[command(name = "mergewise")]
#[command(about = "Repository context indexing and retrieval for pull request review", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to `MERGEWISE_CONFIG`, then config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh the index of a working tree
    Index(IndexArgs),
    /// Print context blocks relevant to a change in one file
    Retrieve(RetrieveArgs),
    /// Print uninitialized, building or ready
    Status(RepoArg),
    /// Remove the persisted index
    Drop(RepoArg),
}

#[derive(Args)]
struct RepoArg {
    /// Repository as owner/name
    #[arg(long)]
    repo: RepositoryKey,
}

#[derive(Args)]
struct TreeArgs {
    /// Repository as owner/name
    #[arg(long)]
    repo: RepositoryKey,

    /// Working tree to read files from
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Commit reference recorded with the index (defaults to a digest of the tree)
    #[arg(long)]
    commit: Option<String>,
}

#[derive(Args)]
struct IndexArgs {
    #[command(flatten)]
    tree: TreeArgs,

    /// Paths that must be indexed regardless of selection limits
    paths: Vec<String>,
}

#[derive(Args)]
struct RetrieveArgs {
    #[command(flatten)]
    tree: TreeArgs,

    /// File under review, relative to the root
    #[arg(long)]
    file: String,

    /// Unified diff of the file, or `-` for stdin
    #[arg(long, conflicts_with = "lines")]
    diff: Option<String>,

    /// Changed line range in the new file, e.g. 10-15
    #[arg(long, value_parser = parse_line_range)]
    lines: Option<(usize, usize)>,

    /// Number of chunks to return (defaults to retrieval.top_k)
    #[arg(short)]
    k: Option<usize>,

    /// Pull request title folded into the query
    #[arg(long)]
    title: Option<String>,
}

fn parse_line_range(s: &str) -> Result<(usize, usize), String> {
    let (start, end) = s.split_once('-').unwrap_or((s, s));
    let start: usize = start
        .trim()
        .parse()
        .map_err(|_| format!("invalid start line in {s:?}"))?;
    let end: usize = end
        .trim()
        .parse()
        .map_err(|_| format!("invalid end line in {s:?}"))?;
    if start == 0 || end < start {
        return Err(format!("invalid line range {s:?}"));
    }
    Ok((start, end))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let builder = AppBuilder::load(&config_path)?;
    init_subscriber(builder.config().log.filter.as_deref());
    tracing::debug!(config = %config_path.display(), "configuration loaded");

    match cli.command {
        Commands::Index(args) => run_index(&builder, args).await,
        Commands::Retrieve(args) => run_retrieve(&builder, args).await,
        Commands::Status(args) => {
            let store = builder.build_store(Arc::new(LocalTreeSource::new(".")));
            println!("{}", store.index_status(&args.repo).await);
            Ok(())
        }
        Commands::Drop(args) => {
            let store = builder.build_store(Arc::new(LocalTreeSource::new(".")));
            let existed = store
                .drop_index(&args.repo)
                .await
                .with_context(|| format!("failed to drop index of {}", args.repo))?;
            if existed {
                println!("dropped {}", args.repo);
            } else {
                println!("no index for {}", args.repo);
            }
            Ok(())
        }
    }
}

async fn run_index(builder: &AppBuilder, args: IndexArgs) -> anyhow::Result<()> {
    ensure_root(&args.tree.root)?;
    let source = Arc::new(LocalTreeSource::new(&args.tree.root));
    let commit = resolve_commit(&source, &args.tree).await?;
    let store = builder.build_store(source);
    let report = store
        .repository(args.tree.repo)
        .ensure_index(&commit, &args.paths)
        .await;
    print_report(&report);
    Ok(())
}

async fn run_retrieve(builder: &AppBuilder, args: RetrieveArgs) -> anyhow::Result<()> {
    ensure_root(&args.tree.root)?;
    let hunks = match (&args.diff, args.lines) {
        (Some(diff), _) => parse_unified_diff(&read_diff(diff).await?),
        (None, Some((start, end))) => {
            let path = args.tree.root.join(&args.file);
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            vec![DiffHunk::for_new_lines(start, end, &content)]
        }
        (None, None) => bail!("either --diff or --lines is required"),
    };
    if hunks.is_empty() {
        bail!("no hunks found in the diff");
    }

    let k = args.k.unwrap_or(builder.config().retrieval.top_k);
    let source = Arc::new(LocalTreeSource::new(&args.tree.root));
    let commit = resolve_commit(&source, &args.tree).await?;
    let store = builder.build_store(source);
    let repo = store.repository(args.tree.repo);
    let report = repo
        .ensure_index(&commit, std::slice::from_ref(&args.file))
        .await;
    tracing::info!(
        indexed = report.files_indexed,
        unchanged = report.files_unchanged,
        "index ready"
    );

    let mut query = RetrievalQuery::new(&args.file, hunks, k);
    if let Some(title) = args.title {
        query = query.with_title(title);
    }
    let result = repo.retrieve(&query).await;
    if result.is_empty() {
        println!("no context found for {}", args.file);
        return Ok(());
    }
    for scored in &result.chunks {
        tracing::debug!(
            score = scored.score,
            rerank_score = ?scored.rerank_score,
            reranked = result.reranked,
            "{}",
            display_header(&scored.chunk)
        );
    }
    let blocks: Vec<String> = result.chunks.iter().map(render_context_block).collect();
    println!("{}", blocks.join("\n\n"));
    Ok(())
}

/// The commit reference to index under. Without `--commit` it is a digest over the
/// indexable paths and their blobs, so edits on disk start a new build.
async fn resolve_commit(source: &LocalTreeSource, tree: &TreeArgs) -> anyhow::Result<String> {
    if let Some(commit) = &tree.commit {
        return Ok(commit.clone());
    }
    let entries = source
        .list_tree(&tree.repo, DEFAULT_COMMIT)
        .await
        .with_context(|| format!("failed to list {}", tree.root.display()))?;
    let mut listing = String::new();
    for entry in entries.iter().filter(|e| is_interesting_path(&e.path)) {
        listing.push_str(&entry.path);
        listing.push('\0');
        listing.push_str(&entry.blob_sha);
        listing.push('\n');
    }
    let digest = content_hash(listing.as_bytes());
    Ok(format!("{DEFAULT_COMMIT}-{}", &digest[..12]))
}

async fn read_diff(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut patch = String::new();
        tokio::io::stdin()
            .read_to_string(&mut patch)
            .await
            .context("failed to read diff from stdin")?;
        return Ok(patch);
    }
    tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("failed to read diff file {source}"))
}

fn ensure_root(root: &Path) -> anyhow::Result<()> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    Ok(())
}

fn print_report(report: &IndexReport) {
    println!("files_scanned: {}", report.files_scanned);
    println!("files_indexed: {}", report.files_indexed);
    println!("files_unchanged: {}", report.files_unchanged);
    println!("files_removed: {}", report.files_removed);
    println!("files_failed: {}", report.files_failed);
    println!("chunks_created: {}", report.chunks_created);
    println!("chunks_removed: {}", report.chunks_removed);
    println!("chunks_unembedded: {}", report.chunks_unembedded);
    println!("embedding_calls: {}", report.embedding_calls);
    println!("duration_ms: {}", report.duration_ms);
}

fn init_subscriber(config_filter: Option<&str>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(config_filter.unwrap_or("info")))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
