//! revcache - fetch file content at Subversion revisions through the cache
//!
//! Thin command-line driver over the `revcache` library, backed by the `svn`
//! command-line client.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use revcache::execution::select_mode;
use revcache::{
    CacheConfig, CancelToken, ContentFetcher, FetcherRegistry, FileRevision, ForegroundBlocking,
    Revision, RevisionContentCache, RevisionKey, SvnCliFetcher,
};

/// Schemes served by the `svn` client
const SVN_SCHEMES: &[&str] = &["svn", "svn+ssh", "http", "https", "file"];

/// CLI command
#[derive(Debug)]
enum Command {
    /// Write the content of one revision to stdout
    Cat {
        repository: String,
        path: String,
        revision: Revision,
    },
    /// Print size and SHA-1 of several revisions
    Digest {
        repository: String,
        path: String,
        revisions: Vec<Revision>,
    },
    /// Print the effective cache configuration
    Config,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"revcache - Subversion revision content through a deduplicating cache

USAGE:
    revcache [--config <file>] cat <repo_url> <path> <revision>
    revcache [--config <file>] digest <repo_url> <path> <revision>...
    revcache [--config <file>] config
    revcache help

COMMANDS:
    cat     Write the file content at a revision to stdout
    digest  Print size and SHA-1 for each revision (repeats are cache hits)
    config  Print the effective cache configuration as JSON
    help    Show this help message

REVISIONS:
    A number (42 or r42) or HEAD. HEAD is always fetched, never cached.

EXAMPLES:
    revcache cat https://svn.example.org/repo /trunk/README 1200
    revcache digest svn://svn.example.org/repo /trunk/main.c 10 11 10 HEAD

ENVIRONMENT:
    REVCACHE_MAX_ITEM_BYTES   Largest single content accepted
    REVCACHE_MAX_TOTAL_BYTES  Total cache ceiling
    RUST_LOG                  Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args(args: &[String]) -> Result<(Option<PathBuf>, Command)> {
    let mut args = args.to_vec();
    let mut config_path = None;

    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if pos + 1 >= args.len() {
            return Err(anyhow!("--config requires a file path"));
        }
        config_path = Some(PathBuf::from(args.remove(pos + 1)));
        args.remove(pos);
    }

    if args.len() < 2 {
        return Ok((config_path, Command::Help));
    }

    let command = match args[1].as_str() {
        "cat" => {
            if args.len() != 5 {
                return Err(anyhow!("Usage: revcache cat <repo_url> <path> <revision>"));
            }
            Command::Cat {
                repository: args[2].clone(),
                path: args[3].clone(),
                revision: args[4].parse()?,
            }
        }
        "digest" => {
            if args.len() < 5 {
                return Err(anyhow!(
                    "Usage: revcache digest <repo_url> <path> <revision>..."
                ));
            }
            let revisions = args[4..]
                .iter()
                .map(|r| r.parse::<Revision>())
                .collect::<Result<Vec<_>, _>>()?;
            Command::Digest {
                repository: args[2].clone(),
                path: args[3].clone(),
                revisions,
            }
        }
        "config" => Command::Config,
        "help" | "--help" | "-h" => Command::Help,
        other => {
            eprintln!("Unknown command: {}", other);
            Command::Help
        }
    };

    Ok((config_path, command))
}

/// Everything a content command needs, shared with the blocking worker
struct Session {
    cache: Arc<RevisionContentCache>,
    registry: FetcherRegistry,
    foreground: ForegroundBlocking,
}

impl Session {
    fn new(config: CacheConfig, runtime: Handle, cancel: CancelToken) -> Result<Self> {
        let cache = Arc::new(RevisionContentCache::new(config)?);

        let mut registry = FetcherRegistry::new();
        registry.register_shared(SVN_SCHEMES, Arc::new(SvnCliFetcher::new()));

        Ok(Self {
            cache,
            registry,
            foreground: ForegroundBlocking::new(runtime).with_cancel(cancel),
        })
    }

    fn load(&self, revision: &FileRevision) -> Result<bytes::Bytes> {
        let fetcher: Arc<dyn ContentFetcher> = self.registry.resolve_for(revision.key())?;
        let mode = select_mode(revision.key(), Some(&self.foreground));
        let content = revision
            .content_with(&self.cache, fetcher, mode)
            .with_context(|| format!("Failed to load {}", revision.key()))?;
        Ok(content)
    }
}

fn run_cat(session: &Session, repository: &str, path: &str, revision: Revision) -> Result<()> {
    let file = FileRevision::new(RevisionKey::new(repository, path, revision)?);
    let content = session.load(&file)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&content).context("Failed to write content")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

fn run_digest(
    session: &Session,
    repository: &str,
    path: &str,
    revisions: &[Revision],
) -> Result<()> {
    for revision in revisions {
        let file = FileRevision::new(RevisionKey::new(repository, path, *revision)?);
        let content = session.load(&file)?;
        println!(
            "{:>8}  {:>10} bytes  {}",
            revision.to_string(),
            content.len(),
            revcache::cache::content_digest(&content)
        );
    }

    session.cache.log_metrics();
    let stats = session.cache.stats();
    info!(
        fetches = stats.fetches,
        hits = stats.hits,
        cached_bytes = stats.total_bytes,
        "Digest complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let args: Vec<String> = env::args().collect();
    let (config_path, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let config =
        CacheConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let cancel = CancelToken::new();
    let session = Session::new(config, Handle::current(), cancel.clone())?;

    // Ctrl+C abandons the wait for content
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling");
            cancel.cancel();
        }
    });

    // Content commands block on the runtime handle, so run them off the runtime threads
    let outcome = tokio::task::spawn_blocking(move || match command {
        Command::Cat {
            repository,
            path,
            revision,
        } => run_cat(&session, &repository, &path, revision),
        Command::Digest {
            repository,
            path,
            revisions,
        } => run_digest(&session, &repository, &path, &revisions),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(session.cache.config())?);
            Ok(())
        }
        Command::Help => {
            print_help();
            Ok(())
        }
    })
    .await
    .context("Command task failed")?;

    if let Err(e) = &outcome {
        error!(error = %e, "Command failed");
    }
    outcome
}
