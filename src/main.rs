use anyhow::{Context, Result};
use clap::Parser;
use feedicon::util::{validate_url, UrlPolicy};
use feedicon::{CachedFetcher, Feed, FeedIconResolver, IconConfig};
use std::path::PathBuf;
use std::time::Duration;

/// How long to wait for background discovery and download before giving up.
const RESOLVE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "feedicon", about = "Resolve the icon for a feed or home page")]
struct Args {
    /// Home page URL, or a feed URL with --feed
    url: String,

    /// Treat URL as a feed document: fetch it, parse it, and resolve the
    /// icon through the feed's own icon URL or home page
    #[arg(long)]
    feed: bool,

    /// Write the resolved icon bytes to this file
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Print disk cache statistics and exit
    #[arg(long)]
    stats: bool,

    /// Config file (TOML); defaults apply when omitted or missing
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Override the configured fetch timeout
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => IconConfig::load(path).context("Failed to load config")?,
        None => IconConfig::default(),
    };
    if let Some(cache_dir) = &args.cache_dir {
        config.cache_dir = cache_dir.clone();
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.fetch_timeout_secs = timeout_secs;
    }

    let resolver = FeedIconResolver::new(&config).context("Failed to build icon pipeline")?;

    if args.stats {
        let stats = resolver
            .image_store()
            .cache_stats()
            .context("Failed to read cache directory")?;
        println!("Entries: {}", stats.total_entries);
        println!("Size:    {} bytes", stats.total_size_bytes);
        if let Some(oldest) = stats.oldest_entry {
            println!("Oldest:  {}", oldest.to_rfc3339());
        }
        if let Some(newest) = stats.newest_entry {
            println!("Newest:  {}", newest.to_rfc3339());
        }
        return Ok(());
    }

    let policy = UrlPolicy {
        allow_private_networks: config.allow_private_networks,
    };

    let feed = if args.feed {
        let feed_url = validate_url(&args.url, policy).context("Invalid feed URL")?;
        let fetcher = CachedFetcher::new(&config)?;
        let (bytes, _) = fetcher
            .fetch(&feed_url, config.max_html_bytes)
            .await
            .context("Failed to fetch feed")?;
        let feed = Feed::from_feed_xml(&bytes, feed_url.as_str())?;
        tracing::info!(
            title = feed.title.as_deref().unwrap_or("(untitled)"),
            icon_url = feed.icon_url.as_deref().unwrap_or("-"),
            home_page = feed.home_page_url.as_deref().unwrap_or("-"),
            "Parsed feed"
        );
        feed
    } else {
        validate_url(&args.url, policy).context("Invalid home page URL")?;
        Feed {
            home_page_url: Some(args.url.clone()),
            ..Feed::default()
        }
    };

    // Subscribe before the first poll so no event is missed
    let mut events = resolver.subscribe();

    if let Some(icon) = resolver.icon_for_feed(&feed) {
        return report(&args, &resolver, &feed, &icon);
    }

    // Re-poll after each pipeline event until the icon resolves or the
    // deadline passes. Lookups are snapshots; the events tell us when a
    // snapshot is worth retaking.
    let started = std::time::Instant::now();
    while started.elapsed() < RESOLVE_DEADLINE {
        let remaining = RESOLVE_DEADLINE - started.elapsed();
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) => {
                tracing::debug!(?event, "Pipeline event");
                if let Some(icon) = resolver.icon_for_feed(&feed) {
                    return report(&args, &resolver, &feed, &icon);
                }
            }
            Ok(Err(_)) | Err(_) => break,
        }
    }

    anyhow::bail!("No icon could be resolved for {}", args.url);
}

fn report(args: &Args, resolver: &FeedIconResolver, feed: &Feed, icon: &[u8]) -> Result<()> {
    let icon_url = feed.icon_url.clone().or_else(|| {
        feed.home_page_url
            .as_deref()
            .and_then(|home| resolver.icon_url_cache().get(home))
    });

    if let Some(icon_url) = icon_url {
        println!("Icon URL: {icon_url}");
    }
    println!("Size:     {} bytes", icon.len());

    if let Some(out) = &args.out {
        std::fs::write(out, icon)
            .with_context(|| format!("Failed to write icon to {}", out.display()))?;
        println!("Written:  {}", out.display());
    }

    Ok(())
}
