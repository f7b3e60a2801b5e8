use std::{sync::Arc, time::Duration};

use clap::Parser;
use error::AppError;
use futures::future::join_all;
use indicatif::MultiProgress;
use track_cache::{AudioCache, CacheConfig, TrackMetadata};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

mod cli;
mod error;
mod utils;

use cli::{CliArgs, Command, FetchArgs};
use utils::progress::ProgressManager;
use utils::{format_bytes, parse_header};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    setup_logging(&args)?;

    let config = cache_config(&args);
    debug!(
        dir = ?config.cache_dir,
        max_entries = config.max_entries,
        timeout = ?config.downloader.timeout,
        connect_timeout = ?config.downloader.connect_timeout,
        read_timeout = ?config.downloader.read_timeout,
        "Cache configuration"
    );

    let cache = AudioCache::open(config).await?;
    let result = run(&cache, &args).await;
    cache.shutdown().await;
    result
}

fn setup_logging(args: &CliArgs) -> Result<(), AppError> {
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    // Command output goes to stdout, logs to stderr
    let writer = match &args.log_file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?;
            BoxMakeWriter::new(MakeWriterExt::and(std::io::stderr, Arc::new(log_file)))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(args.log_file.is_none())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))
}

fn cache_config(args: &CliArgs) -> CacheConfig {
    let mut builder = CacheConfig::builder(&args.cache_dir)
        .with_max_entries(args.max_entries)
        .with_prune_truncated_files(!args.keep_orphans)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout));

    if let Some(user_agent) = &args.user_agent {
        builder = builder.with_user_agent(user_agent);
    }

    for (name, value) in args.headers.iter().filter_map(|h| parse_header(h)) {
        info!(name, value, "Adding header");
        builder = builder.with_header(name, value);
    }

    if let Some(proxy) = &args.proxy {
        builder = builder.with_proxy(proxy);
    }

    builder.build()
}

async fn run(cache: &Arc<AudioCache>, args: &CliArgs) -> Result<(), AppError> {
    match &args.command {
        Command::Fetch(fetch) => fetch_tracks(cache, fetch, !args.no_progress).await,
        Command::Resolve { url, id } => {
            let metadata = id.as_deref().map(TrackMetadata::new);
            println!("{}", cache.resolve_url(url, metadata.as_ref()).await);
            Ok(())
        }
        Command::Info { url } => {
            let meta = cache
                .get_cached_meta(url)
                .await
                .ok_or_else(|| AppError::NotCached(url.clone()))?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
            Ok(())
        }
        Command::Find { track_id } => {
            let path = cache
                .find_cached_url_by_track_id(track_id)
                .await
                .ok_or_else(|| AppError::NotCached(track_id.clone()))?;
            println!("{path}");
            Ok(())
        }
        Command::List { json } => {
            let entries = cache.get_all_cached_tracks().await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            for entry in &entries {
                let cached_at = chrono::DateTime::from_timestamp_millis(entry.cached_at)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                let size = entry.size_bytes.map(format_bytes).unwrap_or_default();
                println!(
                    "{cached_at}\t{size}\t{}\t{}",
                    entry.track_id().unwrap_or("-"),
                    entry.url
                );
            }
            info!(count = entries.len(), "Listed cached tracks");
            Ok(())
        }
        Command::Stats => {
            let stats = cache.stats().await;
            println!("entries: {}/{}", stats.entries, cache.config().max_entries);
            println!("size:    {}", format_bytes(stats.total_bytes));
            println!("dir:     {}", cache.cache_dir().display());
            Ok(())
        }
        Command::Evict { urls } => {
            for url in urls {
                cache.evict_url(url).await;
            }
            info!(count = urls.len(), "Evicted tracks");
            Ok(())
        }
        Command::Clear => {
            cache.clear_cache().await;
            info!(dir = ?cache.cache_dir(), "Cache cleared");
            Ok(())
        }
    }
}

fn fetch_metadata(fetch: &FetchArgs) -> Result<Option<TrackMetadata>, AppError> {
    if fetch.id.is_some() && fetch.urls.len() > 1 {
        return Err(AppError::InvalidInput(
            "--id can only be used with a single URL".to_string(),
        ));
    }

    let has_metadata = fetch.id.is_some()
        || fetch.title.is_some()
        || fetch.artist.is_some()
        || fetch.artwork.is_some()
        || fetch.duration.is_some();
    if !has_metadata {
        return Ok(None);
    }

    let mut metadata = TrackMetadata::new(fetch.id.clone().unwrap_or_default());
    if let Some(title) = &fetch.title {
        metadata = metadata.with_title(title);
    }
    if let Some(artist) = &fetch.artist {
        metadata = metadata.with_artist(artist);
    }
    if let Some(artwork) = &fetch.artwork {
        metadata = metadata.with_artwork(artwork);
    }
    if let Some(duration) = fetch.duration {
        if !duration.is_finite() || duration < 0.0 {
            return Err(AppError::InvalidInput(format!(
                "Invalid duration: {duration}"
            )));
        }
        metadata = metadata.with_duration_sec(duration);
    }
    Ok(Some(metadata))
}

async fn fetch_tracks(
    cache: &Arc<AudioCache>,
    fetch: &FetchArgs,
    show_progress: bool,
) -> Result<(), AppError> {
    let metadata = fetch_metadata(fetch)?;

    let multi = MultiProgress::new();
    let progress_manager = if show_progress {
        ProgressManager::new(multi)
    } else {
        ProgressManager::new_disabled(multi)
    };

    let listener_manager = progress_manager.clone();
    let subscription =
        cache.add_progress_listener(move |progress| listener_manager.handle_progress(progress));

    let handles = fetch
        .urls
        .iter()
        .map(|url| cache.spawn_cache_url(url.as_str(), metadata.clone()));
    for joined in join_all(handles).await {
        if let Err(e) = joined {
            warn!(error = %e, "Caching task failed");
        }
    }

    subscription.unsubscribe();
    progress_manager.finish();

    let mut failed = 0;
    for url in &fetch.urls {
        if cache.is_cached(url).await {
            println!("{}", cache.resolve_url(url, None).await);
        } else {
            warn!(url, "Track was not cached");
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(AppError::Incomplete {
            failed,
            total: fetch.urls.len(),
        });
    }
    info!(count = fetch.urls.len(), "Fetch complete");
    Ok(())
}
