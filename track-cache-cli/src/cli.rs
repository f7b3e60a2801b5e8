use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Inspect and fill an on-device audio track cache",
    long_about = "Downloads audio tracks into a local cache directory and manages the\n\
                  manifest that records them. Cached tracks resolve to their local file,\n\
                  everything else resolves to the original URL."
)]
pub struct CliArgs {
    /// Cache directory
    #[arg(
        short,
        long,
        global = true,
        default_value = "./track-cache",
        help = "Directory holding cached tracks and the manifest"
    )]
    pub cache_dir: PathBuf,

    /// Manifest capacity
    #[arg(
        short,
        long,
        global = true,
        default_value_t = track_cache::MAX_ENTRIES,
        help = "Maximum number of tracks kept in the cache"
    )]
    pub max_entries: usize,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        help = "Also write logs to this file (truncated on start)"
    )]
    pub log_file: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        default_value = "0",
        help = "Overall timeout in seconds for HTTP requests (0 disables it)"
    )]
    pub timeout: u64,

    #[arg(
        long,
        global = true,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    #[arg(
        long,
        global = true,
        default_value = "30",
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: u64,

    #[arg(long, global = true, help = "User-Agent sent with every request")]
    pub user_agent: Option<String>,

    /// Custom HTTP headers
    #[arg(
        short = 'H',
        long = "header",
        global = true,
        help = "Add custom HTTP header (format: 'Name: Value'). Can be used multiple times."
    )]
    pub headers: Vec<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        global = true,
        help = "Proxy server URL (e.g., \"http://proxy.example.com:8080\" or \"socks5://...\")"
    )]
    pub proxy: Option<String>,

    #[arg(long, global = true, help = "Do not prune files dropped from the manifest")]
    pub keep_orphans: bool,

    #[arg(long = "no-progress", global = true, help = "Disable progress bars")]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Download tracks into the cache
    Fetch(FetchArgs),

    /// Print the playable location of a track
    Resolve {
        url: String,

        /// Track id used when the URL itself is not cached
        #[arg(long)]
        id: Option<String>,
    },

    /// Show the cached metadata of a URL
    Info { url: String },

    /// Print the cached file of a track id
    Find { track_id: String },

    /// List cached tracks, most recent first
    List {
        #[arg(long, help = "Print the entries as JSON")]
        json: bool,
    },

    /// Show entry count and disk usage
    Stats,

    /// Remove tracks from the cache
    Evict {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Remove every cached track and the manifest
    Clear,
}

#[derive(Args)]
pub struct FetchArgs {
    #[arg(required = true, help = "Track URL(s) to download")]
    pub urls: Vec<String>,

    /// Track id, only applied when fetching a single URL
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub artist: Option<String>,

    #[arg(long)]
    pub artwork: Option<String>,

    #[arg(long, help = "Track duration in seconds")]
    pub duration: Option<f64>,
}
