use clap::{ArgAction, Parser, ValueEnum};
use rangedl::config::{
    FetchConfig, DEFAULT_CHUNK_SIZE, DEFAULT_REQUEST_RETRIES, DEFAULT_WORKERS,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressMode {
    /// One bar for the whole file
    Bar,
    /// One bar per segment plus the total
    Segments,
    /// No progress output
    Off,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Download one file over parallel HTTP range requests", long_about = None)]
pub struct Args {
    /// URL of the file to download
    #[arg(index = 1)]
    pub url: String,

    /// Output file (defaults to the last path segment of the URL inside --download-dir)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Directory used when --output is not given
    #[arg(short = 'd', long = "download-dir", default_value = ".")]
    pub download_dir: PathBuf,

    /// Number of segments fetched concurrently
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS, value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: u32,

    /// Bytes handed to the writer per chunk
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_chunk_size)]
    pub chunk_size: usize,

    /// Seconds to wait for the next piece of a response body
    #[arg(short = 't', long, default_value_t = 60)]
    pub timeout: u64,

    /// Seconds to wait for a connection to be established
    #[arg(long = "connect-timeout", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Times a request that got no response is re-sent
    #[arg(short = 'r', long, default_value_t = DEFAULT_REQUEST_RETRIES)]
    pub retries: u32,

    /// Stop every segment as soon as one fails
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    /// Size the output file up front
    #[arg(long)]
    pub preallocate: bool,

    /// Follow redirects once before starting and send every segment to the final URL
    #[arg(long)]
    pub resolve: bool,

    /// How progress is rendered on stderr
    #[arg(long, value_enum, default_value = "bar")]
    pub progress: ProgressMode,

    /// Print the final summary as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn fetch_config(&self) -> FetchConfig {
        let mut config = FetchConfig::default()
            .with_workers(self.workers)
            .with_chunk_size(self.chunk_size)
            .with_read_timeout(Duration::from_secs(self.timeout))
            .with_request_retries(self.retries)
            .with_cancel_on_failure(self.fail_fast)
            .with_preallocate(self.preallocate);
        config.connect_timeout = Duration::from_secs(self.connect_timeout);
        config
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

fn parse_chunk_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("chunk size must be greater than 0".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
