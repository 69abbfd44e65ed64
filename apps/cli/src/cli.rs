use std::path::PathBuf;

use chunkup_transfer::HashAlgorithm;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked file uploader")]
pub struct Cli {
    /// File to upload
    pub file: PathBuf,

    /// Upload server base URL
    #[arg(long = "server")]
    pub server_url: Option<String>,

    /// Chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Maximum number of chunks in flight
    #[arg(short = 'j', long)]
    pub max_concurrency: Option<usize>,

    /// Content hash used as the file identity
    #[arg(long = "hash", value_enum)]
    pub hash_algorithm: Option<HashArg>,

    /// Per-request timeout in seconds
    #[arg(long = "timeout")]
    pub timeout_secs: Option<u64>,

    /// Configuration file (defaults to the platform config path)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    pub save_config: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashArg {
    Md5,
    Sha256,
}

impl From<HashArg> for HashAlgorithm {
    fn from(arg: HashArg) -> Self {
        match arg {
            HashArg::Md5 => HashAlgorithm::Md5,
            HashArg::Sha256 => HashAlgorithm::Sha256,
        }
    }
}
