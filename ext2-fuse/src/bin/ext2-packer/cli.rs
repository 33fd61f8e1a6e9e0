use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Executable source directory
    #[arg(long, short)]
    pub source: PathBuf,

    /// Executable target directory
    #[arg(long, short)]
    pub target: PathBuf,

    /// Output directory
    #[arg(long, short = 'O')]
    pub out_dir: PathBuf,

    /// Image size in MiB
    #[arg(long, default_value_t = 32)]
    pub size: u64,

    /// Block size in bytes: 1024, 2048 or 4096
    #[arg(long, short, default_value_t = 4096)]
    pub block_size: usize,
}
