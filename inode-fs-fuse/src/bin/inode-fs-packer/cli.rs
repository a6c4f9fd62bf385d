use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Directory of files to pack into the image
    #[arg(long, short)]
    pub source: PathBuf,

    /// Output image path
    #[arg(long, short = 'O')]
    pub image: PathBuf,

    /// Image size in blocks
    #[arg(long, short, default_value_t = 16 * 2048)]
    pub blocks: u32,
}
