use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ext2_fs::Geometry;

/// Formats a fresh single-group ext2 image
#[derive(Parser)]
struct Cli {
    /// Image file to create, overwritten if present
    image: PathBuf,

    /// Number of 1 KiB blocks
    #[arg(long, short, default_value_t = Geometry::default().blocks_count)]
    blocks: u32,

    /// Number of inodes
    #[arg(long, short, default_value_t = Geometry::default().inodes_count)]
    inodes: u32,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    ext2_utils::run(|| {
        let geometry = Geometry {
            blocks_count: cli.blocks,
            inodes_count: cli.inodes,
        };
        let mut efs = ext2_utils::create_image(&cli.image, geometry)?;
        efs.sync()?;
        Ok(())
    })
}
