use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ext2_fs::ops;

/// Removes a file or symlink from an ext2 image
#[derive(Parser)]
struct Cli {
    image: PathBuf,

    path: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    ext2_utils::run(|| {
        let mut efs = ext2_utils::open_image(&cli.image)?;
        ops::remove(&mut efs, &cli.path)?;
        efs.sync()?;
        Ok(())
    })
}
