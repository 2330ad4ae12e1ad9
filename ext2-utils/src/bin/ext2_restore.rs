use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ext2_fs::ops;

/// Brings back a removed file of an ext2 image
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
        let id = ops::restore(&mut efs, &cli.path)?;
        log::info!("{} is back as inode {id}", cli.path);
        efs.sync()?;
        Ok(())
    })
}
