use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use ext2_fs::ops;

/// Copies a host file into an ext2 image
#[derive(Parser)]
struct Cli {
    image: PathBuf,

    /// File on the host
    source: PathBuf,

    /// Absolute path of the copy inside the image
    dest: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    ext2_utils::run(|| {
        let data = fs::read(&cli.source)
            .with_context(|| format!("cannot read {}", cli.source.display()))?;
        let mut efs = ext2_utils::open_image(&cli.image)?;
        ops::copy_in(&mut efs, &data, &cli.dest)?;
        efs.sync()?;
        Ok(())
    })
}
