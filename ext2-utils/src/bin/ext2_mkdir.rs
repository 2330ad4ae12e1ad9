use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ext2_fs::ops;

/// Creates a directory inside an ext2 image
#[derive(Parser)]
struct Cli {
    image: PathBuf,

    /// Absolute path of the new directory
    path: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    ext2_utils::run(|| {
        let mut efs = ext2_utils::open_image(&cli.image)?;
        ops::make_dir(&mut efs, &cli.path)?;
        efs.sync()?;
        Ok(())
    })
}
