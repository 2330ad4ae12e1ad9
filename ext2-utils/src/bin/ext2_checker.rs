use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ext2_fs::ops;

/// Checks an ext2 image and repairs what it can
#[derive(Parser)]
struct Cli {
    image: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    ext2_utils::run(|| {
        let mut efs = ext2_utils::open_image(&cli.image)?;
        let report = ops::check(&mut efs)?;
        println!("{report}");
        efs.sync()?;
        Ok(())
    })
}
