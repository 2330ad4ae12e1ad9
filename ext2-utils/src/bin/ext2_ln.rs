use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ext2_fs::ops;

/// Links a file inside an ext2 image
#[derive(Parser)]
struct Cli {
    image: PathBuf,

    /// Make a symbolic link instead of a hard link
    #[arg(long, short)]
    symbolic: bool,

    /// Existing path
    src: String,

    /// Path of the new link
    dest: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    ext2_utils::run(|| {
        let mut efs = ext2_utils::open_image(&cli.image)?;
        if cli.symbolic {
            ops::sym_link(&mut efs, &cli.src, &cli.dest)?;
        } else {
            ops::hard_link(&mut efs, &cli.src, &cli.dest)?;
        }
        efs.sync()?;
        Ok(())
    })
}
