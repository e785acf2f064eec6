use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "lsifdb",
    version,
    about = "Convert an LSIF dump into a queryable SQLite bundle",
    after_help = r#"Examples:
  lsifdb convert --input dump.lsif.gz --output bundle.sqlite
  lsifdb convert --input dump.lsif.gz --output bundle.sqlite --root cmd/server --repo .
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Convert a gzipped LSIF dump once and exit.
    Convert {
        /// Path to the gzip-compressed LSIF dump.
        #[arg(long)]
        input: PathBuf,
        /// Path of the bundle file to produce.
        #[arg(long)]
        output: PathBuf,
        /// Root of the dump within the repository.
        #[arg(long, default_value = "")]
        root: String,
        /// Repository checkout used to answer directory listings
        /// during pruning.
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
}
