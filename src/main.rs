use anyhow::{Context, Result};
use clap::Parser;
use lsifdb::cancel::CancelToken;
use lsifdb::existence::GetChildren;
use lsifdb::{cli, convert};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Answers directory listings from a working tree on disk. Missing
/// directories come back with an empty child list, which stops the
/// pruner from descending into them.
struct FsDirectoryLister {
    repo_root: PathBuf,
}

impl GetChildren for FsDirectoryLister {
    fn get_children(&mut self, dirnames: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        let mut listings = BTreeMap::new();
        for dir in dirnames {
            let full = if dir.is_empty() {
                self.repo_root.clone()
            } else {
                self.repo_root.join(dir)
            };

            let mut children = Vec::new();
            if let Ok(entries) = std::fs::read_dir(&full) {
                for entry in entries {
                    let entry =
                        entry.with_context(|| format!("list directory {}", full.display()))?;
                    children.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            children.sort();
            listings.insert(dir.clone(), children);
        }
        Ok(listings)
    }
}

fn main() -> Result<()> {
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Convert {
            input,
            output,
            root,
            repo,
        } => {
            let mut children = FsDirectoryLister { repo_root: repo };
            let cancel = CancelToken::new();

            let conversion = convert::convert(&input, &output, &root, &mut children, &cancel)?;
            eprintln!(
                "lsifdb: wrote {} documents, {} result chunks, {} definitions, {} references to {}",
                conversion.stats.documents,
                conversion.stats.result_chunks,
                conversion.stats.definitions,
                conversion.stats.references,
                output.display()
            );

            println!("{}", serde_json::to_string_pretty(&conversion)?);
            Ok(())
        }
    }
}
