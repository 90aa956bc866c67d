//! Merge local files example
//!
//! Merges PDFs and raster images from disk into one document, without the
//! job queue, fetcher or database:
//!
//! ```bash
//! cargo run --example merge_files -- out.pdf cover.png chapter1.pdf chapter2.pdf
//! cargo run --example merge_files -- out.pdf ./scans/
//! ```
//!
//! A directory argument contributes its `.pdf` files in name order.

use docbatch::merge::MergeAccumulator;
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args_os().skip(1);
    let Some(output) = args.next().map(PathBuf::from) else {
        eprintln!("usage: merge_files <output.pdf> <file-or-dir>...");
        std::process::exit(2);
    };

    let mut inputs = Vec::new();
    for arg in args {
        let path = PathBuf::from(arg);
        if path.is_dir() {
            inputs.extend(pdfs_in(&path)?);
        } else {
            inputs.push(path);
        }
    }

    if inputs.is_empty() {
        eprintln!("no input files");
        std::process::exit(2);
    }

    let mut merged = MergeAccumulator::new();
    for path in &inputs {
        match merged.append_file(path) {
            Ok(pages) => println!("+ {} ({} pages)", path.display(), pages),
            Err(e) => eprintln!("- {}: {}", path.display(), e),
        }
    }

    if merged.page_count() == 0 {
        return Err("none of the inputs could be merged".into());
    }

    let pages = merged.page_count();
    std::fs::write(&output, merged.finish()?)?;
    println!("wrote {} pages to {}", pages, output.display());

    Ok(())
}

fn pdfs_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    files.sort();
    Ok(files)
}
