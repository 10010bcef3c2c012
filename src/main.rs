//! Command-line front end for rezip.
//!
//! Lists, tests and extracts local or remote archives, and adds or deletes
//! entries in local ones.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use rezip::{
    AccessMode, AddOptions, Archive, Cli, CompressionMethod, Entry, ExtractOptions, FileStorage,
    RemoveOptions, Storage,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.is_http_url() {
        if cli.is_update() {
            bail!("remote archives are read-only; --add and --delete need a local file");
        }
        run_remote(&cli)
    } else if cli.is_update() {
        update_zip(&cli)
    } else {
        let mut archive = Archive::open(&cli.file, AccessMode::Read)
            .with_context(|| format!("cannot open {}", cli.file))?;
        process_zip(&mut archive, &cli)
    }
}

#[cfg(feature = "http")]
fn run_remote(cli: &Cli) -> Result<()> {
    let mut archive = Archive::open_url(&cli.file, Default::default())?;
    process_zip(&mut archive, cli)?;

    if !cli.is_quiet() {
        let transferred = archive.storage().transferred_bytes();
        eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
    }
    Ok(())
}

#[cfg(not(feature = "http"))]
fn run_remote(_cli: &Cli) -> Result<()> {
    bail!("built without HTTP support")
}

/// Apply `--delete` then `--add` to a local archive, creating it if needed.
fn update_zip(cli: &Cli) -> Result<()> {
    let mode = if Path::new(&cli.file).exists() {
        AccessMode::Update
    } else {
        AccessMode::Create
    };
    let mut archive = Archive::open(&cli.file, mode)
        .with_context(|| format!("cannot open {}", cli.file))?;

    for name in &cli.delete {
        let Some(entry) = archive.get(name)? else {
            bail!("{name}: not found in {}", cli.file);
        };
        archive.remove(&entry, &RemoveOptions::default(), None)?;
        if !cli.is_quiet() {
            println!("    deleting: {name}");
        }
    }

    let options = AddOptions::new().compression(if cli.store_only {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflate
    });
    for path in &cli.add {
        add_tree(&mut archive, path, &options, cli)?;
    }

    archive.close()?;
    Ok(())
}

/// Add `path`, and everything below it when it is a real directory.
fn add_tree(
    archive: &mut Archive<FileStorage>,
    path: &Path,
    options: &AddOptions,
    cli: &Cli,
) -> Result<()> {
    let name = archive_name(path)
        .with_context(|| format!("{}: cannot be stored as an archive member", path.display()))?;
    let entry = archive.add_path(&name, path, options, None)?;
    if !cli.is_quiet() {
        println!("  adding: {}", entry.path());
    }

    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        let mut children = fs::read_dir(path)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        children.sort();
        for child in children {
            add_tree(archive, &child, options, cli)?;
        }
    }
    Ok(())
}

/// Member name for a filesystem path: its normal components joined by `/`.
fn archive_name(path: &Path) -> Option<String> {
    let parts: Vec<_> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_str()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// List, test or extract according to `cli`.
fn process_zip<S: Storage>(archive: &mut Archive<S>, cli: &Cli) -> Result<()> {
    if cli.list || cli.verbose {
        return list_files(archive, cli.verbose);
    }
    if cli.test {
        return test_files(archive, cli);
    }

    let entries = archive.entries().collect::<rezip::Result<Vec<_>>>()?;
    let selected: Vec<_> = entries
        .iter()
        .filter(|e| !e.is_dir() && is_selected(e.path(), &cli.files, &cli.exclude))
        .collect();

    let show_names = cli.pipe && selected.len() > 1;
    for entry in selected {
        extract_file(archive, entry, cli, show_names)?;
    }
    Ok(())
}

/// Positional names match exactly or by basename; glob patterns match the
/// full path. `-x` patterns match by substring or glob.
fn is_selected(path: &str, include: &[String], exclude: &[String]) -> bool {
    if !include.is_empty() {
        let basename = path.rsplit('/').next().unwrap_or(path);
        let wanted = include.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, path)
            } else {
                path == f || basename == f
            }
        });
        if !wanted {
            return false;
        }
    }
    !exclude
        .iter()
        .any(|x| path.contains(x.as_str()) || glob_match(x, path))
}

fn list_files<S: Storage>(archive: &mut Archive<S>, verbose: bool) -> Result<()> {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in archive.entries() {
        let entry = entry?;
        if !verbose {
            println!("{}", entry.path());
            continue;
        }

        let (year, month, day) = entry.modified().date();
        let (hour, minute, _) = entry.modified().time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size(),
            entry.compressed_size(),
            ratio(entry.compressed_size(), entry.uncompressed_size()),
            year,
            month,
            day,
            hour,
            minute,
            entry.path()
        );
        if !entry.is_dir() {
            total_uncompressed += entry.uncompressed_size();
            total_compressed += entry.compressed_size();
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
    Ok(())
}

/// Space saved by compression, as shown in the verbose listing.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 {
        return "  0%".to_string();
    }
    let saved = 100i64 - (compressed.saturating_mul(100) / uncompressed) as i64;
    format!("{:>4}%", saved.max(0))
}

/// Extract every entry to nowhere, checking CRC-32 as it goes.
fn test_files<S: Storage>(archive: &mut Archive<S>, cli: &Cli) -> Result<()> {
    let entries = archive.entries().collect::<rezip::Result<Vec<_>>>()?;
    let options = ExtractOptions::default();
    let mut failures = 0usize;

    for entry in &entries {
        match archive.extract(entry, &options, None, |_| Ok(())) {
            Ok(_) => {
                if !cli.is_quiet() {
                    println!("    testing: {:<40}  OK", entry.path());
                }
            }
            Err(err) => {
                failures += 1;
                if !cli.is_very_quiet() {
                    eprintln!("    testing: {:<40}  {}", entry.path(), err);
                }
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} entries failed the integrity test", entries.len());
    }
    if !cli.is_very_quiet() {
        println!("No errors detected in compressed data of {}.", cli.file);
    }
    Ok(())
}

fn extract_file<S: Storage>(
    archive: &mut Archive<S>,
    entry: &Entry,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    if cli.pipe {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if show_filename {
            writeln!(out, "--- {} ---", entry.path())?;
        }
        archive.extract(entry, &ExtractOptions::default(), None, |chunk| {
            out.write_all(chunk)?;
            Ok(())
        })?;
        out.flush()?;
        return Ok(());
    }

    let root = cli
        .extract_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let basename = entry.path().rsplit('/').next().unwrap_or(entry.path());
    let output_path = if cli.junk_paths {
        root.join(basename)
    } else {
        root.join(entry.path())
    };

    if output_path.symlink_metadata().is_ok() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.path());
            }
            return Ok(());
        }
        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.path());
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.path());
    }

    if cli.junk_paths {
        fs::create_dir_all(&root)?;
        let mut file = File::create(&output_path)?;
        archive.extract(entry, &ExtractOptions::default(), None, |chunk| {
            file.write_all(chunk)?;
            Ok(())
        })?;
    } else {
        archive.unpack_entry(entry, &root)?;
    }
    Ok(())
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob match where `*` is any run of characters and `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it was tried against.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

fn format_size(size: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB")];
    for (scale, unit) in UNITS {
        if size >= scale {
            return format!("{:.2} {}", size as f64 / scale as f64, unit);
        }
    }
    format!("{} bytes", size)
}
