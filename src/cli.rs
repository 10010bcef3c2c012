use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rezip")]
#[command(version)]
#[command(about = "Read, extract and update ZIP archives, local or over HTTP", long_about = None)]
#[command(after_help = "Examples:\n  \
  rezip data1.zip -x joe              extract all files except joe from data1.zip\n  \
  rezip -p foo.zip | more             send contents of foo.zip via pipe into more\n  \
  rezip -l https://example.com/a.zip  list files from remote ZIP\n  \
  rezip notes.zip --add docs          add docs/ and everything below it\n  \
  rezip notes.zip --delete old.txt    remove old.txt from notes.zip")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Test archive integrity
    #[arg(short = 't')]
    pub test: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Add files, directories or symlinks (creates the archive if missing)
    #[arg(long = "add", value_name = "PATH", num_args = 1..)]
    pub add: Vec<PathBuf>,

    /// Delete entries from the archive
    #[arg(long = "delete", value_name = "NAME", num_args = 1..)]
    pub delete: Vec<String>,

    /// Store added files without compression
    #[arg(short = '0')]
    pub store_only: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    /// True when the command modifies the archive.
    pub fn is_update(&self) -> bool {
        !self.add.is_empty() || !self.delete.is_empty()
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}
