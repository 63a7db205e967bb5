use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use memmap2::Mmap;
use structopt::*;

use zipvfs::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zipfs",
    about = "Browses a ZIP archive (or one appended to this program) as a file system"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// The archive to open. Without one, look for an archive on the end of this program.
    #[structopt(short, long)]
    archive: Option<PathBuf>,

    /// Treat this directory in the archive as the root.
    #[structopt(short, long, default_value = "/")]
    prefix: String,

    /// Open every file as a stream, even when it could be read in place.
    #[structopt(long)]
    no_seek: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Lists a directory.
    Ls {
        #[structopt(default_value = "/")]
        path: String,
    },
    /// Writes a file to stdout.
    Cat { path: String },
    /// Prints every path starting with the given prefix.
    Find { prefix: String },
    /// Prints every path containing the pattern's characters, in order.
    Fuzzy { pattern: String },
    /// Prints everything under a directory.
    Tree {
        #[structopt(default_value = "/")]
        path: String,
    },
}

/// A memory-mapped archive
struct Mapped(Mmap);

impl ReadAt for Mapped {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.0[..].read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.0.len() as u64)
    }
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let archive = match &args.archive {
        Some(path) => {
            info!("Memory mapping {}", path.display());
            let zip_file = fs::File::open(path)
                .with_context(|| format!("Couldn't open {}", path.display()))?;
            let mapping = unsafe { Mmap::map(&zip_file).context("Couldn't mmap zip file")? };
            ZipArchive::with_prepended_data(Mapped(mapping))
                .context("Couldn't load archive")?
                .0
        }
        None => ZipArchive::embedded().context("Couldn't find an archive on this program")?,
    };

    let zip_fs = if args.no_seek {
        ZipFileSystem::without_seeking(archive)
    } else {
        ZipFileSystem::new(archive)
    };

    // Searches work on the whole archive; everything else goes through the prefix.
    let mounted = prefix(&args.prefix, &zip_fs);
    match args.command {
        Command::Ls { path } => ls(&mounted, &path),
        Command::Cat { path } => cat(&mounted, &path),
        Command::Find { prefix } => print_paths(zip_fs.paths_with_prefix(&prefix)),
        Command::Fuzzy { pattern } => print_paths(zip_fs.fuzzy_find(&pattern)),
        Command::Tree { path } => tree(&mounted, &path),
    }
}

fn ls(fs: &impl FileSystem, path: &str) -> Result<()> {
    let mut dir = fs.open(path)?;
    if !dir.is_dir() {
        print_info(&dir.stat());
        return Ok(());
    }
    for info in dir.read_dir(-1)? {
        print_info(&info);
    }
    Ok(())
}

fn print_info(info: &FileInfo) {
    println!(
        "{}{:o} {:>10} {} {}{}",
        if info.is_dir() { 'd' } else { '-' },
        info.mode(),
        info.size(),
        info.modified().format("%Y-%m-%d %H:%M"),
        info.name(),
        if info.is_dir() { "/" } else { "" }
    );
}

fn cat(fs: &impl FileSystem, path: &str) -> Result<()> {
    let mut file = fs.open(path)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut file, &mut out).with_context(|| format!("Couldn't read {}", path))?;
    out.flush()?;
    Ok(())
}

fn print_paths(paths: Vec<String>) -> Result<()> {
    for path in paths {
        println!("{}", path);
    }
    Ok(())
}

fn tree(fs: &impl FileSystem, path: &str) -> Result<()> {
    let mut dir = fs.open(path)?;
    println!("{}", dir.path());
    walk(fs, path, &mut dir, 1)
}

fn walk(fs: &impl FileSystem, path: &str, dir: &mut File, depth: usize) -> Result<()> {
    // Page through, like a server listing a big directory would.
    loop {
        let page = dir.read_dir(32)?;
        if page.is_empty() {
            return Ok(());
        }
        for info in page {
            println!("{:indent$}{}", "", info.name(), indent = depth * 2);
            if info.is_dir() {
                let child = format!("{}/{}", path.trim_end_matches('/'), info.name());
                let mut child_dir = fs.open(&child)?;
                walk(fs, &child, &mut child_dir, depth + 1)?;
            }
        }
    }
}
