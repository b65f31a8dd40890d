//! Tracing setup shared by Archivist binaries.
//!
//! Events go to `<home>/logs/<app>.log`, rotated by size, and to stderr.
//! `RUST_LOG` overrides the default directives for both.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_DIRECTIVES: &str = "archivist=info,archivist_db=info,archivist_car=info";
const VERBOSE_DIRECTIVES: &str = "archivist=debug,archivist_db=debug,archivist_car=debug";

/// Live file plus four rotated generations, 10 MiB each.
const ROTATION: Rotation = Rotation {
    max_bytes: 10 * 1024 * 1024,
    keep: 5,
};

pub struct LogConfig<'a> {
    /// Log file stem, e.g. `archivist` -> `archivist.log`.
    pub app_name: &'a str,
    /// Raise the console to debug regardless of `RUST_LOG`.
    pub verbose: bool,
    /// Overrides `<home>/logs` when set.
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let dir = config.log_dir.unwrap_or_else(logs_dir);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;

    let log = RotatingLog::open(&dir, config.app_name, ROTATION)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))?;

    let console = if config.verbose {
        EnvFilter::new(VERBOSE_DIRECTIVES)
    } else {
        env_or_default()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log))
                .with_filter(env_or_default()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;
    Ok(())
}

fn env_or_default() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// `$ARCHIVIST_HOME`, else `~/.archivist`.
pub fn archivist_home() -> PathBuf {
    match std::env::var_os("ARCHIVIST_HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".archivist"),
    }
}

/// `<home>/logs`
pub fn logs_dir() -> PathBuf {
    archivist_home().join("logs")
}

#[derive(Debug, Clone, Copy)]
struct Rotation {
    max_bytes: u64,
    /// Total files on disk, live one included.
    keep: usize,
}

/// Append-only log file that shifts `x.log` to `x.log.1`, `x.log.1` to
/// `x.log.2`, and so on once it reaches `max_bytes`.
struct RotatingLog {
    live: PathBuf,
    rotation: Rotation,
    out: File,
    written: u64,
}

impl RotatingLog {
    fn open(dir: &Path, app_name: &str, rotation: Rotation) -> io::Result<Self> {
        let live = dir.join(format!("{}.log", file_stem(app_name)));
        let out = open_append(&live)?;
        let written = out.metadata()?.len();

        let mut log = Self {
            live,
            rotation,
            out,
            written,
        };
        if log.written >= rotation.max_bytes {
            log.shift()?;
        }
        Ok(log)
    }

    fn generation(&self, n: usize) -> PathBuf {
        if n == 0 {
            return self.live.clone();
        }
        let mut name = OsString::from(self.live.as_os_str());
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn shift(&mut self) -> io::Result<()> {
        self.out.flush()?;

        let oldest = self.rotation.keep.max(1) - 1;
        remove_if_exists(&self.generation(oldest))?;
        for n in (1..=oldest).rev() {
            match fs::rename(self.generation(n - 1), self.generation(n)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        self.out = open_append(&self.live)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.rotation.max_bytes {
            self.shift()?;
        }
        let n = self.out.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Keep `[A-Za-z0-9_-]`, replace everything else.
fn file_stem(app_name: &str) -> String {
    let stem: String = app_name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if stem.is_empty() {
        "archivist".to_string()
    } else {
        stem
    }
}
