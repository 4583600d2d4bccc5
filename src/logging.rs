use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

const DEFAULT_MAX_MB: u64 = 10;
const DEFAULT_KEEP: u32 = 3;

/// File logging requested through `WARDEN_LOG_FILE`,
/// `WARDEN_LOG_MAX_SIZE_MB` and `WARDEN_LOG_MAX_FILES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileSettings {
    pub path: PathBuf,
    pub max_bytes: u64,
    /// Rotated copies kept next to `path` as `path.1` (newest) .. `path.N`.
    pub keep: u32,
}

impl LogFileSettings {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let path = get("WARDEN_LOG_FILE").filter(|p| !p.is_empty())?;
        let max_mb = get("WARDEN_LOG_MAX_SIZE_MB")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&mb| mb > 0)
            .unwrap_or(DEFAULT_MAX_MB);
        let keep = get("WARDEN_LOG_MAX_FILES")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_KEEP);
        Some(Self {
            path: PathBuf::from(path),
            max_bytes: max_mb.saturating_mul(1024 * 1024),
            keep,
        })
    }
}

/// Append-only log file that starts over once a write would push it past
/// `max_bytes`.
pub struct RotatingFile {
    settings: LogFileSettings,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(settings: LogFileSettings) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&settings.path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            settings,
            file,
            written,
        })
    }

    fn backup(&self, n: u32) -> PathBuf {
        let mut name = OsString::from(self.settings.path.as_os_str());
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if self.settings.keep > 0 {
            // Missing backups are expected until the first few rotations.
            for n in (1..self.settings.keep).rev() {
                let _ = fs::rename(self.backup(n), self.backup(n + 1));
            }
            fs::rename(&self.settings.path, self.backup(1))?;
        }
        self.file = File::create(&self.settings.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let would_overflow = self.written + buf.len() as u64 > self.settings.max_bytes;
        if self.written > 0 && would_overflow {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `RUST_LOG` controls the filter (default `info`). Output goes to stderr
/// unless `WARDEN_LOG_FILE` names a file.
pub fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Some(settings) = LogFileSettings::from_env() {
        let path = settings.path.clone();
        match RotatingFile::open(settings) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!(
                "Cannot open log file {}: {e}, logging to stderr",
                path.display()
            ),
        }
    }

    let _ = builder.try_init();
}
