//! Block file configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How an existing file is treated when opening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Create the file, discarding any previous contents
    #[default]
    Truncate,
    /// Keep existing contents; writing continues after the last whole block
    Resume,
}

/// What happens to the tail of a block when fewer than L bytes are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShortWrite {
    /// Pad the block with zero bytes up to L
    #[default]
    ZeroFill,
    /// Write only the given bytes; the rest keeps whatever the medium holds
    ///
    /// A short block at the end of the medium is not readable until a later
    /// write extends the medium past it.
    LeaveAsIs,
}

/// How a reader waits for a block that has not been written yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadWait {
    /// Sleep until a writer reports progress
    #[default]
    Notify,
    /// Retry in a loop with progressive backoff, never sleeping on a signal
    Spin,
}

impl FromStr for OpenMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "resume" => Ok(Self::Resume),
            other => Err(format!("unknown open mode '{other}'")),
        }
    }
}

impl FromStr for ShortWrite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero-fill" | "zerofill" | "zero" => Ok(Self::ZeroFill),
            "leave" | "leave-as-is" => Ok(Self::LeaveAsIs),
            other => Err(format!("unknown short write policy '{other}'")),
        }
    }
}

impl FromStr for ReadWait {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notify" => Ok(Self::Notify),
            "spin" => Ok(Self::Spin),
            other => Err(format!("unknown read wait strategy '{other}'")),
        }
    }
}

/// Configuration for a `BlockFile`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFileConfig {
    /// Fixed block length L in bytes; must be non-zero.
    pub block_length: u32,

    /// Treatment of an existing file at open.
    pub open_mode: OpenMode,

    /// Handling of writes shorter than L.
    pub short_write: ShortWrite,

    /// How readers wait for blocks that are not written yet.
    pub read_wait: ReadWait,

    /// Upper bound on how long a read waits. `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
}

impl BlockFileConfig {
    pub const ENV_OPEN_MODE: &'static str = "BLOCKFILE_OPEN_MODE";
    pub const ENV_SHORT_WRITE: &'static str = "BLOCKFILE_SHORT_WRITE";
    pub const ENV_READ_WAIT: &'static str = "BLOCKFILE_READ_WAIT";
    pub const ENV_READ_TIMEOUT_MS: &'static str = "BLOCKFILE_READ_TIMEOUT_MS";

    #[must_use]
    pub fn new(block_length: u32) -> Self {
        Self {
            block_length,
            open_mode: OpenMode::default(),
            short_write: ShortWrite::default(),
            read_wait: ReadWait::default(),
            read_timeout: None,
        }
    }

    /// Defaults overlaid with `BLOCKFILE_*` environment variables
    ///
    /// Values that fail to parse are logged and ignored.
    #[must_use]
    pub fn from_env(block_length: u32) -> Self {
        Self::from_lookup(block_length, |key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    #[must_use]
    pub fn from_lookup(block_length: u32, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(block_length);
        if let Some(mode) = parse_var(&lookup, Self::ENV_OPEN_MODE) {
            config.open_mode = mode;
        }
        if let Some(policy) = parse_var(&lookup, Self::ENV_SHORT_WRITE) {
            config.short_write = policy;
        }
        if let Some(wait) = parse_var(&lookup, Self::ENV_READ_WAIT) {
            config.read_wait = wait;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, Self::ENV_READ_TIMEOUT_MS) {
            // 0 means "no deadline"
            config.read_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        config
    }

    #[must_use]
    pub fn with_open_mode(mut self, mode: OpenMode) -> Self {
        self.open_mode = mode;
        self
    }

    #[must_use]
    pub fn with_short_write(mut self, policy: ShortWrite) -> Self {
        self.short_write = policy;
        self
    }

    #[must_use]
    pub fn with_read_wait(mut self, wait: ReadWait) -> Self {
        self.read_wait = wait;
        self
    }

    /// Set a read deadline; a zero duration clears it.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout.filter(|d| !d.is_zero());
        self
    }
}

impl Default for BlockFileConfig {
    fn default() -> Self {
        Self::new(4096)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("config: ignoring {key}={raw:?}: {e}");
            None
        }
    }
}
