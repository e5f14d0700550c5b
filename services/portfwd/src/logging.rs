//! Logging.
//!
//! Process-wide output goes through `tracing`. The relay core does not log
//! through `tracing` macros directly; it writes prefixed lines to an injected
//! [`LogSink`], so the sink can be swapped (captured in tests, or forwarded to
//! `tracing` in production).

use std::fmt::{self, Write as _};
use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{Config, LogFormat};

/// Initialize the global tracing subscriber.
///
/// RUST_LOG wins over the configured level.
pub fn init(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// A line-oriented log destination.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Forwards lines to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        tracing::info!(target: "portfwd::relay", "{}", line);
        Ok(())
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct CaptureSink {
    lines: Mutex<Vec<String>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Lines containing `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }
}

impl LogSink for CaptureSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.lines
            .lock()
            .map_err(|_| io::Error::other("capture sink poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}

/// Prepends a fixed head to every line before handing it to the sink.
#[derive(Clone)]
pub struct PrefixLogger {
    head: String,
    sink: Arc<dyn LogSink>,
}

impl PrefixLogger {
    pub fn new(head: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            head: head.into(),
            sink,
        }
    }

    /// A logger whose head is this logger's head followed by `head`.
    pub fn child(&self, head: impl AsRef<str>) -> Self {
        Self {
            head: format!("{}{}", self.head, head.as_ref()),
            sink: Arc::clone(&self.sink),
        }
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    /// Write one formatted line. Sink failures are dropped.
    pub fn log(&self, args: fmt::Arguments<'_>) {
        let mut line = String::with_capacity(self.head.len() + 64);
        line.push_str(&self.head);
        let _ = line.write_fmt(args);
        let _ = self.sink.write_line(&line);
    }

    /// Write a chunk of relayed payload as hex.
    pub fn payload(&self, chunk: &[u8]) {
        self.log(format_args!("{}", hex_bytes(chunk)));
    }
}

impl fmt::Debug for PrefixLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixLogger")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

/// Uppercase hex, one space between bytes.
// Not `hex::encode_upper`: that has no separator and the tap format needs one per byte.
pub fn hex_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl LogSink for FailingSink {
        fn write_line(&self, _line: &str) -> io::Result<()> {
            Err(io::Error::other("sink down"))
        }
    }

    #[test]
    fn prefixes_nest() {
        let sink = Arc::new(CaptureSink::new());
        let logger = PrefixLogger::new("[Proxy a to b]", sink.clone());
        let conn = logger.child("[ClientID:7]");

        conn.log(format_args!("state: {}", "Relaying"));

        assert_eq!(sink.lines(), vec!["[Proxy a to b][ClientID:7]state: Relaying"]);
        assert_eq!(conn.head(), "[Proxy a to b][ClientID:7]");
    }

    #[test]
    fn hex_format() {
        assert_eq!(hex_bytes(b"ping"), "70 69 6E 67");
        assert_eq!(hex_bytes(&[0x00, 0xff]), "00 FF");
        assert_eq!(hex_bytes(&[]), "");
    }

    #[test]
    fn payload_goes_through_head() {
        let sink = Arc::new(CaptureSink::new());
        let tap = PrefixLogger::new("recv:", sink.clone());
        tap.payload(&[0x01, 0x0a]);
        assert_eq!(sink.matching("recv:"), vec!["recv:01 0A"]);
    }

    #[test]
    fn sink_errors_are_swallowed() {
        let logger = PrefixLogger::new("x", Arc::new(FailingSink));
        logger.log(format_args!("still fine"));
        logger.payload(b"abc");
    }
}
