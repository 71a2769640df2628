//! Logging setup
//!
//! The parent logs to stderr or a file, JSON or human format per the CLI
//! flags. Children log through an AEAD-sealed pipe back to the parent,
//! which decodes each record and appends it to its own output, so one
//! process owns the log destination.

use std::io::Write;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use anyhow::Result;
use chacha20poly1305::XChaCha20Poly1305;
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use skewer_kring::{open_blob, seal_blob};

/// Where the parent writes log records.
#[derive(Clone)]
pub enum LogOutput {
    Stderr,
    File(Arc<Mutex<std::fs::File>>),
}

impl LogOutput {
    pub fn open(filename: &str) -> Result<LogOutput> {
        if filename.is_empty() {
            return Ok(LogOutput::Stderr);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(filename)?;
        Ok(LogOutput::File(Arc::new(Mutex::new(file))))
    }

    pub fn write_line(&self, line: &[u8]) {
        match self {
            LogOutput::Stderr => {
                let mut err = std::io::stderr().lock();
                let _ = err.write_all(line);
                let _ = err.write_all(b"\n");
            }
            LogOutput::File(file) => {
                let mut file = file.lock();
                let _ = file.write_all(line);
                let _ = file.write_all(b"\n");
            }
        }
    }
}

struct OutputWriter(LogOutput);

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &self.0 {
            LogOutput::Stderr => std::io::stderr().lock().write(buf),
            LogOutput::File(file) => file.lock().write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &self.0 {
            LogOutput::Stderr => std::io::stderr().lock().flush(),
            LogOutput::File(file) => file.lock().flush(),
        }
    }
}

#[derive(Clone)]
struct MakeOutputWriter(LogOutput);

impl<'a> MakeWriter<'a> for MakeOutputWriter {
    type Writer = OutputWriter;

    fn make_writer(&'a self) -> Self::Writer {
        OutputWriter(self.0.clone())
    }
}

/// Initialize the parent's tracing subscriber.
pub fn init_parent(level: &str, json: bool, output: LogOutput) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let make_writer = MakeOutputWriter(output);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(make_writer),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;
    }
    Ok(())
}

/// One sealed log record on the logger pipe: `len: u32 BE | sealed line`.
struct RemoteWriter {
    file: Arc<Mutex<std::fs::File>>,
    cipher: Arc<XChaCha20Poly1305>,
    buffer: Vec<u8>,
}

impl Write for RemoteWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        // a tracing event ends with a newline; ship complete lines
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            let sealed = seal_blob(&self.cipher, line)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            let mut file = self.file.lock();
            file.write_all(&(sealed.len() as u32).to_be_bytes())?;
            file.write_all(&sealed)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct MakeRemoteWriter {
    file: Arc<Mutex<std::fs::File>>,
    cipher: Arc<XChaCha20Poly1305>,
}

impl<'a> MakeWriter<'a> for MakeRemoteWriter {
    type Writer = RemoteWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RemoteWriter {
            file: Arc::clone(&self.file),
            cipher: Arc::clone(&self.cipher),
            buffer: Vec::new(),
        }
    }
}

/// Initialize a child's tracing subscriber over its logger fd.
///
/// # Safety contract
///
/// `fd` must be the inherited logger descriptor, owned by nobody else in
/// this process.
pub fn init_child(fd: RawFd, level: &str, cipher: XChaCha20Poly1305) -> Result<()> {
    let file = unsafe { std::fs::File::from(OwnedFd::from_raw_fd(fd)) };
    let make_writer = MakeRemoteWriter {
        file: Arc::new(Mutex::new(file)),
        cipher: Arc::new(cipher),
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;
    Ok(())
}

/// Parent-side sink for one child's logger pipe: decode records and append
/// them to the parent's output.
pub async fn run_logger_sink(
    stream: tokio::net::UnixStream,
    cipher: XChaCha20Poly1305,
    role: &'static str,
    output: LogOutput,
) {
    use tokio::io::AsyncReadExt;
    let mut stream = stream;
    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 || len > 1024 * 1024 {
            tracing::warn!(role, "bad record on logger pipe, closing sink");
            return;
        }
        let mut sealed = vec![0u8; len];
        if stream.read_exact(&mut sealed).await.is_err() {
            return;
        }
        match open_blob(&cipher, &sealed) {
            Ok(line) => output.write_line(&line),
            Err(_) => {
                tracing::warn!(role, "undecryptable record on logger pipe dropped");
            }
        }
    }
}
