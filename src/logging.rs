//! Log output setup.
//!
//! Call sites use the `tracing` macros. [`init`] installs a `fmt` subscriber
//! whose records go to stdout, to a dated log file written inline
//! ([`FileSink`]), or to a bounded queue drained by a writer thread
//! ([`QueuedSink`]). Log files roll over when the date changes and every
//! [`MAX_LINES`] records.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, anyhow};
use chrono::{Local, NaiveDate};
use crossbeam::channel::{self, Receiver, Sender};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::buffer::Buffer;
use crate::config::LogConfig;

/// Records per log file before a numbered continuation file is opened.
pub const MAX_LINES: usize = 50_000;

/// Destination for formatted log records.
pub trait LogSink: Send + Sync + 'static {
    fn write_record(&self, record: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;
}

/// Dated log file with rollover.
pub struct LogFile {
    dir: PathBuf,
    suffix: String,
    max_lines: usize,
    date: NaiveDate,
    lines: usize,
    path: PathBuf,
    out: BufWriter<File>,
}

impl LogFile {
    pub fn open(dir: &Path, suffix: &str) -> io::Result<Self> {
        Self::with_max_lines(dir, suffix, MAX_LINES)
    }

    pub fn with_max_lines(dir: &Path, suffix: &str, max_lines: usize) -> io::Result<Self> {
        assert!(max_lines > 0, "max_lines must be positive");
        fs::create_dir_all(dir)?;
        let date = Local::now().date_naive();
        let path = dir.join(file_name(date, 0, suffix));
        let out = open_append(&path)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            suffix: suffix.to_string(),
            max_lines,
            date,
            lines: 0,
            path,
            out,
        })
    }

    /// File currently written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written since the date last changed.
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.write_record_on(record, Local::now().date_naive())
    }

    fn write_record_on(&mut self, record: &[u8], today: NaiveDate) -> io::Result<()> {
        if today != self.date {
            self.roll(today, 0)?;
            self.date = today;
            self.lines = 0;
        } else if self.lines > 0 && self.lines % self.max_lines == 0 {
            self.roll(today, self.lines / self.max_lines)?;
        }
        self.out.write_all(record)?;
        self.lines += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn roll(&mut self, date: NaiveDate, part: usize) -> io::Result<()> {
        self.out.flush()?;
        let path = self.dir.join(file_name(date, part, &self.suffix));
        self.out = open_append(&path)?;
        self.path = path;
        Ok(())
    }
}

fn file_name(date: NaiveDate, part: usize, suffix: &str) -> String {
    if part == 0 {
        format!("{}{suffix}", date.format("%Y_%m_%d"))
    } else {
        format!("{}-{part}{suffix}", date.format("%Y_%m_%d"))
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = File::options().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Writes each record to the log file on the calling thread.
pub struct FileSink {
    file: Mutex<LogFile>,
}

impl FileSink {
    pub fn new(file: LogFile) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }
}

impl LogSink for FileSink {
    fn write_record(&self, record: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_record(record)?;
        file.flush()
    }

    fn flush(&self) -> io::Result<()> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

enum LogMessage {
    Record(Vec<u8>),
    Flush(Sender<()>),
    Shutdown,
}

/// Hands records to a background writer thread through a bounded queue.
/// Producers block while the queue is full.
pub struct QueuedSink {
    tx: Sender<LogMessage>,
}

impl QueuedSink {
    /// Starts the writer thread. Dropping the returned guard flushes the
    /// queue and stops the thread.
    pub fn spawn(file: LogFile, capacity: usize) -> io::Result<(Self, LogGuard)> {
        let (tx, rx) = channel::bounded(capacity);
        let handle = thread::Builder::new()
            .name("webserv-log".to_string())
            .spawn(move || writer_loop(file, rx))?;
        let guard = LogGuard {
            tx: Some(tx.clone()),
            handle: Some(handle),
        };
        Ok((Self { tx }, guard))
    }
}

impl LogSink for QueuedSink {
    fn write_record(&self, record: &[u8]) -> io::Result<()> {
        self.tx
            .send(LogMessage::Record(record.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log writer stopped"))
    }

    /// Waits until everything queued so far is on disk.
    fn flush(&self) -> io::Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        self.tx
            .send(LogMessage::Flush(ack_tx))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log writer stopped"))?;
        ack_rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log writer stopped"))
    }
}

fn writer_loop(mut file: LogFile, rx: Receiver<LogMessage>) {
    while let Ok(msg) = rx.recv() {
        let mut next = Some(msg);
        // Drain whatever is queued before touching the disk again.
        while let Some(msg) = next.take() {
            match msg {
                LogMessage::Record(record) => {
                    if let Err(e) = file.write_record(&record) {
                        eprintln!("webserv: log write failed: {e}");
                    }
                }
                LogMessage::Flush(ack) => {
                    let _ = file.flush();
                    let _ = ack.send(());
                }
                LogMessage::Shutdown => {
                    let _ = file.flush();
                    return;
                }
            }
            next = rx.try_recv().ok();
        }
        let _ = file.flush();
    }
    let _ = file.flush();
}

/// Keeps the queued writer alive. Dropping it flushes pending records.
#[derive(Default)]
pub struct LogGuard {
    tx: Option<Sender<LogMessage>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(LogMessage::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// [`MakeWriter`] that stages each event in a [`Buffer`] and hands the
/// finished record to a [`LogSink`].
pub struct SinkWriter<S> {
    sink: Arc<S>,
}

impl<S> Clone for SinkWriter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S: LogSink> SinkWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<'a, S: LogSink> MakeWriter<'a> for SinkWriter<S> {
    type Writer = RecordWriter<S>;

    fn make_writer(&'a self) -> Self::Writer {
        RecordWriter {
            buf: Buffer::with_capacity(256),
            sink: Arc::clone(&self.sink),
        }
    }
}

/// One log record in the making. Submitted to the sink on drop.
pub struct RecordWriter<S: LogSink> {
    buf: Buffer,
    sink: Arc<S>,
}

impl<S: LogSink> Write for RecordWriter<S> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.append(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: LogSink> Drop for RecordWriter<S> {
    fn drop(&mut self) {
        if self.buf.readable_bytes() == 0 {
            return;
        }
        if let Err(e) = self.sink.write_record(self.buf.peek()) {
            eprintln!("webserv: dropping log record: {e}");
        }
        self.buf.consume_all();
    }
}

/// Installs the global subscriber described by `cfg`.
///
/// `RUST_LOG` takes precedence over `cfg.level`. Keep the returned guard
/// alive for as long as the process logs.
pub fn init(cfg: &LogConfig) -> anyhow::Result<LogGuard> {
    if !cfg.enabled {
        return Ok(LogGuard::default());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.level)
            .with_context(|| format!("invalid log level `{}`", cfg.level))?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    let Some(dir) = &cfg.dir else {
        builder
            .try_init()
            .map_err(|e| anyhow!("installing log subscriber: {e}"))?;
        return Ok(LogGuard::default());
    };

    let file = LogFile::open(dir, &cfg.suffix)
        .with_context(|| format!("opening log directory {}", dir.display()))?;
    if cfg.queue_capacity == 0 {
        builder
            .with_ansi(false)
            .with_writer(SinkWriter::new(FileSink::new(file)))
            .try_init()
            .map_err(|e| anyhow!("installing log subscriber: {e}"))?;
        return Ok(LogGuard::default());
    }

    let (sink, guard) =
        QueuedSink::spawn(file, cfg.queue_capacity).context("starting log writer")?;
    builder
        .with_ansi(false)
        .with_writer(SinkWriter::new(sink))
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))?;
    Ok(guard)
}
