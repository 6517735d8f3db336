//! Progress events and reporters.
//!
//! The LRO driver emits a [`ProgressEvent`] at every lifecycle transition.
//! The only valid trace is `Started, Tick*, (Completed | Failed | Cancelled)`.
//! Reporters are thread-safe sinks; a reporter that cannot keep up drops
//! ticks but never lifecycle transitions.

use crate::operations::OperationHandle;
use std::io::{self, IsTerminal, Write};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Spinner frames.
const SPINNER_MARKS: [char; 4] = ['|', '/', '-', '\\'];

/// Spinner redraw interval.
const SPINNER_INTERVAL: Duration = Duration::from_millis(100);

/// Kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The invocation started.
    Started,
    /// An operation poll returned.
    Tick,
    /// Terminal: success.
    Completed,
    /// Terminal: failure or timeout.
    Failed,
    /// Terminal: cancellation.
    Cancelled,
}

impl EventKind {
    /// Returns true for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completed | EventKind::Failed | EventKind::Cancelled)
    }
}

/// A lifecycle record produced by the driver.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Invocation label, e.g. `Creating instance [vm-1]`.
    pub label: String,
    /// Operation snapshot, once an operation exists.
    pub operation: Option<OperationHandle>,
    /// Human readable message.
    pub message: String,
    /// Time since the invocation started.
    pub elapsed: Duration,
}

/// Sink for progress events.
pub trait ProgressReporter: Send + Sync {
    /// Records one event. Must return quickly.
    fn emit(&self, event: ProgressEvent);
}

/// Shared output of the writing reporters.
pub type SharedSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Wraps a writer into a [`SharedSink`].
pub fn shared_sink<W: Write + Send + 'static>(writer: W) -> SharedSink {
    Arc::new(Mutex::new(Box::new(writer)))
}

fn stderr_sink() -> SharedSink {
    shared_sink(io::stderr())
}

fn lock_sink(sink: &SharedSink) -> MutexGuard<'_, Box<dyn Write + Send>> {
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Final lines for a terminal event, without trailing newline handling.
fn terminal_lines(event: &ProgressEvent) -> Vec<String> {
    match event.kind {
        EventKind::Completed => {
            let mut lines = vec![format!("{}: {}", event.label, event.message)];
            if let Some(operation) = &event.operation {
                lines.extend(
                    operation
                        .warnings
                        .iter()
                        .map(|w| format!("WARNING: {}", w.message)),
                );
            }
            lines
        }
        EventKind::Failed => vec![format!("ERROR: {}: {}", event.label, event.message)],
        EventKind::Cancelled => vec![format!("{}: {}", event.label, event.message)],
        EventKind::Started | EventKind::Tick => Vec::new(),
    }
}

fn write_lines(out: &mut dyn Write, lines: &[String]) {
    for line in lines {
        if let Err(error) = writeln!(out, "{line}") {
            tracing::debug!(%error, "failed to write progress line");
            return;
        }
    }
    let _ = out.flush();
}

/// One structured line per lifecycle transition; ticks are ignored.
pub struct NonInteractiveReporter {
    sink: SharedSink,
}

impl NonInteractiveReporter {
    /// Writes to `sink`.
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    /// Writes to stderr.
    pub fn stderr() -> Self {
        Self::new(stderr_sink())
    }
}

impl ProgressReporter for NonInteractiveReporter {
    fn emit(&self, event: ProgressEvent) {
        let lines = match event.kind {
            EventKind::Tick => return,
            EventKind::Started => vec![format!("{}: started", event.label)],
            _ => terminal_lines(&event),
        };
        write_lines(&mut **lock_sink(&self.sink), &lines);
    }
}

struct Spinner {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Spinner plus a transient status line, redrawn by a background thread.
///
/// The thread is started on `Started` and joined on the terminal event, so
/// it never outlives the invocation.
pub struct InteractiveReporter {
    sink: SharedSink,
    status: Arc<Mutex<String>>,
    spinner: Mutex<Option<Spinner>>,
}

impl InteractiveReporter {
    /// Writes to `sink`.
    pub fn new(sink: SharedSink) -> Self {
        Self {
            sink,
            status: Arc::new(Mutex::new(String::new())),
            spinner: Mutex::new(None),
        }
    }

    /// Writes to stderr.
    pub fn stderr() -> Self {
        Self::new(stderr_sink())
    }

    fn start(&self, label: String) {
        let mut spinner = self.spinner.lock().unwrap_or_else(|p| p.into_inner());
        if spinner.is_some() {
            return;
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let sink = self.sink.clone();
        let status = self.status.clone();
        let spawned = std::thread::Builder::new()
            .name("lro-spinner".to_string())
            .spawn(move || {
                let mut frame = 0usize;
                loop {
                    let detail = match status.try_lock() {
                        Ok(status) => status.clone(),
                        Err(_) => String::new(),
                    };
                    {
                        let mut out = lock_sink(&sink);
                        let mark = SPINNER_MARKS[frame % SPINNER_MARKS.len()];
                        let _ = if detail.is_empty() {
                            write!(out, "\r{label}...{mark}")
                        } else {
                            write!(out, "\r{label}...{mark} {detail}")
                        };
                        let _ = out.flush();
                    }
                    frame = frame.wrapping_add(1);
                    match stopped.recv_timeout(SPINNER_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => *spinner = Some(Spinner { stop, handle }),
            Err(error) => tracing::debug!(%error, "failed to start spinner thread"),
        }
    }

    fn finish(&self, event: &ProgressEvent) {
        let spinner = self
            .spinner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(spinner) = spinner {
            let _ = spinner.stop.send(());
            if spinner.handle.join().is_err() {
                tracing::debug!("spinner thread panicked");
            }
        }

        let mut out = lock_sink(&self.sink);
        let _ = write!(out, "\r\x1b[2K");
        write_lines(&mut **out, &terminal_lines(event));
    }
}

impl ProgressReporter for InteractiveReporter {
    fn emit(&self, event: ProgressEvent) {
        match event.kind {
            EventKind::Started => self.start(event.label),
            EventKind::Tick => match self.status.try_lock() {
                Ok(mut status) => *status = event.message,
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Poisoned(poisoned)) => *poisoned.into_inner() = event.message,
            },
            _ => self.finish(&event),
        }
    }
}

impl Drop for InteractiveReporter {
    fn drop(&mut self) {
        let spinner = self
            .spinner
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(spinner) = spinner {
            let _ = spinner.stop.send(());
            let _ = spinner.handle.join();
        }
    }
}

/// Keeps every event. Used by tests to assert on traces.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Kinds of all events so far.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn emit(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Picks the reporter for a command: non-interactive for `--quiet` or when
/// stderr is not a terminal, interactive otherwise.
pub fn reporter_for(quiet: bool) -> Arc<dyn ProgressReporter> {
    if quiet || !io::stderr().is_terminal() {
        Arc::new(NonInteractiveReporter::stderr())
    } else {
        Arc::new(InteractiveReporter::stderr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{OperationStatus, OperationWarning};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn event(kind: EventKind, message: &str) -> ProgressEvent {
        ProgressEvent {
            kind,
            label: "Creating instance [vm-1]".to_string(),
            operation: None,
            message: message.to_string(),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_non_interactive_lines() {
        let buffer = Buffer::default();
        let reporter = NonInteractiveReporter::new(shared_sink(buffer.clone()));

        let mut operation = OperationHandle::new("op-1");
        operation.status = OperationStatus::Done;
        operation.warnings.push(OperationWarning {
            code: Some("DISK_SIZE_LARGER_THAN_IMAGE_SIZE".to_string()),
            message: "disk is larger than image".to_string(),
        });

        reporter.emit(event(EventKind::Started, ""));
        reporter.emit(event(EventKind::Tick, "op-1 [RUNNING]"));
        reporter.emit(ProgressEvent {
            operation: Some(operation),
            ..event(EventKind::Completed, "done")
        });

        assert_eq!(
            buffer.contents(),
            "Creating instance [vm-1]: started\n\
             Creating instance [vm-1]: done\n\
             WARNING: disk is larger than image\n"
        );
    }

    #[test]
    fn test_failure_is_one_line() {
        let buffer = Buffer::default();
        let reporter = NonInteractiveReporter::new(shared_sink(buffer.clone()));
        reporter.emit(event(
            EventKind::Failed,
            "Operation [projects/p/zones/z/operations/op-4] failed: [QUOTA_EXCEEDED] quota",
        ));

        let contents = buffer.contents();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with("ERROR: Creating instance [vm-1]: Operation ["));
        assert!(contents.contains("QUOTA_EXCEEDED"));
    }

    #[test]
    fn test_interactive_joins_spinner() {
        let buffer = Buffer::default();
        let reporter = InteractiveReporter::new(shared_sink(buffer.clone()));

        reporter.emit(event(EventKind::Started, ""));
        reporter.emit(event(EventKind::Tick, "op-1 [RUNNING] 50%"));
        std::thread::sleep(SPINNER_INTERVAL * 2);
        reporter.emit(event(EventKind::Completed, "done"));

        assert!(reporter.spinner.lock().unwrap().is_none());
        let contents = buffer.contents();
        assert!(contents.contains("Creating instance [vm-1]..."));
        assert!(contents.ends_with("Creating instance [vm-1]: done\n"));
    }

    #[test]
    fn test_recording_reporter() {
        let reporter = RecordingReporter::new();
        reporter.emit(event(EventKind::Started, ""));
        reporter.emit(event(EventKind::Cancelled, "cancelled"));
        assert_eq!(reporter.kinds(), vec![EventKind::Started, EventKind::Cancelled]);
        assert!(EventKind::Cancelled.is_terminal());
        assert!(!EventKind::Tick.is_terminal());
    }
}
