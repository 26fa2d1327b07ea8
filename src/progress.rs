//! Elapsed-time progress for the long completion call.
//!
//! A single analysis call can run for minutes with nothing to count, so
//! the only honest signal is elapsed time. [`track`] drives the wrapped
//! future and a ticker side by side on the same task; the ticker reports
//! `waiting` events until the future settles, then one `finished` or
//! `failed` event. The ticker never outlives the call.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::future::Future;
use std::io::Write;
use std::time::{Duration, Instant};

/// Interval between `waiting` events.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    Started { task: String },
    Waiting { task: String, elapsed: Duration },
    Finished { task: String, elapsed: Duration },
    Failed { task: String, elapsed: Duration },
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "analysis  waiting  1m 05s".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Started { task } => format!("{}  started\n", task),
            ProgressEvent::Waiting { task, elapsed } => {
                format!("{}  waiting  {}\n", task, format_elapsed(*elapsed))
            }
            ProgressEvent::Finished { task, elapsed } => {
                format!("{}  done in {}\n", task, format_elapsed(*elapsed))
            }
            ProgressEvent::Failed { task, elapsed } => {
                format!("{}  failed after {}\n", task, format_elapsed(*elapsed))
            }
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let (task, phase, elapsed) = match &event {
            ProgressEvent::Started { task } => (task, "started", Duration::ZERO),
            ProgressEvent::Waiting { task, elapsed } => (task, "waiting", *elapsed),
            ProgressEvent::Finished { task, elapsed } => (task, "finished", *elapsed),
            ProgressEvent::Failed { task, elapsed } => (task, "failed", *elapsed),
        };
        let obj = serde_json::json!({
            "event": "progress",
            "task": task,
            "phase": phase,
            "elapsed_secs": elapsed.as_secs(),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Awaits `fut`, reporting elapsed time every [`TICK_INTERVAL`].
pub async fn track<T, E, F>(
    task: &str,
    reporter: &dyn ProgressReporter,
    fut: F,
) -> Result<(T, Duration), E>
where
    F: Future<Output = Result<T, E>>,
{
    track_every(task, reporter, TICK_INTERVAL, fut).await
}

/// [`track`] with an explicit tick interval.
pub async fn track_every<T, E, F>(
    task: &str,
    reporter: &dyn ProgressReporter,
    interval: Duration,
    fut: F,
) -> Result<(T, Duration), E>
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    reporter.report(ProgressEvent::Started {
        task: task.to_string(),
    });

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    tokio::pin!(fut);

    let outcome = loop {
        tokio::select! {
            res = &mut fut => break res,
            _ = ticker.tick() => reporter.report(ProgressEvent::Waiting {
                task: task.to_string(),
                elapsed: start.elapsed(),
            }),
        }
    };

    let elapsed = start.elapsed();
    match outcome {
        Ok(value) => {
            reporter.report(ProgressEvent::Finished {
                task: task.to_string(),
                elapsed,
            });
            Ok((value, elapsed))
        }
        Err(e) => {
            reporter.report(ProgressEvent::Failed {
                task: task.to_string(),
                elapsed,
            });
            Err(e)
        }
    }
}

/// `42s`, `1m 05s`, `1h 02m 03s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProgressMode {
    #[default]
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode: '{}'. Must be off, human or json.", other),
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
