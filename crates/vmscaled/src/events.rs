//! Job event input: one JSON object per line.
//!
//! ```text
//! {"type":"desired_count","count":3}
//! {"type":"job_started","runner":"win-runner-3f2a9c81d0b4"}
//! {"type":"job_completed","runner":"win-runner-3f2a9c81d0b4","result":"succeeded"}
//! ```

use std::io::BufRead;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vmscale_autoscale::JobEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    DesiredCount {
        count: u32,
    },
    JobStarted {
        runner: String,
    },
    JobCompleted {
        runner: String,
        #[serde(default)]
        result: String,
    },
}

impl From<WireEvent> for JobEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::DesiredCount { count } => JobEvent::DesiredCount(count),
            WireEvent::JobStarted { runner } => JobEvent::JobStarted { runner },
            WireEvent::JobCompleted { runner, result } => JobEvent::JobCompleted { runner, result },
        }
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_event(line: &str) -> Result<Option<JobEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let event: WireEvent = serde_json::from_str(line)?;
    Ok(Some(event.into()))
}

/// Forward events from `reader` until EOF or the receiver goes away.
/// Malformed lines are logged and skipped.
///
/// Blocking: run it on a dedicated thread, never on the runtime.
pub fn read_events<R: BufRead>(reader: R, tx: mpsc::Sender<JobEvent>) -> anyhow::Result<()> {
    for line in reader.lines() {
        let line = line?;
        match parse_event(&line) {
            Ok(Some(event)) => {
                debug!(?event, "received job event");
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, %line, "ignoring malformed job event"),
        }
    }
    debug!("job event input closed");
    Ok(())
}
