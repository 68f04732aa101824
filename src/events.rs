//! Relays run events to the front end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{ProgressEvent, RunEvent, TerminalEvent};

/// Cloneable sender for progress events plus the single terminal event.
///
/// Unbounded so a slow or absent front end never stalls the executor. A dropped receiver is
/// not an error: the run continues and events are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
  tx: Option<mpsc::UnboundedSender<RunEvent>>,
  percentage: Arc<AtomicU8>,
  terminated: Arc<AtomicBool>,
}

impl EventSink {
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
      Self {
        tx: Some(tx),
        percentage: Arc::new(AtomicU8::new(0)),
        terminated: Arc::new(AtomicBool::new(false)),
      },
      rx,
    )
  }

  /// Sink that discards everything.
  pub fn disconnected() -> Self {
    Self {
      tx: None,
      percentage: Arc::new(AtomicU8::new(0)),
      terminated: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn percentage(&self) -> u8 {
    self.percentage.load(Ordering::SeqCst)
  }

  /// Raises the reported percentage. Lower values are ignored.
  pub fn advance(&self, percentage: u8) -> u8 {
    let previous = self.percentage.fetch_max(percentage.min(100), Ordering::SeqCst);
    previous.max(percentage.min(100))
  }

  /// Emits a progress event at the current percentage.
  pub fn progress(&self, step_id: Option<&str>, message: impl Into<String>) {
    if self.terminated.load(Ordering::SeqCst) {
      return;
    }
    let event = ProgressEvent {
      percentage: self.percentage(),
      current_step_id: step_id.map(String::from),
      message: message.into(),
    };
    trace!(
      percentage = event.percentage,
      step_id = ?event.current_step_id,
      message = %event.message,
      "progress"
    );
    self.send(RunEvent::Progress(event));
  }

  /// Emits the terminal event. Only the first call has any effect; later progress is dropped.
  pub fn terminal(&self, event: TerminalEvent) -> bool {
    if self.terminated.swap(true, Ordering::SeqCst) {
      return false;
    }
    self.send(RunEvent::Terminal(event));
    true
  }

  fn send(&self, event: RunEvent) {
    if let Some(tx) = &self.tx {
      let _ = tx.send(event);
    }
  }
}
