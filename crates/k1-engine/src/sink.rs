//! Progress sinks
//!
//! A sink renders events from one [`Subscription`]. `quiet` renders nothing,
//! `json` writes one event per line, `tty` keeps a spinner per step.

use crate::event::{Event, Phase};
use crate::reporter::{ProgressReporter, Subscription};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tokio::task::JoinHandle;

pub trait ProgressSink: Send {
    fn on_event(&mut self, event: &Event);

    fn finish(&mut self) {}
}

/// Drive `sink` from a fresh subscription until the reporter is closed.
pub fn spawn_sink(reporter: &ProgressReporter, sink: Box<dyn ProgressSink>) -> JoinHandle<()> {
    let subscription = reporter.subscribe();
    tokio::spawn(drive(subscription, sink))
}

async fn drive(mut subscription: Subscription, mut sink: Box<dyn ProgressSink>) {
    while let Some(event) = subscription.next().await {
        sink.on_event(&event);
    }
    sink.finish();
}

#[derive(Debug, Default)]
pub struct QuietSink;

impl ProgressSink for QuietSink {
    fn on_event(&mut self, _event: &Event) {}
}

/// Newline-delimited JSON events.
pub struct JsonSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> ProgressSink for JsonSink<W> {
    fn on_event(&mut self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(line) => {
                if let Err(e) = writeln!(self.out, "{}", line) {
                    tracing::debug!(error = %e, "failed to write progress event");
                }
            }
            Err(e) => tracing::debug!(error = %e, "failed to serialize progress event"),
        }
    }

    fn finish(&mut self) {
        let _ = self.out.flush();
    }
}

/// One spinner line per step.
pub struct TtySink {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl TtySink {
    pub fn new() -> Self {
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    fn bar(&mut self, key: &str) -> ProgressBar {
        if let Some(bar) = self.bars.get(key) {
            return bar.clone();
        }
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(self.style.clone());
        self.bars.insert(key.to_string(), bar.clone());
        bar
    }
}

impl Default for TtySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TtySink {
    fn on_event(&mut self, event: &Event) {
        let key = event.step_key.clone();
        match event.phase {
            Phase::Started => {
                let bar = self.bar(&key);
                bar.enable_steady_tick(Duration::from_millis(100));
                bar.set_message(format!("{}...", key));
            }
            Phase::Succeeded => {
                self.bar(&key)
                    .finish_with_message(format!("{} {}", "✓".green(), key));
            }
            Phase::Skipped => {
                self.bar(&key)
                    .finish_with_message(format!("{} {} (already done)", "-".dimmed(), key));
            }
            Phase::Failed => {
                let detail = event
                    .error
                    .as_ref()
                    .map(|e| format!(" [{}] {}", e.kind, e.message))
                    .unwrap_or_default();
                self.bar(&key)
                    .abandon_with_message(format!("{} {}{}", "✗".red(), key.bold(), detail));
            }
        }
    }

    fn finish(&mut self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}
