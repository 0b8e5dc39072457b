//! Telemetry sink that records events in the log

use k1_engine::adapter::{TelemetryAttrs, TelemetrySink};
use tokio::sync::mpsc;

const TARGET: &str = "k1::telemetry";

/// Events are handed to a background task over a bounded channel; when the
/// channel is full the event is dropped rather than blocking the run.
pub struct LogTelemetry {
    tx: mpsc::Sender<(String, TelemetryAttrs)>,
}

impl LogTelemetry {
    /// Must be called inside a tokio runtime.
    pub fn spawn(buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, TelemetryAttrs)>(buffer.max(1));
        tokio::spawn(async move {
            while let Some((event, attrs)) = rx.recv().await {
                tracing::info!(
                    target: TARGET,
                    event = %event,
                    cluster_id = %attrs.cluster_id,
                    cluster_type = %attrs.cluster_type,
                    cloud_provider = %attrs.cloud_provider,
                    git_provider = %attrs.git_provider,
                    domain = %attrs.domain_name,
                    team = %attrs.k1_team,
                    version = %attrs.cli_version,
                    "telemetry event"
                );
            }
        });
        Self { tx }
    }
}

impl TelemetrySink for LogTelemetry {
    fn emit(&self, event_name: &str, attrs: &TelemetryAttrs) {
        if self
            .tx
            .try_send((event_name.to_string(), attrs.clone()))
            .is_err()
        {
            tracing::debug!(target: TARGET, event = %event_name, "telemetry event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_never_blocks_when_full() {
        let sink = LogTelemetry::spawn(1);
        let attrs = TelemetryAttrs::default();
        for i in 0..1000 {
            sink.emit(&format!("event-{}", i), &attrs);
        }
    }
}
