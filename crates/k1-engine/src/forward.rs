//! Scoped port-forwards
//!
//! [`ScopedForward`] owns a live forward. [`ScopedForward::close`] tears it
//! down and waits for the local port to be bindable again; if the guard is
//! dropped instead (step error, cancellation), the forward is released
//! synchronously.

use crate::adapter::{PortForwardHandle, PortProbe};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How long a closed forward may keep its port bound.
pub const PORT_RELEASE_GRACE: Duration = Duration::from_secs(5);

pub struct ScopedForward {
    handle: Option<Box<dyn PortForwardHandle>>,
    local_port: u16,
    probe: Arc<dyn PortProbe>,
}

impl ScopedForward {
    pub(crate) fn new(handle: Box<dyn PortForwardHandle>, probe: Arc<dyn PortProbe>) -> Self {
        let local_port = handle.local_port();
        Self {
            handle: Some(handle),
            local_port,
            probe,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// `http://localhost:<port>`
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }

    pub async fn close(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.close().await?;
        }
        wait_port_released(self.probe.as_ref(), self.local_port, PORT_RELEASE_GRACE).await
    }
}

impl Drop for ScopedForward {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            tracing::debug!(port = self.local_port, "releasing port-forward on drop");
            handle.release();
        }
    }
}

/// Refuse to start a forward on a port something else already holds.
pub(crate) fn ensure_port_free(probe: &dyn PortProbe, port: u16) -> Result<()> {
    if probe.is_free(port) {
        return Ok(());
    }
    Err(Error::conflict_with(
        format!("local port {} is already in use", port),
        vec![format!(
            "stop the process listening on port {} and re-run",
            port
        )],
    ))
}

pub(crate) async fn wait_port_released(
    probe: &dyn PortProbe,
    port: u16,
    grace: Duration,
) -> Result<()> {
    let deadline = Instant::now() + grace;
    loop {
        if probe.is_free(port) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "local port {} to be released",
                port
            )));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeForward, FakePorts};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_close_waits_for_release() {
        let closed = Arc::new(AtomicBool::new(false));
        let ports = Arc::new(FakePorts::default());
        ports.occupy(8080);

        let forward = ScopedForward::new(
            Box::new(FakeForward::new(8080, closed.clone(), ports.clone())),
            ports.clone(),
        );
        assert_eq!(forward.base_url(), "http://localhost:8080");
        forward.close().await.unwrap();

        assert!(closed.load(Ordering::SeqCst));
        assert!(ports.is_free(8080));
    }

    #[tokio::test]
    async fn test_drop_releases_forward() {
        let closed = Arc::new(AtomicBool::new(false));
        let ports = Arc::new(FakePorts::default());
        ports.occupy(8200);
        {
            let _forward = ScopedForward::new(
                Box::new(FakeForward::new(8200, closed.clone(), ports.clone())),
                ports.clone(),
            );
        }
        assert!(closed.load(Ordering::SeqCst));
        assert!(ports.is_free(8200));
    }

    #[test]
    fn test_busy_port_is_conflict() {
        let ports = FakePorts::default();
        ports.occupy(8080);
        let err = ensure_port_free(&ports, 8080).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
        assert!(ensure_port_free(&ports, 8081).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_that_never_frees_times_out() {
        let ports = FakePorts::default();
        ports.occupy(9094);
        let err = wait_port_released(&ports, 9094, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Timeout);
    }
}
