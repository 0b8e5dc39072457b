//! Steps and the context their effects run in

use crate::adapter::{Adapters, ForwardTarget};
use crate::error::{Error, Result};
use crate::forward::{ScopedForward, ensure_port_free};
use crate::session::{InstallSession, SessionParams};
use crate::vault::Vault;
use crate::workspace::WorkspacePaths;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    CloudResource,
    GitResource,
    TerraformApply,
    K8sApply,
    K8sWait,
    CredentialCapture,
    LocalState,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::CloudResource => "cloud-resource",
            StepKind::GitResource => "git-resource",
            StepKind::TerraformApply => "terraform-apply",
            StepKind::K8sApply => "k8s-apply",
            StepKind::K8sWait => "k8s-wait",
            StepKind::CredentialCapture => "credential-capture",
            StepKind::LocalState => "local-state",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The side effect of a step (or of its inverse).
///
/// Effects must be re-entrant: a failed or interrupted effect is simply
/// run again on the next invocation.
#[async_trait]
pub trait Effect: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()>;
}

#[derive(Clone)]
pub struct Step {
    key: String,
    kind: StepKind,
    idempotent: bool,
    effect: Arc<dyn Effect>,
    inverse: Option<Arc<dyn Effect>>,
}

impl Step {
    pub fn new(key: impl Into<String>, kind: StepKind, effect: impl Effect + 'static) -> Self {
        Self {
            key: key.into(),
            kind,
            idempotent: true,
            effect: Arc::new(effect),
            inverse: None,
        }
    }

    /// Make the step reversible by destroy.
    pub fn with_inverse(mut self, inverse: impl Effect + 'static) -> Self {
        self.inverse = Some(Arc::new(inverse));
        self
    }

    /// The effect is not naturally idempotent; it guards itself with a
    /// pre-check of external state instead.
    pub fn guarded(mut self) -> Self {
        self.idempotent = false;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn is_reversible(&self) -> bool {
        self.inverse.is_some()
    }

    pub(crate) fn effect(&self) -> &Arc<dyn Effect> {
        &self.effect
    }

    pub(crate) fn inverse(&self) -> Option<&Arc<dyn Effect>> {
        self.inverse.as_ref()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("idempotent", &self.idempotent)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

/// What an effect can see: the request, the adapters, the vault and the
/// workspace layout. Never the checkpoint store.
pub struct StepContext<'a> {
    pub step_key: &'a str,
    pub params: &'a SessionParams,
    pub adapters: &'a Adapters,
    pub vault: &'a Vault,
    pub paths: &'a WorkspacePaths,
    pub cancel: &'a CancellationToken,
}

impl StepContext<'_> {
    /// The install session created by the first step.
    pub fn session(&self) -> Result<InstallSession> {
        self.vault.require_session()
    }

    /// Race `fut` against `deadline` and the cancellation token.
    pub async fn with_deadline<T, F>(&self, label: &str, deadline: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(Error::Timeout(label.to_string())),
            },
        }
    }

    /// Race `fut` against the cancellation token only.
    pub async fn cancellable<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.cancellable(async {
            self.adapters.clock.sleep(duration).await;
            Ok(())
        })
        .await
    }

    /// Open a forward after checking its local port is free.
    pub async fn open_forward(&self, target: &ForwardTarget) -> Result<ScopedForward> {
        ensure_port_free(self.adapters.ports.as_ref(), target.local_port)?;
        let handle = self
            .cancellable(self.adapters.kubernetes.port_forward(target))
            .await?;
        tracing::debug!(
            target = %target.target,
            namespace = %target.namespace,
            port = target.local_port,
            "opened port-forward"
        );
        Ok(ScopedForward::new(handle, self.adapters.ports.clone()))
    }

    /// Run `body` against a forward to `target`, closing the forward on
    /// every exit path. `body` receives the forward's base URL.
    pub async fn with_forward<T, F, Fut>(&self, target: &ForwardTarget, body: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let forward = self.open_forward(target).await?;
        let result = self.cancellable(body(forward.base_url())).await;
        let closed = forward.close().await;
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }
}
