//! Step effects
//!
//! Effects are small structs implementing [`k1_engine::Effect`]. Every one
//! of them is safe to run again after a crash: it either converges on its
//! own or checks external state before mutating it.

mod argocd;
mod bootstrap;
mod cluster;
mod credentials;
mod gitops;
mod kbot;
mod preflight;
mod state_store;
mod terraform;
mod tools;
mod vault;

pub use argocd::{ArgoCdCredentials, ArgoCdInstall, ArgoCdRegistry};
pub use bootstrap::BootstrapSecrets;
pub use cluster::{CreateLocalCluster, DeleteLocalCluster};
pub use credentials::{CloudCredentials, GitCredentials};
pub use gitops::{GitopsReadyToPush, GitopsRepoPushed};
pub use kbot::{KbotSetup, ensure_kbot_keys};
pub use preflight::{DomainLiveness, QuotaCheck};
pub use state_store::{
    CreateStateStoreBucket, CreateStateStoreCredential, DeleteStateStoreBucket,
    DeleteStateStoreCredential,
};
pub use terraform::{TerraformApply, TerraformDestroy};
pub use tools::ToolsDownloaded;
pub use vault::VaultInitialized;

use k1_engine::{Result, Vault, WriteMode};

/// Read `name`, or store the value `make` produces when it is absent.
///
/// A value captured by an earlier, interrupted attempt wins over a fresh one.
pub(crate) fn remember(vault: &Vault, name: &str, make: impl FnOnce() -> String) -> Result<String> {
    if let Some(existing) = vault.get_string(name)? {
        return Ok(existing);
    }
    let value = make();
    vault.put(name, &value, WriteMode::Once)?;
    Ok(value)
}

/// Treat `not-found` as success; used by inverses whose target may already
/// be gone.
pub(crate) fn tolerate_missing(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Err(e) if e.kind() == k1_engine::ErrorKind::NotFound => {
            tracing::info!(target_resource = what, "already gone");
            Ok(())
        }
        other => other,
    }
}
