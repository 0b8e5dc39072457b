//! Local secret vault
//!
//! Confidential per-session material stored in the `vault` section of the
//! session file. Values are opaque bytes (base64 on disk), written once per
//! session unless the caller asks for [`WriteMode::Overwrite`].

use crate::error::{Error, Result};
use crate::session::InstallSession;
use crate::state::{SharedState, lock_state};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

/// Well-known vault entry names.
pub mod names {
    pub const CLUSTER_ID: &str = "cluster_id";
    pub const SSH_PRIVATE_KEY: &str = "ssh.private_key";
    pub const SSH_PUBLIC_KEY: &str = "ssh.public_key";
    pub const BOT_PASSWORD: &str = "bot.password";
    pub const WEBHOOK_ATLANTIS: &str = "webhook.atlantis";
    pub const GIT_TOKEN: &str = "token.git";
    pub const GIT_USER: &str = "git.user";
    pub const GIT_MANAGED_REPOS: &str = "git.managed_repos";
    pub const STATE_STORE_ACCESS_KEY: &str = "state_store.access_key";
    pub const STATE_STORE_SECRET_KEY: &str = "state_store.secret_key";
    pub const STATE_STORE_LOCATION: &str = "state_store.location";
    pub const ARGOCD_PASSWORD: &str = "argocd.password";
    pub const ARGOCD_AUTH_TOKEN: &str = "argocd.auth_token";
    pub const VAULT_ROOT_TOKEN: &str = "vault.root_token";
    pub const VAULT_UNSEAL_KEYS: &str = "vault.unseal_keys";

    /// Entry holding the API token of a cloud provider, e.g. `token.civo`.
    pub fn provider_token(provider: &str) -> String {
        format!("token.{}", provider)
    }

    /// Identifiers that show up in resource names and are not redacted.
    pub const NON_CONFIDENTIAL: &[&str] = &[
        CLUSTER_ID,
        GIT_USER,
        GIT_MANAGED_REPOS,
        STATE_STORE_LOCATION,
    ];
}

const REDACTED: &str = "******";

/// Values shorter than this are not worth redacting.
const MIN_REDACT_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Refuse to replace an existing value
    Once,
    Overwrite,
}

/// Secret bytes whose `Debug` output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Vec<u8>);

impl SecretValue {
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn expose_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.0)
            .map_err(|_| Error::internal("vault value is not valid UTF-8"))
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue({})", REDACTED)
    }
}

/// Shared handle on the session's vault.
#[derive(Clone)]
pub struct Vault {
    state: SharedState,
}

impl Vault {
    pub(crate) fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Store `value` under `name`. Durable when this returns.
    pub fn put(&self, name: &str, value: impl AsRef<[u8]>, mode: WriteMode) -> Result<()> {
        let encoded = STANDARD.encode(value.as_ref());
        lock_state(&self.state).update(|doc| {
            if mode == WriteMode::Once && doc.vault.contains_key(name) {
                return Err(Error::internal(format!(
                    "vault entry `{}` already exists and is write-once",
                    name
                )));
            }
            doc.vault.insert(name.to_string(), encoded);
            Ok(())
        })?;
        tracing::debug!(secret = name, "stored vault entry");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        let state = lock_state(&self.state);
        match state.document().vault.get(name) {
            None => Ok(None),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(|bytes| Some(SecretValue(bytes)))
                .map_err(|_| Error::internal(format!("vault entry `{}` is not valid base64", name))),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<Option<String>> {
        match self.get(name)? {
            None => Ok(None),
            Some(value) => value.expose_str().map(|s| Some(s.to_string())),
        }
    }

    /// Read an entry a previous step must have written.
    pub fn require_string(&self, name: &str) -> Result<String> {
        self.get_string(name)?.ok_or_else(|| {
            Error::internal(format!("expected vault entry `{}` is missing", name))
        })
    }

    pub fn has(&self, name: &str) -> bool {
        lock_state(&self.state).document().vault.contains_key(name)
    }

    /// Names of all stored entries.
    pub fn names(&self) -> Vec<String> {
        lock_state(&self.state)
            .document()
            .vault
            .keys()
            .cloned()
            .collect()
    }

    pub fn session(&self) -> Option<InstallSession> {
        lock_state(&self.state).document().session.clone()
    }

    pub fn require_session(&self) -> Result<InstallSession> {
        self.session()
            .ok_or_else(|| Error::internal("install session has not been created"))
    }

    /// Persist a new install session together with its `cluster_id` entry.
    /// Sessions are write-once.
    pub fn create_session(&self, session: &InstallSession) -> Result<()> {
        let encoded = STANDARD.encode(session.cluster_id.as_bytes());
        lock_state(&self.state).update(|doc| {
            if doc.session.is_some() {
                return Err(Error::internal("install session already exists"));
            }
            doc.session = Some(session.clone());
            doc.vault.insert(names::CLUSTER_ID.to_string(), encoded);
            Ok(())
        })?;
        tracing::info!(
            cluster = %session.cluster_name,
            cluster_id = %session.cluster_id,
            "created install session"
        );
        Ok(())
    }

    /// Replace every confidential value in `text` with `******`.
    pub fn redact(&self, text: &str) -> String {
        let state = lock_state(&self.state);
        let mut secrets: Vec<String> = state
            .document()
            .vault
            .iter()
            .filter(|(name, _)| !names::NON_CONFIDENTIAL.contains(&name.as_str()))
            .filter_map(|(_, encoded)| STANDARD.decode(encoded).ok())
            .filter_map(|bytes| String::from_utf8(bytes).ok())
            .flat_map(|value| {
                // Multi-line material (keys) may surface one line at a time.
                let mut parts = vec![value.trim().to_string()];
                parts.extend(value.lines().map(|l| l.trim().to_string()));
                parts
            })
            .filter(|value| value.len() >= MIN_REDACT_LEN)
            .collect();
        drop(state);

        // Longest first so a secret containing another is replaced whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        secrets.dedup();

        let mut out = text.to_string();
        for secret in &secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), REDACTED);
            }
        }
        out
    }
}
