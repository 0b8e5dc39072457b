//! SSH key pairs through `ssh-keygen`

use crate::process::Cmd;
use async_trait::async_trait;
use k1_engine::adapter::{KeyGenerator, KeyPair};
use k1_engine::{Error, Result};

const KEY_COMMENT: &str = "kbot";

#[derive(Debug, Clone, Copy, Default)]
pub struct SshKeygen;

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn generate_ssh_keypair(&self) -> Result<KeyPair> {
        let dir = tempfile::tempdir().map_err(|e| Error::io("creating key directory", e))?;
        let key_path = dir.path().join("id_ed25519");

        Cmd::new("ssh-keygen")
            .args(["-q", "-t", "ed25519", "-N", "", "-C", KEY_COMMENT, "-f"])
            .arg(key_path.to_string_lossy())
            .run()
            .await?;

        let private_key = tokio::fs::read_to_string(&key_path)
            .await
            .map_err(|e| Error::io("reading generated private key", e))?;
        let public_key = tokio::fs::read_to_string(key_path.with_extension("pub"))
            .await
            .map_err(|e| Error::io("reading generated public key", e))?;

        Ok(KeyPair {
            private_key,
            public_key: public_key.trim().to_string(),
        })
    }
}
