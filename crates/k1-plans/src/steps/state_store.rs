use super::tolerate_missing;
use crate::names;
use async_trait::async_trait;
use k1_engine::vault::names as secret;
use k1_engine::{Effect, Result, StepContext, WriteMode};

/// Object store credential terraform uses for its S3 backend.
pub struct CreateStateStoreCredential;

#[async_trait]
impl Effect for CreateStateStoreCredential {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        if ctx.vault.has(secret::STATE_STORE_ACCESS_KEY)
            && ctx.vault.has(secret::STATE_STORE_SECRET_KEY)
        {
            tracing::debug!("state store credential captured earlier");
            return Ok(());
        }

        let session = ctx.session()?;
        let name = names::state_store_credential(&session);
        let credential = ctx
            .adapters
            .cloud
            .create_object_store_credential(&name, &session.region)
            .await?;
        // A partial capture from an interrupted run is replaced whole.
        ctx.vault.put(
            secret::STATE_STORE_ACCESS_KEY,
            &credential.access_key,
            WriteMode::Overwrite,
        )?;
        ctx.vault.put(
            secret::STATE_STORE_SECRET_KEY,
            &credential.secret_key,
            WriteMode::Overwrite,
        )?;
        tracing::info!(credential = %name, "created state store credential");
        Ok(())
    }
}

pub struct DeleteStateStoreCredential;

#[async_trait]
impl Effect for DeleteStateStoreCredential {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let session = ctx.session()?;
        let name = names::state_store_credential(&session);
        tolerate_missing(
            ctx.adapters
                .cloud
                .delete_object_store_credential(&name, &session.region)
                .await,
            &name,
        )
    }
}

/// Bucket the cluster keeps its terraform state in.
pub struct CreateStateStoreBucket;

#[async_trait]
impl Effect for CreateStateStoreBucket {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let session = ctx.session()?;
        let bucket = session.state_store_bucket();
        let info = ctx
            .adapters
            .cloud
            .create_object_store_bucket(&bucket, &session.region)
            .await?;
        ctx.vault
            .put(secret::STATE_STORE_LOCATION, &info.location, WriteMode::Overwrite)?;
        tracing::info!(bucket = %info.name, location = %info.location, "created state store bucket");
        Ok(())
    }
}

pub struct DeleteStateStoreBucket;

#[async_trait]
impl Effect for DeleteStateStoreBucket {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let session = ctx.session()?;
        let bucket = session.state_store_bucket();
        tolerate_missing(
            ctx.adapters
                .cloud
                .delete_object_store_bucket(&bucket, &session.region)
                .await,
            &bucket,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::fakes::{Behavior, FakeWorld};
    use k1_engine::{ErrorKind, InstallSession};

    fn harness(world: &FakeWorld) -> k1_engine::fakes::ContextHarness {
        let harness = world.context_harness();
        let session =
            InstallSession::new(&harness.params, "abcdefgh12345678".into(), Default::default());
        harness.vault.create_session(&session).unwrap();
        harness
    }

    #[tokio::test]
    async fn test_credential_is_captured_once() {
        let world = FakeWorld::new();
        let harness = harness(&world);
        let ctx = harness.context("state-store-creds");

        CreateStateStoreCredential.run(&ctx).await.unwrap();
        CreateStateStoreCredential.run(&ctx).await.unwrap();

        assert_eq!(
            world
                .journal
                .calls_matching("cloud.create_object_store_credential")
                .len(),
            1
        );
        assert!(harness.vault.has(secret::STATE_STORE_SECRET_KEY));
    }

    #[tokio::test]
    async fn test_bucket_named_after_session() {
        let world = FakeWorld::new();
        let harness = harness(&world);
        let ctx = harness.context("state-store-create");

        CreateStateStoreBucket.run(&ctx).await.unwrap();

        assert_eq!(world.cloud.buckets(), vec!["k1-state-store-kf-abcdefgh12345678"]);
        let location = harness.vault.require_string(secret::STATE_STORE_LOCATION).unwrap();
        assert!(location.ends_with("k1-state-store-kf-abcdefgh12345678"));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_bucket() {
        let world = FakeWorld::new();
        world.journal.once(
            "cloud.delete_object_store_bucket",
            Behavior::Fail(ErrorKind::NotFound, "no such bucket".into()),
        );
        let harness = harness(&world);
        let ctx = harness.context("state-store-create");

        DeleteStateStoreBucket.run(&ctx).await.unwrap();
    }
}
