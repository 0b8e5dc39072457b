use crate::PlanOptions;
use crate::quota::{self, QuotaLevel};
use async_trait::async_trait;
use k1_engine::{Effect, Error, Result, StepContext};
use std::sync::Arc;
use std::time::Duration;

/// Services whose quotas must have room for a new cluster.
pub const QUOTA_SERVICES: &[&str] = &["compute", "network", "objectstore"];

/// Prove the domain's DNS zone is served: write a TXT record and wait for it.
pub struct DomainLiveness {
    pub options: Arc<PlanOptions>,
}

#[async_trait]
impl Effect for DomainLiveness {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let domain = &ctx.params.domain_name;
        let zone = ctx.adapters.cloud.resolve_dns_zone(domain).await?;
        tracing::debug!(domain = %domain, zone = %zone, "resolved dns zone");

        let deadline = Duration::from_secs(self.options.timeouts.dns_liveness_secs);
        let live = ctx
            .with_deadline(
                &format!("dns liveness of {}", domain),
                deadline,
                ctx.adapters.cloud.probe_dns_liveness(domain, &zone),
            )
            .await?;
        if !live {
            return Err(Error::NotFound(format!(
                "the liveness record for {} never resolved; check that the domain's nameservers point at {}",
                domain,
                ctx.params.dns_provider.as_str()
            )));
        }
        tracing::info!(domain = %domain, "domain is live");
        Ok(())
    }
}

/// Refuse to provision into an account that is nearly out of quota.
pub struct QuotaCheck;

#[async_trait]
impl Effect for QuotaCheck {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let quotas = ctx
            .adapters
            .cloud
            .get_quotas(&ctx.params.region, QUOTA_SERVICES)
            .await?;
        let findings = quota::evaluate(&quotas);

        for finding in findings.iter().filter(|f| f.level == QuotaLevel::Warning) {
            tracing::warn!(quota = %finding, "quota is getting close to its limit");
        }
        let critical: Vec<String> = findings
            .iter()
            .filter(|f| f.level == QuotaLevel::Critical)
            .map(|f| f.to_string())
            .collect();
        if !critical.is_empty() {
            return Err(Error::Quota(format!(
                "quota usage of {}% or more in {}: {}; raise the limits or free resources",
                quota::CRITICAL_PERCENT,
                ctx.params.region,
                critical.join("; ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::ErrorKind;
    use k1_engine::fakes::FakeWorld;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_quota_warning_proceeds_critical_fails() {
        let world = FakeWorld::new();
        world.cloud.set_quota("compute", "cpu_cores", 16, 20);
        let harness = world.context_harness();
        let ctx = harness.context("quota-check");
        QuotaCheck.run(&ctx).await.unwrap();

        world.cloud.set_quota("network", "public_ips", 19, 20);
        let err = QuotaCheck.run(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Quota);
        assert!(err.to_string().contains("network/public_ips"));
        assert!(!err.to_string().contains("cpu_cores"));
    }

    #[tokio::test]
    async fn test_dead_domain_is_not_found() {
        let world = FakeWorld::new();
        world.cloud.dns_live.store(false, Ordering::SeqCst);
        let harness = world.context_harness();
        let ctx = harness.context("domain-liveness");

        let err = DomainLiveness {
            options: Arc::new(PlanOptions::default()),
        }
        .run(&ctx)
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("example.test"));
    }
}
