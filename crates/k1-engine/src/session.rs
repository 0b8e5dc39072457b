//! Install session model
//!
//! [`SessionParams`] is what the caller asked for; [`InstallSession`] is the
//! write-once record created by the first step of a plan and read by every
//! step after it.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of the generated cluster id.
pub const CLUSTER_ID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Civo,
    K3d,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Civo => "civo",
            CloudProvider::K3d => "k3d",
        }
    }

    /// Environment variable carrying the provider API token, if the provider needs one.
    pub fn token_env_var(&self) -> Option<&'static str> {
        match self {
            CloudProvider::Civo => Some("CIVO_TOKEN"),
            CloudProvider::K3d => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, CloudProvider::K3d)
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "civo" => Ok(CloudProvider::Civo),
            "k3d" => Ok(CloudProvider::K3d),
            other => Err(Error::precondition(format!(
                "unsupported cloud provider `{}`",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    Github,
    Gitlab,
}

impl GitProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitProvider::Github => "github",
            GitProvider::Gitlab => "gitlab",
        }
    }

    pub fn token_env_var(&self) -> &'static str {
        match self {
            GitProvider::Github => "GITHUB_TOKEN",
            GitProvider::Gitlab => "GITLAB_TOKEN",
        }
    }

    pub fn host(&self) -> &'static str {
        match self {
            GitProvider::Github => "github.com",
            GitProvider::Gitlab => "gitlab.com",
        }
    }
}

impl fmt::Display for GitProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GitProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "github" => Ok(GitProvider::Github),
            "gitlab" => Ok(GitProvider::Gitlab),
            other => Err(Error::precondition(format!(
                "unsupported git provider `{}`",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    #[default]
    Mgmt,
    Workload,
}

impl ClusterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Mgmt => "mgmt",
            ClusterType::Workload => "workload",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsProvider {
    #[default]
    Civo,
    Cloudflare,
}

impl DnsProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsProvider::Civo => "civo",
            DnsProvider::Cloudflare => "cloudflare",
        }
    }
}

/// Inputs of one `create` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub cluster_name: String,
    pub domain_name: String,
    pub region: String,
    pub git_owner: String,
    pub cloud_provider: CloudProvider,
    pub git_provider: GitProvider,
    pub cluster_type: ClusterType,
    pub dns_provider: DnsProvider,
}

impl SessionParams {
    /// Check the inputs the engine itself relies on.
    ///
    /// The cluster name becomes a path component and part of cloud resource
    /// names, so it is restricted to lowercase alphanumerics and `-`.
    pub fn validate(&self) -> Result<()> {
        validate_cluster_name(&self.cluster_name)?;
        for (flag, value) in [
            ("--domain-name", &self.domain_name),
            ("--cloud-region", &self.region),
            ("--git-owner", &self.git_owner),
        ] {
            if value.trim().is_empty() {
                return Err(Error::precondition(format!("{} must not be empty", flag)));
            }
        }
        Ok(())
    }
}

pub fn validate_cluster_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::precondition(format!(
            "invalid cluster name `{}`: use lowercase letters, digits and `-`",
            name
        )))
    }
}

/// One provisioning attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSession {
    pub cluster_id: String,
    pub cloud_provider: CloudProvider,
    pub git_provider: GitProvider,
    pub cluster_name: String,
    pub domain_name: String,
    pub region: String,
    pub git_owner: String,
    #[serde(default)]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub dns_provider: DnsProvider,
    pub created_at: DateTime<Utc>,
}

impl InstallSession {
    pub fn new(params: &SessionParams, cluster_id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            cluster_id,
            cloud_provider: params.cloud_provider,
            git_provider: params.git_provider,
            cluster_name: params.cluster_name.clone(),
            domain_name: params.domain_name.clone(),
            region: params.region.clone(),
            git_owner: params.git_owner.clone(),
            cluster_type: params.cluster_type,
            dns_provider: params.dns_provider,
            created_at,
        }
    }

    /// The parameters this session was created with.
    pub fn params(&self) -> SessionParams {
        SessionParams {
            cluster_name: self.cluster_name.clone(),
            domain_name: self.domain_name.clone(),
            region: self.region.clone(),
            git_owner: self.git_owner.clone(),
            cloud_provider: self.cloud_provider,
            git_provider: self.git_provider,
            cluster_type: self.cluster_type,
            dns_provider: self.dns_provider,
        }
    }

    /// Whether a resumed invocation asks for the same install.
    pub fn matches(&self, params: &SessionParams) -> bool {
        self.params() == *params
    }

    /// Scope a cloud resource name to this session: `<prefix>-<cluster>-<id>`.
    pub fn scoped_name(&self, prefix: &str) -> String {
        format!("{}-{}-{}", prefix, self.cluster_name, self.cluster_id)
    }

    pub fn state_store_bucket(&self) -> String {
        self.scoped_name("k1-state-store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SessionParams {
        SessionParams {
            cluster_name: "kf".into(),
            domain_name: "example.test".into(),
            region: "nyc1".into(),
            git_owner: "acme".into(),
            cloud_provider: CloudProvider::Civo,
            git_provider: GitProvider::Github,
            cluster_type: ClusterType::Mgmt,
            dns_provider: DnsProvider::Civo,
        }
    }

    #[test]
    fn test_state_store_bucket_appends_cluster_id_once() {
        let session = InstallSession::new(&params(), "abcdefghij012345".into(), Utc::now());
        assert_eq!(
            session.state_store_bucket(),
            "k1-state-store-kf-abcdefghij012345"
        );
    }

    #[test]
    fn test_session_round_trips_params() {
        let session = InstallSession::new(&params(), "id".into(), Utc::now());
        assert!(session.matches(&params()));

        let mut other = params();
        other.domain_name = "other.test".into();
        assert!(!session.matches(&other));
    }

    #[test]
    fn test_cluster_name_validation() {
        assert!(validate_cluster_name("kf-01").is_ok());
        assert!(validate_cluster_name("").is_err());
        assert!(validate_cluster_name("../etc").is_err());
        assert!(validate_cluster_name("KF").is_err());
        assert!(validate_cluster_name("-kf").is_err());
    }

    #[test]
    fn test_empty_inputs_are_preconditions() {
        let mut p = params();
        p.git_owner = "  ".into();
        let err = p.validate().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Precondition);
        assert!(err.to_string().contains("--git-owner"));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("CIVO".parse::<CloudProvider>().unwrap(), CloudProvider::Civo);
        assert_eq!("gitlab".parse::<GitProvider>().unwrap(), GitProvider::Gitlab);
        assert!("aws".parse::<CloudProvider>().is_err());
        assert_eq!(CloudProvider::Civo.token_env_var(), Some("CIVO_TOKEN"));
    }
}
