//! Kubernetes manifests the plans apply
//!
//! Built as JSON values and rendered to multi-document YAML.

use crate::names;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use k1_engine::{Error, GitProvider, Result};
use serde_json::{Map, Value, json};

/// Values the bootstrap secrets are filled from.
pub struct BootstrapInputs {
    pub cluster_id: String,
    pub git_provider: GitProvider,
    pub git_owner: String,
    pub git_user: String,
    pub git_token: String,
    pub gitops_repo_url: String,
    pub ssh_private_key: String,
    pub ssh_public_key: String,
    pub webhook_secret: String,
    pub webhook_url: String,
    pub state_store: Option<(String, String)>,
    /// `(secret key, token)` for external-dns, when the cloud has one
    pub cloud_token: Option<(String, String)>,
}

fn render(docs: &[Value]) -> Result<String> {
    let mut out = String::new();
    for doc in docs {
        let yaml = serde_yaml::to_string(doc)
            .map_err(|e| Error::internal(format!("rendering manifest: {}", e)))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

fn namespace(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name },
    })
}

fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Value {
    let data: Map<String, Value> = data
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": { "name": name, "namespace": namespace },
        "stringData": data,
    })
}

fn registry_host(git: GitProvider) -> &'static str {
    match git {
        GitProvider::Github => "https://ghcr.io/",
        GitProvider::Gitlab => "registry.gitlab.com",
    }
}

/// Namespaces and secrets the platform's workloads expect before Argo CD
/// syncs them. The `k1/k1-bootstrap` marker comes last.
pub fn bootstrap_secrets(inputs: &BootstrapInputs) -> Result<String> {
    let git = inputs.git_provider.as_str();
    let runner_ns = format!("{}-runner", git);

    let mut docs: Vec<Value> = [
        names::BOOTSTRAP_NAMESPACE,
        "argo",
        "argocd",
        "atlantis",
        "chartmuseum",
        "external-dns",
        "external-secrets-operator",
        runner_ns.as_str(),
        names::VAULT_NAMESPACE,
        "development",
        "staging",
        "production",
    ]
    .into_iter()
    .map(namespace)
    .collect();

    let (access, secret_key) = inputs
        .state_store
        .clone()
        .unwrap_or_default();

    docs.push(secret(
        "argo",
        "ci-secrets",
        &[
            ("accesskey", access.as_str()),
            ("secretkey", secret_key.as_str()),
            ("SSH_PRIVATE_KEY", inputs.ssh_private_key.as_str()),
            ("PERSONAL_ACCESS_TOKEN", inputs.git_token.as_str()),
        ],
    ));
    docs.push(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": "repo-credentials-template",
            "namespace": "argocd",
            "annotations": { "managed-by": "argocd.argoproj.io" },
            "labels": { "argocd.argoproj.io/secret-type": "repository" },
        },
        "stringData": {
            "type": "git",
            "name": format!("{}-gitops", inputs.git_owner),
            "url": inputs.gitops_repo_url,
            "sshPrivateKey": inputs.ssh_private_key,
        },
    }));
    docs.push(secret(
        "atlantis",
        "atlantis-secrets",
        &[
            ("ATLANTIS_GH_TOKEN", inputs.git_token.as_str()),
            ("ATLANTIS_GH_USER", inputs.git_user.as_str()),
            ("ATLANTIS_GH_HOSTNAME", inputs.git_provider.host()),
            ("ATLANTIS_GH_WEBHOOK_SECRET", inputs.webhook_secret.as_str()),
            ("ARGOCD_AUTH_USERNAME", names::ARGOCD_ADMIN),
            ("ARGOCD_INSECURE", "true"),
            ("ARGOCD_SERVER", "http://localhost:8080"),
            ("GITHUB_OWNER", inputs.git_owner.as_str()),
            ("GITHUB_TOKEN", inputs.git_token.as_str()),
            ("TF_VAR_atlantis_repo_webhook_secret", inputs.webhook_secret.as_str()),
            ("TF_VAR_atlantis_repo_webhook_url", inputs.webhook_url.as_str()),
            ("TF_VAR_kbot_ssh_public_key", inputs.ssh_public_key.as_str()),
            ("VAULT_ADDR", "http://vault.vault.svc.cluster.local:8200"),
        ],
    ));
    docs.push(secret(
        "chartmuseum",
        "chartmuseum-secrets",
        &[
            ("AWS_ACCESS_KEY_ID", access.as_str()),
            ("AWS_SECRET_ACCESS_KEY", secret_key.as_str()),
        ],
    ));
    if let Some((key, token)) = &inputs.cloud_token {
        docs.push(secret("external-dns", "cloud-creds", &[(key.as_str(), token.as_str())]));
    }
    let token_key = format!("{}_token", git);
    docs.push(secret(
        &runner_ns,
        match inputs.git_provider {
            GitProvider::Github => "controller-manager",
            GitProvider::Gitlab => "gitlab-runner",
        },
        &[(token_key.as_str(), inputs.git_token.as_str())],
    ));

    let auth = base64_pair(&inputs.git_user, &inputs.git_token);
    let docker_config = json!({
        "auths": { registry_host(inputs.git_provider): { "auth": auth } }
    })
    .to_string();
    for ns in ["argo", "development", "staging", "production"] {
        docs.push(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "kubernetes.io/dockerconfigjson",
            "metadata": { "name": "docker-config", "namespace": ns },
            "stringData": { ".dockerconfigjson": docker_config },
        }));
    }

    docs.push(secret(
        names::BOOTSTRAP_NAMESPACE,
        names::BOOTSTRAP_SECRET,
        &[("cluster-id", inputs.cluster_id.as_str())],
    ));
    render(&docs)
}

fn base64_pair(user: &str, token: &str) -> String {
    STANDARD.encode(format!("{}:{}", user, token))
}

/// Argo CD application syncing `registry/<cluster>` from the gitops repo.
pub fn registry_application(gitops_repo_url: &str, cluster_name: &str) -> Result<String> {
    render(&[json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Application",
        "metadata": {
            "name": "registry",
            "namespace": "argocd",
            "annotations": { "argocd.argoproj.io/sync-wave": "1" },
        },
        "spec": {
            "project": "default",
            "source": {
                "repoURL": gitops_repo_url,
                "path": format!("registry/{}", cluster_name),
                "targetRevision": "HEAD",
            },
            "destination": {
                "name": "in-cluster",
                "namespace": "argocd",
            },
            "syncPolicy": {
                "automated": { "prune": true, "selfHeal": true },
                "syncOptions": ["CreateNamespace=true"],
            },
        },
    })])
}

/// Secret holding the vault root token and unseal keys.
pub fn vault_unseal_secret(root_token: &str, unseal_keys: &[String]) -> Result<String> {
    let mut data: Vec<(String, String)> = vec![("root-token".to_string(), root_token.to_string())];
    data.extend(
        unseal_keys
            .iter()
            .enumerate()
            .map(|(i, key)| (format!("root-unseal-key-{}", i + 1), key.clone())),
    );
    let pairs: Vec<(&str, &str)> = data.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    render(&[secret(names::VAULT_NAMESPACE, names::VAULT_UNSEAL_SECRET, &pairs)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn docs(yaml: &str) -> Vec<serde_yaml::Value> {
        serde_yaml::Deserializer::from_str(yaml)
            .map(|d| serde_yaml::Value::deserialize(d).unwrap())
            .collect()
    }

    fn inputs() -> BootstrapInputs {
        BootstrapInputs {
            cluster_id: "abcdefgh12345678".into(),
            git_provider: GitProvider::Github,
            git_owner: "acme".into(),
            git_user: "kbot-acme".into(),
            git_token: "ghp-token".into(),
            gitops_repo_url: "git@github.com:acme/gitops.git".into(),
            ssh_private_key: "private".into(),
            ssh_public_key: "ssh-ed25519 AAAA kbot".into(),
            webhook_secret: "webhook".into(),
            webhook_url: "https://atlantis.example.test/events".into(),
            state_store: Some(("AK".into(), "SK".into())),
            cloud_token: Some(("civo-token".into(), "civo-api-token".into())),
        }
    }

    #[test]
    fn test_bootstrap_ends_with_marker() {
        let rendered = bootstrap_secrets(&inputs()).unwrap();
        let docs = docs(&rendered);
        let last = docs.last().unwrap();
        assert_eq!(last["metadata"]["namespace"].as_str(), Some("k1"));
        assert_eq!(last["metadata"]["name"].as_str(), Some("k1-bootstrap"));
        assert_eq!(last["stringData"]["cluster-id"].as_str(), Some("abcdefgh12345678"));

        let dns = docs
            .iter()
            .find(|d| d["metadata"]["namespace"].as_str() == Some("external-dns")
                && d["kind"].as_str() == Some("Secret"))
            .unwrap();
        assert_eq!(dns["stringData"]["civo-token"].as_str(), Some("civo-api-token"));
    }

    #[test]
    fn test_registry_application_points_at_cluster_path() {
        let rendered = registry_application("git@github.com:acme/gitops.git", "kf").unwrap();
        let app = &docs(&rendered)[0];
        assert_eq!(app["spec"]["source"]["path"].as_str(), Some("registry/kf"));
        assert_eq!(
            app["spec"]["source"]["repoURL"].as_str(),
            Some("git@github.com:acme/gitops.git")
        );
    }

    #[test]
    fn test_unseal_secret_numbers_keys() {
        let rendered =
            vault_unseal_secret("hvs.root", &["one".to_string(), "two".to_string()]).unwrap();
        let doc = &docs(&rendered)[0];
        assert_eq!(doc["stringData"]["root-token"].as_str(), Some("hvs.root"));
        assert_eq!(doc["stringData"]["root-unseal-key-2"].as_str(), Some("two"));
    }
}
