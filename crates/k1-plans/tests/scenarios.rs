//! End-to-end behavior of the real plans against in-memory adapters

use k1_engine::fakes::{Behavior, FakeWorld, sample_params};
use k1_engine::vault::names as secret;
use k1_engine::{
    CLUSTER_ID_LEN, CloudProvider, DestroyOptions, ErrorKind, GitProvider, Plan,
    ProgressReporter, RunOptions, Runner, Workspace, WorkspaceOptions,
};
use k1_plans::{PlanOptions, keys, plan_for};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const FIRST_THREE: &[&str] = &[
    keys::CLOUD_CREDENTIALS,
    keys::STATE_STORE_CREATE,
    keys::GITOPS_READY_TO_PUSH,
];

fn civo_plan() -> Plan {
    plan_for(CloudProvider::Civo, GitProvider::Github, PlanOptions::default())
}

fn open_runner(root: &Path, world: &FakeWorld) -> Runner {
    let workspace = Workspace::open(root, "kf", &WorkspaceOptions::default()).unwrap();
    Runner::new(workspace, world.adapters(), ProgressReporter::new(64))
}

fn world_with_tokens() -> FakeWorld {
    let world = FakeWorld::new();
    world.env.set("CIVO_TOKEN", "tok-1");
    world.env.set("GITHUB_TOKEN", "ghp-1");
    world
}

async fn install(root: &Path, world: &FakeWorld, plan: &Plan) -> k1_engine::Result<k1_engine::RunSummary> {
    open_runner(root, world)
        .install(plan, &sample_params(), &RunOptions::default(), &CancellationToken::new())
        .await
}

/// Fresh install of the first three steps
#[tokio::test]
async fn test_fresh_install_first_steps() {
    let dir = tempdir().unwrap();
    let world = world_with_tokens();
    let plan = civo_plan().subset(FIRST_THREE).unwrap();

    let runner = open_runner(dir.path(), &world);
    let summary = runner
        .install(&plan, &sample_params(), &RunOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.executed, FIRST_THREE);
    for key in FIRST_THREE {
        assert!(runner.checkpoints().is_done(key), "{} not marked", key);
    }
    let session = runner.vault().require_session().unwrap();
    assert_eq!(session.cluster_id.len(), CLUSTER_ID_LEN);
    assert!(runner.vault().has(secret::SSH_PRIVATE_KEY));
    assert!(runner.vault().has(secret::SSH_PUBLIC_KEY));
    assert_eq!(
        world.journal.calls_matching("cloud.create_object_store_bucket"),
        vec![format!(
            "cloud.create_object_store_bucket k1-state-store-kf-{} nyc1",
            session.cluster_id
        )]
    );
}

/// Crash right after the bucket checkpoint was written
#[tokio::test]
async fn test_crash_after_checkpoint_resumes_without_recreating() {
    let dir = tempdir().unwrap();
    let world = world_with_tokens();
    world.telemetry.panic_on("state-store-create-completed");

    let root = dir.path().to_path_buf();
    let task_world = world.clone();
    let crashed = tokio::spawn(async move {
        let plan = civo_plan().subset(FIRST_THREE).unwrap();
        install(&root, &task_world, &plan).await
    })
    .await;
    assert!(crashed.unwrap_err().is_panic());
    assert!(world.journal.calls_matching("git.clone").is_empty());

    world.telemetry.clear();
    let plan = civo_plan().subset(FIRST_THREE).unwrap();
    let summary = install(dir.path(), &world, &plan).await.unwrap();

    assert_eq!(summary.skipped, vec![keys::CLOUD_CREDENTIALS, keys::STATE_STORE_CREATE]);
    assert_eq!(summary.executed, vec![keys::GITOPS_READY_TO_PUSH]);
    assert_eq!(world.journal.calls_matching("cloud.create_object_store_bucket").len(), 1);
    assert_eq!(world.journal.calls_matching("git.clone").len(), 2);
}

/// A second run of a finished plan touches nothing
#[tokio::test]
async fn test_rerun_of_completed_plan_is_silent() {
    let dir = tempdir().unwrap();
    let world = world_with_tokens();
    let plan = civo_plan().subset(FIRST_THREE).unwrap();
    install(dir.path(), &world, &plan).await.unwrap();

    world.journal.clear();
    world.telemetry.clear();
    let summary = install(dir.path(), &world, &plan).await.unwrap();

    assert!(summary.executed.is_empty());
    assert_eq!(summary.skipped, FIRST_THREE);
    assert!(world.journal.calls().is_empty());
    assert!(world.telemetry.events().is_empty());
}

/// A remote repository this install did not create is never pushed to
#[tokio::test]
async fn test_unmanaged_remote_repo_conflicts() {
    let dir = tempdir().unwrap();
    let world = world_with_tokens();
    world.git_provider.add_repo("gitops");
    let plan = civo_plan()
        .subset(&[
            keys::CLOUD_CREDENTIALS,
            keys::GITOPS_READY_TO_PUSH,
            keys::GITOPS_REPO_PUSHED,
        ])
        .unwrap();

    let runner = open_runner(dir.path(), &world);
    let err = runner
        .install(&plan, &sample_params(), &RunOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.step_key(), Some(keys::GITOPS_REPO_PUSHED));
    assert!(err.to_string().contains("git@github.com:acme/gitops.git"));
    assert!(!runner.checkpoints().is_done(keys::GITOPS_REPO_PUSHED));
    assert!(world.journal.calls_matching("git.push").is_empty());
}

/// Destroy reverts what was created, once, and removes the workspace
#[tokio::test]
async fn test_destroy_after_partial_install() {
    let dir = tempdir().unwrap();
    let world = world_with_tokens();
    let partial = civo_plan()
        .subset(&[
            keys::CLOUD_CREDENTIALS,
            keys::STATE_STORE_CREDS,
            keys::STATE_STORE_CREATE,
        ])
        .unwrap();
    install(dir.path(), &world, &partial).await.unwrap();

    let runner = open_runner(dir.path(), &world);
    let paths = runner.paths().clone();
    let summary = runner
        .destroy(&civo_plan(), &DestroyOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.reverted, vec![keys::STATE_STORE_CREATE, keys::STATE_STORE_CREDS]);
    assert_eq!(world.journal.calls_matching("cloud.delete_object_store_bucket").len(), 1);
    assert!(world.cloud.buckets().is_empty());
    assert!(summary.workspace_reset);
    assert!(!paths.state_file().exists());
    assert!(!paths.cluster_dir().exists());
}

/// Ctrl-C while the bucket is being created, then resume
#[tokio::test]
async fn test_cancel_mid_step_then_resume() {
    let dir = tempdir().unwrap();
    let world = world_with_tokens();
    let entered = Arc::new(Notify::new());
    world.journal.once(
        "cloud.create_object_store_bucket",
        Behavior::Hang(entered.clone()),
    );
    let cancel = CancellationToken::new();

    let root = dir.path().to_path_buf();
    let task_world = world.clone();
    let task_cancel = cancel.clone();
    let run = tokio::spawn(async move {
        let plan = civo_plan().subset(FIRST_THREE).unwrap();
        let runner = open_runner(&root, &task_world);
        let result = runner
            .install(&plan, &sample_params(), &RunOptions::default(), &task_cancel)
            .await;
        (result, runner.checkpoints().is_done(keys::STATE_STORE_CREATE))
    });
    entered.notified().await;
    cancel.cancel();

    let (result, marked) = run.await.unwrap();
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(!marked);

    let plan = civo_plan().subset(FIRST_THREE).unwrap();
    let summary = install(dir.path(), &world, &plan).await.unwrap();
    assert_eq!(summary.executed, vec![keys::STATE_STORE_CREATE, keys::GITOPS_READY_TO_PUSH]);
    assert_eq!(world.cloud.buckets().len(), 1);
}

/// Every step of the civo plan against fakes, then a full destroy
#[tokio::test]
async fn test_full_civo_install_and_destroy() {
    let dir = tempdir().unwrap();
    let world = world_with_tokens();
    world
        .kubernetes
        .put_secret("argocd", "argocd-initial-admin-secret", &[("password", "admin-pw")]);

    let plan = civo_plan();
    let runner = open_runner(dir.path(), &world);
    let summary = runner
        .install(&plan, &sample_params(), &RunOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.executed, plan.keys());
    assert_eq!(world.kubernetes.open_forwards(), 0);
    assert_eq!(world.journal.calls_matching("git.push").len(), 2);
    let vault = runner.vault();
    assert_eq!(
        vault.get_string(secret::GIT_MANAGED_REPOS).unwrap().as_deref(),
        Some("gitops,metaphor")
    );
    assert!(vault.has(secret::ARGOCD_AUTH_TOKEN));
    assert!(vault.has(secret::VAULT_ROOT_TOKEN));
    let events = world.telemetry.events();
    assert_eq!(events.first().map(String::as_str), Some("install-started"));
    assert_eq!(events.last().map(String::as_str), Some("install-completed"));
    drop(runner);

    world.journal.clear();
    let runner = open_runner(dir.path(), &world);
    let summary = runner
        .destroy(&plan, &DestroyOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(
        summary.reverted,
        vec![
            "terraform-apply-users",
            "terraform-apply-vault",
            "terraform-apply-civo",
            "terraform-apply-github",
            "state-store-create",
            "state-store-creds",
        ]
    );
    assert_eq!(
        world.journal.calls_matching("git_provider.delete_webhook").len(),
        1
    );
    assert_eq!(world.kubernetes.open_forwards(), 0);
}
