use super::{
    DestroyArgs, OutputMode, cancel_on_ctrl_c, failure_line, finish_sink, open_runner, start_sink,
};
use colored::Colorize;
use k1_config::Settings;
use k1_engine::{CloudProvider, DestroyOptions};
use k1_plans::{PlanOptions, plan_for};
use tokio_util::sync::CancellationToken;

pub async fn handle(
    cloud: CloudProvider,
    args: DestroyArgs,
    settings: Settings,
    output: OutputMode,
) -> anyhow::Result<bool> {
    let runner = open_runner(&settings, cloud, &args.cluster_name, None)?;
    let session = runner.vault().session();
    if let Some(session) = &session
        && session.cloud_provider != cloud
    {
        anyhow::bail!(
            "cluster {} was created on {}; run `k1 {} destroy --cluster-name {}`",
            args.cluster_name,
            session.cloud_provider,
            session.cloud_provider,
            args.cluster_name
        );
    }
    let git = session
        .as_ref()
        .map(|s| s.git_provider)
        .unwrap_or(k1_engine::GitProvider::Github);
    let plan = plan_for(cloud, git, PlanOptions::from_settings(&settings));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let sink = start_sink(&runner, output);
    let result = runner
        .destroy(
            &plan,
            &DestroyOptions {
                dry_run: args.dry_run,
                strict: args.strict,
            },
            &cancel,
        )
        .await;
    finish_sink(&runner, sink).await;

    let retry = format!("k1 {} destroy --cluster-name {}", cloud, args.cluster_name);
    match result {
        Ok(summary) if summary.is_success() => {
            if output != OutputMode::Json {
                if args.dry_run {
                    println!("{}", "Dry run: nothing was changed.".yellow());
                    for key in &summary.pending {
                        println!("  would revert  {}", key);
                    }
                } else {
                    println!(
                        "{} cluster {} destroyed ({} steps reverted)",
                        "✓".green(),
                        args.cluster_name.cyan(),
                        summary.reverted.len()
                    );
                }
            }
            Ok(true)
        }
        Ok(summary) => {
            for failure in &summary.failures {
                eprintln!("{}", failure_line(&runner, failure));
            }
            if !summary.workspace_reset {
                eprintln!("re-run `{}` to retry the failed steps", retry.bold());
            } else {
                eprintln!("the local workspace was removed; delete the resources above by hand");
            }
            Ok(false)
        }
        Err(e) => {
            eprintln!("{}", failure_line(&runner, &e));
            eprintln!("re-run `{}` to resume", retry.bold());
            Ok(false)
        }
    }
}
