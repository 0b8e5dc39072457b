use super::{
    CreateArgs, OutputMode, cancel_on_ctrl_c, failure_line, finish_sink, open_runner, start_sink,
};
use colored::Colorize;
use k1_config::Settings;
use k1_engine::{CloudProvider, ClusterType, DnsProvider, GitProvider, RunOptions, SessionParams};
use k1_plans::{PlanOptions, plan_for};
use tokio_util::sync::CancellationToken;

const LOCAL_DOMAIN: &str = "kubefirst.dev";
const LOCAL_REGION: &str = "local";

fn session_params(cloud: CloudProvider, args: &CreateArgs) -> anyhow::Result<SessionParams> {
    let local = cloud.is_local();
    let domain_name = match (&args.domain_name, local) {
        (Some(domain), _) => domain.clone(),
        (None, true) => LOCAL_DOMAIN.to_string(),
        (None, false) => anyhow::bail!("--domain-name is required for {}", cloud),
    };
    let region = match (&args.cloud_region, local) {
        (Some(region), _) => region.clone(),
        (None, true) => LOCAL_REGION.to_string(),
        (None, false) => anyhow::bail!("--cloud-region is required for {}", cloud),
    };
    Ok(SessionParams {
        cluster_name: args.cluster_name.clone(),
        domain_name,
        region,
        git_owner: args.git_owner.clone(),
        cloud_provider: cloud,
        git_provider: args.git_provider.into(),
        cluster_type: args.cluster_type.into(),
        dns_provider: args.dns_provider.into(),
    })
}

/// The command that resumes this install.
fn resume_hint(cloud: CloudProvider, args: &CreateArgs) -> String {
    let mut command = format!(
        "k1 {} create --cluster-name {} --git-owner {}",
        cloud, args.cluster_name, args.git_owner
    );
    if let Some(domain) = &args.domain_name {
        command.push_str(&format!(" --domain-name {}", domain));
    }
    if let Some(region) = &args.cloud_region {
        command.push_str(&format!(" --cloud-region {}", region));
    }
    let git_provider: GitProvider = args.git_provider.into();
    let cluster_type: ClusterType = args.cluster_type.into();
    let dns_provider: DnsProvider = args.dns_provider.into();
    command.push_str(&format!(
        " --git-provider {} --cluster-type {} --dns-provider {}",
        git_provider.as_str(),
        cluster_type.as_str(),
        dns_provider.as_str()
    ));
    if let (Some(url), Some(branch)) = (&args.gitops_template_url, &args.gitops_template_branch) {
        command.push_str(&format!(
            " --gitops-template-url {} --gitops-template-branch {}",
            url, branch
        ));
    }
    command
}

pub async fn handle(
    cloud: CloudProvider,
    args: CreateArgs,
    mut settings: Settings,
    output: OutputMode,
) -> anyhow::Result<bool> {
    let params = session_params(cloud, &args)?;
    settings.override_gitops_template(
        args.gitops_template_url.clone(),
        args.gitops_template_branch.clone(),
    )?;

    let mut options = PlanOptions::from_settings(&settings);
    options.kbot_password = args.kbot_password.clone();
    let plan = plan_for(cloud, params.git_provider, options);

    let runner = open_runner(
        &settings,
        cloud,
        &params.cluster_name,
        Some(params.git_provider),
    )?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let sink = start_sink(&runner, output);
    let result = runner
        .install(
            &plan,
            &params,
            &RunOptions {
                dry_run: args.dry_run,
            },
            &cancel,
        )
        .await;
    finish_sink(&runner, sink).await;

    match result {
        Ok(summary) if args.dry_run => {
            if output != OutputMode::Json {
                println!("{}", "Dry run: nothing was changed.".yellow());
                for key in &summary.pending {
                    println!("  would run  {}", key);
                }
                for key in &summary.skipped {
                    println!("  done       {}", key);
                }
            }
            Ok(true)
        }
        Ok(summary) => {
            if output != OutputMode::Json {
                println!(
                    "{} cluster {} is ready ({} steps run, {} already done)",
                    "✓".green(),
                    params.cluster_name.cyan(),
                    summary.executed.len(),
                    summary.skipped.len()
                );
            }
            Ok(true)
        }
        Err(e) => {
            eprintln!("{}", failure_line(&runner, &e));
            eprintln!(
                "re-run `{}` to resume",
                resume_hint(cloud, &args).bold()
            );
            Ok(false)
        }
    }
}
