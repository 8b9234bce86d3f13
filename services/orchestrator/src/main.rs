//! pvt-run: one end-to-end verification run of the analysis plugin.
//!
//! Exit codes: 0 passed, 1 configuration error, 2 provisioning failure,
//! 3 plugin install failure, 4 repository/artifact setup failure,
//! 5 verification failure, 6 cancelled.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pvt_gateways::{AnalysisClient, DockerCli, RepositoryManagerClient};
use pvt_orchestrator::orchestrator::EXIT_CONFIG;
use pvt_orchestrator::{
    report, usage_exit_code, Args, InstanceProvisioner, LogFormat, PluginInstaller, RepositoryManager,
    RunConfiguration, RunOrchestrator, VerificationEngine,
};

fn init_tracing(format: LogFormat, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(usage_exit_code(&e));
        }
    };
    init_tracing(args.log_format, &args.log_level);

    let config = match RunConfiguration::from_args(args) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(EXIT_CONFIG);
        }
    }
}

async fn run(config: Arc<RunConfiguration>) -> Result<i32> {
    info!(
        server_url = %config.instance.server_url,
        analysis_url = %config.analysis_url,
        managed = config.instance.managed,
        version = %config.instance.version,
        scenario = %config.scenario.name,
        "Configuration loaded"
    );

    // Gateways share one client
    let client = config.http_config().build_client()?;
    let manager = Arc::new(RepositoryManagerClient::new(
        client.clone(),
        &config.instance.server_url,
        &config.username,
        &config.password,
    ));
    let analysis = Arc::new(AnalysisClient::new(
        client,
        &config.analysis_url,
        &config.analysis_token,
    ));
    let runtime = Arc::new(DockerCli::default());

    let provisioner = InstanceProvisioner::new(runtime, manager.clone());
    let installer = PluginInstaller::new(manager.clone());
    let repositories = RepositoryManager::new(manager.clone(), manager.clone(), manager.clone());
    let verifier = VerificationEngine::new(manager, analysis);

    // Ctrl-C cancels the run; teardown still happens
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling run");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
    });

    let orchestrator = RunOrchestrator::new(
        Arc::clone(&config),
        provisioner,
        installer,
        repositories,
        verifier,
        shutdown_rx,
    );
    let verdict = orchestrator.run().await;

    report::print_verdict(&verdict);
    if let Some(path) = &config.report_path {
        report::write_json(&verdict, path)?;
        info!(path = %path.display(), "Report written");
    }

    Ok(verdict.exit_code())
}
