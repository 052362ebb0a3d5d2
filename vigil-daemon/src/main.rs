use anyhow::Result;
use clap::Parser;

use vigil_core::config::VigilConfig;
use vigil_daemon::cli::DaemonCli;
use vigil_daemon::logging::init_tracing;
use vigil_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 설정 로드: 파일 -> 환경변수 -> CLI 플래그
    let mut config = VigilConfig::from_file(&cli.config).await?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config.validate()?;

    if cli.validate {
        println!("configuration is valid: {}", cli.config.display());
        return Ok(());
    }

    init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "vigil-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("vigil-daemon shut down");
    Ok(())
}
