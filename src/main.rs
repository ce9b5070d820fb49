mod cli;
mod config;
mod consumer;
mod engine;
mod error;
mod pipeline;
mod player;
mod recorder;
mod scenario;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use config::PlayerConfig;
use player::Player;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// 설정을 읽고 워커를 띄워 종료 신호가 올 때까지 실행하는 진입점이다.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = PlayerConfig::load(cli.config.as_deref())
        .await
        .context("설정 로딩 실패")?;
    if let Some(host) = cli.broker_host {
        config.broker_host = host;
    }
    if let Some(host) = cli.store_host {
        config.store.host = host;
    }

    let player = Player::new(&config)?;
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("종료 신호 수신, 현재 작업이 끝나면 멈춥니다.");
                    shutdown.cancel();
                }
                Err(err) => tracing::error!("종료 신호 대기 실패: {err}"),
            }
        });
    }
    let mut state = player.connection_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            tracing::debug!("브로커 연결 상태: {current:?}");
        }
    });

    player.start(shutdown).await;
    Ok(())
}
