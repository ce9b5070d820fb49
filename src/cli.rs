//! 명령행 인자 정의.

use clap::Parser;
use std::path::PathBuf;

/// 큐에서 시나리오 작업을 받아 실행하고 결과를 기록하는 워커.
#[derive(Debug, Parser)]
#[command(name = "scenario-player", version, about)]
pub struct Cli {
    /// YAML 설정 파일 경로.
    #[arg(long, short, env = "PLAYER_CONFIG")]
    pub config: Option<PathBuf>,

    /// 메시지 브로커 호스트 (설정 파일과 BROKER_HOST보다 우선).
    #[arg(long)]
    pub broker_host: Option<String>,

    /// 결과 저장소 호스트 (설정 파일과 STORE_HOST보다 우선).
    #[arg(long)]
    pub store_host: Option<String>,

    /// 기본 로그 레벨을 debug로 올린다.
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_host_overrides() {
        let cli = Cli::parse_from([
            "scenario-player",
            "--broker-host",
            "rabbit",
            "--store-host",
            "pg",
            "-v",
        ]);
        assert_eq!(cli.broker_host.as_deref(), Some("rabbit"));
        assert_eq!(cli.store_host.as_deref(), Some("pg"));
        assert!(cli.verbose);
    }

    #[test]
    fn cli_parses_config_path() {
        let cli = Cli::parse_from(["scenario-player", "--config", "/etc/player.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/player.yaml")));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
