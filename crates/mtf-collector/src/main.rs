//! 멀티 타임프레임 수집기 CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mtf_collector::{MtfEngine, SimulatedFeed, SimulatedFeedConfig, TaIndicatorCalculator};
use mtf_core::{init_logging, LogConfig, SyncConfig, SystemClock, Ticker};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mtf-collector")]
#[command(about = "Multi-timeframe collector and synchronizer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error). 설정 파일 값을 덮어씁니다.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 설정 파일 경로 (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// 데몬 모드: 종료 신호까지 수집/동기화 실행
    Daemon {
        /// 추적할 심볼 (쉼표로 구분, 예: "EURUSD,GBPUSD")
        #[arg(long)]
        symbols: Option<String>,

        /// 시뮬레이션 피드 시드
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// 시뮬레이션 조회 실패 비율 [0, 1]
        #[arg(long, default_value_t = 0.0)]
        fail_rate: f64,
    },

    /// 적용될 설정 출력 (기본 TOML)
    ShowConfig {
        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = SyncConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    match cli.command {
        Commands::ShowConfig { json } => {
            let rendered = if json {
                serde_json::to_string_pretty(&config).context("설정 직렬화 실패")?
            } else {
                toml::to_string_pretty(&config).context("설정 직렬화 실패")?
            };
            println!("{}", rendered);
        }
        Commands::Daemon {
            symbols,
            seed,
            fail_rate,
        } => {
            if let Some(symbols) = symbols {
                config.symbols = symbols
                    .split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            init_logging(LogConfig::from_settings(&config.logging))
                .map_err(|e| anyhow::anyhow!(e))?;
            run_daemon(config, seed, fail_rate).await?;
        }
    }

    Ok(())
}

async fn run_daemon(config: SyncConfig, seed: u64, fail_rate: f64) -> anyhow::Result<()> {
    let status_interval = config.engine.status_interval();
    let clock = SystemClock::shared();
    let feed = SimulatedFeed::new(
        SimulatedFeedConfig {
            seed,
            fail_rate,
            ..SimulatedFeedConfig::default()
        },
        Arc::clone(&clock),
    );

    let engine = MtfEngine::builder(
        config,
        Arc::new(feed),
        Arc::new(TaIndicatorCalculator::default()),
    )
    .clock(clock)
    .build()
    .context("엔진 생성 실패")?;

    tracing::info!("=== 데몬 모드 시작 (상태 보고 주기: {:?}) ===", status_interval);
    engine.start()?;

    let mut ticker = Ticker::new("status", status_interval);
    // 첫 틱은 즉시 발생
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("종료 신호 수신, 데몬 종료 중...");
                break;
            }
            _ = ticker.tick() => {
                let status = engine.status();
                let health = engine.get_health();
                tracing::info!(
                    healthy = health.healthy,
                    active_faults = health.active_fault_count,
                    total_faults = health.total_faults,
                    uptime = format!("{:.1}%", health.uptime_percentage),
                    synchronized = status.synchronized_symbols,
                    tracked = status.tracked_symbols,
                    "헬스 상태"
                );
                status.stats.log_summary("동기화");
                if !health.healthy {
                    tracing::warn!("{}", engine.fault_report());
                }
            }
        }
    }

    if !engine.shutdown().await {
        tracing::warn!("일부 워커가 유예 시간 내에 종료되지 않았습니다");
    }
    tracing::info!("MTF Collector 종료");
    Ok(())
}
