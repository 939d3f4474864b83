use anyhow::{Context, Result};
use clap::Parser;
use fleetminer_core::{AlgorithmIds, AlgorithmKey, DeviceState};
use fleetminer_rs::config::{Args, Command, Config};
use fleetminer_rs::detect::{detect, CpuFeatureProbe, HostCpuProbe};
use fleetminer_rs::device::{
    cpuminer_algorithms, cpuminer_module, enumerate_cpu, DeviceFleet, CPUMINER_MODULE_ID,
};
use fleetminer_rs::logging::init_logging;
use fleetminer_rs::miner::{BenchmarkConfig, MinerBinaries, SystemProcessCounter};
use fleetminer_rs::utils::format_khs;
use fleetminer_rs::{MinerState, StartOutcome, NAME, VERSION};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if Path::new(&args.config).exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };

    let level = if args.debug {
        Some("debug")
    } else {
        args.log_level.as_deref()
    };
    let _log_guard = init_logging(config.log_config(level)).context("Failed to init logging")?;

    info!("{} v{} 启动", NAME, VERSION);
    info!("配置文件: {}", args.config);

    let probe = HostCpuProbe::new();
    let outcome = detect(&probe, config.miner.force_extension);
    if outcome.downgraded {
        warn!("指令集偏好已改为 {:?}，写回配置文件", outcome.preference);
        config.miner.force_extension = outcome.preference;
        config.save(&args.config)?;
    }

    let cpu_name = probe.brand();
    let extension = match outcome.require(&cpu_name) {
        Ok(extension) => extension,
        Err(e) => {
            // 设备被排除，没有可用设备时直接退出
            error!("{}", e);
            return Ok(());
        }
    };
    let binaries = MinerBinaries::for_extension(&config.miner.binaries_dir, extension);

    if args.command == Command::Detect {
        println!("CPU:       {}", cpu_name);
        println!("Extension: {}", extension);
        println!("Primary:   {}", binaries.primary.path.display());
        println!("Legacy:    {}", binaries.legacy.path.display());
        return Ok(());
    }

    let mut fleet = DeviceFleet::new();
    fleet.add_device(
        enumerate_cpu(&cpu_name),
        config.miner.settings(binaries),
        Arc::new(SystemProcessCounter::new()),
    );
    fleet
        .register_module(&cpuminer_module(), &cpuminer_algorithms())
        .await;
    fleet.apply_configs(&config.devices).await;

    match args.command {
        Command::Detect => {}
        Command::Devices => print_devices(&fleet).await,
        Command::Benchmark {
            time_limit,
            algorithm,
        } => {
            let filter = algorithm
                .as_deref()
                .map(str::parse::<AlgorithmIds>)
                .transpose()
                .context("Invalid algorithm id")?;

            let reports = fleet
                .benchmark_all(filter.as_ref(), &BenchmarkConfig::default(), time_limit)
                .await;
            for report in &reports {
                match &report.result {
                    Ok(speed) => println!("{} {}: {}", report.device_uuid, report.key.ids, format_khs(*speed)),
                    Err(e) => println!("{} {}: {}", report.device_uuid, report.key.ids, e),
                }
            }

            for record in fleet.device_configs().await {
                config.upsert_device(record);
            }
            config.save(&args.config)?;
        }
        Command::Mine {
            algorithm,
            interval,
        } => {
            let ids: AlgorithmIds = algorithm.parse().context("Invalid algorithm id")?;
            mine(&fleet, &config, &ids, Duration::from_secs(interval.max(1))).await;
        }
    }

    Ok(())
}

async fn print_devices(fleet: &DeviceFleet) {
    for supervisor in fleet.supervisors() {
        let device = supervisor.device().read().await;
        println!("{} [{}] {:?}", device.full_name(), device.b64_uuid(), device.state());
        for setting in device.algorithm_settings() {
            println!(
                "    {:<16} {:<8} {}",
                setting.ids.string_id(),
                if setting.enabled { "enabled" } else { "disabled" },
                format_khs(setting.benchmark_speed())
            );
        }
    }
}

/// 挖矿直到收到中断信号，异常时停止并重新启动
async fn mine(fleet: &DeviceFleet, config: &Config, ids: &AlgorithmIds, interval: Duration) {
    let pool = config.pool_endpoint();
    let key = AlgorithmKey::new(CPUMINER_MODULE_ID, ids.clone());
    for (device, outcome) in fleet.start_all(CPUMINER_MODULE_ID, ids, &pool).await {
        match outcome {
            Ok(StartOutcome::Started { pid }) => info!("设备 {} 已启动 (PID: {})", device, pid),
            Ok(other) => warn!("设备 {} 未启动: {:?}", device, other),
            Err(e) => error!("设备 {} 启动失败: {}", device, e),
        }
    }

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到中断信号，停止挖矿");
                break;
            }
            _ = ticker.tick() => {
                for supervisor in fleet.supervisors() {
                    if supervisor.check_health().await == MinerState::Crashed {
                        warn!("设备 {} 挖矿程序异常，重新启动", supervisor.device_uuid());
                        match supervisor.restart(&key, &pool).await {
                            Ok(outcome) => info!("设备 {} 重新启动: {:?}", supervisor.device_uuid(), outcome),
                            Err(e) => error!("设备 {} 重新启动失败: {}", supervisor.device_uuid(), e),
                        }
                        continue;
                    }
                    match supervisor.get_summary().await {
                        Ok(data) => info!(
                            "设备 {} {}: {}",
                            supervisor.device_uuid(),
                            data.algorithm_name,
                            data.display_speed()
                        ),
                        Err(e) => {
                            let device = supervisor.device().read().await;
                            if device.state() != DeviceState::Disabled {
                                warn!("设备 {} 摘要不可用: {}", device.uuid(), e);
                            }
                        }
                    }
                }
            }
        }
    }

    fleet.stop_all().await;
}
