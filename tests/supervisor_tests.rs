//! 挖矿进程监督器集成测试
//!
//! 启动真实的 `virtual-cpuminer` 进程，验证状态机、遥测查询、
//! 旧版程序存活检查和CPU绑定。

#![cfg(unix)]

mod common;

use common::{key, process_gone, settings, supervisor, StubCounter};
use fleetminer_core::{AlgorithmType, DeviceState};
use fleetminer_rs::error::{SummaryError, SupervisorError};
use fleetminer_rs::miner::{MinerBinaries, MinerState, PoolEndpoint, StartOutcome};
use std::time::Duration;

fn pool() -> PoolEndpoint {
    PoolEndpoint::new("stratum+tcp://lyra2rev2.eu.nicehash.com:3347", "worker1")
}

#[tokio::test]
async fn test_start_summary_stop() {
    let supervisor = supervisor("", settings(), StubCounter::new(0));
    let lyra = key(AlgorithmType::Lyra2REv2);

    let pid = match supervisor.start(&lyra, &pool()).await.unwrap() {
        StartOutcome::Started { pid } => pid,
        other => panic!("应该启动挖矿进程: {:?}", other),
    };
    assert_eq!(supervisor.state().await, MinerState::Running);
    assert_eq!(supervisor.device().read().await.state(), DeviceState::Mining);

    let status = supervisor.status().await;
    assert_eq!(status.pid, Some(pid));
    let command_line = status.command_line.unwrap();
    assert!(command_line.contains("--algo=lyra2rev2"));
    assert!(command_line.contains("--userpass=worker1:x"));
    assert!(command_line.contains("--api-bind="));

    // 已运行时再次启动不做任何事
    assert_eq!(
        supervisor.start(&lyra, &pool()).await.unwrap(),
        StartOutcome::AlreadyRunning
    );
    assert_eq!(supervisor.status().await.pid, Some(pid));

    let mut summary = Err(SummaryError::NotRunning);
    for _ in 0..50 {
        summary = supervisor.get_summary().await;
        if summary.is_ok() {
            break;
        }
        assert_eq!(summary, Err(SummaryError::WarmingUp));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let data = summary.expect("遥测接口应该在预热期内就绪");
    assert_eq!(data.algorithm, AlgorithmType::Lyra2REv2);
    assert!((data.speed - 1234.0).abs() < 1e-6);
    assert_eq!(data.display_speed(), "1.234 kH/s");

    supervisor.stop(false).await.unwrap();
    assert_eq!(supervisor.state().await, MinerState::Stopped);
    assert_eq!(supervisor.device().read().await.state(), DeviceState::Stopped);
    assert!(process_gone(pid), "停止后进程应该已被回收");
    assert_eq!(supervisor.get_summary().await, Err(SummaryError::NotRunning));

    // 重复停止不报错
    supervisor.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_disabled_device_never_spawns() {
    let supervisor = supervisor("", settings(), StubCounter::new(0));
    supervisor.device().write().await.set_enabled(false);

    let outcome = supervisor
        .start(&key(AlgorithmType::Lyra2REv2), &pool())
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::DeviceDisabled);

    let status = supervisor.status().await;
    assert_eq!(status.state, MinerState::Stopped);
    assert_eq!(status.pid, None);
    assert!(supervisor.device().read().await.is_disabled());
}

#[tokio::test]
async fn test_spawn_failure_leaves_stopped() {
    let mut settings = settings();
    settings.binaries = MinerBinaries::from_paths("/nonexistent/cpuminer", "/nonexistent/hodlminer");
    let supervisor = supervisor("", settings, StubCounter::new(0));

    let err = supervisor
        .start(&key(AlgorithmType::Lyra2Z), &pool())
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
    assert_eq!(supervisor.state().await, MinerState::Stopped);
    assert_eq!(supervisor.device().read().await.state(), DeviceState::Stopped);

    // 重启失败同样返回错误，由调用方记录后继续
    let err = supervisor
        .restart(&key(AlgorithmType::Lyra2Z), &pool())
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
    assert_eq!(supervisor.state().await, MinerState::Stopped);
}

#[tokio::test]
async fn test_unknown_algorithm_is_rejected() {
    let supervisor = supervisor("", settings(), StubCounter::new(0));
    let err = supervisor
        .start(&key(AlgorithmType::X16R), &pool())
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::AlgorithmNotFound { .. }));
    assert_eq!(supervisor.state().await, MinerState::Stopped);
}

#[tokio::test]
async fn test_legacy_summary_requires_expected_processes() {
    let counter = StubCounter::new(3);
    let supervisor = supervisor("", settings(), counter.clone());
    let hodl = key(AlgorithmType::Hodl);
    supervisor
        .device()
        .write()
        .await
        .get_algorithm_mut(&hodl)
        .unwrap()
        .set_benchmark_speed(250.0);

    supervisor.start(&hodl, &pool()).await.unwrap();
    let status = supervisor.status().await;
    assert_eq!(status.api_port, None);
    assert!(!status.command_line.unwrap().contains("--api-bind"));

    // 预期4个进程，只有3个存活
    let summary = supervisor.get_summary().await;
    assert!(matches!(summary, Err(SummaryError::Unavailable { .. })));
    assert!(summary.unwrap_err().needs_restart());

    counter.set(4);
    let data = supervisor.get_summary().await.unwrap();
    assert_eq!(data.algorithm, AlgorithmType::Hodl);
    assert_eq!(data.algorithm_name, "hodl");
    assert_eq!(data.speed, 250.0);
    assert_eq!(data.display_speed(), "0.250 kH/s");

    supervisor.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_legacy_health_check_marks_crashed() {
    let counter = StubCounter::new(4);
    let supervisor = supervisor("", settings(), counter.clone());
    let hodl = key(AlgorithmType::Hodl);

    supervisor.start(&hodl, &pool()).await.unwrap();
    assert_eq!(supervisor.check_health().await, MinerState::Running);

    counter.set(1);
    assert_eq!(supervisor.check_health().await, MinerState::Crashed);
    assert_eq!(supervisor.device().read().await.state(), DeviceState::Error);

    supervisor.stop(true).await.unwrap();
    assert_eq!(supervisor.state().await, MinerState::Stopped);
}

#[tokio::test]
async fn test_exited_process_is_reported_as_crashed() {
    // 虚拟矿机以基准模式运行约1秒后自行退出
    let supervisor = supervisor("--benchmark --time-limit=1", settings(), StubCounter::new(0));
    let lyra = key(AlgorithmType::Lyra2REv2);

    let pid = match supervisor.start(&lyra, &pool()).await.unwrap() {
        StartOutcome::Started { pid } => pid,
        other => panic!("应该启动挖矿进程: {:?}", other),
    };

    let mut state = MinerState::Running;
    for _ in 0..50 {
        state = supervisor.check_health().await;
        if state == MinerState::Crashed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(state, MinerState::Crashed);

    // 异常状态下不能直接启动，必须先停止
    let err = supervisor.start(&lyra, &pool()).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::InvalidState {
            state: MinerState::Crashed,
            ..
        }
    ));

    let restarted = match supervisor.restart(&lyra, &pool()).await.unwrap() {
        StartOutcome::Started { pid } => pid,
        other => panic!("应该重新启动挖矿进程: {:?}", other),
    };
    assert_ne!(restarted, pid);
    assert!(process_gone(pid));
    assert_eq!(supervisor.state().await, MinerState::Running);
    supervisor.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_process_count_does_not_block_runtime() {
    let supervisor = supervisor(
        "",
        settings(),
        StubCounter::slow(4, Duration::from_millis(500)),
    );
    let hodl = key(AlgorithmType::Hodl);
    supervisor.start(&hodl, &pool()).await.unwrap();

    // 计数期间计时器仍能按时触发
    let started = std::time::Instant::now();
    let (state, ticked) = tokio::join!(supervisor.check_health(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        started.elapsed()
    });
    assert_eq!(state, MinerState::Running);
    assert!(ticked < Duration::from_millis(400), "计时器被阻塞了 {:?}", ticked);

    supervisor.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_summary_without_telemetry() {
    // 挂起的虚拟矿机不提供遥测接口
    let supervisor = supervisor("--virtual-hang", settings(), StubCounter::new(0));
    let lyra = key(AlgorithmType::Lyra2REv2);
    supervisor.start(&lyra, &pool()).await.unwrap();
    assert_eq!(supervisor.get_summary().await, Err(SummaryError::WarmingUp));
    assert_eq!(supervisor.check_health().await, MinerState::Running);
    supervisor.stop(false).await.unwrap();

    let mut no_warmup = settings();
    no_warmup.warmup = Duration::ZERO;
    let supervisor = common::supervisor("--virtual-hang", no_warmup, StubCounter::new(0));
    supervisor.start(&lyra, &pool()).await.unwrap();
    assert!(matches!(
        supervisor.get_summary().await,
        Err(SummaryError::Unavailable { .. })
    ));
    assert_eq!(supervisor.check_health().await, MinerState::Crashed);
    supervisor.stop(false).await.unwrap();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_affinity_applied_after_spawn() {
    use nix::sched::{sched_getaffinity, CpuSet};
    use nix::unistd::Pid;

    // 选择当前进程允许使用的第一个CPU
    let own = sched_getaffinity(Pid::from_raw(0)).unwrap();
    let cpu = (0..64usize)
        .find(|cpu| own.is_set(*cpu).unwrap_or(false))
        .unwrap();

    let mut settings = settings();
    settings.affinity_mask = 1u64 << cpu;
    let supervisor = supervisor("--virtual-hang", settings, StubCounter::new(0));

    let pid = match supervisor
        .start(&key(AlgorithmType::Lyra2Z), &pool())
        .await
        .unwrap()
    {
        StartOutcome::Started { pid } => pid,
        other => panic!("应该启动挖矿进程: {:?}", other),
    };

    let set = sched_getaffinity(Pid::from_raw(pid as i32)).unwrap();
    let pinned: Vec<usize> = (0..CpuSet::count())
        .filter(|c| set.is_set(*c).unwrap_or(false))
        .collect();
    assert_eq!(pinned, vec![cpu]);

    supervisor.stop(false).await.unwrap();
}
