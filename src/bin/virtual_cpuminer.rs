//! 虚拟 cpuminer
//!
//! 实现挖矿程序的命令行协议，不做任何真实计算：
//! - `--benchmark [--time-limit <s>]` 周期输出 `Total: <x> H/s`，到时退出
//! - `--api-bind=<port>` 在本地端口响应 `summary`
//! - `--virtual-hashrate=<H/s>` 设置上报算力
//! - `--virtual-hang` 不输出任何内容且永不退出

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const REPORT_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct VirtualArgs {
    algo: String,
    url: Option<String>,
    benchmark: bool,
    time_limit: Option<u64>,
    threads: usize,
    api_bind: Option<u16>,
    hashrate: f64,
    hang: bool,
}

impl Default for VirtualArgs {
    fn default() -> Self {
        Self {
            algo: "lyra2rev2".to_string(),
            url: None,
            benchmark: false,
            time_limit: None,
            threads: 1,
            api_bind: None,
            hashrate: 1234.0,
            hang: false,
        }
    }
}

/// 解析参数，未知参数按真实程序的附加参数忽略
fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<VirtualArgs, String> {
    let mut parsed = VirtualArgs::default();
    while let Some(arg) = args.next() {
        let (key, inline) = match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };
        let value = |name: &str, inline: Option<String>| {
            inline.ok_or_else(|| format!("{} requires a value", name))
        };

        match key.as_str() {
            "--algo" | "-a" => parsed.algo = value(&key, inline)?,
            "--url" | "-o" => parsed.url = Some(value(&key, inline)?),
            "--benchmark" => parsed.benchmark = true,
            "--time-limit" => {
                let raw = match inline {
                    Some(v) => v,
                    None => args.next().ok_or("--time-limit requires a value")?,
                };
                parsed.time_limit = Some(raw.parse().map_err(|e| format!("--time-limit: {}", e))?);
            }
            "--threads" | "-t" => {
                parsed.threads = value(&key, inline)?
                    .parse()
                    .map_err(|e| format!("--threads: {}", e))?
            }
            "--api-bind" => {
                let raw = value(&key, inline)?;
                // 兼容 `127.0.0.1:4048` 形式
                let port = raw.rsplit(':').next().unwrap_or(&raw);
                parsed.api_bind = Some(port.parse().map_err(|e| format!("--api-bind: {}", e))?);
            }
            "--virtual-hashrate" => {
                parsed.hashrate = value(&key, inline)?
                    .parse()
                    .map_err(|e| format!("--virtual-hashrate: {}", e))?
            }
            "--virtual-hang" => parsed.hang = true,
            _ => {}
        }
    }
    Ok(parsed)
}

fn log_line(started: Instant, msg: &str) {
    println!("[{:>8.2}s] {}", started.elapsed().as_secs_f64(), msg);
}

async fn serve_api(port: u16, args: Arc<VirtualArgs>, started: Instant) -> std::io::Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    loop {
        let (mut socket, _) = listener.accept().await?;
        let args = args.clone();
        tokio::spawn(async move {
            let mut request = [0u8; 256];
            let n = match socket.read(&mut request).await {
                Ok(n) => n,
                Err(_) => return,
            };
            let command = String::from_utf8_lossy(&request[..n]);
            if !command.trim().starts_with("summary") {
                return;
            }
            let response = format!(
                "NAME=cpuminer-opt;VER=3.8.8.1;API=1.0;ALGO={};CPUS={};URL={};HS={:.2};KHS={:.3};ACC=0;REJ=0;UPTIME={}|",
                args.algo,
                args.threads,
                args.url.as_deref().unwrap_or(""),
                args.hashrate,
                args.hashrate / 1000.0,
                started.elapsed().as_secs()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

async fn run_benchmark(args: &VirtualArgs, started: Instant) {
    log_line(started, &format!("Starting benchmark, algo {}", args.algo));
    let deadline = args.time_limit.map(|s| started + Duration::from_secs(s));
    loop {
        tokio::time::sleep(REPORT_INTERVAL).await;
        for cpu in 0..args.threads {
            log_line(
                started,
                &format!("CPU #{}: {:.2} H/s", cpu, args.hashrate / args.threads as f64),
            );
        }
        log_line(started, &format!("Total: {:.3} kH/s", args.hashrate / 1000.0));
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            log_line(started, &format!("Benchmark: {:.2} H/s", args.hashrate));
            return;
        }
    }
}

async fn run_mining(args: Arc<VirtualArgs>, started: Instant) {
    log_line(
        started,
        &format!(
            "Connecting to {} with {} threads",
            args.url.as_deref().unwrap_or("<none>"),
            args.threads
        ),
    );
    if let Some(port) = args.api_bind {
        let api_args = args.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_api(port, api_args, started).await {
                eprintln!("API bind failed on port {}: {}", port, e);
            }
        });
    }
    let mut accepted = 0u64;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        accepted += 1;
        log_line(
            started,
            &format!("accepted: {}/{} (100.00%), {:.3} kH/s yes!", accepted, accepted, args.hashrate / 1000.0),
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let started = Instant::now();
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("virtual-cpuminer: {}", e);
            std::process::exit(1);
        }
    };

    if args.hang {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    if args.benchmark {
        run_benchmark(&args, started).await;
    } else {
        run_mining(Arc::new(args), started).await;
    }
}
