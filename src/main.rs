// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/main.rs
// Version: 0.3.1
//
// Binary entry point: argument handling, device enumeration, wiring of the
// farm and the pool client through their two channels, the periodic stats
// line and graceful Ctrl-C shutdown.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tosminer::core::types::{Args, Solution};
use tosminer::core::work::WorkPackage;
use tosminer::miner::cpu::CpuBackend;
use tosminer::miner::device::enum_cpu_devices;
use tosminer::miner::worker::{Backend, Miner};
use tosminer::miner::Farm;
use tosminer::pool::{PoolEvent, ProtocolVariant, StratumClient};
use tosminer::toshash;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const LOG_TARGET: &str = "tosminer::main";

fn init_logging(args: &Args) {
    let default_level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn list_devices(args: &Args) {
    println!("\n=== Available Mining Devices ===\n");

    println!("CPU:");
    let cpu_devices = enum_cpu_devices(args.cpu_threads);
    println!("  [0] CPU ({} threads)", cpu_devices.len());

    #[cfg(feature = "opencl")]
    {
        println!("\nOpenCL Devices:");
        let devices = tosminer::miner::opencl::enum_devices();
        if devices.is_empty() {
            println!("  None found");
        } else {
            for dev in &devices {
                println!(
                    "  [{}] {} ({} MB, {} CUs)",
                    dev.index,
                    dev.name,
                    dev.total_memory / (1024 * 1024),
                    dev.compute_units
                );
                println!("       Platform: {}", dev.cl_platform_name);
            }
        }
    }
    #[cfg(not(feature = "opencl"))]
    println!("\nOpenCL: Not compiled (enable with --features opencl)");

    #[cfg(feature = "cuda")]
    {
        println!("\nCUDA Devices:");
        let devices = tosminer::miner::cuda::enum_devices();
        if devices.is_empty() {
            println!("  None found");
        } else {
            for dev in &devices {
                println!(
                    "  [{}] {} (SM {}.{}, {} SMs)",
                    dev.index, dev.name, dev.cuda_cc_major, dev.cuda_cc_minor, dev.compute_units
                );
            }
        }
    }
    #[cfg(not(feature = "cuda"))]
    println!("\nCUDA: Not compiled (enable with --features cuda)");

    println!();
}

fn run_benchmark(args: &Args) {
    info!(
        target: LOG_TARGET,
        "🧪 Running CPU benchmark ({} iterations)...", args.benchmark_iterations
    );

    let hash_rate = toshash::benchmark(args.benchmark_iterations);

    println!("\n=== Benchmark Results ===");
    println!("CPU Hash Rate: {:.2} H/s", hash_rate);
    if hash_rate > 0.0 {
        println!("Time per hash: {:.2} µs", 1_000_000.0 / hash_rate);
    }
    println!();
}

/// Build the fleet from the enabled backends. Every worker gets a unique
/// fleet-wide index so nonce ranges never collide across backends.
fn build_farm(args: &Args) -> Farm {
    let farm = Farm::new();
    let mut fleet_index = 0u32;

    if args.cpu {
        for mut descriptor in enum_cpu_devices(args.cpu_threads) {
            descriptor.index = fleet_index;
            farm.add_miner(Miner::new(
                fleet_index,
                descriptor,
                Backend::Cpu(CpuBackend::new()),
            ));
            fleet_index += 1;
        }
    }

    #[cfg(feature = "opencl")]
    if args.opencl {
        use tosminer::miner::opencl::{enum_devices, ClBackend};
        for descriptor in enum_devices() {
            if !args.cl_devices.is_empty() && !args.cl_devices.contains(&descriptor.index) {
                continue;
            }
            let mut descriptor = descriptor;
            let backend = ClBackend::new(&descriptor, args.cl_global_work);
            descriptor.index = fleet_index;
            farm.add_miner(Miner::new(fleet_index, descriptor, Backend::OpenCl(backend)));
            fleet_index += 1;
        }
    }
    #[cfg(not(feature = "opencl"))]
    if args.opencl {
        warn!(target: LOG_TARGET, "--opencl requested but tosminer was built without the opencl feature");
    }

    #[cfg(feature = "cuda")]
    if args.cuda {
        use tosminer::miner::cuda::{enum_devices, CudaBackend};
        for descriptor in enum_devices() {
            if !args.cuda_devices.is_empty() && !args.cuda_devices.contains(&descriptor.index) {
                continue;
            }
            let mut descriptor = descriptor;
            let backend = CudaBackend::new(&descriptor, args.cuda_grid);
            descriptor.index = fleet_index;
            farm.add_miner(Miner::new(fleet_index, descriptor, Backend::Cuda(backend)));
            fleet_index += 1;
        }
    }
    #[cfg(not(feature = "cuda"))]
    if args.cuda {
        warn!(target: LOG_TARGET, "--cuda requested but tosminer was built without the cuda feature");
    }

    farm
}

async fn run_mining(args: &Args) -> tosminer::Result<()> {
    info!(target: LOG_TARGET, "🚀 Starting TOS miner");

    let user = args.user.clone().unwrap_or_default();
    let pool_url = args.pool.clone().unwrap_or_default();

    let client = StratumClient::new();
    client.set_credentials(&user, &args.pass);
    client.set_protocol(ProtocolVariant::parse(&args.protocol));
    client.set_tls_verification(args.tls_strict);

    client.add_endpoint_url(&pool_url)?;
    for failover in &args.failover {
        client.add_endpoint_url(failover)?;
    }

    let farm = Arc::new(build_farm(args));
    if farm.miner_count() == 0 {
        error!(target: LOG_TARGET, "No mining devices available");
        std::process::exit(1);
    }
    info!(
        target: LOG_TARGET,
        "📍 Pool: {} | 💳 User: {} | 🖥️ Devices: {}",
        pool_url,
        user,
        farm.miner_count()
    );

    // The two one-way channels between client and farm, plus the event
    // stream for share accounting
    let (work_tx, mut work_rx) = mpsc::unbounded_channel::<WorkPackage>();
    let (solution_tx, mut solution_rx) = mpsc::unbounded_channel::<(Solution, String)>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PoolEvent>();

    client.set_work_sender(work_tx);
    client.set_event_sender(event_tx);
    farm.set_solution_sender(solution_tx);

    let client_task = {
        let client = client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.run().await {
                error!(target: LOG_TARGET, "Pool client stopped: {}", e);
            }
        })
    };

    // Pool → farm: new jobs
    {
        let farm = Arc::clone(&farm);
        tokio::spawn(async move {
            while let Some(work) = work_rx.recv().await {
                farm.set_work(&work);
            }
        });
    }

    // Farm → pool: verified solutions
    {
        let client = client.clone();
        tokio::spawn(async move {
            while let Some((solution, job_id)) = solution_rx.recv().await {
                client.submit_solution(&solution, &job_id).await;
            }
        });
    }

    // Pool events → share counters / fallback work
    {
        let farm = Arc::clone(&farm);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    PoolEvent::ShareAccepted => farm.record_accepted_share(),
                    PoolEvent::ShareRejected { reason } => {
                        if reason.contains("stale") {
                            farm.record_stale_share();
                        } else {
                            farm.record_rejected_share();
                        }
                    }
                    PoolEvent::Connected => {
                        debug!(target: LOG_TARGET, "Pool connection established");
                    }
                    PoolEvent::Disconnected => {
                        farm.invalidate_work();
                        if farm.activate_fallback_work() {
                            info!(
                                target: LOG_TARGET,
                                "Pool connection lost, mining continues on the previous job"
                            );
                        }
                    }
                }
            }
        });
    }

    // Wait for the pool handshake before spinning up devices
    let mut waited = 0u64;
    while !client.is_authorized() && waited < 10_000 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        waited += 500;
    }
    if !client.is_authorized() {
        error!(target: LOG_TARGET, "Failed to authorize with pool");
        client.disconnect();
        let _ = tokio::time::timeout(Duration::from_secs(5), client_task).await;
        std::process::exit(1);
    }

    if !farm.start() {
        error!(target: LOG_TARGET, "Failed to start mining");
        client.disconnect();
        let _ = tokio::time::timeout(Duration::from_secs(5), client_task).await;
        std::process::exit(1);
    }

    // Stats line every 10 seconds until Ctrl-C
    let mut stats = tokio::time::interval(Duration::from_secs(10));
    stats.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(target: LOG_TARGET, "Shutdown requested...");
                break;
            }
            _ = stats.tick() => {
                info!(target: LOG_TARGET, "⚡ {}", farm.status_line());
            }
        }
    }

    info!(target: LOG_TARGET, "Shutting down...");
    farm.stop();

    // Give in-flight share submissions a chance to complete
    let completed = client.graceful_disconnect(5000).await;
    debug!(target: LOG_TARGET, "{} pending request(s) drained", completed);
    client.disconnect();
    let _ = tokio::time::timeout(Duration::from_secs(5), client_task).await;

    info!(target: LOG_TARGET, "Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> tosminer::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    if args.list_devices {
        list_devices(&args);
        return Ok(());
    }

    if args.benchmark {
        run_benchmark(&args);
        return Ok(());
    }

    if let Err(err) = args.validate() {
        eprintln!("❌ Error: {}", err);
        std::process::exit(1);
    }

    run_mining(&args).await
}
