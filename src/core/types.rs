// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/core/types.rs
// Version: 0.3.1
//
// This file defines core data structures for the TOS miner, located in the
// core subdirectory. It includes the hash and nonce types, the solution
// record, device type enumeration and the command-line arguments.
//
// Tree Location:
// - src/core/types.rs (core data structures)
// - Depends on: clap, hex

use clap::Parser;

/// 256-bit hash, big-endian when compared numerically.
pub type Hash256 = [u8; 32];

/// 64-bit nonce.
pub type Nonce = u64;

/// Compare a hash against a target. A hash meets the target when it is
/// numerically less than or equal (big-endian byte-wise compare, ties count).
#[inline]
pub fn meets_target(hash: &Hash256, target: &Hash256) -> bool {
    hash <= target
}

/// Convert a hash to a lowercase hex string.
pub fn to_hex(hash: &Hash256) -> String {
    hex::encode(hash)
}

/// Parse a 64-char hex string into a hash. Returns a zero hash on bad input.
pub fn from_hex(s: &str) -> Hash256 {
    let mut out = [0u8; 32];
    if let Ok(bytes) = hex::decode(s) {
        if bytes.len() == 32 {
            out.copy_from_slice(&bytes);
        }
    }
    out
}

/// Mining device backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerType {
    Cpu,
    OpenCl,
    Cuda,
}

impl MinerType {
    /// Short tag used in worker names ("CPU0", "CL1", "CU0")
    pub fn tag(&self) -> &'static str {
        match self {
            MinerType::Cpu => "CPU",
            MinerType::OpenCl => "CL",
            MinerType::Cuda => "CU",
        }
    }
}

/// A verified solution ready for submission
#[derive(Debug, Clone)]
pub struct Solution {
    /// Nonce value that produced the winning hash
    pub nonce: Nonce,

    /// The resulting hash (must meet the work target)
    pub hash: Hash256,

    /// Fleet index of the device that found this solution
    pub device_index: u32,
}

impl Solution {
    pub fn new(nonce: Nonce, hash: Hash256, device_index: u32) -> Self {
        Self {
            nonce,
            hash,
            device_index,
        }
    }
}

/// Command-line arguments for the TOS miner
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tosminer",
    author = "TOS Mining Team",
    version,
    about = "High-performance TOS Hash V3 miner with CPU, OpenCL and CUDA backends",
    long_about = "tosminer mines the TOS Hash V3 proof-of-work algorithm against a stratum pool.\n\
                  It distributes the 64-bit nonce space across every enabled device and verifies\n\
                  all GPU candidates on the CPU before submission.\n\n\
                  MINING:    requires a pool URL and a username (wallet.worker)\n\
                  BENCHMARK: measures the CPU hash rate, no pool required\n\n\
                  Examples:\n\
                    Mining:     tosminer -P stratum+tcp://pool.example.com:3333 -u wallet.rig1 --opencl\n\
                    TLS pool:   tosminer -P stratum+ssl://pool.example.com:3334 -u wallet.rig1 --cuda\n\
                    Benchmark:  tosminer --benchmark --benchmark-iterations 2000\n\n\
                  For detailed help, use: tosminer --help"
)]
pub struct Args {
    /// Pool URL (stratum+tcp://host:port or stratum+ssl://host:port)
    #[arg(
        short = 'P',
        long = "pool",
        value_name = "URL",
        help = "Pool URL (stratum+tcp://host:port or stratum+ssl://host:port)"
    )]
    pub pool: Option<String>,

    /// Additional failover pool URLs, tried after repeated reconnect failures
    #[arg(
        long = "failover",
        value_name = "URL",
        help = "Failover pool URL (repeatable)"
    )]
    pub failover: Vec<String>,

    /// Pool username, usually wallet.worker
    #[arg(
        short = 'u',
        long = "user",
        value_name = "USER",
        help = "Pool username (usually wallet.worker)"
    )]
    pub user: Option<String>,

    /// Pool password ('x' for most pools)
    #[arg(
        short = 'p',
        long = "pass",
        value_name = "PASSWORD",
        default_value = "x",
        help = "Pool password (usually 'x')"
    )]
    pub pass: String,

    /// Stratum protocol variant
    #[arg(
        long = "protocol",
        value_name = "VARIANT",
        default_value = "stratum",
        help = "Stratum variant: stratum, ethproxy, ethereumstratum"
    )]
    pub protocol: String,

    /// Strict TLS certificate verification (pools commonly use self-signed
    /// certificates, so permissive verification is the default)
    #[arg(long = "tls-strict", default_value = "false", help = "Fail on invalid TLS certificates")]
    pub tls_strict: bool,

    /// Enable CPU mining
    #[arg(long = "cpu", default_value = "false", help = "Enable CPU mining")]
    pub cpu: bool,

    /// Number of CPU mining threads (0 = auto-detect)
    #[arg(
        long = "cpu-threads",
        value_name = "COUNT",
        default_value = "0",
        help = "CPU mining threads (0 = auto-detect)"
    )]
    pub cpu_threads: usize,

    /// Enable OpenCL GPU mining
    #[arg(long = "opencl", default_value = "false", help = "Enable OpenCL GPU mining")]
    pub opencl: bool,

    /// Enable CUDA GPU mining
    #[arg(long = "cuda", default_value = "false", help = "Enable CUDA GPU mining")]
    pub cuda: bool,

    /// OpenCL device indices to use (default: all)
    #[arg(
        long = "cl-devices",
        value_name = "IDX",
        value_delimiter = ',',
        help = "OpenCL device indices (comma separated, default all)"
    )]
    pub cl_devices: Vec<u32>,

    /// CUDA device indices to use (default: all)
    #[arg(
        long = "cuda-devices",
        value_name = "IDX",
        value_delimiter = ',',
        help = "CUDA device indices (comma separated, default all)"
    )]
    pub cuda_devices: Vec<u32>,

    /// OpenCL global work size per batch
    #[arg(
        long = "cl-global-work",
        value_name = "SIZE",
        default_value = "16384",
        help = "OpenCL global work size per batch"
    )]
    pub cl_global_work: usize,

    /// CUDA grid size (0 = auto-tune from device properties)
    #[arg(
        long = "cuda-grid",
        value_name = "SIZE",
        default_value = "0",
        help = "CUDA grid size (0 = auto-tune)"
    )]
    pub cuda_grid: u32,

    /// List available mining devices and exit
    #[arg(long = "list-devices", default_value = "false", help = "List mining devices and exit")]
    pub list_devices: bool,

    /// Run the CPU hash benchmark and exit (no pool required)
    #[arg(long = "benchmark", default_value = "false", help = "Run CPU hash benchmark and exit")]
    pub benchmark: bool,

    /// Number of hashes for the benchmark
    #[arg(
        long = "benchmark-iterations",
        value_name = "COUNT",
        default_value = "1000",
        help = "Hash count for --benchmark"
    )]
    pub benchmark_iterations: u64,

    /// Verbose (debug) logging
    #[arg(short = 'v', long = "verbose", default_value = "false", help = "Enable debug logging")]
    pub verbose: bool,

    /// Quiet logging (errors only)
    #[arg(short = 'q', long = "quiet", default_value = "false", help = "Log errors only")]
    pub quiet: bool,
}

impl Args {
    /// Validate arguments and return helpful errors
    pub fn validate(&self) -> Result<(), String> {
        if self.benchmark || self.list_devices {
            return Ok(());
        }

        if self.pool.is_none() {
            return Err(
                "Pool URL is required for mining. Use -P stratum+tcp://host:port".to_string(),
            );
        }
        if self.user.is_none() {
            return Err("Username is required for mining. Use -u wallet.worker".to_string());
        }
        if !self.cpu && !self.opencl && !self.cuda {
            return Err(
                "No mining backend selected. Use --cpu, --opencl and/or --cuda".to_string(),
            );
        }
        if self.cpu_threads > 1024 {
            return Err("CPU thread count cannot exceed 1024".to_string());
        }
        if matches!(self.protocol.as_str(), "stratum" | "ethproxy" | "ethereumstratum") {
            Ok(())
        } else {
            Err(format!(
                "Unknown protocol variant '{}' (expected stratum, ethproxy or ethereumstratum)",
                self.protocol
            ))
        }
    }
}
