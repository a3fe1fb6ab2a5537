// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/cuda.rs
// Version: 0.3.1
//
// This file contains the CUDA mining backend, located in the miner
// subdirectory. The kernel is compiled at runtime with NVRTC and launched
// on a two-stream ring so readback of one batch overlaps execution of the
// next. Block size is fixed at 1: each thread owns the full 64 KiB
// scratchpad in dynamic shared memory.
//
// Tree Location:
// - src/miner/cuda.rs (CUDA backend)
// - Depends on: cudarc, anyhow, core, worker

#![cfg(feature = "cuda")]

use crate::core::toshash::{HASH_SIZE, INPUT_SIZE};
use crate::core::types::MinerType;
use crate::miner::device::DeviceDescriptor;
use crate::miner::worker::WorkerState;
use anyhow::{Context, Result};
use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::sys::CUfunction_attribute;
use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, CudaStream, LaunchAsync, LaunchConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "tosminer::miner::cuda";

/// In-flight batches (stream ring depth).
const STREAM_COUNT: usize = 2;

/// Solution slots per batch output buffer.
pub const MAX_OUTPUTS: u32 = 64;

/// Words in one output buffer: count + (lo, hi) per slot.
const OUTPUT_WORDS: usize = 1 + MAX_OUTPUTS as usize * 2;

/// Dynamic shared memory per block (the scratchpad).
const SHARED_MEM_BYTES: u32 = 65536;

const IDLE_SLEEP: Duration = Duration::from_millis(100);

struct StreamSlot {
    stream: CudaStream,
    d_output: CudaSlice<u32>,
    start_nonce: u64,
}

/// CUDA mining backend for one GPU device.
pub struct CudaBackend {
    ordinal: usize,
    grid_size: u32,

    device: Option<Arc<CudaDevice>>,
    kernel: Option<CudaFunction>,
    slots: Vec<StreamSlot>,
    d_header: Option<CudaSlice<u8>>,
    d_target: Option<CudaSlice<u8>>,
    host_output: Vec<u32>,
}

impl CudaBackend {
    /// `grid_size` 0 selects auto-tune from the device properties.
    pub fn new(descriptor: &DeviceDescriptor, grid_size: u32) -> Self {
        Self {
            ordinal: descriptor.cuda_device_index.max(0) as usize,
            grid_size,
            device: None,
            kernel: None,
            slots: Vec::new(),
            d_header: None,
            d_target: None,
            host_output: vec![0u32; OUTPUT_WORDS],
        }
    }

    pub fn init(&mut self, state: &WorkerState) -> bool {
        match self.try_init(state) {
            Ok(()) => true,
            Err(e) => {
                error!(target: LOG_TARGET, "{}: CUDA init failed: {:#}", state.name(), e);
                false
            }
        }
    }

    fn try_init(&mut self, state: &WorkerState) -> Result<()> {
        self.slots.clear();

        let device = CudaDevice::new(self.ordinal).context("open CUDA device")?;

        let sm_count = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)
            .unwrap_or(1) as u32;
        let cc_major = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .unwrap_or(0);
        let cc_minor = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .unwrap_or(0);
        let shared_per_sm = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_MULTIPROCESSOR)
            .unwrap_or(0) as u32;

        info!(
            target: LOG_TARGET,
            "{}: {} (SM {}.{}, {} SMs, shared/SM: {} KiB)",
            state.name(),
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            cc_major,
            cc_minor,
            sm_count,
            shared_per_sm / 1024
        );

        let grid_size = if self.grid_size > 0 {
            self.grid_size
        } else {
            Self::auto_tune_grid(sm_count, cc_major, shared_per_sm)
        };
        self.grid_size = grid_size;

        let kernel_source = include_str!("../../kernels/cuda/toshash.cu");
        let ptx = cudarc::nvrtc::compile_ptx(kernel_source).context("compile kernel")?;
        device
            .load_ptx(ptx, "toshash", &["toshash_search"])
            .context("load kernel module")?;
        let kernel = device
            .get_func("toshash", "toshash_search")
            .context("lookup kernel function")?;

        // The scratchpad exceeds the 48 KiB static shared-memory limit, so
        // the kernel must be allowed to request 64 KiB dynamically
        kernel
            .set_attribute(
                CUfunction_attribute::CU_FUNC_ATTRIBUTE_MAX_DYNAMIC_SHARED_SIZE_BYTES,
                SHARED_MEM_BYTES as i32,
            )
            .context("raise dynamic shared memory limit")?;

        let mut slots = Vec::with_capacity(STREAM_COUNT);
        for _ in 0..STREAM_COUNT {
            let stream = device.fork_default_stream().context("create stream")?;
            let d_output = device
                .alloc_zeros::<u32>(OUTPUT_WORDS)
                .context("allocate output buffer")?;
            slots.push(StreamSlot {
                stream,
                d_output,
                start_nonce: 0,
            });
        }

        self.d_header = Some(
            device
                .alloc_zeros::<u8>(INPUT_SIZE)
                .context("allocate header buffer")?,
        );
        self.d_target = Some(
            device
                .alloc_zeros::<u8>(HASH_SIZE)
                .context("allocate target buffer")?,
        );

        self.device = Some(device);
        self.kernel = Some(kernel);
        self.slots = slots;

        info!(
            target: LOG_TARGET,
            "{}: initialized ({} streams, grid: {}, block: 1)",
            state.name(),
            STREAM_COUNT,
            self.grid_size
        );
        Ok(())
    }

    /// Grid auto-tune: SMs x blocks_per_SM x cc_factor x 256, clamped to
    /// [4096, 65536]. blocks_per_SM is 2 when the SM fits two scratchpads.
    fn auto_tune_grid(sm_count: u32, cc_major: i32, shared_per_sm: u32) -> u32 {
        let blocks_per_sm = if shared_per_sm >= SHARED_MEM_BYTES * 2 { 2 } else { 1 };
        let cc_factor = if cc_major >= 7 {
            4
        } else if cc_major >= 6 {
            2
        } else {
            1
        };
        (sm_count.max(1) * blocks_per_sm * cc_factor * 256).clamp(4096, 65536)
    }

    fn upload_work(&mut self, header: &[u8], target: &[u8]) -> Result<()> {
        let device = self.device.as_ref().context("device missing")?;
        device
            .htod_sync_copy_into(header, self.d_header.as_mut().context("header buffer missing")?)
            .context("upload header")?;
        device
            .htod_sync_copy_into(target, self.d_target.as_mut().context("target buffer missing")?)
            .context("upload target")?;
        Ok(())
    }

    fn launch_batch(&mut self, slot_index: usize, start_nonce: u64) -> Result<()> {
        let device = self.device.as_ref().context("device missing")?;
        let kernel = self.kernel.as_ref().context("kernel missing")?.clone();
        let slot = &mut self.slots[slot_index];

        device
            .memset_zeros(&mut slot.d_output)
            .context("reset output buffer")?;

        let cfg = LaunchConfig {
            grid_dim: (self.grid_size, 1, 1),
            block_dim: (1, 1, 1),
            shared_mem_bytes: SHARED_MEM_BYTES,
        };

        unsafe {
            kernel
                .launch_on_stream(
                    &slot.stream,
                    cfg,
                    (
                        &mut slot.d_output,
                        self.d_header.as_ref().context("header buffer missing")?,
                        self.d_target.as_ref().context("target buffer missing")?,
                        start_nonce,
                        MAX_OUTPUTS,
                    ),
                )
                .context("launch kernel")?;
        }

        slot.start_nonce = start_nonce;
        Ok(())
    }

    /// Block until `slot_index`'s batch finishes, then verify its
    /// candidates on the CPU.
    fn collect_batch(&mut self, state: &WorkerState, slot_index: usize) -> Result<()> {
        let device = self.device.as_ref().context("device missing")?;
        let slot = &self.slots[slot_index];

        device.wait_for(&slot.stream).context("wait for stream")?;
        device
            .dtoh_sync_copy_into(&slot.d_output, &mut self.host_output)
            .context("read output buffer")?;

        let mut count = self.host_output[0];
        if count > MAX_OUTPUTS {
            warn!(
                target: LOG_TARGET,
                "{}: device returned invalid candidate count {}, capping to {}",
                state.name(),
                count,
                MAX_OUTPUTS
            );
            count = MAX_OUTPUTS;
        }

        for i in 0..count as usize {
            let lo = self.host_output[1 + i * 2] as u64;
            let hi = self.host_output[2 + i * 2] as u64;
            let nonce = lo | (hi << 32);

            if nonce == 0 || nonce == u64::MAX {
                warn!(
                    target: LOG_TARGET,
                    "{}: suspicious candidate nonce {}, skipping", state.name(), nonce
                );
                continue;
            }

            state.verify_candidate(nonce);
        }

        debug!(
            target: LOG_TARGET,
            "{}: batch at {:#018x} done ({} candidates)",
            state.name(),
            slot.start_nonce,
            count
        );
        Ok(())
    }

    fn drain_streams(&mut self) {
        if let Some(device) = self.device.as_ref() {
            let _ = device.synchronize();
        }
    }

    fn recover(&mut self, state: &WorkerState) -> bool {
        warn!(target: LOG_TARGET, "{}: attempting recovery...", state.name());
        self.drain_streams();
        if self.init(state) {
            info!(target: LOG_TARGET, "{}: recovery successful", state.name());
            true
        } else {
            state.mark_failed();
            false
        }
    }

    pub fn mine_loop(&mut self, state: &WorkerState) {
        let mut nonce: u64 = 0;
        let mut current_slot = 0usize;
        let mut in_flight = 0usize;
        let mut work = state.current_work();
        let batch_size = self.grid_size as u64;

        while state.is_running() {
            if state.is_paused() {
                self.drain_streams();
                in_flight = 0;
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            if state.poll_new_work() {
                // In-flight batches belong to the old job, discard them
                self.drain_streams();
                in_flight = 0;

                work = state.current_work();
                if work.valid {
                    if let Err(e) = self.upload_work(&work.header, &work.target) {
                        error!(target: LOG_TARGET, "{}: failed to upload work: {:#}", state.name(), e);
                        if state.record_error() && !self.recover(state) {
                            return;
                        }
                        continue;
                    }
                    nonce = work.device_start_nonce(state.index());
                    current_slot = 0;
                    state.clear_errors();
                }
            }

            if !work.valid {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            // The ring is full once every stream carries a batch; the
            // current slot then holds the oldest one
            if in_flight >= STREAM_COUNT {
                match self.collect_batch(state, current_slot) {
                    Ok(()) => {
                        state.record_hashes(batch_size);
                        state.clear_errors();
                        in_flight -= 1;
                    }
                    Err(e) => {
                        error!(target: LOG_TARGET, "{}: stream sync failed: {:#}", state.name(), e);
                        self.drain_streams();
                        in_flight = 0;
                        if state.record_error() && !self.recover(state) {
                            return;
                        }
                        std::thread::sleep(IDLE_SLEEP);
                        continue;
                    }
                }
            }

            if let Err(e) = self.launch_batch(current_slot, nonce) {
                error!(target: LOG_TARGET, "{}: kernel launch failed: {:#}", state.name(), e);
                self.drain_streams();
                in_flight = 0;
                if state.record_error() && !self.recover(state) {
                    return;
                }
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            current_slot = (current_slot + 1) % STREAM_COUNT;
            nonce = nonce.wrapping_add(batch_size);
            in_flight += 1;
        }

        self.drain_streams();
    }
}

/// Enumerate CUDA devices.
pub fn enum_devices() -> Vec<DeviceDescriptor> {
    let count = match CudaDevice::count() {
        Ok(c) => c,
        Err(e) => {
            debug!(target: LOG_TARGET, "CUDA enumeration failed: {}", e);
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for i in 0..count {
        let device = match CudaDevice::new(i as usize) {
            Ok(d) => d,
            Err(_) => continue,
        };

        let cc_major = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .unwrap_or(0);
        let cc_minor = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .unwrap_or(0);
        let sm_count = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)
            .unwrap_or(0) as u32;

        devices.push(DeviceDescriptor {
            device_type: MinerType::Cuda,
            index: i as u32,
            name: device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
            total_memory: 0,
            compute_units: sm_count,
            cl_platform_name: String::new(),
            cl_platform_index: 0,
            cl_device_index: 0,
            cuda_device_index: i as i32,
            cuda_cc_major: cc_major,
            cuda_cc_minor: cc_minor,
        });
    }

    devices
}
