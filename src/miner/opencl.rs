// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/miner/opencl.rs
// Version: 0.3.1
//
// This file contains the OpenCL mining backend, located in the miner
// subdirectory. Batches are double-buffered: while the host verifies one
// batch's candidates the next batch is already executing on the device, and
// completion is observed per-batch through events rather than a queue
// barrier.
//
// Tree Location:
// - src/miner/opencl.rs (OpenCL backend)
// - Depends on: opencl3, anyhow, core, worker

#![cfg(feature = "opencl")]

use crate::core::toshash::{HASH_SIZE, INPUT_SIZE};
use crate::core::types::MinerType;
use crate::miner::device::DeviceDescriptor;
use crate::miner::worker::WorkerState;
use anyhow::{Context as AnyhowContext, Result};
use opencl3::{
    command_queue::CommandQueue,
    context::Context,
    device::{Device, CL_DEVICE_TYPE_GPU},
    event::Event,
    kernel::{ExecuteKernel, Kernel},
    memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE},
    platform::get_platforms,
    program::Program,
    types::{cl_uchar, cl_uint, cl_ulong, CL_FALSE, CL_TRUE},
};
use std::collections::VecDeque;
use std::ptr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "tosminer::miner::opencl";

/// In-flight batches per device (double buffering).
const BUFFER_COUNT: usize = 2;

/// Solution slots per batch output buffer.
pub const MAX_OUTPUTS: u32 = 64;

/// Words in one output buffer: count + (lo, hi) per slot.
const OUTPUT_WORDS: usize = 1 + MAX_OUTPUTS as usize * 2;

const IDLE_SLEEP: Duration = Duration::from_millis(100);

struct PendingBatch {
    buffer_index: usize,
    start_nonce: u64,
    event: Event,
}

/// OpenCL mining backend for one GPU device.
pub struct ClBackend {
    platform_index: u32,
    device_index: u32,
    global_work_size: usize,

    context: Option<Context>,
    queue: Option<CommandQueue>,
    program: Option<Program>,
    kernel: Option<Kernel>,
    output_buffers: Vec<Buffer<cl_uint>>,
    header_buffer: Option<Buffer<cl_uchar>>,
    target_buffer: Option<Buffer<cl_uchar>>,
    host_output: Vec<Vec<cl_uint>>,
}

impl ClBackend {
    pub fn new(descriptor: &DeviceDescriptor, global_work_size: usize) -> Self {
        Self {
            platform_index: descriptor.cl_platform_index,
            device_index: descriptor.cl_device_index,
            global_work_size: global_work_size.max(1),
            context: None,
            queue: None,
            program: None,
            kernel: None,
            output_buffers: Vec::new(),
            header_buffer: None,
            target_buffer: None,
            host_output: Vec::new(),
        }
    }

    pub fn init(&mut self, state: &WorkerState) -> bool {
        match self.try_init(state) {
            Ok(()) => true,
            Err(e) => {
                error!(target: LOG_TARGET, "{}: OpenCL init failed: {:#}", state.name(), e);
                false
            }
        }
    }

    fn try_init(&mut self, state: &WorkerState) -> Result<()> {
        let device = self.find_device()?;

        let local_mem = device.local_mem_size().unwrap_or(0);
        info!(
            target: LOG_TARGET,
            "{}: {} (local mem: {} KiB, CUs: {})",
            state.name(),
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            local_mem / 1024,
            device.max_compute_units().unwrap_or(0)
        );
        if local_mem < 65536 {
            warn!(
                target: LOG_TARGET,
                "{}: local memory below 64 KiB, scratchpad may spill", state.name()
            );
        }

        let context = Context::from_device(&device).context("create context")?;

        let kernel_source = include_str!("../../kernels/opencl/toshash.cl");
        let mut program =
            Program::create_from_source(&context, kernel_source).context("create program")?;
        if let Err(e) = program.build(context.devices(), "-cl-std=CL1.2") {
            for device_id in context.devices() {
                if let Ok(log) = program.get_build_log(*device_id) {
                    error!(target: LOG_TARGET, "{}: build log: {}", state.name(), log);
                }
            }
            anyhow::bail!("program build failed: {}", e);
        }

        let kernel = Kernel::create(&program, "toshash_search").context("create kernel")?;
        let queue = CommandQueue::create_default(&context, 0).context("create queue")?;

        let mut output_buffers = Vec::with_capacity(BUFFER_COUNT);
        let mut host_output = Vec::with_capacity(BUFFER_COUNT);
        for _ in 0..BUFFER_COUNT {
            let buffer = unsafe {
                Buffer::<cl_uint>::create(&context, CL_MEM_READ_WRITE, OUTPUT_WORDS, ptr::null_mut())
                    .context("create output buffer")?
            };
            output_buffers.push(buffer);
            host_output.push(vec![0u32; OUTPUT_WORDS]);
        }

        let header_buffer = unsafe {
            Buffer::<cl_uchar>::create(&context, CL_MEM_READ_ONLY, INPUT_SIZE, ptr::null_mut())
                .context("create header buffer")?
        };
        let target_buffer = unsafe {
            Buffer::<cl_uchar>::create(&context, CL_MEM_READ_ONLY, HASH_SIZE, ptr::null_mut())
                .context("create target buffer")?
        };

        self.context = Some(context);
        self.queue = Some(queue);
        self.program = Some(program);
        self.kernel = Some(kernel);
        self.output_buffers = output_buffers;
        self.header_buffer = Some(header_buffer);
        self.target_buffer = Some(target_buffer);

        info!(
            target: LOG_TARGET,
            "{}: initialized (global work size: {}, {} buffers)",
            state.name(),
            self.global_work_size,
            BUFFER_COUNT
        );
        Ok(())
    }

    fn find_device(&self) -> Result<Device> {
        let platforms = get_platforms().context("enumerate platforms")?;
        let platform = platforms
            .get(self.platform_index as usize)
            .context("platform index out of range")?;
        let device_ids = platform
            .get_devices(CL_DEVICE_TYPE_GPU)
            .context("enumerate GPU devices")?;
        let id = device_ids
            .get(self.device_index as usize)
            .context("device index out of range")?;
        Ok(Device::new(*id))
    }

    fn upload_work(&mut self, header: &[u8], target: &[u8]) -> Result<()> {
        let queue = self.queue.as_ref().context("queue missing")?;
        unsafe {
            queue
                .enqueue_write_buffer(
                    self.header_buffer.as_mut().context("header buffer missing")?,
                    CL_TRUE,
                    0,
                    header,
                    &[],
                )
                .context("write header")?;
            queue
                .enqueue_write_buffer(
                    self.target_buffer.as_mut().context("target buffer missing")?,
                    CL_TRUE,
                    0,
                    target,
                    &[],
                )
                .context("write target")?;
        }
        Ok(())
    }

    fn enqueue_batch(&mut self, start_nonce: u64, buffer_index: usize) -> Result<Event> {
        let queue = self.queue.as_ref().context("queue missing")?;
        let kernel = self.kernel.as_ref().context("kernel missing")?;

        // Reset the solution counter, then chain kernel and readback on it
        let zero = [0u32];
        let write_event = unsafe {
            queue
                .enqueue_write_buffer(&mut self.output_buffers[buffer_index], CL_FALSE, 0, &zero, &[])
                .context("reset output count")?
        };

        let nonce_arg: cl_ulong = start_nonce;
        let max_outputs: cl_uint = MAX_OUTPUTS;
        let kernel_event = unsafe {
            ExecuteKernel::new(kernel)
                .set_arg(&self.output_buffers[buffer_index])
                .set_arg(self.header_buffer.as_ref().context("header buffer missing")?)
                .set_arg(self.target_buffer.as_ref().context("target buffer missing")?)
                .set_arg(&nonce_arg)
                .set_arg(&max_outputs)
                .set_global_work_size(self.global_work_size)
                .set_local_work_size(1)
                .set_event_wait_list(&[write_event.get()])
                .enqueue_nd_range(queue)
                .context("enqueue kernel")?
        };

        // The returned event fires once the results sit in host memory
        let read_event = unsafe {
            queue
                .enqueue_read_buffer(
                    &self.output_buffers[buffer_index],
                    CL_FALSE,
                    0,
                    &mut self.host_output[buffer_index],
                    &[kernel_event.get()],
                )
                .context("enqueue readback")?
        };

        Ok(read_event)
    }

    fn drain_pending(&self, pending: &mut VecDeque<PendingBatch>) {
        while let Some(batch) = pending.pop_front() {
            let _ = batch.event.wait();
        }
    }

    fn process_batch(&self, state: &WorkerState, batch: &PendingBatch) {
        let out = &self.host_output[batch.buffer_index];
        let mut count = out[0];
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
            let lo = out[1 + i * 2] as u64;
            let hi = out[2 + i * 2] as u64;
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
            batch.start_nonce,
            count
        );
    }

    /// Attempt a full re-init after the error budget is exhausted.
    /// Marks the worker failed when recovery is impossible.
    fn recover(&mut self, state: &WorkerState) -> bool {
        warn!(target: LOG_TARGET, "{}: attempting recovery...", state.name());
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
        let mut buffer_index = 0usize;
        let mut work = state.current_work();
        let mut pending: VecDeque<PendingBatch> = VecDeque::with_capacity(BUFFER_COUNT);
        let batch_size = self.global_work_size as u64;

        while state.is_running() {
            if state.is_paused() {
                self.drain_pending(&mut pending);
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            if state.poll_new_work() {
                // In-flight batches belong to the old job, discard them
                self.drain_pending(&mut pending);

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
                    buffer_index = 0;
                    state.clear_errors();
                }
            }

            if !work.valid {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            let mut batch_error = false;

            while pending.len() < BUFFER_COUNT {
                match self.enqueue_batch(nonce, buffer_index) {
                    Ok(event) => {
                        pending.push_back(PendingBatch {
                            buffer_index,
                            start_nonce: nonce,
                            event,
                        });
                        buffer_index = (buffer_index + 1) % BUFFER_COUNT;
                        nonce = nonce.wrapping_add(batch_size);
                    }
                    Err(e) => {
                        error!(target: LOG_TARGET, "{}: mining error: {:#}", state.name(), e);
                        batch_error = true;
                        break;
                    }
                }
            }

            if !batch_error {
                if let Some(batch) = pending.pop_front() {
                    // Wait only for this batch's event, not the whole queue:
                    // the younger batch keeps executing while we verify
                    match batch.event.wait() {
                        Ok(()) => {
                            self.process_batch(state, &batch);
                            state.record_hashes(batch_size);
                            state.clear_errors();
                        }
                        Err(e) => {
                            error!(target: LOG_TARGET, "{}: event wait failed: {}", state.name(), e);
                            batch_error = true;
                        }
                    }
                }
            }

            if batch_error {
                self.drain_pending(&mut pending);
                if state.record_error() && !self.recover(state) {
                    return;
                }
                std::thread::sleep(IDLE_SLEEP);
            }
        }

        self.drain_pending(&mut pending);
    }
}

/// Enumerate OpenCL GPU devices across all platforms.
pub fn enum_devices() -> Vec<DeviceDescriptor> {
    let platforms = match get_platforms() {
        Ok(p) => p,
        Err(e) => {
            debug!(target: LOG_TARGET, "OpenCL platform enumeration failed: {}", e);
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    let mut index = 0u32;

    for (p, platform) in platforms.iter().enumerate() {
        let platform_name = platform.name().unwrap_or_else(|_| "Unknown Platform".to_string());
        let ids = match platform.get_devices(CL_DEVICE_TYPE_GPU) {
            Ok(ids) => ids,
            Err(_) => continue,
        };

        for (d, id) in ids.iter().enumerate() {
            let device = Device::new(*id);
            devices.push(DeviceDescriptor {
                device_type: MinerType::OpenCl,
                index,
                name: device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
                total_memory: device.global_mem_size().unwrap_or(0),
                compute_units: device.max_compute_units().unwrap_or(0),
                cl_platform_name: platform_name.clone(),
                cl_platform_index: p as u32,
                cl_device_index: d as u32,
                cuda_device_index: -1,
                cuda_cc_major: 0,
                cuda_cc_minor: 0,
            });
            index += 1;
        }
    }

    devices
}
