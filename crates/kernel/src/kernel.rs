//! The emulated machine: physical memory, the environment table and the scheduler.

use spin::Mutex;

use mmu::{
    AllocError, MapError, Mapping, PAGE_SIZE, PageEntry, PageFlags, PhysicalAddress, PhysicalMemory,
    VirtualAddress,
    layout::{USTACK, USTACKTOP, UTEXT},
};
use ulib::{EnvId, EnvStatus, Environment, SysError, Trapframe};

use crate::{
    config::KernelConfig,
    env::{Env, EnvTable},
    syscall::UserContext,
};

/// Bytes reserved at the top of a new user stack for its entry frame.
const ENTRY_FRAME_SIZE: u32 = 8 * 4;

/// Kernel state. Never locked while user code runs.
pub(crate) struct KernelState {
    pub memory: PhysicalMemory,
    pub envs: EnvTable,
    /// Environment whose entry is executing.
    pub current: Option<EnvId>,
    /// Slot scheduled last; the round-robin search starts after it.
    last_slot: usize,
    /// Everything user code wrote with `cputs`, not yet drained.
    pub console: String,
}

impl KernelState {
    /// Unmaps every page of `id`, releasing frames whose last mapping goes away, and
    /// frees its slot unless it is executing; a running environment becomes `Dying`.
    pub fn destroy_env(&mut self, id: EnvId) {
        let running = self.current == Some(id);
        let Some(env) = self.envs.get_mut(id) else {
            return;
        };
        let frames = env.dir.clear();
        env.upcall = None;
        env.entry = None;
        env.status = if running {
            EnvStatus::Dying
        } else {
            EnvStatus::Free
        };

        for frame in frames {
            if let Err(err) = self.memory.put(frame) {
                log::error!("[{}] releasing frame {:?}: {}", id, frame, err);
            }
        }
        if !running {
            self.envs.free(id);
        }
    }

    /// Allocates a zeroed frame and maps it at `va` in `id`, dropping any previous mapping.
    pub fn map_fresh(
        &mut self,
        id: EnvId,
        va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        let frame = self.memory.allocate().map_err(|_| SysError::NoMemory)?;
        self.install(id, va, frame, perm)
    }

    /// Maps `frame` at `va` in `id` and takes a reference on it.
    pub fn install(
        &mut self,
        id: EnvId,
        va: VirtualAddress,
        frame: mmu::FrameNumber,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        if self.envs.get(id).is_none() {
            return Err(SysError::BadEnv);
        }
        self.memory.get(frame).map_err(|err| match err {
            AllocError::TooManyReferences => SysError::NoMemory,
            AllocError::OutOfMemory | AllocError::InvalidFrame => SysError::Invalid,
        })?;
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        if let Some(old) = env.dir.map(va, frame, perm) {
            if let Err(err) = self.memory.put(old) {
                log::error!("[{}] releasing replaced frame {:?}: {}", id, old, err);
            }
        }
        Ok(())
    }

    /// Copies `data` into memory mapped at `va` in `id`, ignoring page permissions.
    pub fn poke(&mut self, id: EnvId, va: VirtualAddress, data: &[u8]) -> Result<(), MapError> {
        for (addr, done, len) in page_chunks(va, data.len()) {
            let frame = self.translate(id, addr).ok_or(MapError::NotMapped)?.frame;
            let bytes = self
                .memory
                .frame_bytes_mut(frame)
                .map_err(|_| MapError::NotMapped)?;
            let offset = addr.page_offset();
            bytes[offset..offset + len].copy_from_slice(&data[done..done + len]);
        }
        Ok(())
    }

    /// Copies memory mapped at `va` in `id` into `buf`, ignoring page permissions.
    pub fn peek(&self, id: EnvId, va: VirtualAddress, buf: &mut [u8]) -> Result<(), MapError> {
        for (addr, done, len) in page_chunks(va, buf.len()) {
            let frame = self.translate(id, addr).ok_or(MapError::NotMapped)?.frame;
            let bytes = self
                .memory
                .frame_bytes(frame)
                .map_err(|_| MapError::NotMapped)?;
            let offset = addr.page_offset();
            buf[done..done + len].copy_from_slice(&bytes[offset..offset + len]);
        }
        Ok(())
    }

    pub fn translate(&self, id: EnvId, va: VirtualAddress) -> Option<Mapping> {
        self.envs.get(id)?.dir.translate(va)
    }
}

/// Splits `[va, va + len)` at page boundaries into `(address, offset into buffer, length)`.
pub(crate) fn page_chunks(
    va: VirtualAddress,
    len: usize,
) -> impl Iterator<Item = (VirtualAddress, usize, usize)> {
    let mut done = 0;
    core::iter::from_fn(move || {
        if done >= len {
            return None;
        }
        let addr = VirtualAddress::new(va.as_u32().wrapping_add(done as u32));
        let chunk = (PAGE_SIZE - addr.page_offset()).min(len - done);
        let item = (addr, done, chunk);
        done += chunk;
        Some(item)
    })
}

/// The emulated exokernel.
pub struct Kernel {
    config: KernelConfig,
    pub(crate) state: Mutex<KernelState>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let config = config.normalized();
        log::info!(
            "booting with {} frames ({}KB) and {} environment slots",
            config.physical_frames,
            config.physical_frames * PAGE_SIZE / 1024,
            config.max_envs
        );
        let state = KernelState {
            memory: PhysicalMemory::new(config.physical_frames),
            envs: EnvTable::new(config.max_envs),
            current: None,
            last_slot: usize::MAX,
            console: String::new(),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The view of environment `id` that its own code gets.
    pub fn context(&self, id: EnvId) -> UserContext<'_> {
        UserContext::new(self, id)
    }

    /// Creates a runnable environment with a one-page user stack that runs `entry` when
    /// scheduled.
    pub fn spawn<F>(&self, entry: F) -> Result<EnvId, SysError>
    where
        F: FnOnce(&dyn Environment) + 'static,
    {
        let mut state = self.state.lock();
        let esp = USTACKTOP.as_u32() - ENTRY_FRAME_SIZE;
        let tf = Trapframe {
            eip: UTEXT.as_u32(),
            esp,
            ebp: esp,
        };
        let id = state
            .envs
            .alloc(EnvId::SELF, tf)
            .ok_or(SysError::NoFreeEnv)?;

        if let Err(err) = state.map_fresh(id, USTACK, PageFlags::USER_WRITE) {
            state.destroy_env(id);
            return Err(err);
        }
        // Outermost frame: no saved frame pointer, returns to the program entry.
        let mut frame = [0u8; ENTRY_FRAME_SIZE as usize];
        frame[4..8].copy_from_slice(&UTEXT.as_u32().to_le_bytes());
        if state.poke(id, VirtualAddress::new(esp), &frame).is_err() {
            state.destroy_env(id);
            return Err(SysError::Invalid);
        }

        if let Some(env) = state.envs.get_mut(id) {
            env.entry = Some(Box::new(entry));
            env.status = EnvStatus::Runnable;
        }
        log::debug!("[{}] new env {}", EnvId::SELF, id);
        Ok(id)
    }

    /// Runs pending environment entries round-robin until none is runnable.
    ///
    /// An entry that returns leaves its environment not runnable with its memory intact.
    /// Returns the number of entries run.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Runs the next runnable entry. Returns false if there is none.
    pub fn run_next(&self) -> bool {
        let (id, entry) = {
            let mut state = self.state.lock();
            let Some(id) = Self::pick_next(&state) else {
                return false;
            };
            let Some(env) = state.envs.get_mut(id) else {
                return false;
            };
            let Some(entry) = env.entry.take() else {
                return false;
            };
            env.status = EnvStatus::Running;
            state.current = Some(id);
            state.last_slot = EnvTable::slot_index(id);
            (id, entry)
        };

        log::trace!("running env {}", id);
        entry(&self.context(id));

        let mut state = self.state.lock();
        state.current = None;
        match state.envs.get(id).map(|env| env.status) {
            Some(EnvStatus::Dying) => {
                state.envs.free(id);
            }
            Some(EnvStatus::Running) => {
                if let Some(env) = state.envs.get_mut(id) {
                    env.status = EnvStatus::NotRunnable;
                }
            }
            _ => {}
        }
        true
    }

    fn pick_next(state: &KernelState) -> Option<EnvId> {
        let runnable = |env: &&Env| env.status == EnvStatus::Runnable && env.entry.is_some();
        let start = state.last_slot.wrapping_add(1);
        state
            .envs
            .iter()
            .filter(runnable)
            .find(|env| EnvTable::slot_index(env.id) >= start)
            .or_else(|| state.envs.iter().find(runnable))
            .map(|env| env.id)
    }

    /// Drains the text user code wrote to the console.
    pub fn take_console_output(&self) -> String {
        core::mem::take(&mut self.state.lock().console)
    }

    /// Status of a live or dying environment; `None` once its slot is free.
    pub fn status(&self, id: EnvId) -> Option<EnvStatus> {
        self.state.lock().envs.get(id).map(|env| env.status)
    }

    pub fn parent(&self, id: EnvId) -> Option<EnvId> {
        self.state.lock().envs.get(id).map(|env| env.parent)
    }

    /// Saved registers of `id`.
    pub fn trapframe(&self, id: EnvId) -> Option<Trapframe> {
        self.state.lock().envs.get(id).map(|env| env.tf)
    }

    /// Number of faults delivered to the upcall of `id`.
    pub fn fault_count(&self, id: EnvId) -> Option<usize> {
        self.state.lock().envs.get(id).map(|env| env.faults)
    }

    /// Ids of all environments in slot order.
    pub fn env_ids(&self) -> Vec<EnvId> {
        self.state.lock().envs.iter().map(|env| env.id).collect()
    }

    /// Present mapping of `va` in `id`.
    pub fn translate(&self, id: EnvId, va: VirtualAddress) -> Option<Mapping> {
        self.state.lock().translate(id, va)
    }

    /// Raw page table entry of `va` in `id`; empty if nothing was ever mapped there.
    pub fn page_entry(&self, id: EnvId, va: VirtualAddress) -> Option<PageEntry> {
        self.state.lock().envs.get(id).map(|env| env.dir.pte(va))
    }

    /// Rewrites the flags of an existing page table entry, bypassing the syscall checks.
    /// Returns the old flags.
    pub fn set_page_flags(
        &self,
        id: EnvId,
        va: VirtualAddress,
        flags: PageFlags,
    ) -> Result<PageFlags, MapError> {
        let mut state = self.state.lock();
        let env = state.envs.get_mut(id).ok_or(MapError::NotMapped)?;
        env.dir.set_flags(va.align_down(PAGE_SIZE), flags)
    }

    /// Reads memory of `id` without faulting.
    pub fn peek(&self, id: EnvId, va: VirtualAddress, buf: &mut [u8]) -> Result<(), MapError> {
        self.state.lock().peek(id, va, buf)
    }

    /// Reads emulated physical memory.
    pub fn read_physical(&self, pa: PhysicalAddress, buf: &mut [u8]) -> Result<(), AllocError> {
        self.state.lock().memory.read(pa, buf)
    }

    /// Frame usage as `(total, allocated, free)`.
    pub fn frame_usage(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (
            state.memory.total_frames(),
            state.memory.allocated_frames(),
            state.memory.free_frames(),
        )
    }

    /// Environment usage as `(in use, capacity)`.
    pub fn env_usage(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.envs.len(), state.envs.capacity())
    }
}
