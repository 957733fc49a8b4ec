//! An in-process stand-in for the kernel, for unit tests of user library code.
//!
//! Every syscall is recorded in a call log. Memory accesses honor page permissions and
//! deliver faults to the registered upcall once before giving up. A test can make chosen
//! syscalls fail with [`FakePlatform::fail_when`].

use std::{cell::RefCell, collections::BTreeMap};

use mmu::{FrameNumber, PAGE_SIZE, PageDirectory, PageFlags, PhysicalMemory, VirtualAddress};

use crate::{
    error::{MemoryError, SysError},
    syscall::{ChildEntry, EnvId, EnvStatus, PageTableWindow, Syscalls, UserMemory},
    trap::{FaultCode, Trapframe, UTrapframe, UpcallEntry},
};

/// A recorded syscall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateContext,
    AllocPage {
        env: EnvId,
        va: VirtualAddress,
        perm: PageFlags,
    },
    MapPage {
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    },
    UnmapPage {
        env: EnvId,
        va: VirtualAddress,
    },
    SetUpcall {
        env: EnvId,
    },
    SetStatus {
        env: EnvId,
        status: EnvStatus,
    },
    Destroy {
        env: EnvId,
    },
}

struct FakeEnvState {
    dir: PageDirectory,
    status: EnvStatus,
    upcall: Option<UpcallEntry>,
}

struct State {
    memory: PhysicalMemory,
    envs: BTreeMap<EnvId, FakeEnvState>,
    pending: BTreeMap<EnvId, ChildEntry>,
    next_id: u32,
    calls: Vec<Call>,
    failure: Option<(Box<dyn Fn(&Call) -> bool>, SysError)>,
}

impl State {
    fn add_env(&mut self, status: EnvStatus) -> EnvId {
        let id = EnvId::new(self.next_id);
        self.next_id += 1;
        self.envs.insert(
            id,
            FakeEnvState {
                dir: PageDirectory::new(),
                status,
                upcall: None,
            },
        );
        id
    }

    fn resolve(&self, caller: EnvId, env: EnvId) -> Result<EnvId, SysError> {
        let id = if env.is_self() { caller } else { env };
        match self.envs.get(&id) {
            Some(state) if state.status != EnvStatus::Free => Ok(id),
            _ => Err(SysError::BadEnv),
        }
    }

    fn env_mut(&mut self, id: EnvId) -> &mut FakeEnvState {
        self.envs.get_mut(&id).unwrap()
    }

    fn install(&mut self, id: EnvId, va: VirtualAddress, frame: FrameNumber, perm: PageFlags) {
        self.memory.get(frame).unwrap();
        if let Some(old) = self.env_mut(id).dir.map(va, frame, perm) {
            self.memory.put(old).unwrap();
        }
    }
}

pub struct FakePlatform {
    state: RefCell<State>,
    root: EnvId,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::with_frames(256)
    }

    pub fn with_frames(frames: usize) -> Self {
        let mut state = State {
            memory: PhysicalMemory::new(frames),
            envs: BTreeMap::new(),
            pending: BTreeMap::new(),
            next_id: 0x1000,
            calls: Vec::new(),
            failure: None,
        };
        let root = state.add_env(EnvStatus::Running);
        Self {
            state: RefCell::new(state),
            root,
        }
    }

    pub fn root(&self) -> EnvId {
        self.root
    }

    /// Adds an environment outside the syscall interface.
    pub fn add_env(&self) -> EnvId {
        self.state.borrow_mut().add_env(EnvStatus::NotRunnable)
    }

    pub fn env(&self, id: EnvId) -> FakeEnv<'_> {
        FakeEnv { platform: self, id }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Maps a fresh frame starting with `contents`, bypassing the call log.
    pub fn map_fresh(&self, env: EnvId, va: VirtualAddress, flags: PageFlags, contents: &[u8]) {
        let mut state = self.state.borrow_mut();
        let frame = state.memory.allocate().unwrap();
        state.memory.frame_bytes_mut(frame).unwrap()[..contents.len()].copy_from_slice(contents);
        state.install(env, va, frame, flags);
    }

    pub fn set_flags(&self, env: EnvId, va: VirtualAddress, flags: PageFlags) {
        let mut state = self.state.borrow_mut();
        state
            .env_mut(env)
            .dir
            .set_flags(va, flags | PageFlags::PRESENT)
            .unwrap();
    }

    pub fn flags(&self, env: EnvId, va: VirtualAddress) -> Option<PageFlags> {
        let state = self.state.borrow();
        state.envs[&env].dir.translate(va).map(|mapping| mapping.flags)
    }

    pub fn frame(&self, env: EnvId, va: VirtualAddress) -> Option<FrameNumber> {
        let state = self.state.borrow();
        state.envs[&env].dir.translate(va).map(|mapping| mapping.frame)
    }

    pub fn bytes(&self, env: EnvId, va: VirtualAddress) -> Vec<u8> {
        let frame = self.frame(env, va).unwrap();
        self.state.borrow().memory.frame_bytes(frame).unwrap().to_vec()
    }

    pub fn upcall(&self, env: EnvId) -> Option<UpcallEntry> {
        self.state.borrow().envs[&env].upcall
    }

    pub fn status(&self, env: EnvId) -> Option<EnvStatus> {
        self.state.borrow().envs.get(&env).map(|state| state.status)
    }

    /// Allocates every remaining frame.
    pub fn exhaust_memory(&self) {
        let mut state = self.state.borrow_mut();
        while let Ok(frame) = state.memory.allocate() {
            state.memory.get(frame).unwrap();
        }
    }

    /// Makes every syscall matching `pred` fail with `err` after it is logged.
    pub fn fail_when<P>(&self, pred: P, err: SysError)
    where
        P: Fn(&Call) -> bool + 'static,
    {
        self.state.borrow_mut().failure = Some((Box::new(pred), err));
    }

    /// Makes `create_context` fail as if the environment table were full.
    pub fn fail_create(&self) {
        self.fail_when(|call| matches!(call, Call::CreateContext), SysError::NoFreeEnv);
    }

    /// Runs the pending entry of a created environment to completion.
    pub fn run_child(&self, child: EnvId) {
        let entry = self.state.borrow_mut().pending.remove(&child).unwrap();
        self.state.borrow_mut().env_mut(child).status = EnvStatus::Running;
        entry(&self.env(child));
    }
}

/// The view of one environment onto the fake platform.
pub struct FakeEnv<'a> {
    platform: &'a FakePlatform,
    id: EnvId,
}

impl FakeEnv<'_> {
    fn record(&self, call: Call) -> Result<(), SysError> {
        let mut state = self.platform.state.borrow_mut();
        let injected = match &state.failure {
            Some((pred, err)) if pred(&call) => Some(*err),
            _ => None,
        };
        state.calls.push(call);
        injected.map_or(Ok(()), Err)
    }

    /// Returns the frame backing `va` for the given access, faulting into the upcall at
    /// most once.
    fn frame_for(&self, va: VirtualAddress, write: bool) -> Result<FrameNumber, MemoryError> {
        let mut faulted = false;
        loop {
            let (mapping, upcall) = {
                let state = self.platform.state.borrow();
                let env = &state.envs[&self.id];
                (env.dir.translate(va), env.upcall)
            };
            if let Some(mapping) = mapping {
                if !write || mapping.flags.is_writable() {
                    return Ok(mapping.frame);
                }
            }

            let upcall = match upcall {
                Some(upcall) if !faulted => upcall,
                _ => return Err(MemoryError::Destroyed),
            };
            faulted = true;

            let mut err = FaultCode::USER;
            err.set(FaultCode::PRESENT, mapping.is_some());
            err.set(FaultCode::WRITE, write);
            let utf = UTrapframe {
                fault_va: va,
                err,
                regs: Trapframe::default(),
            };
            upcall(self, &utf).map_err(|_| MemoryError::Destroyed)?;
        }
    }

    fn chunks(va: VirtualAddress, len: usize) -> impl Iterator<Item = (VirtualAddress, usize, usize)> {
        let mut done = 0;
        core::iter::from_fn(move || {
            if done >= len {
                return None;
            }
            let addr = va + done as u32;
            let n = (PAGE_SIZE - addr.page_offset()).min(len - done);
            let chunk = (addr, done, n);
            done += n;
            Some(chunk)
        })
    }
}

impl Syscalls for FakeEnv<'_> {
    fn current_context_id(&self) -> EnvId {
        self.id
    }

    fn create_context(&self, entry: ChildEntry) -> Result<EnvId, SysError> {
        self.record(Call::CreateContext)?;
        let mut state = self.platform.state.borrow_mut();
        let id = state.add_env(EnvStatus::NotRunnable);
        state.pending.insert(id, entry);
        Ok(id)
    }

    fn alloc_page(&self, env: EnvId, va: VirtualAddress, perm: PageFlags) -> Result<(), SysError> {
        self.record(Call::AllocPage { env, va, perm })?;
        let mut state = self.platform.state.borrow_mut();
        let target = state.resolve(self.id, env)?;
        let frame = state.memory.allocate().map_err(|_| SysError::NoMemory)?;
        state.install(target, va, frame, perm);
        Ok(())
    }

    fn map_page(
        &self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        self.record(Call::MapPage {
            dst_env,
            dst_va,
            perm,
        })?;
        let mut state = self.platform.state.borrow_mut();
        let src = state.resolve(self.id, src_env)?;
        let dst = state.resolve(self.id, dst_env)?;
        let mapping = state.envs[&src]
            .dir
            .translate(src_va)
            .ok_or(SysError::Invalid)?;
        if perm.is_writable() && !mapping.flags.is_writable() {
            return Err(SysError::Invalid);
        }
        state.install(dst, dst_va, mapping.frame, perm);
        Ok(())
    }

    fn unmap_page(&self, env: EnvId, va: VirtualAddress) -> Result<(), SysError> {
        self.record(Call::UnmapPage { env, va })?;
        let mut state = self.platform.state.borrow_mut();
        let target = state.resolve(self.id, env)?;
        if let Some(frame) = state.env_mut(target).dir.unmap(va) {
            state.memory.put(frame).unwrap();
        }
        Ok(())
    }

    fn set_fault_upcall(&self, env: EnvId, upcall: UpcallEntry) -> Result<(), SysError> {
        self.record(Call::SetUpcall { env })?;
        let mut state = self.platform.state.borrow_mut();
        let target = state.resolve(self.id, env)?;
        state.env_mut(target).upcall = Some(upcall);
        Ok(())
    }

    fn set_status(&self, env: EnvId, status: EnvStatus) -> Result<(), SysError> {
        self.record(Call::SetStatus { env, status })?;
        let mut state = self.platform.state.borrow_mut();
        let target = state.resolve(self.id, env)?;
        state.env_mut(target).status = status;
        Ok(())
    }

    fn destroy(&self, env: EnvId) -> Result<(), SysError> {
        self.record(Call::Destroy { env })?;
        let mut state = self.platform.state.borrow_mut();
        let target = state.resolve(self.id, env)?;
        let frames = state.env_mut(target).dir.clear();
        for frame in frames {
            state.memory.put(frame).unwrap();
        }
        let target = state.env_mut(target);
        target.status = EnvStatus::Free;
        target.upcall = None;
        Ok(())
    }

    fn cputs(&self, s: &str) {
        print!("{}", s);
    }
}

impl UserMemory for FakeEnv<'_> {
    fn read(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), MemoryError> {
        for (addr, done, n) in Self::chunks(va, buf.len()) {
            let frame = self.frame_for(addr, false)?;
            let state = self.platform.state.borrow();
            let bytes = state.memory.frame_bytes(frame).unwrap();
            let offset = addr.page_offset();
            buf[done..done + n].copy_from_slice(&bytes[offset..offset + n]);
        }
        Ok(())
    }

    fn write(&self, va: VirtualAddress, data: &[u8]) -> Result<(), MemoryError> {
        for (addr, done, n) in Self::chunks(va, data.len()) {
            let frame = self.frame_for(addr, true)?;
            let mut state = self.platform.state.borrow_mut();
            let bytes = state.memory.frame_bytes_mut(frame).unwrap();
            let offset = addr.page_offset();
            bytes[offset..offset + n].copy_from_slice(&data[done..done + n]);
        }
        Ok(())
    }
}

impl PageTableWindow for FakeEnv<'_> {
    fn pde(&self, va: VirtualAddress) -> mmu::PageEntry {
        self.platform.state.borrow().envs[&self.id].dir.pde(va)
    }

    fn pte(&self, va: VirtualAddress) -> mmu::PageEntry {
        self.platform.state.borrow().envs[&self.id].dir.pte(va)
    }
}
