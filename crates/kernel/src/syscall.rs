//! System call implementation.
//!
//! Every call names its target environments by id; [`EnvId::SELF`] is the caller. Calls
//! that change an environment require the target to be the caller or one of its
//! children.

use mmu::{PAGE_SIZE, PageEntry, PageFlags, VirtualAddress, layout::is_user_range};
use ulib::{ChildEntry, EnvId, EnvStatus, PageTableWindow, SysError, Syscalls, UpcallEntry};

use crate::kernel::{Kernel, KernelState};

/// An environment's handle on the kernel. Entries and upcalls receive one as their
/// `&dyn Environment`.
pub struct UserContext<'k> {
    pub(crate) kernel: &'k Kernel,
    pub(crate) id: EnvId,
}

impl<'k> UserContext<'k> {
    pub(crate) fn new(kernel: &'k Kernel, id: EnvId) -> Self {
        Self { kernel, id }
    }

    /// Id of the environment this context belongs to.
    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }
}

fn check_va(va: VirtualAddress) -> Result<(), SysError> {
    if !va.is_page_aligned() || !is_user_range(va, PAGE_SIZE) {
        return Err(SysError::Invalid);
    }
    Ok(())
}

fn check_perm(perm: PageFlags) -> Result<(), SysError> {
    if !perm.contains(PageFlags::USER_REQUIRED)
        || !PageFlags::SYSCALL_ALLOWED.contains(perm)
        || !perm.is_consistent()
    {
        return Err(SysError::Invalid);
    }
    Ok(())
}

impl KernelState {
    /// Resolves `target` on behalf of `caller`. With `check_perm`, the target must be the
    /// caller itself or one of its children.
    pub(crate) fn resolve(
        &self,
        caller: EnvId,
        target: EnvId,
        check_perm: bool,
    ) -> Result<EnvId, SysError> {
        self.envs
            .get(caller)
            .filter(|env| env.is_alive())
            .ok_or(SysError::BadEnv)?;

        let id = if target.is_self() { caller } else { target };
        let env = self
            .envs
            .get(id)
            .filter(|env| env.is_alive())
            .ok_or(SysError::BadEnv)?;
        if check_perm && id != caller && env.parent != caller {
            return Err(SysError::BadEnv);
        }
        Ok(id)
    }

    fn sys_exofork(&mut self, caller: EnvId, entry: ChildEntry) -> Result<EnvId, SysError> {
        let tf = self
            .envs
            .get(caller)
            .filter(|env| env.is_alive())
            .ok_or(SysError::BadEnv)?
            .tf;
        let id = self.envs.alloc(caller, tf).ok_or(SysError::NoFreeEnv)?;
        if let Some(env) = self.envs.get_mut(id) {
            env.entry = Some(entry);
        }
        log::trace!("[{}] new env {}", caller, id);
        Ok(id)
    }

    fn sys_page_alloc(
        &mut self,
        caller: EnvId,
        env: EnvId,
        va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        let id = self.resolve(caller, env, true)?;
        check_va(va)?;
        check_perm(perm)?;
        self.map_fresh(id, va, perm)?;
        log::trace!("[{}] page_alloc {} {} {:?}", caller, id, va, perm);
        Ok(())
    }

    fn sys_page_map(
        &mut self,
        caller: EnvId,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        let src = self.resolve(caller, src_env, true)?;
        let dst = self.resolve(caller, dst_env, true)?;
        check_va(src_va)?;
        check_va(dst_va)?;
        check_perm(perm)?;

        let mapping = self.translate(src, src_va).ok_or(SysError::Invalid)?;
        if perm.is_writable() && !mapping.flags.is_writable() {
            return Err(SysError::Invalid);
        }
        self.install(dst, dst_va, mapping.frame, perm)?;
        log::trace!(
            "[{}] page_map {} {} -> {} {} {:?}",
            caller,
            src,
            src_va,
            dst,
            dst_va,
            perm
        );
        Ok(())
    }

    fn sys_page_unmap(
        &mut self,
        caller: EnvId,
        env: EnvId,
        va: VirtualAddress,
    ) -> Result<(), SysError> {
        let id = self.resolve(caller, env, true)?;
        check_va(va)?;
        let Some(env) = self.envs.get_mut(id) else {
            return Err(SysError::BadEnv);
        };
        if let Some(frame) = env.dir.unmap(va) {
            if let Err(err) = self.memory.put(frame) {
                log::error!("[{}] releasing frame {:?}: {}", id, frame, err);
            }
        }
        log::trace!("[{}] page_unmap {} {}", caller, id, va);
        Ok(())
    }

    fn sys_set_pgfault_upcall(
        &mut self,
        caller: EnvId,
        env: EnvId,
        upcall: UpcallEntry,
    ) -> Result<(), SysError> {
        let id = self.resolve(caller, env, true)?;
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        env.upcall = Some(upcall);
        log::trace!("[{}] set_pgfault_upcall {}", caller, id);
        Ok(())
    }

    fn sys_env_set_status(
        &mut self,
        caller: EnvId,
        env: EnvId,
        status: EnvStatus,
    ) -> Result<(), SysError> {
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(SysError::Invalid);
        }
        let id = self.resolve(caller, env, true)?;
        let running = self.current == Some(id);
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        if !running {
            env.status = status;
        }
        log::trace!("[{}] set_status {} {:?}", caller, id, status);
        Ok(())
    }

    fn sys_env_destroy(&mut self, caller: EnvId, env: EnvId) -> Result<(), SysError> {
        let id = self.resolve(caller, env, true)?;
        if id == caller {
            log::info!("[{}] exiting gracefully", caller);
        } else {
            log::info!("[{}] destroying {}", caller, id);
        }
        self.destroy_env(id);
        log::info!("[{}] free env {}", caller, id);
        Ok(())
    }
}

impl Syscalls for UserContext<'_> {
    fn current_context_id(&self) -> EnvId {
        self.id
    }

    fn create_context(&self, entry: ChildEntry) -> Result<EnvId, SysError> {
        self.kernel.state.lock().sys_exofork(self.id, entry)
    }

    fn alloc_page(&self, env: EnvId, va: VirtualAddress, perm: PageFlags) -> Result<(), SysError> {
        self.kernel
            .state
            .lock()
            .sys_page_alloc(self.id, env, va, perm)
    }

    fn map_page(
        &self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        self.kernel
            .state
            .lock()
            .sys_page_map(self.id, src_env, src_va, dst_env, dst_va, perm)
    }

    fn unmap_page(&self, env: EnvId, va: VirtualAddress) -> Result<(), SysError> {
        self.kernel.state.lock().sys_page_unmap(self.id, env, va)
    }

    fn set_fault_upcall(&self, env: EnvId, upcall: UpcallEntry) -> Result<(), SysError> {
        self.kernel
            .state
            .lock()
            .sys_set_pgfault_upcall(self.id, env, upcall)
    }

    fn set_status(&self, env: EnvId, status: EnvStatus) -> Result<(), SysError> {
        self.kernel
            .state
            .lock()
            .sys_env_set_status(self.id, env, status)
    }

    fn destroy(&self, env: EnvId) -> Result<(), SysError> {
        self.kernel.state.lock().sys_env_destroy(self.id, env)
    }

    fn cputs(&self, s: &str) {
        self.kernel.state.lock().console.push_str(s);
    }
}

impl PageTableWindow for UserContext<'_> {
    fn pde(&self, va: VirtualAddress) -> PageEntry {
        let state = self.kernel.state.lock();
        state
            .envs
            .get(self.id)
            .map(|env| env.dir.pde(va))
            .unwrap_or_default()
    }

    fn pte(&self, va: VirtualAddress) -> PageEntry {
        let state = self.kernel.state.lock();
        state
            .envs
            .get(self.id)
            .map(|env| env.dir.pte(va.align_down(PAGE_SIZE)))
            .unwrap_or_default()
    }
}
