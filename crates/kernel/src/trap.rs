//! The emulated MMU and page fault delivery.
//!
//! User loads and stores are checked against the environment's page tables one page at
//! a time. A violation becomes a page fault: the kernel pushes a [`UTrapframe`] on the
//! environment's exception stack, runs its upcall, and retries the access.

use mmu::{
    FrameNumber, PageFlags, VirtualAddress,
    layout::{UXSTACK, UXSTACKTOP},
};
use ulib::{EnvId, FaultCode, MemoryError, UTrapframe, UpcallEntry, UserMemory};

use crate::{
    kernel::{KernelState, page_chunks},
    syscall::UserContext,
};

/// Gap left below a record when a fault is delivered while an upcall is running.
const NESTED_GAP: u32 = 4;

/// What the MMU decided about one access.
enum Access {
    Granted(FrameNumber),
    Fault(Delivery),
}

/// A fault that is ready to be handed to the upcall.
struct Delivery {
    upcall: UpcallEntry,
    utf: UTrapframe,
    /// Exception stack pointer to restore once the upcall returns.
    outer: Option<VirtualAddress>,
}

impl KernelState {
    /// Checks one access by `id` and, if it faults, prepares delivery to the upcall.
    ///
    /// Returns `Err` if the environment is gone or had to be destroyed: it has no upcall,
    /// its exception stack is unusable or exhausted, or the access faulted again right
    /// after a successful upcall.
    fn check_access(
        &mut self,
        id: EnvId,
        va: VirtualAddress,
        write: bool,
        retry: bool,
    ) -> Result<Access, MemoryError> {
        let env = self
            .envs
            .get(id)
            .filter(|env| env.is_alive())
            .ok_or(MemoryError::Destroyed)?;

        let mapping = env.dir.translate(va);
        if let Some(mapping) = mapping {
            if mapping.flags.is_user() && (!write || mapping.flags.is_writable()) {
                return Ok(Access::Granted(mapping.frame));
            }
        }

        let mut err = FaultCode::USER;
        err.set(FaultCode::PRESENT, mapping.is_some());
        err.set(FaultCode::WRITE, write);
        let utf = UTrapframe {
            fault_va: va,
            err,
            regs: env.tf,
        };

        if retry {
            log::error!(
                "[{}] repeated fault at {} ({:?}) after upcall",
                id,
                va,
                err
            );
            return Err(self.kill(id));
        }
        let Some(upcall) = env.upcall else {
            log::error!(
                "[{}] user fault va {} ip {:08x} ({:?})",
                id,
                va,
                env.tf.eip,
                err
            );
            return Err(self.kill(id));
        };

        // Nested faults go below the record in use, past a scratch word.
        let outer = env.xstack;
        let top = match outer {
            Some(sp) => sp.as_u32() - NESTED_GAP,
            None => UXSTACKTOP.as_u32(),
        };
        let record = top
            .checked_sub(UTrapframe::SIZE as u32)
            .filter(|sp| *sp >= UXSTACK.as_u32())
            .map(VirtualAddress::new);
        let Some(record) = record else {
            log::error!("[{}] exception stack overflow at fault {}", id, va);
            return Err(self.kill(id));
        };

        let stack_ok = env
            .dir
            .translate(UXSTACK)
            .is_some_and(|stack| stack.flags.contains(PageFlags::USER_WRITE) && !stack.flags.is_cow());
        if !stack_ok {
            log::error!("[{}] no usable exception stack for fault {}", id, va);
            return Err(self.kill(id));
        }

        if self.poke(id, record, &utf.to_bytes()).is_err() {
            return Err(self.kill(id));
        }
        if let Some(env) = self.envs.get_mut(id) {
            env.xstack = Some(record);
            env.faults += 1;
        }
        log::trace!("[{}] page fault at {} ({:?})", id, va, err);

        Ok(Access::Fault(Delivery {
            upcall,
            utf,
            outer,
        }))
    }

    fn kill(&mut self, id: EnvId) -> MemoryError {
        log::warn!("[{}] destroyed by unhandled fault", id);
        self.destroy_env(id);
        MemoryError::Destroyed
    }
}

impl UserContext<'_> {
    /// Resolves the frame behind `va` for an access, delivering faults until the access
    /// is granted.
    fn access(&self, va: VirtualAddress, write: bool) -> Result<FrameNumber, MemoryError> {
        let mut retry = false;
        loop {
            let delivery = match self
                .kernel
                .state
                .lock()
                .check_access(self.id, va, write, retry)?
            {
                Access::Granted(frame) => return Ok(frame),
                Access::Fault(delivery) => delivery,
            };

            let result = (delivery.upcall)(self, &delivery.utf);

            let mut state = self.kernel.state.lock();
            if let Some(env) = state.envs.get_mut(self.id) {
                env.xstack = delivery.outer;
            }
            if let Err(err) = result {
                log::error!("[{}] {}", self.id, err);
                return Err(state.kill(self.id));
            }
            retry = true;
        }
    }
}

impl UserMemory for UserContext<'_> {
    fn read(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), MemoryError> {
        for (addr, done, len) in page_chunks(va, buf.len()) {
            let frame = self.access(addr, false)?;
            let state = self.kernel.state.lock();
            let bytes = state
                .memory
                .frame_bytes(frame)
                .map_err(|_| MemoryError::Destroyed)?;
            let offset = addr.page_offset();
            buf[done..done + len].copy_from_slice(&bytes[offset..offset + len]);
        }
        Ok(())
    }

    fn write(&self, va: VirtualAddress, data: &[u8]) -> Result<(), MemoryError> {
        for (addr, done, len) in page_chunks(va, data.len()) {
            let frame = self.access(addr, true)?;
            let mut state = self.kernel.state.lock();
            let bytes = state
                .memory
                .frame_bytes_mut(frame)
                .map_err(|_| MemoryError::Destroyed)?;
            let offset = addr.page_offset();
            bytes[offset..offset + len].copy_from_slice(&data[done..done + len]);
        }
        Ok(())
    }
}
