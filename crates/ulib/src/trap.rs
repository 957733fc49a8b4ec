//! Fault records delivered to user upcalls.

use bitflags::bitflags;

use mmu::VirtualAddress;

use crate::{error::FaultError, syscall::Environment};

bitflags! {
    /// Page fault error code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FaultCode: u32 {
        /// The page was present; the fault is a protection violation.
        const PRESENT = 1 << 0;
        /// The faulting access was a write.
        const WRITE   = 1 << 1;
        /// The access came from user mode.
        const USER    = 1 << 2;
    }
}

/// Saved register state of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trapframe {
    pub eip: u32,
    pub esp: u32,
    pub ebp: u32,
}

/// The record the kernel pushes on the exception stack before entering the upcall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UTrapframe {
    /// Exact faulting address, not rounded to a page.
    pub fault_va: VirtualAddress,
    pub err: FaultCode,
    /// Registers at the time of the fault.
    pub regs: Trapframe,
}

impl UTrapframe {
    /// Size of the record on the exception stack.
    pub const SIZE: usize = 5 * 4;

    /// Encodes the record in exception stack order: fault address, error code, then
    /// the frame pointer, instruction pointer and stack pointer.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let words = [
            self.fault_va.as_u32(),
            self.err.bits(),
            self.regs.ebp,
            self.regs.eip,
            self.regs.esp,
        ];
        let mut bytes = [0u8; Self::SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Returns true if the fault was caused by a write.
    pub fn is_write(&self) -> bool {
        self.err.contains(FaultCode::WRITE)
    }
}

/// Entry point the kernel calls when the environment takes a page fault.
///
/// An `Err` is fatal: the kernel logs it and destroys the environment.
pub type UpcallEntry = fn(&dyn Environment, &UTrapframe) -> Result<(), FaultError>;
