//! Frame-pointer stack walking over environment memory.
//!
//! Every frame on an emulated user stack starts with the caller's saved frame pointer,
//! followed by the return address and the caller-pushed arguments:
//!
//! ```text
//!   fp + 28  -> +------------------+
//!               |  args[0..5]      |
//!   fp + 8   -> +------------------+
//!               |  return address  |
//!   fp + 4   -> +------------------+
//!               |  saved fp        |
//!   fp       -> +------------------+
//! ```

use mmu::VirtualAddress;
use symbolicator::SymbolTable;
use ulib::EnvId;

use crate::kernel::Kernel;

/// Number of argument slots read from each frame.
pub const FRAME_ARGS: usize = 5;

/// Word-sized reads from the memory a stack lives in.
pub trait StackMemory {
    /// Reads the little-endian word at `addr`, or `None` if it is not mapped.
    fn read_word(&self, addr: VirtualAddress) -> Option<u32>;
}

/// One stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub frame_pointer: VirtualAddress,
    pub saved_frame_pointer: VirtualAddress,
    pub return_address: VirtualAddress,
    pub args: [u32; FRAME_ARGS],
}

impl StackFrame {
    /// Reads the frame at `fp`.
    pub fn read<M: ?Sized + StackMemory>(memory: &M, fp: VirtualAddress) -> Option<Self> {
        let word = |offset: u32| memory.read_word(fp.checked_add(offset)?);

        let mut args = [0u32; FRAME_ARGS];
        for (i, arg) in args.iter_mut().enumerate() {
            *arg = word(8 + 4 * i as u32)?;
        }
        Some(Self {
            frame_pointer: fp,
            saved_frame_pointer: VirtualAddress::new(word(0)?),
            return_address: VirtualAddress::new(word(4)?),
            args,
        })
    }
}

/// Iterates over the frames of a stack, innermost first.
///
/// The walk ends at a zero frame pointer. It also ends, with a warning, at a frame that
/// cannot be read or whose saved frame pointer does not point further up the stack.
pub struct FrameWalker<'a, M: ?Sized + StackMemory> {
    memory: &'a M,
    next: Option<VirtualAddress>,
}

impl<'a, M: ?Sized + StackMemory> FrameWalker<'a, M> {
    pub fn new(memory: &'a M, fp: VirtualAddress) -> Self {
        Self {
            memory,
            next: (fp.as_u32() != 0).then_some(fp),
        }
    }
}

impl<M: ?Sized + StackMemory> Iterator for FrameWalker<'_, M> {
    type Item = StackFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let fp = self.next.take()?;
        let Some(frame) = StackFrame::read(self.memory, fp) else {
            log::warn!("unreadable stack frame at {}", fp);
            return None;
        };

        let saved = frame.saved_frame_pointer;
        if saved.as_u32() != 0 {
            if saved > fp {
                self.next = Some(saved);
            } else {
                log::warn!("stack frame link {} -> {} does not go up", fp, saved);
            }
        }
        Some(frame)
    }
}

/// Stack memory of one environment, read by the kernel without faulting.
pub struct EnvStack<'k> {
    kernel: &'k Kernel,
    env: EnvId,
}

impl<'k> EnvStack<'k> {
    pub fn new(kernel: &'k Kernel, env: EnvId) -> Self {
        Self { kernel, env }
    }
}

impl StackMemory for EnvStack<'_> {
    fn read_word(&self, addr: VirtualAddress) -> Option<u32> {
        let mut word = [0u8; 4];
        self.kernel.peek(self.env, addr, &mut word).ok()?;
        Some(u32::from_le_bytes(word))
    }
}

/// Source location of a code address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol<'a> {
    pub file: &'a str,
    pub line: usize,
    /// Function name without any trailing annotation.
    pub function: &'a str,
    /// Byte offset of the address from the start of the function.
    pub offset: u32,
}

/// Maps code addresses to source locations.
pub trait Symbolizer {
    fn symbolize(&self, addr: VirtualAddress) -> Option<Symbol<'_>>;
}

impl Symbolizer for SymbolTable<'_> {
    fn symbolize(&self, addr: VirtualAddress) -> Option<Symbol<'_>> {
        let info = self.lookup(addr.as_u32() as u64)?;
        Some(Symbol {
            file: info.source_file,
            line: info.line,
            function: strip_annotation(info.function_name),
            offset: (addr.as_u32() as u64).saturating_sub(info.function_address) as u32,
        })
    }
}

/// Drops a trailing `:annotation` from a function name, as in `pgfault:F(0,1)`.
///
/// A `::` path separator is not an annotation delimiter.
pub fn strip_annotation(name: &str) -> &str {
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            if bytes.get(i + 1) == Some(&b':') {
                i += 2;
                continue;
            }
            return &name[..i];
        }
        i += 1;
    }
    name
}
