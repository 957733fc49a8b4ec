//! Built-in monitor commands.

use mmu::{
    PAGE_SIZE, PageEntry, PageFlags, PhysicalAddress, VirtualAddress,
    layout::{PFTEMP, ULIB_DATA, USTACKTOP, UTEXT, UTOP, UXSTACKTOP},
};
use ulib::EnvId;

use super::{Command, MonitorContext, outln, page_bounds, parse_hex, walk};
use crate::unwind::{EnvStack, FrameWalker};

const WORD: u32 = 4;

fn selected_env(ctx: &mut MonitorContext<'_>) -> Option<EnvId> {
    if ctx.env.is_none() {
        outln!(ctx, "No environment selected");
    }
    ctx.env
}

fn print_mapping(ctx: &mut MonitorContext<'_>, env: EnvId, va: u32) {
    let entry = ctx
        .kernel
        .page_entry(env, VirtualAddress::new(va))
        .unwrap_or_default();
    if entry == PageEntry::default() {
        outln!(ctx, "{:08x}\tnot mapped yet", va);
        return;
    }
    let flags = entry.flags();
    let bit = |flag: PageFlags| u8::from(flags.contains(flag));
    outln!(
        ctx,
        "{:08x}\t{:08x}\tP: {}, W: {}, U: {}, COW: {}",
        va,
        entry.as_u32() & !(PAGE_SIZE as u32 - 1),
        bit(PageFlags::PRESENT),
        bit(PageFlags::WRITABLE),
        bit(PageFlags::USER),
        bit(PageFlags::COPY_ON_WRITE)
    );
}

/// `help`: lists the commands.
pub struct Help {
    listing: Vec<(&'static str, &'static str)>,
}

impl Help {
    pub const NAME: &'static str = "help";
    pub const DESCRIPTION: &'static str = "Display this list of commands";

    /// `listing` is fixed when the monitor is built.
    pub fn new(listing: Vec<(&'static str, &'static str)>) -> Self {
        Self { listing }
    }
}

impl Command for Help {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn execute(&self, _args: &[&str], ctx: &mut MonitorContext<'_>) -> i32 {
        for (name, description) in &self.listing {
            outln!(ctx, "{} - {}", name, description);
        }
        0
    }
}

/// `kerninfo`: the user address space layout and resource usage.
pub struct KernInfo;

impl Command for KernInfo {
    fn name(&self) -> &'static str {
        "kerninfo"
    }

    fn description(&self) -> &'static str {
        "Display information about the kernel"
    }

    fn execute(&self, _args: &[&str], ctx: &mut MonitorContext<'_>) -> i32 {
        outln!(ctx, "User address space layout:");
        for (name, addr) in [
            ("UTOP", UTOP),
            ("UXSTACKTOP", UXSTACKTOP),
            ("USTACKTOP", USTACKTOP),
            ("ULIB_DATA", ULIB_DATA),
            ("PFTEMP", PFTEMP),
            ("UTEXT", UTEXT),
        ] {
            outln!(ctx, "  {:<12}{:08x}", name, addr.as_u32());
        }

        let (total, allocated, free) = ctx.kernel.frame_usage();
        outln!(
            ctx,
            "Physical memory: {} frames ({}KB), {} allocated, {} free",
            total,
            total * PAGE_SIZE / 1024,
            allocated,
            free
        );
        let (envs, capacity) = ctx.kernel.env_usage();
        outln!(ctx, "Environments: {} of {} in use", envs, capacity);
        0
    }
}

/// `backtrace`: walks the inspected environment's frame pointer chain.
pub struct Backtrace;

impl Command for Backtrace {
    fn name(&self) -> &'static str {
        "backtrace"
    }

    fn description(&self) -> &'static str {
        "Display the call stack of the inspected environment"
    }

    fn execute(&self, _args: &[&str], ctx: &mut MonitorContext<'_>) -> i32 {
        let Some(env) = selected_env(ctx) else {
            return 0;
        };
        let Some(tf) = ctx.tf.or_else(|| ctx.kernel.trapframe(env)) else {
            outln!(ctx, "Environment {} is gone", env);
            return 0;
        };

        let kernel = ctx.kernel;
        let stack = EnvStack::new(kernel, env);
        for frame in FrameWalker::new(&stack, VirtualAddress::new(tf.ebp)) {
            let [a0, a1, a2, a3, a4] = frame.args;
            ctx.print(format_args!(
                "ebp {:08x}  eip {:08x}  args {:08x} {:08x} {:08x} {:08x} {:08x}",
                frame.frame_pointer.as_u32(),
                frame.return_address.as_u32(),
                a0,
                a1,
                a2,
                a3,
                a4
            ));
            if let Some(symbol) = ctx
                .symbols
                .and_then(|symbols| symbols.symbolize(frame.return_address))
            {
                ctx.print(format_args!(
                    "  {}:{}: {}+{}",
                    symbol.file, symbol.line, symbol.function, symbol.offset
                ));
            }
            outln!(ctx);
        }
        0
    }
}

/// `showmappings <start> <end>`: page table entries of a range of pages.
pub struct ShowMappings;

impl Command for ShowMappings {
    fn name(&self) -> &'static str {
        "showmappings"
    }

    fn description(&self) -> &'static str {
        "Display the mappings of an address range"
    }

    fn execute(&self, args: &[&str], ctx: &mut MonitorContext<'_>) -> i32 {
        let range = match args {
            [_, start, end] => parse_hex(start).zip(parse_hex(end)),
            _ => None,
        };
        let Some((start, end)) = range else {
            outln!(ctx, "Usage: showmappings <start> <end>");
            return 0;
        };
        let Some(env) = selected_env(ctx) else {
            return 0;
        };

        let (start, end) = page_bounds(start, end);
        outln!(ctx, "virtual addr\tphysical addr\tpermissions");
        for va in walk(start, end, PAGE_SIZE as u32) {
            print_mapping(ctx, env, va);
        }
        0
    }
}

/// `setperm <addr> <0|1> <P|W|U|C>`: clears or sets one permission bit of a mapping.
pub struct SetPerm;

impl Command for SetPerm {
    fn name(&self) -> &'static str {
        "setperm"
    }

    fn description(&self) -> &'static str {
        "Set or clear a permission bit of a mapping"
    }

    fn execute(&self, args: &[&str], ctx: &mut MonitorContext<'_>) -> i32 {
        let parsed = match args {
            [_, addr, set, bit] => {
                let set = match *set {
                    "0" => Some(false),
                    "1" => Some(true),
                    _ => None,
                };
                let bit = match *bit {
                    "P" => Some(PageFlags::PRESENT),
                    "W" => Some(PageFlags::WRITABLE),
                    "U" => Some(PageFlags::USER),
                    "C" => Some(PageFlags::COPY_ON_WRITE),
                    _ => None,
                };
                parse_hex(addr).zip(set).zip(bit)
            }
            _ => None,
        };
        let Some(((addr, set), bit)) = parsed else {
            outln!(ctx, "Usage: setperm <addr> <0|1> <P|W|U|C>");
            return 0;
        };
        let Some(env) = selected_env(ctx) else {
            return 0;
        };

        let va = VirtualAddress::new(addr).align_down(PAGE_SIZE);
        let entry = ctx.kernel.page_entry(env, va).unwrap_or_default();
        if entry == PageEntry::default() {
            outln!(ctx, "Mapping is not available");
            return 0;
        }

        let mut flags = entry.flags();
        flags.set(bit, set);
        if !flags.is_consistent() {
            outln!(ctx, "A mapping cannot be both writable and copy-on-write");
            return 0;
        }

        outln!(ctx, "old:");
        print_mapping(ctx, env, va.as_u32());
        if let Err(err) = ctx.kernel.set_page_flags(env, va, flags) {
            outln!(ctx, "Cannot update mapping: {:?}", err);
            return 0;
        }
        outln!(ctx, "new:");
        print_mapping(ctx, env, va.as_u32());
        0
    }
}

/// `dump <-p|-v> <start> <end>`: words of physical or virtual memory.
pub struct Dump;

impl Command for Dump {
    fn name(&self) -> &'static str {
        "dump"
    }

    fn description(&self) -> &'static str {
        "Dump the words of a physical or virtual address range"
    }

    fn execute(&self, args: &[&str], ctx: &mut MonitorContext<'_>) -> i32 {
        let parsed = match args {
            [_, kind @ ("-p" | "-v"), start, end] => parse_hex(start)
                .zip(parse_hex(end))
                .map(|range| (*kind == "-v", range)),
            _ => None,
        };
        let Some((virtual_, (start, end))) = parsed else {
            outln!(ctx, "Usage: dump <-p|-v> <start> <end>");
            return 0;
        };

        if !virtual_ {
            for pa in walk(start, end, WORD) {
                let mut word = [0u8; 4];
                match ctx.kernel.read_physical(PhysicalAddress::new(pa), &mut word) {
                    Ok(()) => outln!(ctx, "pa {:08x} : {:08x}", pa, u32::from_le_bytes(word)),
                    Err(_) => outln!(ctx, "pa {:08x} : not accessible", pa),
                }
            }
            return 0;
        }

        let Some(env) = selected_env(ctx) else {
            return 0;
        };
        for va in walk(start, end, WORD) {
            let mut word = [0u8; 4];
            match ctx.kernel.peek(env, VirtualAddress::new(va), &mut word) {
                Ok(()) => outln!(ctx, "va {:08x} : {:08x}", va, u32::from_le_bytes(word)),
                Err(_) => outln!(ctx, "va {:08x} : not mapped yet", va),
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Kernel, KernelConfig, monitor::Monitor};
    use ulib::{Syscalls, Trapframe};

    const VA: u32 = 0x0020_0000;

    struct Session {
        kernel: Kernel,
        env: EnvId,
    }

    impl Session {
        fn new() -> Self {
            let kernel = Kernel::new(KernelConfig {
                physical_frames: 32,
                max_envs: 4,
                ..KernelConfig::default()
            });
            let env = kernel.spawn(|_| {}).unwrap();
            Self { kernel, env }
        }

        fn run(&self, line: &str) -> (i32, String) {
            self.run_with(line, None)
        }

        fn run_with(&self, line: &str, tf: Option<Trapframe>) -> (i32, String) {
            let mut out = String::new();
            let mut ctx = MonitorContext {
                kernel: &self.kernel,
                env: Some(self.env),
                tf,
                symbols: None,
                out: &mut out,
            };
            let code = Monitor::new().run_command(line, &mut ctx);
            (code, out)
        }

        fn map(&self, va: u32, flags: PageFlags) {
            self.kernel
                .context(self.env)
                .alloc_page(EnvId::SELF, VirtualAddress::new(va), flags)
                .unwrap();
        }
    }

    #[test]
    fn showmappings_single_page() {
        let session = Session::new();
        let (code, out) = session.run("showmappings 0x1000 0x1000");
        assert_eq!(code, 0);
        let pages: Vec<_> = out.lines().skip(1).collect();
        assert_eq!(pages, vec!["00001000\tnot mapped yet"]);
    }

    #[test]
    fn showmappings_rounds_outward_and_walks_down() {
        let session = Session::new();
        session.map(VA, PageFlags::USER_WRITE);

        let (_, out) = session.run("showmappings 200010 200fff");
        let vas: Vec<_> = out.lines().skip(1).map(|line| &line[..8]).collect();
        assert_eq!(vas, vec!["00200000", "00201000"]);
        assert!(out.contains("P: 1, W: 1, U: 1, COW: 0"));

        let (_, out) = session.run("showmappings 0x201fff 0x200000");
        let vas: Vec<_> = out.lines().skip(1).map(|line| &line[..8]).collect();
        assert_eq!(vas, vec!["00202000", "00201000", "00200000"]);
    }

    #[test]
    fn malformed_arguments_print_usage() {
        let session = Session::new();
        for line in [
            "showmappings 0x1000",
            "showmappings 0xqq 0x1000",
            "setperm 0x200000 2 W",
            "setperm 0x200000 1 X",
            "dump -x 0 4",
            "dump -v 0",
        ] {
            let (code, out) = session.run(line);
            assert_eq!(code, 0, "{}", line);
            assert!(out.starts_with("Usage: "), "{}: {}", line, out);
        }
    }

    #[test]
    fn setperm_clears_and_sets_bits() {
        let session = Session::new();
        session.map(VA, PageFlags::USER_WRITE);
        let va = VirtualAddress::new(VA);

        assert_eq!(session.run("setperm 0x200123 0 W").0, 0);
        assert_eq!(
            session.kernel.translate(session.env, va).unwrap().flags,
            PageFlags::USER_READ
        );

        session.run("setperm 0x200000 1 C");
        assert_eq!(
            session.kernel.translate(session.env, va).unwrap().flags,
            PageFlags::USER_COW
        );
    }

    #[test]
    fn setperm_refuses_writable_cow() {
        let session = Session::new();
        session.map(VA, PageFlags::USER_COW);

        let (code, out) = session.run("setperm 0x200000 1 W");
        assert_eq!(code, 0);
        assert!(out.contains("cannot be both writable and copy-on-write"));
        assert_eq!(
            session
                .kernel
                .translate(session.env, VirtualAddress::new(VA))
                .unwrap()
                .flags,
            PageFlags::USER_COW
        );
    }

    #[test]
    fn setperm_on_unmapped_page() {
        let session = Session::new();
        assert_eq!(
            session.run("setperm 0x200000 1 W"),
            (0, "Mapping is not available\n".to_string())
        );
    }

    #[test]
    fn dump_virtual_words() {
        let session = Session::new();
        session.map(VA, PageFlags::USER_WRITE);
        ulib::UserMemory::write(
            &session.kernel.context(session.env),
            VirtualAddress::new(VA),
            &0xdead_beef_u32.to_le_bytes(),
        )
        .unwrap();

        let (_, out) = session.run("dump -v 0x200000 0x200007");
        assert_eq!(out, "va 00200000 : deadbeef\nva 00200004 : 00000000\n");
    }

    #[test]
    fn dump_unmapped_virtual_address() {
        let session = Session::new();
        assert_eq!(
            session.run("dump -v 0x200000 0x200000"),
            (0, "va 00200000 : not mapped yet\n".to_string())
        );
    }

    #[test]
    fn dump_physical_out_of_range() {
        let session = Session::new();
        let end = 32 * PAGE_SIZE as u32;
        let (code, out) = session.run(&format!("dump -p {:x} {:x}", end - 4, end));
        assert_eq!(code, 0);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&format!("pa {:08x} : ", end - 4)));
        assert_eq!(lines[1], format!("pa {:08x} : not accessible", end));
    }

    #[test]
    fn backtrace_of_spawned_env_is_one_frame() {
        let session = Session::new();
        let (code, out) = session.run("backtrace");
        assert_eq!(code, 0);
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains(&format!("eip {:08x}", UTEXT.as_u32())));
    }

    #[test]
    fn backtrace_starts_from_given_registers() {
        let session = Session::new();
        let tf = Trapframe {
            eip: 0,
            esp: 0,
            ebp: 0,
        };
        assert_eq!(session.run_with("backtrace", Some(tf)), (0, String::new()));
    }

    #[test]
    fn commands_without_environment() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut out = String::new();
        let mut ctx = MonitorContext {
            kernel: &kernel,
            env: None,
            tf: None,
            symbols: None,
            out: &mut out,
        };
        assert_eq!(Monitor::new().run_command("showmappings 0 0", &mut ctx), 0);
        assert_eq!(out, "No environment selected\n");
    }

    #[test]
    fn kerninfo_reports_usage() {
        let session = Session::new();
        let (code, out) = session.run("kerninfo");
        assert_eq!(code, 0);
        assert!(out.contains(&format!("UXSTACKTOP  {:08x}", UXSTACKTOP.as_u32())));
        assert!(out.contains("Physical memory: 32 frames (128KB)"));
        assert!(out.contains("Environments: 1 of 4 in use"));
    }
}
