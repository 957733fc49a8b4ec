//! Interactive kernel monitor.
//!
//! A line-oriented shell for poking at the emulated machine: page mappings of an
//! environment, raw memory, and its call stack.

mod commands;

use std::{collections::BTreeMap, fmt, io::BufRead};

use mmu::PAGE_SIZE;
use ulib::{EnvId, Trapframe};

use crate::{kernel::Kernel, unwind::Symbolizer};

pub use commands::{Backtrace, Dump, Help, KernInfo, SetPerm, ShowMappings};

/// Size of the argument vector. One slot stays free, so a command line holds at most
/// `MAX_ARGS - 1` words.
pub const MAX_ARGS: usize = 16;

/// What a command operates on.
pub struct MonitorContext<'a> {
    pub kernel: &'a Kernel,
    /// Environment whose address space the memory commands inspect.
    pub env: Option<EnvId>,
    /// Registers `backtrace` starts from.
    pub tf: Option<Trapframe>,
    pub symbols: Option<&'a dyn Symbolizer>,
    pub out: &'a mut dyn fmt::Write,
}

impl MonitorContext<'_> {
    /// Writes to the monitor output. Output errors are not the command's problem.
    pub fn print(&mut self, args: fmt::Arguments<'_>) {
        let _ = self.out.write_fmt(args);
    }
}

/// `outln!(ctx, "...")` writes a line to the monitor output.
macro_rules! outln {
    ($ctx:expr) => {
        $ctx.print(format_args!("\n"))
    };
    ($ctx:expr, $($arg:tt)*) => {{
        $ctx.print(format_args!($($arg)*));
        $ctx.print(format_args!("\n"));
    }};
}
pub(crate) use outln;

/// A monitor command.
pub trait Command {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Runs the command. `args[0]` is the command name.
    ///
    /// Returns 0 to keep the monitor running or a negative value to leave it.
    fn execute(&self, args: &[&str], ctx: &mut MonitorContext<'_>) -> i32;
}

/// The command registry and interpreter.
pub struct Monitor {
    commands: BTreeMap<&'static str, Box<dyn Command>>,
}

impl Monitor {
    pub fn new() -> Self {
        let mut commands: BTreeMap<&'static str, Box<dyn Command>> = BTreeMap::new();
        let builtins: [Box<dyn Command>; 5] = [
            Box::new(KernInfo),
            Box::new(Backtrace),
            Box::new(ShowMappings),
            Box::new(SetPerm),
            Box::new(Dump),
        ];
        for command in builtins {
            commands.insert(command.name(), command);
        }

        let mut listing: Vec<(&'static str, &'static str)> = commands
            .values()
            .map(|command| (command.name(), command.description()))
            .collect();
        listing.push((Help::NAME, Help::DESCRIPTION));
        listing.sort();
        commands.insert(Help::NAME, Box::new(Help::new(listing)));

        Self { commands }
    }

    /// Names of all registered commands, sorted.
    pub fn command_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    /// Parses and runs one command line.
    pub fn run_command(&self, line: &str, ctx: &mut MonitorContext<'_>) -> i32 {
        let args: Vec<&str> = line.split_whitespace().collect();
        if args.len() >= MAX_ARGS {
            outln!(ctx, "Too many arguments (max {})", MAX_ARGS);
            return 0;
        }
        let Some(name) = args.first() else {
            return 0;
        };

        match self.commands.get(name) {
            Some(command) => command.execute(&args, ctx),
            None => {
                outln!(ctx, "Unknown command '{}'", name);
                0
            }
        }
    }

    /// Reads commands from `input` until a command returns a negative value or the input
    /// ends.
    pub fn run<R: BufRead>(&self, input: R, ctx: &mut MonitorContext<'_>) {
        outln!(ctx, "Welcome to the exofork kernel monitor!");
        outln!(ctx, "Type 'help' for a list of commands.");

        let mut lines = input.lines();
        loop {
            ctx.print(format_args!("K> "));
            let line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    log::error!("monitor input: {}", err);
                    break;
                }
                None => break,
            };
            if self.run_command(&line, ctx) < 0 {
                break;
            }
        }
        outln!(ctx);
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a hexadecimal number with an optional `0x` prefix.
pub(crate) fn parse_hex(arg: &str) -> Option<u32> {
    let digits = arg
        .strip_prefix("0x")
        .or_else(|| arg.strip_prefix("0X"))
        .unwrap_or(arg);
    u32::from_str_radix(digits, 16).ok()
}

/// Page-aligned bounds of an inclusive range, widened outward in its own direction.
pub(crate) fn page_bounds(start: u32, end: u32) -> (u32, u32) {
    let page = PAGE_SIZE as u32;
    let down = |addr: u32| addr & !(page - 1);
    let up = |addr: u32| down(addr.saturating_add(page - 1));
    if start <= end {
        (down(start), up(end).max(down(end)))
    } else {
        (up(start).max(down(start)), down(end))
    }
}

/// Walks `start..=end` by `step`, downward if `start > end`, without wrapping around.
pub(crate) fn walk(start: u32, end: u32, step: u32) -> impl Iterator<Item = u32> {
    let ascending = start <= end;
    let mut next = Some(start);
    core::iter::from_fn(move || {
        let addr = next?;
        next = if ascending {
            addr.checked_add(step).filter(|next| *next <= end)
        } else {
            addr.checked_sub(step).filter(|next| *next >= end)
        };
        Some(addr)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelConfig;

    fn run(line: &str) -> (i32, String) {
        let kernel = Kernel::new(KernelConfig {
            physical_frames: 16,
            max_envs: 2,
            ..KernelConfig::default()
        });
        let mut out = String::new();
        let mut ctx = MonitorContext {
            kernel: &kernel,
            env: None,
            tf: None,
            symbols: None,
            out: &mut out,
        };
        let code = Monitor::new().run_command(line, &mut ctx);
        (code, out)
    }

    #[test]
    fn registers_every_command() {
        let names: Vec<_> = Monitor::new().command_names().collect();
        assert_eq!(
            names,
            vec!["backtrace", "dump", "help", "kerninfo", "setperm", "showmappings"]
        );
    }

    #[test]
    fn unknown_command() {
        assert_eq!(run("frobnicate 1"), (0, "Unknown command 'frobnicate'\n".to_string()));
    }

    #[test]
    fn blank_line_is_ignored() {
        assert_eq!(run("   \t "), (0, String::new()));
    }

    #[test]
    fn too_many_arguments() {
        let line = vec!["help"; MAX_ARGS].join(" ");
        assert_eq!(run(&line), (0, format!("Too many arguments (max {})\n", MAX_ARGS)));

        let (code, out) = run(&vec!["help"; MAX_ARGS - 1].join(" "));
        assert_eq!(code, 0);
        assert!(!out.contains("Too many arguments"));
    }

    #[test]
    fn help_lists_commands() {
        let (code, out) = run("help");
        assert_eq!(code, 0);
        assert_eq!(out.lines().count(), 6);
        assert!(out.contains("showmappings - "));
    }

    #[test]
    fn parses_hex_with_or_without_prefix() {
        assert_eq!(parse_hex("0x200000"), Some(0x20_0000));
        assert_eq!(parse_hex("DEADbeef"), Some(0xdead_beef));
        assert_eq!(parse_hex("0xzz"), None);
        assert_eq!(parse_hex(""), None);
    }

    #[test]
    fn page_bounds_widen_in_range_direction() {
        assert_eq!(page_bounds(0x1000, 0x1000), (0x1000, 0x1000));
        assert_eq!(page_bounds(0x1234, 0x2345), (0x1000, 0x3000));
        assert_eq!(page_bounds(0x2345, 0x1234), (0x3000, 0x1000));
        assert_eq!(page_bounds(0xffff_f123, 0xffff_ffff), (0xffff_f000, 0xffff_f000));
    }

    #[test]
    fn walk_is_inclusive_and_does_not_wrap() {
        assert_eq!(walk(0, 8, 4).collect::<Vec<_>>(), vec![0, 4, 8]);
        assert_eq!(walk(8, 0, 4).collect::<Vec<_>>(), vec![8, 4, 0]);
        assert_eq!(walk(u32::MAX - 3, u32::MAX, 4).count(), 1);
    }

    #[test]
    fn run_stops_at_end_of_input() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut out = String::new();
        let mut ctx = MonitorContext {
            kernel: &kernel,
            env: None,
            tf: None,
            symbols: None,
            out: &mut out,
        };
        Monitor::new().run("help\nnope\n".as_bytes(), &mut ctx);
        assert!(out.starts_with("Welcome to the exofork kernel monitor!\n"));
        assert!(out.contains("Unknown command 'nope'"));
        assert_eq!(out.matches("K> ").count(), 3);
    }
}
