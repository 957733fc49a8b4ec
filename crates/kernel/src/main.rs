use std::{fs, io, path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use exofork_kernel::{
    Console, ConsoleWriter, Kernel, KernelConfig, Monitor, MonitorContext, demo,
    unwind::Symbolizer,
};
use symbolicator::SymbolData;

#[derive(Parser)]
#[command(name = "exofork")]
#[command(about = "Emulated exokernel with copy-on-write fork and a kernel monitor")]
struct Args {
    /// Number of 4 KiB physical frames
    #[arg(long, default_value_t = KernelConfig::default().physical_frames)]
    frames: usize,

    /// Size of the environment table
    #[arg(long, default_value_t = KernelConfig::default().max_envs)]
    max_envs: usize,

    /// Most verbose log level printed to stderr
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Symbol table used to annotate backtraces
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// Skip the fork demonstration and start the monitor with no environment
    #[arg(long)]
    no_demo: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = KernelConfig {
        physical_frames: args.frames,
        max_envs: args.max_envs,
        log_level: args.log_level.into(),
    };
    Console::init(config.log_level);

    let symbols = match args.symbols.as_ref().map(fs::read).transpose() {
        Ok(bytes) => bytes.map(|bytes| SymbolData::new(&bytes)),
        Err(err) => {
            log::error!("cannot read symbol table: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let table = match symbols.as_ref().map(SymbolData::table).transpose() {
        Ok(table) => table,
        Err(err) => {
            log::error!("cannot load symbol table: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let kernel = Kernel::new(config);
    let env = if args.no_demo {
        None
    } else {
        match demo::spawn(&kernel) {
            Ok(root) => {
                let ran = kernel.run();
                log::info!("demo finished after {} entries", ran);
                print!("{}", kernel.take_console_output());
                Some(root)
            }
            Err(err) => {
                log::error!("cannot start demo: {}", err);
                None
            }
        }
    };

    let mut out = ConsoleWriter;
    let mut ctx = MonitorContext {
        kernel: &kernel,
        env,
        tf: None,
        symbols: table.as_ref().map(|table| table as &dyn Symbolizer),
        out: &mut out,
    };
    Monitor::new().run(io::stdin().lock(), &mut ctx);
    ExitCode::SUCCESS
}
