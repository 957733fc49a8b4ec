//! Host console: the kernel log sink and the monitor's terminal.

use core::fmt::{self, Write};
use std::io::{self, Write as _};

use log::LevelFilter;
use spin::{Mutex, Once};

/// Log sink writing to stderr.
pub struct Console {
    stderr: Mutex<io::Stderr>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Installs the console as the global logger. Later calls only adjust the level.
    pub fn init(level: LevelFilter) -> &'static Self {
        let mut installed = false;
        let console = DEFAULT.call_once(|| {
            installed = true;
            Console {
                stderr: Mutex::new(io::stderr()),
            }
        });
        if installed && log::set_logger(console).is_err() {
            eprintln!("another logger is already installed");
        }
        log::set_max_level(level);
        console
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line = String::new();
        if write_log_entry_to(&mut line, record).is_ok() {
            let _ = self.stderr.lock().write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        let _ = self.stderr.lock().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}

/// Monitor output on stdout, flushed after every write so prompts show up.
#[derive(Default)]
pub struct ConsoleWriter;

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut stdout = io::stdout().lock();
        stdout.write_all(s.as_bytes()).map_err(|_| fmt::Error)?;
        stdout.flush().map_err(|_| fmt::Error)
    }
}
