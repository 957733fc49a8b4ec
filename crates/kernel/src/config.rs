//! Boot-time configuration of the emulated machine.

use log::LevelFilter;

use crate::env::MAX_ENV_SLOTS;

/// Sizes and switches the kernel is booted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of 4 KiB physical frames, including the reserved frame 0.
    pub physical_frames: usize,
    /// Size of the environment table.
    pub max_envs: usize,
    /// Maximum level the console logger lets through.
    pub log_level: LevelFilter,
}

impl KernelConfig {
    /// Returns the configuration with its sizes clamped to what the machine supports.
    pub fn normalized(mut self) -> Self {
        self.physical_frames = self.physical_frames.max(2);
        self.max_envs = self.max_envs.clamp(1, MAX_ENV_SLOTS);
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            physical_frames: 1024,
            max_envs: 64,
            log_level: LevelFilter::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_four_mebibytes() {
        let config = KernelConfig::default();
        assert_eq!(config.physical_frames * mmu::PAGE_SIZE, 4 * 1024 * 1024);
        assert_eq!(config.max_envs, 64);
    }

    #[test]
    fn normalized_clamps_env_table() {
        let config = KernelConfig {
            max_envs: 1 << 20,
            physical_frames: 0,
            ..KernelConfig::default()
        }
        .normalized();
        assert_eq!(config.max_envs, MAX_ENV_SLOTS);
        assert_eq!(config.physical_frames, 2);
    }
}
