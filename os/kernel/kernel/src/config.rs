//! Machine configuration from the environment.
//!
//! | Variable         | Meaning                                  |
//! |------------------|------------------------------------------|
//! | `KERNEL_RAM_KIB` | Installed RAM in KiB                     |
//! | `KERNEL_LOG`     | Log level (`off`, `error`, ... `trace`)  |

use kernel_info::config::MachineConfig;
use log::LevelFilter;

pub const RAM_VAR: &str = "KERNEL_RAM_KIB";
pub const LOG_VAR: &str = "KERNEL_LOG";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("KERNEL_RAM_KIB={0:?} is not a RAM size in KiB")]
    InvalidRam(String),
    #[error("KERNEL_LOG={0:?} is not a log level")]
    InvalidLogLevel(String),
}

/// The default machine with overrides from the process environment.
///
/// # Errors
/// If a variable is set but cannot be parsed.
pub fn from_env() -> Result<MachineConfig, ConfigError> {
    apply(MachineConfig::default(), |name| std::env::var(name).ok())
}

/// Applies overrides looked up through `var` to `config`.
///
/// # Errors
/// See [`from_env`].
pub fn apply(
    mut config: MachineConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<MachineConfig, ConfigError> {
    if let Some(value) = var(RAM_VAR) {
        let bytes = value
            .trim()
            .parse::<u32>()
            .ok()
            .and_then(|kib| kib.checked_mul(1024))
            .filter(|&bytes| bytes > config.first_free())
            .ok_or(ConfigError::InvalidRam(value))?;
        config = config.with_ram_bytes(bytes);
    }
    if let Some(value) = var(LOG_VAR) {
        let level = value
            .trim()
            .parse::<LevelFilter>()
            .map_err(|_| ConfigError::InvalidLogLevel(value))?;
        config = config.with_log_level(level);
    }
    Ok(config)
}
