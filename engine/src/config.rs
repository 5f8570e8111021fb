use derive_more as dm;
use serde::Deserialize;

use common::{log_debug, log_info};

use crate::{arch::ArchitectureKind, error::Result};

pub const ENV_PREFIX: &str = "BINSYM";
pub const CONFIG_FILENAME: &str = "binsym_config";

impl TryFrom<::config::Config> for EngineConfig {
    type Error = ::config::ConfigError;

    fn try_from(value: ::config::Config) -> std::result::Result<Self, Self::Error> {
        let config: EngineConfig = value.try_deserialize()?;
        log_debug!("Loaded configurations: {:?}", config);
        Ok(config)
    }
}

/// Loads the engine configuration from the `binsym_config` file (if any) and
/// `BINSYM_*` environment variables, e.g., `BINSYM_ARCH=x86_64` or
/// `BINSYM_MODES__ALIGNED_MEMORY=true`.
pub fn load_config() -> Result<EngineConfig> {
    common::config::load_config(CONFIG_FILENAME, ENV_PREFIX, Ok)
        .and_then(EngineConfig::try_from)
        .inspect(|c| log_info!("Engine configuration: {:?}", c))
        .map_err(Into::into)
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct EngineConfig {
    /// The architecture to set up the context with.
    #[serde(default)]
    pub arch: Option<ArchitectureKind>,

    #[serde(default)]
    pub modes: ModesConfig,
}

/// Optional behaviors of the engine, all disabled by default.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ModesConfig {
    /// Loads that exactly match an earlier store read its expression back
    /// instead of a byte-wise concatenation.
    #[serde(default)]
    pub aligned_memory: bool,

    /// Registers left undefined by an instruction lose their symbolic
    /// expression.
    #[serde(default)]
    pub concretize_undefined_registers: bool,
}

#[derive(Debug, dm::Display, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[display("aligned_memory")]
    #[serde(alias = "aligned")]
    AlignedMemory,
    #[display("concretize_undefined_registers")]
    #[serde(alias = "concretize_undefined")]
    ConcretizeUndefinedRegisters,
}

impl ModesConfig {
    pub fn is_enabled(&self, mode: Mode) -> bool {
        match mode {
            Mode::AlignedMemory => self.aligned_memory,
            Mode::ConcretizeUndefinedRegisters => self.concretize_undefined_registers,
        }
    }

    pub fn set(&mut self, mode: Mode, enabled: bool) {
        match mode {
            Mode::AlignedMemory => self.aligned_memory = enabled,
            Mode::ConcretizeUndefinedRegisters => self.concretize_undefined_registers = enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use ::config::{Config, File, FileFormat};

    use super::*;

    fn parse(content: &str, format: FileFormat) -> EngineConfig {
        Config::builder()
            .add_source(File::from_str(content, format))
            .build()
            .and_then(EngineConfig::try_from)
            .unwrap()
    }

    #[test]
    fn defaults_when_empty() {
        let config = parse("", FileFormat::Toml);
        assert_eq!(config.arch, None);
        assert_eq!(config.modes, ModesConfig::default());
    }

    #[test]
    fn parses_architecture_and_modes() {
        let config = parse(
            r#"
            arch = "x86_64"

            [modes]
            aligned_memory = true
            "#,
            FileFormat::Toml,
        );
        assert_eq!(config.arch, Some(ArchitectureKind::X86_64));
        assert!(config.modes.is_enabled(Mode::AlignedMemory));
        assert!(!config.modes.is_enabled(Mode::ConcretizeUndefinedRegisters));

        let config = parse(r#"{ "arch": "i386" }"#, FileFormat::Json);
        assert_eq!(config.arch, Some(ArchitectureKind::X86));
    }
}
