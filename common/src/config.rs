use std::env;

use config::{
    builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File, FileFormat,
    FileStoredFormat,
};

use crate::{log_debug, log_warn};

/// Suffix of the environment variable holding an inline configuration.
pub const CONFIG_STR: &str = "CONFIG_STR";
/// Suffix of the environment variable naming the format of the inline configuration.
pub const CONFIG_STR_FORMAT: &str = "CONFIG_STR_FMT";

/// Builds a layered configuration.
///
/// Sources, from lowest to highest priority:
/// - Whatever `config_builder` adds on top of an empty builder (e.g., defaults).
/// - A file starting with `file_name`, searched in the ancestors of the current
///   directory. It is optional.
/// - An inline string in `{env_prefix}_CONFIG_STR`, parsed in the format
///   given by `{env_prefix}_CONFIG_STR_FMT` (an extension such as `toml`).
/// - Environment variables starting with `{env_prefix}_`, where `__` separates
///   nested keys.
pub fn load_config(
    file_name: &str,
    env_prefix: &str,
    config_builder: impl FnOnce(
        ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError>,
) -> Result<Config, ConfigError> {
    let mut builder = config_builder(Config::builder())?;

    let file_path = crate::utils::search_current_ancestor_dirs_for(file_name)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_owned());
    log_debug!("Looking for configuration file at: {}", file_path);
    builder = builder.add_source(File::with_name(&file_path).required(false));

    match (
        env::var(format!("{env_prefix}_{CONFIG_STR}")).ok(),
        env::var(format!("{env_prefix}_{CONFIG_STR_FORMAT}")).ok(),
    ) {
        (Some(content), Some(format)) => match try_parse_format(&format) {
            Ok(format) => {
                builder = builder.add_source(File::from_str(content.as_str(), format));
            }
            Err(format) => log_warn!("Unknown format for config string: {}", format),
        },
        (Some(_), None) => log_warn!(
            "Ignoring {env_prefix}_{CONFIG_STR} because {env_prefix}_{CONFIG_STR_FORMAT} is not set"
        ),
        _ => {}
    }

    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__"),
    );

    builder
        .build()
        .inspect(|c| log_debug!("Loaded raw configurations: {:?}", c))
}

fn try_parse_format(format: &str) -> Result<FileFormat, &str> {
    use FileFormat::*;
    [Toml, Json, Json5, Yaml, Ron, Ini]
        .into_iter()
        .find(|f| f.file_extensions().contains(&format))
        .ok_or(format)
}
