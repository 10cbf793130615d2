mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{LogSettings, ServerSettings, Settings, StreamSettings};

/// Default file stem looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Loads the configuration from the file stem `path` (for example
/// [`DEFAULT_CONFIG_FILE`]) and environment variables, then merges it with
/// default values.
///
/// The file is optional; `INFOCENTER__SECTION__KEY` environment variables
/// always win over it.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("INFOCENTER")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
