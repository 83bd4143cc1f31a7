use std::{
    error::Error,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::runtime::{
    cli::Cli,
    conf::conf_serde::{duration, level},
};

/// Application configuration.
///
/// Layered with figment: defaults < configuration file < CLI arguments and
/// their environment variable fallbacks.
#[derive(Debug, Deserialize, Serialize)]
pub struct Conf {
    /// Path of the file this configuration was loaded from.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[serde(with = "level")]
    pub log_level: Level,

    /// Raw interest mask (link = 1, address = 2, route = 4).
    /// Validated by the monitor when a session starts.
    /// - Default: 7
    #[serde(default = "defaults::interest_mask")]
    pub interest_mask: u8,

    /// Maximum time to wait for the monitor to stop after a shutdown signal
    /// - Default: 5s
    #[serde(default = "defaults::shutdown_timeout", with = "duration")]
    pub shutdown_timeout: Duration,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            config_path: None,
            log_level: Level::INFO,
            interest_mask: defaults::interest_mask(),
            shutdown_timeout: defaults::shutdown_timeout(),
        }
    }
}

mod defaults {
    use std::time::Duration;

    pub fn interest_mask() -> u8 {
        7
    }

    pub fn shutdown_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

impl Conf {
    /// Build the configuration from `cli`, merging the configuration file it
    /// names (if any) between the defaults and the CLI values.
    ///
    /// # Errors
    /// * `ConfigError::NoConfigFile` - the configured path does not exist.
    /// * `ConfigError::InvalidConfigPath` - the path is not a regular file.
    /// * `ConfigError::InvalidExtension` - the file is not `.yaml`/`.yml`.
    /// * `ConfigError::Extraction` - a value failed to deserialize.
    pub fn new(cli: &Cli) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Conf::default()));

        let config_path_to_store = if let Some(config_path) = &cli.config {
            validate_config_path(config_path)?;
            figment = figment.merge(Yaml::file(config_path));
            Some(config_path.clone())
        } else {
            None
        };

        figment = figment.merge(Serialized::defaults(cli));

        let mut conf: Conf = figment.extract()?;

        conf.config_path = config_path_to_store;
        Ok(conf)
    }
}

/// Check that `path` is an existing file with a `yaml` or `yml` extension.
fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if !path.is_file() {
        if path.exists() {
            return Err(ConfigError::InvalidConfigPath(
                path.to_string_lossy().into_owned(),
            ));
        } else {
            return Err(ConfigError::NoConfigFile);
        }
    }

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(()),
        Some(ext) => Err(ConfigError::InvalidExtension(ext.to_string())),
        None => Err(ConfigError::InvalidExtension("none".to_string())),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// The specified configuration file does not exist.
    NoConfigFile,
    /// The path exists but is not a file.
    InvalidConfigPath(String),
    /// The file has an unsupported extension.
    InvalidExtension(String),
    /// Failed to extract configuration data.
    Extraction(Box<figment::Error>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoConfigFile => write!(f, "no config file provided"),
            ConfigError::InvalidConfigPath(p) => write!(f, "path '{p}' is not a valid file"),
            ConfigError::InvalidExtension(ext) => {
                write!(
                    f,
                    "invalid file extension '.{ext}', expected 'yaml' or 'yml'"
                )
            }
            ConfigError::Extraction(e) => write!(f, "configuration error: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Extraction(e) => Some(e),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Extraction(Box::from(e))
    }
}

pub mod conf_serde {
    pub mod level {
        use serde::{self, Deserialize, Deserializer, Serializer};
        use tracing::Level;

        pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(level.as_str())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            s.parse::<Level>().map_err(serde::de::Error::custom)
        }

        pub mod option {
            use super::*;

            pub fn serialize<S>(level: &Option<Level>, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                match level {
                    Some(l) => serializer.serialize_str(l.as_str()),
                    None => serializer.serialize_none(),
                }
            }

            pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Level>, D::Error>
            where
                D: Deserializer<'de>,
            {
                let opt = Option::<String>::deserialize(deserializer)?;
                match opt {
                    Some(s) => s
                        .parse::<Level>()
                        .map(Some)
                        .map_err(serde::de::Error::custom),
                    None => Ok(None),
                }
            }
        }
    }

    pub mod duration {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            humantime::parse_duration(&s).map_err(serde::de::Error::custom)
        }
    }
}
