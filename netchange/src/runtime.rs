use std::{error::Error, fmt};

use clap::Parser;

use crate::runtime::{
    cli::Cli,
    conf::{Conf, ConfigError},
};

pub mod cli;
pub mod conf;
pub mod telemetry;

pub struct Runtime {
    pub conf: Conf,
}

impl Runtime {
    pub fn new() -> Result<Self, RuntimeError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, RuntimeError> {
        let conf = Conf::new(&cli)?;

        Ok(Runtime { conf })
    }
}

#[derive(Debug)]
pub enum RuntimeError {
    Config(ConfigError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Config(e) => e.fmt(f),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RuntimeError::Config(e) => Some(e),
        }
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(e: ConfigError) -> Self {
        RuntimeError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;
    use figment::Jail;

    use super::*;

    #[test]
    fn config_errors_surface_through_runtime() {
        Jail::expect_with(|_| {
            let cli = Cli::parse_from(["netchange", "--config", "missing.yaml"]);
            let err = Runtime::from_cli(cli).err().expect("missing file");
            assert!(matches!(err, RuntimeError::Config(ConfigError::NoConfigFile)));
            assert!(err.source().is_some());

            Ok(())
        });
    }
}
