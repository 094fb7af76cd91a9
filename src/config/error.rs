/// Failures while locating, reading or writing the hostclaw config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode {path} as yaml: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path} is not valid yaml: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("environment variable {name} rejected: {reason}")]
    Env { name: String, reason: String },
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error("no home directory to place the state root in")]
    HomeDirectoryUnavailable,
}
