use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Config file not found. Looked in:\n\
        - SKYFOLD_CONFIG_PATH\n\
        - current directory: skyfold.yaml, .skyfold.yaml\n\
        - ./.skyfold/skyfold.yaml\n\
        - ~/.config/skyfold/config.yaml"
    )]
    ConfigFileNotFound,

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
