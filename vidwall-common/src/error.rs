use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for vidwall operations
#[derive(Error, Debug)]
pub enum VidwallError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Display enumeration error: {0}")]
    Display(#[from] DisplayError),

    #[error("Liveness probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Process execution error: {0}")]
    Process(#[from] ProcessError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path:?}")]
    FileRead { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse TOML configuration: {message}")]
    TomlParse { message: String },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("No streams configured")]
    NoStreams,

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Display enumeration errors
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Display enumerator not found: {program}")]
    EnumeratorNotFound { program: String },

    #[error("Display enumerator failed: {stderr}")]
    EnumeratorFailed { stderr: String },
}

/// Reasons a liveness probe reported the stream as inactive
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe of {url} timed out after {}", humantime::format_duration(*after))]
    Timeout { url: String, after: Duration },

    #[error("failed to launch probe for {url}")]
    Launch { url: String, source: std::io::Error },

    #[error("probe of {url} exited with code {code}: {stderr}")]
    NonZeroExit { url: String, code: i32, stderr: String },

    #[error("probe of {url} reported no decodable streams")]
    NoStreams { url: String },
}

/// Process execution errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to launch {program}: {source}")]
    Launch { program: String, source: std::io::Error },

    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },
}

/// Layout resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Region conflict for stream '{target}': {reason}")]
    RegionConflict { target: String, reason: String },
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid path: {path:?}")]
    InvalidPath { path: PathBuf },

    #[error("Invalid region: {region}")]
    InvalidRegion { region: String },

    #[error("Unsupported image format: {path:?}")]
    UnsupportedImage { path: PathBuf },

    #[error("Image file is corrupted or invalid: {path:?}")]
    CorruptedImage { path: PathBuf },
}

// Convenience type alias
pub type Result<T> = std::result::Result<T, VidwallError>;

impl From<toml::de::Error> for VidwallError {
    fn from(err: toml::de::Error) -> Self {
        VidwallError::Config(ConfigError::TomlParse {
            message: err.to_string(),
        })
    }
}

// Error reporting utilities
pub trait ErrorReporting {
    fn user_friendly_message(&self) -> String;
}

impl ErrorReporting for VidwallError {
    fn user_friendly_message(&self) -> String {
        match self {
            VidwallError::Config(ConfigError::FileRead { path, .. }) => {
                format!("Configuration file not found: {:?}", path)
            }
            VidwallError::Config(ConfigError::TomlParse { message }) => {
                format!("Invalid configuration format: {}", message)
            }
            VidwallError::Config(ConfigError::NoStreams) => {
                "No streams configured. Add at least one [streams.<name>] table.".to_string()
            }
            VidwallError::Display(DisplayError::EnumeratorNotFound { program }) => {
                format!("'{}' not found in PATH; only streams with an explicit region can be placed", program)
            }
            VidwallError::Process(ProcessError::Launch { program, source }) => {
                format!("Could not start '{}': {}", program, source)
            }
            VidwallError::Validation(ValidationError::InvalidPath { path }) => {
                format!("Placeholder image not found: {:?}", path)
            }
            _ => self.to_string(),
        }
    }
}
