//! CNI client errors

use thiserror::Error;

/// Errors that can occur when delegating to CNI plugins
#[derive(Debug, Error)]
pub enum CniError {
    /// Spawning or talking to the plugin process failed
    #[error("exec error: {0}")]
    Exec(#[from] std::io::Error),

    /// Plugin exited non-zero and reported a CNI error object
    #[error("plugin {plugin} failed (code {code}): {msg}")]
    Plugin {
        /// Plugin type that failed
        plugin: String,
        /// CNI error code
        code: u32,
        /// Error message
        msg: String,
    },

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Plugin did not finish in time
    #[error("plugin {0} timed out")]
    Timeout(String),

    /// Plugin binary not present in any search directory
    #[error("plugin binary not found: {0}")]
    PluginNotFound(String),

    /// Network configuration is unusable
    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),
}
