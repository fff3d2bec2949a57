//! Gate errors

/// Errors building a contract gate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// HTTP client could not be built
    #[error("gate client error: {0}")]
    Client(String),

    /// A gate needs at least one probe
    #[error("probe battery is empty")]
    EmptyBattery,
}
