pub mod jwt;
pub mod migrate;
pub mod scan;

/// Boxed error for command results; fatal errors exit with status 1.
pub type CommandError = Box<dyn std::error::Error + Send + Sync>;
