//! Command abstractions.

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Saga this command participates in, if it is one step of a workflow.
    fn saga_id(&self) -> Option<&str>;
}
