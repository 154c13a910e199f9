//! Commands for the quote context.

use tasktrail_core::command::Command;

/// Command to add a quote.
#[derive(Debug, Clone)]
pub struct CreateQuote {
    /// Saga this command is a step of.
    pub saga_id: Option<String>,
    /// The quote text.
    pub quote: String,
}

impl Command for CreateQuote {
    fn command_type(&self) -> &'static str {
        "quotes.create"
    }

    fn saga_id(&self) -> Option<&str> {
        self.saga_id.as_deref()
    }
}
