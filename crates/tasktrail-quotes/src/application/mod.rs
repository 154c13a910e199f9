//! Application services for the quote context.

pub mod command_handlers;
pub mod query_handlers;
