//! Tasktrail quote bounded context.
//!
//! Quotes are short texts served at random. They are event-sourced like
//! tasks but carry no access control.

pub mod application;
pub mod domain;
