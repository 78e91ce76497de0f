pub mod cli;
pub mod config;
pub mod email_content;
pub mod error;
pub mod gmail_api;
pub mod types;

pub use error::{GmailError, Result};
