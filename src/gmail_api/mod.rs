//! Gmail API module split into logical submodules
//!
//! This module provides all Gmail API functionality organized into:
//! - auth: Credential persistence, refresh and interactive consent
//! - client: The transport seam and `MailClient`
//! - session: The authenticated HTTP transport
//! - messages: Inbox listing, search and reading
//! - operations: Message encoding and sending

pub mod auth;
pub mod client;
pub mod messages;
pub mod operations;
pub mod session;

pub use auth::{
    default_scopes, load_client_secret, ConsentFlow, ConsentGrant, Credential, CredentialStore,
    FileTokenStore, InstalledConsentFlow, TokenStore,
};
pub use client::{ListQuery, MailClient, MailTransport, MessageFormat};
pub use operations::{build_raw_message, encode_header_value, validate_recipient};
pub use session::{Session, GMAIL_API_BASE};
