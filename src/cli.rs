use crate::config::{
    Config, CredentialBackend, DEFAULT_AUTH_TIMEOUT_SECS, DEFAULT_CLIENT_SECRET_PATH,
    DEFAULT_TOKEN_PATH,
};
use crate::error::{GmailError, Result};
use crate::gmail_api::{
    default_scopes, load_client_secret, CredentialStore, InstalledConsentFlow, MailClient,
    Session, GMAIL_API_BASE,
};
use crate::types::MessageSummary;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// OAuth client secret downloaded from the Google Cloud console.
    #[clap(long, env = "GMAIL_CLIENT_SECRET", default_value = DEFAULT_CLIENT_SECRET_PATH)]
    pub client_secret: PathBuf,

    /// File the OAuth token is kept in.
    #[clap(long, env = "GMAIL_TOKEN_FILE", default_value = DEFAULT_TOKEN_PATH)]
    pub token_file: PathBuf,

    /// Keep the OAuth token in the system keyring instead of a file.
    #[clap(long)]
    pub keyring: bool,

    #[clap(long, env = "GMAIL_API_BASE", default_value = GMAIL_API_BASE)]
    pub api_base: String,

    /// Seconds to wait for the browser consent before giving up.
    #[clap(long, default_value_t = DEFAULT_AUTH_TIMEOUT_SECS)]
    pub auth_timeout_secs: u64,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Show the most recent inbox messages.
    Inbox {
        #[clap(long, default_value_t = 10)]
        max: usize,
        #[clap(long)]
        unread_only: bool,
    },
    /// Search with Gmail query syntax, e.g. `from:boss has:attachment`.
    Search { query: String },
    /// Print the plain-text body of a message.
    Read { id: String },
    /// Send a plain-text message.
    Send {
        #[clap(long)]
        to: String,
        #[clap(long)]
        subject: String,
        #[clap(long)]
        body: String,
    },
    /// Remove the stored OAuth token and exit.
    Logout,
}

impl Cli {
    pub fn config(&self) -> Config {
        Config {
            client_secret_path: self.client_secret.clone(),
            backend: if self.keyring {
                CredentialBackend::Keyring
            } else {
                CredentialBackend::File(self.token_file.clone())
            },
            api_base: self.api_base.clone(),
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.config();

    if cli.command == Command::Logout {
        config.token_store()?.clear()?;
        println!("Stored credentials removed.");
        return Ok(());
    }

    let secret = load_client_secret(&config.client_secret_path).await?;
    let store = Arc::new(CredentialStore::new(
        secret,
        config.token_store()?,
        Box::new(InstalledConsentFlow::new(config.auth_timeout)),
    ));
    let session = Session::connect(store, default_scopes())
        .await?
        .with_base_url(config.api_base.clone());
    let client = MailClient::new(session);
    info!("Gmail session ready");

    match cli.command {
        Command::Inbox { max, unread_only } => {
            let emails = client.list_inbox(max).await?;
            let shown: Vec<_> = emails
                .iter()
                .filter(|e| !unread_only || e.unread == Some(true))
                .collect();
            if shown.is_empty() {
                println!("No emails found.");
            }
            for summary in shown {
                println!("{}\n", render_summary(summary));
            }
        }
        Command::Search { query } => {
            let results = client.search_emails(&query).await?;
            if results.is_empty() {
                println!("No matching emails found.");
            } else {
                println!("Found {} result(s).\n", results.len());
            }
            for summary in &results {
                println!("{}\n", render_summary(summary));
            }
        }
        Command::Read { id } => {
            println!("{}", client.read_email(&id).await?);
        }
        Command::Send { to, subject, body } => {
            let id = client.send_email(&to, &subject, &body).await?;
            println!("Email sent ({}).", id);
        }
        Command::Logout => {}
    }
    Ok(())
}

pub fn render_summary(summary: &MessageSummary) -> String {
    let mut out = format!(
        "[{}]\nFrom: {}\nSubject: {}",
        summary.id, summary.from, summary.subject
    );
    if let Some(snippet) = &summary.snippet {
        out.push_str(&format!("\n{}", snippet));
    }
    if let Some(unread) = summary.unread {
        out.push_str(if unread { "\n(Unread)" } else { "\n(Read)" });
    }
    out
}

/// One-line message for the user; the full error goes to the log.
pub fn user_message(error: &GmailError) -> String {
    match error {
        GmailError::Authentication(reason) => format!(
            "Could not sign in to Gmail ({}). Run the command again to retry authorization, or `logout` to start over.",
            reason
        ),
        GmailError::Remote { .. } => format!("Gmail request failed: {}", error),
        GmailError::NotFound(id) => format!("No such message: {}", id),
        GmailError::Validation { field, message } => format!("Invalid {}: {}", field, message),
        GmailError::Storage(reason) => format!("Could not access stored credentials: {}", reason),
        GmailError::Decode(reason) => format!("Unexpected response from Gmail: {}", reason),
    }
}
