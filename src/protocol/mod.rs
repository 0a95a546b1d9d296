//! Minimal command/response codecs for the login phase of each protocol.
//!
//! Only what a probe needs is modeled: greeting, capability discovery,
//! STARTTLS, authentication and a polite goodbye.

pub mod imap;
pub mod pop3;
pub mod smtp;

pub use imap::{ImapCapabilities, ImapCommand, ImapResponse, ImapStatus};
pub use pop3::{Pop3Command, Pop3Response};
pub use smtp::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
