//! Mail address validation
//!
//! The protocol engine only needs a way to turn the free text that follows
//! `FROM:` or `TO:` into a canonical address. [`AddressValidator`] is that
//! seam; [`MailboxValidator`] is the default, backed by lettre's RFC 2822
//! mailbox parser.

use lettre::Address;
use lettre::address::AddressError;
use lettre::message::Mailbox;

/// Parses and normalizes a mail address
pub trait AddressValidator: Send + Sync {
    /// Returns the canonical address, or an error whose text is sent to the
    /// client in a 501 reply
    fn parse(&self, raw: &str) -> Result<Address, AddressError>;
}

/// Accepts `user@domain`, `<user@domain>` and `Display Name <user@domain>`
#[derive(Debug, Default, Clone, Copy)]
pub struct MailboxValidator;

impl AddressValidator for MailboxValidator {
    fn parse(&self, raw: &str) -> Result<Address, AddressError> {
        raw.trim().parse::<Mailbox>().map(|mailbox| mailbox.email)
    }
}
