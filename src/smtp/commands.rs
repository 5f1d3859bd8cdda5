//! Implementation of SMTP commands

use crate::smtp::address::AddressValidator;
use crate::smtp::error::SmtpError;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

use lettre::Address;

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Helo,
    Mail(&'a str),
    Rcpt(&'a str),
    Data,
    Rset,
    Noop,
    Quit,
    Unknown(String),
}

impl<'a> Command<'a> {
    /// Split a line at the first space. The keyword is matched
    /// case-insensitively; the parameter is kept verbatim.
    pub fn parse(line: &'a str) -> Self {
        let (keyword, param) = line.split_once(' ').unwrap_or((line, ""));
        let keyword = keyword.trim().to_ascii_uppercase();

        match keyword.as_str() {
            "HELO" | "EHLO" => Command::Helo,
            "MAIL" => Command::Mail(param),
            "RCPT" => Command::Rcpt(param),
            "DATA" => Command::Data,
            "RSET" => Command::Rset,
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            _ => Command::Unknown(keyword),
        }
    }
}

/// Handles SMTP commands and returns the next session with its reply
pub struct SmtpCommandHandler<'a> {
    banner: &'a str,
    validator: &'a dyn AddressValidator,
}

impl<'a> SmtpCommandHandler<'a> {
    /// Create a new command handler
    pub fn new(banner: &'a str, validator: &'a dyn AddressValidator) -> Self {
        Self { banner, validator }
    }

    /// Process a command line. Errors are turned into replies here and the
    /// session is handed back unchanged.
    pub fn process_command(
        &self,
        command_line: &str,
        session: SmtpSession,
    ) -> (SmtpSession, SmtpResponse) {
        let result = match Command::parse(command_line) {
            Command::Helo => Ok((SmtpSession::Idle, SmtpResponse::helo(self.banner))),
            Command::Mail(param) => self.handle_mail(param, session),
            Command::Rcpt(param) => self.handle_rcpt(param, session),
            Command::Data => self.handle_data(session),
            Command::Rset => Ok((SmtpSession::Idle, SmtpResponse::ok())),
            Command::Noop => Ok((session, SmtpResponse::ok())),
            Command::Quit => Ok((SmtpSession::Closed, SmtpResponse::quit())),
            Command::Unknown(_) => Err((session, SmtpError::InvalidCommand)),
        };

        match result {
            Ok(step) => step,
            Err((session, error)) => {
                tracing::debug!(%error, "Command rejected.");
                let response = error
                    .to_response()
                    .unwrap_or_else(|| SmtpResponse::new(502, "unsupported command"));
                (session, response)
            }
        }
    }

    /// Handle MAIL command
    fn handle_mail(&self, param: &str, session: SmtpSession) -> Step {
        if session.sender().is_some() {
            return Err((session, SmtpError::InvalidState("MAIL already invoked")));
        }

        let sender = match self.parse_path(param, "FROM:", "syntax: \"MAIL FROM:<address>\"") {
            Ok(sender) => sender,
            Err(error) => return Err((session, error)),
        };

        match session.with_sender(sender) {
            Ok(session) => Ok((session, SmtpResponse::ok())),
            Err(session) => Err((session, SmtpError::InvalidState("MAIL already invoked"))),
        }
    }

    /// Handle RCPT command. A rejected address is not added to the recipients.
    fn handle_rcpt(&self, param: &str, session: SmtpSession) -> Step {
        if session.sender().is_none() {
            return Err((session, SmtpError::InvalidState("MAIL must be invoked first")));
        }

        let recipient = match self.parse_path(param, "TO:", "syntax: \"RCPT TO:<address>\"") {
            Ok(recipient) => recipient,
            Err(error) => return Err((session, error)),
        };

        match session.with_recipient(recipient) {
            Ok(session) => Ok((session, SmtpResponse::ok())),
            Err(session) => Err((session, SmtpError::InvalidState("MAIL must be invoked first"))),
        }
    }

    /// Handle DATA command
    fn handle_data(&self, session: SmtpSession) -> Step {
        match session.start_data() {
            Ok(session) => Ok((session, SmtpResponse::data_start())),
            Err(session) => Err((session, SmtpError::InvalidState("RCPT must be invoked first"))),
        }
    }

    /// Check the literal prefix case-insensitively, then validate what follows
    fn parse_path(&self, param: &str, prefix: &str, usage: &str) -> Result<Address, SmtpError> {
        let has_prefix = param
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if !has_prefix {
            return Err(SmtpError::InvalidSyntax(usage.to_string()));
        }

        self.validator
            .parse(&param[prefix.len()..])
            .map_err(|error| SmtpError::InvalidSyntax(error.to_string()))
    }
}

type Step = Result<(SmtpSession, SmtpResponse), (SmtpSession, SmtpError)>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::address::MailboxValidator;
    use crate::smtp::session::SmtpState;

    fn run(commands: &[&str]) -> (SmtpSession, Vec<String>) {
        let validator = MailboxValidator;
        let handler = SmtpCommandHandler::new("Banner", &validator);
        let mut session = SmtpSession::new();
        let mut replies = Vec::new();

        for command in commands {
            let (next, response) = handler.process_command(command, session);
            session = next;
            replies.push(response.format());
        }

        (session, replies)
    }

    fn address(raw: &str) -> Address {
        raw.parse().unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("helo"), Command::Helo);
        assert_eq!(Command::parse("EHLO client.local"), Command::Helo);
        assert_eq!(
            Command::parse("mail FROM:<a@localhost>"),
            Command::Mail("FROM:<a@localhost>")
        );
        assert_eq!(Command::parse("RCPT to: b@localhost"), Command::Rcpt("to: b@localhost"));
        assert_eq!(Command::parse("Quit"), Command::Quit);
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
        assert_eq!(Command::parse("VRFY x"), Command::Unknown("VRFY".to_string()));
    }

    #[test]
    fn test_helo_command() {
        let (session, replies) = run(&["HELO client.local"]);
        assert_eq!(replies, ["250 Banner\r\n"]);
        assert_eq!(session.state(), SmtpState::Idle);
    }

    #[test]
    fn test_helo_resets_transaction() {
        let (session, replies) = run(&["MAIL FROM:a@localhost", "RCPT TO:b@localhost", "EHLO"]);
        assert_eq!(replies[2], "250 Banner\r\n");
        assert_eq!(session, SmtpSession::Idle);
    }

    #[test]
    fn test_mail_command() {
        let (session, replies) = run(&["MAIL FROM:<sender@example.com>"]);
        assert_eq!(replies, ["250 ok\r\n"]);
        assert_eq!(session.sender(), Some(&address("sender@example.com")));
    }

    #[test]
    fn test_mail_prefix_is_case_insensitive() {
        let (session, replies) = run(&["mail from:a@localhost"]);
        assert_eq!(replies, ["250 ok\r\n"]);
        assert_eq!(session.state(), SmtpState::MailReceived);
    }

    #[test]
    fn test_mail_twice() {
        let (session, replies) = run(&["MAIL FROM:a@localhost", "MAIL FROM:b@localhost"]);
        assert_eq!(replies[1], "503 MAIL already invoked\r\n");
        assert_eq!(session.sender(), Some(&address("a@localhost")));
    }

    #[test]
    fn test_mail_invalid_syntax() {
        let (session, replies) = run(&["MAIL sender@example.com", "MAIL"]);
        assert_eq!(replies[0], "501 syntax: \"MAIL FROM:<address>\"\r\n");
        assert_eq!(replies[1], "501 syntax: \"MAIL FROM:<address>\"\r\n");
        assert_eq!(session, SmtpSession::Idle);
    }

    #[test]
    fn test_mail_invalid_address() {
        let (session, replies) = run(&["MAIL FROM:<>"]);
        assert!(replies[0].starts_with("501 "));
        assert_eq!(session, SmtpSession::Idle);
    }

    #[test]
    fn test_rcpt_without_mail() {
        let (session, replies) = run(&["RCPT TO:<recipient@example.com>"]);
        assert_eq!(replies, ["503 MAIL must be invoked first\r\n"]);
        assert!(session.recipients().is_empty());
    }

    #[test]
    fn test_rcpt_command() {
        let (session, replies) = run(&[
            "MAIL FROM:a@localhost",
            "RCPT TO:b@localhost",
            "RCPT TO:<c@localhost>",
        ]);
        assert_eq!(replies[1..], ["250 ok\r\n", "250 ok\r\n"]);
        assert_eq!(
            session.recipients(),
            &[address("b@localhost"), address("c@localhost")]
        );
    }

    #[test]
    fn test_rcpt_invalid_syntax() {
        let (session, replies) = run(&["MAIL FROM:a@localhost", "RCPT b@localhost"]);
        assert_eq!(replies[1], "501 syntax: \"RCPT TO:<address>\"\r\n");
        assert!(session.recipients().is_empty());
    }

    #[test]
    fn test_rcpt_invalid_address_is_not_appended() {
        let (session, replies) = run(&["MAIL FROM:a@localhost", "RCPT TO:not-an-address"]);
        assert!(replies[1].starts_with("501 "));
        assert!(session.recipients().is_empty());
        assert_eq!(session.state(), SmtpState::MailReceived);
    }

    #[test]
    fn test_data_command() {
        let (session, replies) = run(&["MAIL FROM:a@localhost", "RCPT TO:b@localhost", "DATA"]);
        assert_eq!(replies[2], "354 continue until \\r\\n.\\r\\n\r\n");
        assert_eq!(session.state(), SmtpState::DataMode);
    }

    #[test]
    fn test_data_without_rcpt() {
        let (session, replies) = run(&["DATA", "MAIL FROM:a@localhost", "DATA"]);
        assert_eq!(replies[0], "503 RCPT must be invoked first\r\n");
        assert_eq!(replies[2], "503 RCPT must be invoked first\r\n");
        assert_eq!(session.state(), SmtpState::MailReceived);
    }

    #[test]
    fn test_rset_command() {
        let (session, replies) = run(&[
            "MAIL FROM:a@localhost",
            "RCPT TO:b@localhost",
            "RSET",
            "MAIL FROM:c@localhost",
        ]);
        assert_eq!(replies[2..], ["250 ok\r\n", "250 ok\r\n"]);
        assert_eq!(session.sender(), Some(&address("c@localhost")));
        assert!(session.recipients().is_empty());
    }

    #[test]
    fn test_noop_command() {
        let (session, replies) = run(&["MAIL FROM:a@localhost", "NOOP"]);
        assert_eq!(replies[1], "250 ok\r\n");
        assert_eq!(session.state(), SmtpState::MailReceived);
    }

    #[test]
    fn test_quit_command() {
        let (session, replies) = run(&["QUIT"]);
        assert_eq!(replies, ["221 bye\r\n"]);
        assert!(session.is_closed());
    }

    #[test]
    fn test_unknown_command_leaves_state_unchanged() {
        let (session, replies) = run(&[
            "MAIL FROM:a@localhost",
            "INVALID",
            "",
            "RCPT TO:b@localhost",
        ]);
        assert_eq!(replies[1], "502 unsupported command\r\n");
        assert_eq!(replies[2], "502 unsupported command\r\n");
        assert_eq!(replies[3], "250 ok\r\n");
        assert_eq!(session.recipients(), &[address("b@localhost")]);
    }
}
