//! Control protocol codec.
//!
//! Replies are line based. Every line starts with a three-digit status code
//! followed by a separator: `-` for a mid-reply line, `+` for a line that
//! opens a data block terminated by a lone `.`, and a space for the final
//! line. Codes in the 6xx range mark asynchronous events.
//!
//! ```text
//! 250-status/circuit-established=1
//! 250 OK
//! 650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=45 TAG=requesting_descriptors SUMMARY="Asking for relay descriptors"
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::iter::Peekable;
use std::str::Chars;

use super::error::{ControlError, ControlResult};

/// Status code of a successful synchronous reply.
pub const OK_CODE: u16 = 250;

/// A complete reply from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status code shared by the reply's lines.
    pub code: u16,
    /// Line texts without code and separator. A data block is appended to
    /// the line that opened it, separated by a newline.
    pub lines: Vec<String>,
}

impl Reply {
    /// Returns true for a `250` reply.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code == OK_CODE
    }

    /// Returns true for an asynchronous event (6xx).
    #[must_use]
    pub const fn is_async(&self) -> bool {
        self.code >= 600 && self.code < 700
    }

    /// Text of the final line.
    #[must_use]
    pub fn message(&self) -> &str {
        self.lines.last().map_or("", String::as_str)
    }

    /// Converts a non-`250` reply into [`ControlError::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns the rejection if the status code is not `250`.
    pub fn into_result(self) -> ControlResult<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ControlError::Rejected {
                code: self.code,
                message: self.message().to_string(),
            })
        }
    }

    /// Collects `key=value` lines, as returned by `GETINFO`.
    #[must_use]
    pub fn values(&self) -> HashMap<String, String> {
        self.lines
            .iter()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let value = value.strip_prefix('\n').unwrap_or(value);
                (key.to_string(), value.to_string())
            })
            .collect()
    }
}

/// Incremental reply assembler fed one line at a time.
#[derive(Debug, Default)]
pub struct ReplyParser {
    code: Option<u16>,
    lines: Vec<String>,
    data: Option<String>,
}

impl ReplyParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (without its line terminator, a trailing `\r` is
    /// tolerated). Returns the reply once its final line arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Protocol`] for lines that do not follow the
    /// reply grammar. The parser is reset afterwards.
    pub fn push(&mut self, line: &str) -> ControlResult<Option<Reply>> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut data) = self.data.take() {
            if line == "." {
                self.lines.push(data);
            } else {
                let content = if line.starts_with("..") {
                    line.get(1..).unwrap_or(line)
                } else {
                    line
                };
                data.push('\n');
                data.push_str(content);
                self.data = Some(data);
            }
            return Ok(None);
        }

        let result = self.push_status_line(line);
        if result.is_err() {
            *self = Self::default();
        }
        result
    }

    fn push_status_line(&mut self, line: &str) -> ControlResult<Option<Reply>> {
        let (Some(code_text), Some(separator), Some(text)) =
            (line.get(..3), line.get(3..4), line.get(4..))
        else {
            return Err(ControlError::Protocol(format!("line too short: {line:?}")));
        };
        if !code_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ControlError::Protocol(format!("bad status code: {line:?}")));
        }
        let code: u16 = code_text
            .parse()
            .map_err(|_| ControlError::Protocol(format!("bad status code: {line:?}")))?;
        let code = *self.code.get_or_insert(code);

        match separator {
            "-" => {
                self.lines.push(text.to_string());
                Ok(None)
            }
            "+" => {
                self.data = Some(text.to_string());
                Ok(None)
            }
            " " => {
                self.lines.push(text.to_string());
                self.code = None;
                Ok(Some(Reply {
                    code,
                    lines: std::mem::take(&mut self.lines),
                }))
            }
            other => Err(ControlError::Protocol(format!(
                "unknown separator {other:?} in {line:?}"
            ))),
        }
    }
}

/// An asynchronous event parsed from a 6xx reply.
///
/// The first word is the event kind. Bare words that follow are kept in
/// order as positional arguments; `KEY=VALUE` words (with optionally quoted
/// values) become named arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    kind: String,
    positional: Vec<String>,
    arguments: HashMap<String, String>,
}

impl ControlEvent {
    /// Parses an event line such as
    /// `STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=10 TAG=conn`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Protocol`] if the line is empty or contains an
    /// unterminated quoted string.
    pub fn parse(text: &str) -> ControlResult<Self> {
        let mut tokens = tokenize(text)?.into_iter();
        let Some(Token::Word(kind)) = tokens.next() else {
            return Err(ControlError::Protocol(format!("event without kind: {text:?}")));
        };

        let mut positional = Vec::new();
        let mut arguments = HashMap::new();
        for token in tokens {
            match token {
                Token::Word(word) => positional.push(word),
                Token::Pair(key, value) => {
                    arguments.insert(key, value);
                }
            }
        }

        Ok(Self {
            kind,
            positional,
            arguments,
        })
    }

    /// Parses the event carried by an asynchronous reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is not asynchronous or its first line
    /// does not parse.
    pub fn from_reply(reply: &Reply) -> ControlResult<Self> {
        if !reply.is_async() {
            return Err(ControlError::Protocol(format!(
                "reply {} is not an event",
                reply.code
            )));
        }
        let first = reply.lines.first().map_or("", String::as_str);
        // Multi-line events carry their payload in the first line only.
        Self::parse(first.lines().next().unwrap_or(""))
    }

    /// The event kind, e.g. `STATUS_CLIENT`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Bare words after the kind.
    #[must_use]
    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Looks up a `KEY=VALUE` argument.
    #[must_use]
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).map(String::as_str)
    }

    /// For `STATUS_*` events, the action word after the severity
    /// (`BOOTSTRAP`, `CIRCUIT_ESTABLISHED`, ...).
    #[must_use]
    pub fn status_action(&self) -> Option<&str> {
        if !self.kind.starts_with("STATUS_") {
            return None;
        }
        self.positional.get(1).map(String::as_str)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Pair(String, String),
}

fn tokenize(text: &str) -> ControlResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.next_if_eq(&' ').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut word = String::new();
        let mut value = None;
        while let Some(c) = chars.next_if(|&c| c != ' ') {
            if c == '=' && is_keyword(&word) {
                value = Some(if chars.next_if_eq(&'"').is_some() {
                    read_quoted(&mut chars)?
                } else {
                    let mut bare = String::new();
                    while let Some(c) = chars.next_if(|&c| c != ' ') {
                        bare.push(c);
                    }
                    bare
                });
                break;
            }
            word.push(c);
        }

        tokens.push(match value {
            Some(value) => Token::Pair(word, value),
            None => Token::Word(word),
        });
    }

    Ok(tokens)
}

fn is_keyword(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/'))
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>) -> ControlResult<String> {
    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some(escaped) => value.push(escaped),
                None => break,
            },
            other => value.push(other),
        }
    }
    Err(ControlError::Protocol("unterminated quoted string".to_string()))
}

/// Wraps a value in double quotes, escaping backslashes and quotes.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Formats a `SETCONF` command. Repeating a key sets a list value.
#[must_use]
pub fn set_config_command(pairs: &[(&str, &str)]) -> String {
    let mut command = String::from("SETCONF");
    for (key, value) in pairs {
        let _ = write!(command, " {key}={}", quote(value));
    }
    command
}

/// Formats a `RESETCONF` command.
#[must_use]
pub fn reset_config_command(key: &str) -> String {
    format!("RESETCONF {key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut ReplyParser, lines: &[&str]) -> Option<Reply> {
        let mut reply = None;
        for line in lines {
            reply = parser.push(line).unwrap();
        }
        reply
    }

    #[test]
    fn parses_single_line_ok() {
        let mut parser = ReplyParser::new();
        let reply = parser.push("250 OK\r").unwrap().unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.message(), "OK");
    }

    #[test]
    fn parses_multi_line_reply() {
        let mut parser = ReplyParser::new();
        let reply = feed(
            &mut parser,
            &["250-status/circuit-established=1", "250 OK"],
        )
        .unwrap();

        assert_eq!(reply.lines.len(), 2);
        assert_eq!(
            reply.values().get("status/circuit-established").map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn mid_lines_do_not_complete_a_reply() {
        let mut parser = ReplyParser::new();
        assert_eq!(parser.push("250-version=0.4.8.9").unwrap(), None);
    }

    #[test]
    fn parses_data_block_with_dot_unstuffing() {
        let mut parser = ReplyParser::new();
        let reply = feed(
            &mut parser,
            &["250+config-text=", "Bridge one", "..dotted", ".", "250 OK"],
        )
        .unwrap();

        assert_eq!(
            reply.values().get("config-text").map(String::as_str),
            Some("Bridge one\n.dotted")
        );
    }

    #[test]
    fn error_reply_becomes_rejection() {
        let mut parser = ReplyParser::new();
        let reply = parser
            .push("515 Authentication failed: Wrong length on authentication cookie.")
            .unwrap()
            .unwrap();

        assert!(matches!(
            reply.into_result(),
            Err(ControlError::Rejected { code: 515, .. })
        ));
    }

    #[test]
    fn rejects_short_and_malformed_lines() {
        let mut parser = ReplyParser::new();
        assert!(parser.push("25").is_err());
        assert!(parser.push("abc OK").is_err());
        assert!(parser.push("250*OK").is_err());
    }

    #[test]
    fn parser_recovers_after_malformed_line() {
        let mut parser = ReplyParser::new();
        parser.push("250-partial").unwrap();
        assert!(parser.push("garbage").is_err());
        let reply = parser.push("250 OK").unwrap().unwrap();
        assert_eq!(reply.lines, vec!["OK".to_string()]);
    }

    #[test]
    fn async_reply_is_detected() {
        let mut parser = ReplyParser::new();
        let reply = parser
            .push("650 STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED")
            .unwrap()
            .unwrap();
        assert!(reply.is_async());
        assert!(!reply.is_ok());
    }

    #[test]
    fn parses_bootstrap_event() {
        let event = ControlEvent::parse(
            r#"STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=45 TAG=requesting_descriptors SUMMARY="Asking for relay descriptors""#,
        )
        .unwrap();

        assert_eq!(event.kind(), "STATUS_CLIENT");
        assert_eq!(event.status_action(), Some("BOOTSTRAP"));
        assert_eq!(event.argument("PROGRESS"), Some("45"));
        assert_eq!(event.argument("SUMMARY"), Some("Asking for relay descriptors"));
    }

    #[test]
    fn parses_escaped_quotes() {
        let event = ControlEvent::parse(r#"STATUS_GENERAL WARN BUG REASON="a \"quoted\" \\ word""#)
            .unwrap();
        assert_eq!(event.argument("REASON"), Some(r#"a "quoted" \ word"#));
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(ControlEvent::parse(r#"STATUS_CLIENT NOTICE X SUMMARY="open"#).is_err());
    }

    #[test]
    fn empty_event_is_an_error() {
        assert!(ControlEvent::parse("   ").is_err());
    }

    #[test]
    fn status_action_only_for_status_events() {
        let event = ControlEvent::parse("CIRC 12 BUILT").unwrap();
        assert_eq!(event.status_action(), None);
        assert_eq!(event.positional(), ["12".to_string(), "BUILT".to_string()]);
    }

    #[test]
    fn event_from_reply_uses_first_line() {
        let reply = Reply {
            code: 650,
            lines: vec!["STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED".to_string()],
        };
        let event = ControlEvent::from_reply(&reply).unwrap();
        assert_eq!(event.status_action(), Some("CIRCUIT_ESTABLISHED"));
    }

    #[test]
    fn event_from_sync_reply_is_rejected() {
        let reply = Reply {
            code: 250,
            lines: vec!["OK".to_string()],
        };
        assert!(ControlEvent::from_reply(&reply).is_err());
    }

    #[test]
    fn quote_escapes_special_characters() {
        assert_eq!(quote(r#"a "b" \c"#), r#""a \"b\" \\c""#);
        assert_eq!(quote("line\nbreak"), r#""line\nbreak""#);
    }

    #[test]
    fn set_config_command_repeats_keys() {
        let command = set_config_command(&[("Bridge", "obfs4 a"), ("Bridge", "obfs4 b")]);
        assert_eq!(command, r#"SETCONF Bridge="obfs4 a" Bridge="obfs4 b""#);
    }

    #[test]
    fn reset_config_command_format() {
        assert_eq!(reset_config_command("Bridge"), "RESETCONF Bridge");
    }
}
