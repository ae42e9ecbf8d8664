//! Response matching rules for the command/response engine.
//!
//! The instrument acknowledges a command by echoing it back. Network bindings
//! additionally emit a single ACK byte. After a `BREAK` the instrument prints
//! its banner instead of an echo, so the break command is always judged by the
//! banner text regardless of the binding.

use crate::protocol::commands::{ACK, BANNER, is_break};

/// How a binding decides that a command was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EchoRule {
    /// The received text must contain the command (case-insensitive) and be
    /// at least as long as it.
    #[default]
    Echo,
    /// The received text must contain the ACK byte (0x06).
    Ack,
}

/// Outcome of matching received text against a sent command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoVerdict {
    /// Nothing has been received yet.
    NoData,
    /// The response satisfies the rule.
    Accepted,
    /// Something came back but it does not satisfy the rule.
    Mismatch,
}

impl EchoVerdict {
    /// Whether the command counts as confirmed.
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// Whether `received` echoes `sent` (case-folded containment plus length).
pub fn echo_matches(sent: &str, received: &str) -> bool {
    let sent = sent.trim();
    if received.len() < sent.len() {
        return false;
    }
    received
        .to_ascii_lowercase()
        .contains(&sent.to_ascii_lowercase())
}

/// Whether `received` carries the instrument banner.
pub fn banner_matches(received: &str) -> bool {
    received
        .to_ascii_lowercase()
        .contains(&BANNER.to_ascii_lowercase())
}

/// Whether `received` contains the ACK byte.
pub fn ack_matches(received: &str) -> bool {
    received.as_bytes().contains(&ACK)
}

/// Judge the text received since `sent` was written.
pub fn evaluate(rule: EchoRule, sent: &str, received: &str) -> EchoVerdict {
    if received.is_empty() {
        return EchoVerdict::NoData;
    }

    let accepted = if is_break(sent) {
        banner_matches(received)
    } else {
        match rule {
            EchoRule::Echo => echo_matches(sent, received),
            EchoRule::Ack => ack_matches(received),
        }
    };

    if accepted {
        EchoVerdict::Accepted
    } else {
        EchoVerdict::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_is_case_insensitive() {
        assert_eq!(
            evaluate(EchoRule::Echo, "cwpp 5", "CWPP 5\r\n"),
            EchoVerdict::Accepted
        );
    }

    #[test]
    fn test_echo_shorter_than_command_is_mismatch() {
        assert_eq!(evaluate(EchoRule::Echo, "CWPBL", "CWP"), EchoVerdict::Mismatch);
    }

    #[test]
    fn test_empty_response_is_no_data() {
        assert_eq!(evaluate(EchoRule::Echo, "START", ""), EchoVerdict::NoData);
        assert_eq!(evaluate(EchoRule::Ack, "START", ""), EchoVerdict::NoData);
    }

    #[test]
    fn test_ack_rule_needs_ack_byte() {
        assert!(evaluate(EchoRule::Ack, "START", "START\u{6}\r").is_accepted());
        assert_eq!(evaluate(EchoRule::Ack, "START", "START\r"), EchoVerdict::Mismatch);
        // The ACK alone is enough even without the echo.
        assert!(evaluate(EchoRule::Ack, "START", "\u{6}").is_accepted());
    }

    #[test]
    fn test_break_uses_banner_for_every_rule() {
        let reply = "RTIyBREAK\r...Rowe Technologies Inc....\r";
        assert!(evaluate(EchoRule::Echo, "BREAK", reply).is_accepted());
        assert!(evaluate(EchoRule::Ack, "BREAK", reply).is_accepted());
        assert_eq!(
            evaluate(EchoRule::Echo, "BREAK", "BREAK\r"),
            EchoVerdict::Mismatch
        );
    }
}
