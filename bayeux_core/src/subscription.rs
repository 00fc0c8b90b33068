//! Client-side subscriptions and channel glob matching.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::message::Message;

/// A registered interest in a channel, paired with a local delivery sink.
///
/// Subscriptions survive handshakes: on a client-id rotation the client
/// resubmits each one, and the delivery channel keeps flowing to the same
/// consumer. `stop_polling` tells the per-subscription keepalive task to
/// exit; it is set on transport teardown and cleared before a resubscribe.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    sender: mpsc::Sender<Message>,
    polling: AtomicBool,
    stop_polling: AtomicBool,
}

impl Subscription {
    /// A subscription on `channel` delivering into `sender`.
    #[must_use]
    pub fn new(channel: impl Into<String>, sender: mpsc::Sender<Message>) -> Self {
        Subscription {
            channel: channel.into(),
            sender,
            polling: AtomicBool::new(false),
            stop_polling: AtomicBool::new(false),
        }
    }

    /// The channel pattern this subscription was registered with.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether an inbound frame on `channel` belongs to this subscription.
    #[must_use]
    pub fn matches(&self, channel: &str) -> bool {
        glob_match(&self.channel, channel)
    }

    /// Whether a keepalive task is currently running for this subscription.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    pub(crate) fn set_polling(&self, polling: bool) {
        self.polling.store(polling, Ordering::Release);
    }

    /// Tell the keepalive task to exit at its next iteration.
    pub fn stop(&self) {
        self.stop_polling.store(true, Ordering::Release);
    }

    /// Whether [`stop`](Subscription::stop) has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_polling.load(Ordering::Acquire)
    }

    pub(crate) fn reset_stop(&self) {
        self.stop_polling.store(false, Ordering::Release);
    }

    /// Forward an inbound frame to the consumer. Fails when the consumer
    /// has dropped its receiver.
    pub(crate) async fn deliver(
        &self,
        message: Message,
    ) -> Result<(), mpsc::error::SendError<Message>> {
        self.sender.send(message).await
    }
}

/// Shell-style glob matching for channel names.
///
/// `*` matches any run of non-`/` characters, `?` any single non-`/`
/// character, and `[…]` a character class with ranges and `^` negation.
/// Wildcards never cross a `/`, so `/user/*` matches `/user/1` but not
/// `/user/1/typing`. A malformed pattern matches nothing.
#[must_use]
pub fn glob_match(pattern: &str, name: &str) -> bool {
    match_bytes(pattern.as_bytes(), name.as_bytes())
}

fn match_bytes(pattern: &[u8], name: &[u8]) -> bool {
    let Some((&op, rest)) = pattern.split_first() else {
        return name.is_empty();
    };

    match op {
        b'*' => {
            if match_bytes(rest, name) {
                return true;
            }
            for skip in 1..=name.len() {
                if name[skip - 1] == b'/' {
                    return false;
                }
                if match_bytes(rest, &name[skip..]) {
                    return true;
                }
            }
            false
        }
        b'?' => match name.split_first() {
            Some((&c, tail)) if c != b'/' => match_bytes(rest, tail),
            _ => false,
        },
        b'[' => match name.split_first() {
            Some((&c, tail)) if c != b'/' => match match_class(rest, c) {
                Some((rest, true)) => match_bytes(rest, tail),
                _ => false,
            },
            _ => false,
        },
        literal => match name.split_first() {
            Some((&c, tail)) if c == literal => match_bytes(rest, tail),
            _ => false,
        },
    }
}

/// Match `c` against the class body following `[`. Returns the remainder of
/// the pattern after `]` and whether the class matched, or `None` when the
/// class is unterminated.
fn match_class(body: &[u8], c: u8) -> Option<(&[u8], bool)> {
    let (negated, mut rest) = match body.split_first() {
        Some((&b'^', tail)) => (true, tail),
        _ => (false, body),
    };

    let mut matched = false;
    let mut first = true;
    loop {
        match rest.split_first() {
            None => return None,
            Some((&b']', tail)) if !first => {
                return Some((tail, matched != negated));
            }
            Some((&lo, tail)) => {
                let (hi, tail) = match tail {
                    [b'-', hi, more @ ..] if *hi != b']' => (*hi, more),
                    _ => (lo, tail),
                };
                if lo <= c && c <= hi {
                    matched = true;
                }
                rest = tail;
            }
        }
        first = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_channels_match_exactly() {
        assert!(glob_match("/user/42", "/user/42"));
        assert!(!glob_match("/user/42", "/user/43"));
        assert!(!glob_match("/user/42", "/user/421"));
    }

    #[test]
    fn star_matches_within_a_segment() {
        assert!(glob_match("/user/*", "/user/42"));
        assert!(glob_match("/group/*", "/group/abc123"));
        assert!(!glob_match("/user/*", "/user/42/typing"));
        assert!(!glob_match("/user/*", "/group/42"));
    }

    #[test]
    fn question_mark_matches_a_single_character() {
        assert!(glob_match("/user/?", "/user/1"));
        assert!(!glob_match("/user/?", "/user/12"));
        assert!(!glob_match("/user/?", "/user/"));
    }

    #[test]
    fn character_classes_and_negation() {
        assert!(glob_match("/user/[0-9]", "/user/7"));
        assert!(!glob_match("/user/[0-9]", "/user/x"));
        assert!(glob_match("/user/[^0-9]", "/user/x"));
        assert!(glob_match("/user/[abc]*", "/user/b52"));
    }

    #[test]
    fn malformed_patterns_match_nothing() {
        assert!(!glob_match("/user/[0-9", "/user/7"));
    }

    #[test]
    fn empty_pattern_only_matches_empty_name() {
        assert!(glob_match("", ""));
        assert!(!glob_match("", "/user/1"));
    }
}
