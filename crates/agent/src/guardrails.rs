use parley_core::domain::message::Message;

pub const DEFAULT_MAX_REPLY_CHARS: usize = 600;

/// What to do with a drafted reply before it goes on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow { text: String },
    /// Publishable after a cosmetic fix.
    Degrade { text: String, reason_code: &'static str },
    Deny { reason_code: &'static str, detail: String },
}

impl GuardrailDecision {
    pub fn publishable_text(&self) -> Option<&str> {
        match self {
            Self::Allow { text } | Self::Degrade { text, .. } => Some(text),
            Self::Deny { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_reply_chars: usize,
    pub refuse_echo: bool,
    pub strip_speaker_prefix: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            max_reply_chars: DEFAULT_MAX_REPLY_CHARS,
            refuse_echo: true,
            strip_speaker_prefix: true,
        }
    }
}

impl GuardrailPolicy {
    /// `speaker_name` is the replying agent's display name. Models fed `"<sender>: <text>"`
    /// history tend to start their answer with their own name, which is removed here.
    pub fn evaluate(
        &self,
        draft: &str,
        trigger: &Message,
        speaker_name: &str,
    ) -> GuardrailDecision {
        let mut text = draft.trim();
        let mut stripped = false;
        if self.strip_speaker_prefix {
            if let Some(rest) = strip_prefix_ignore_case(text, speaker_name) {
                text = rest;
                stripped = true;
            }
        }

        if text.is_empty() {
            return GuardrailDecision::Deny {
                reason_code: "empty_reply",
                detail: "generator produced no text".to_string(),
            };
        }

        let length = text.chars().count();
        if length > self.max_reply_chars {
            return GuardrailDecision::Deny {
                reason_code: "reply_too_long",
                detail: format!("{length} characters exceeds limit of {}", self.max_reply_chars),
            };
        }

        if self.refuse_echo && normalize(text) == normalize(&trigger.text) {
            return GuardrailDecision::Deny {
                reason_code: "echoed_trigger",
                detail: "reply repeats the message it answers".to_string(),
            };
        }

        if stripped {
            GuardrailDecision::Degrade {
                text: text.to_string(),
                reason_code: "speaker_prefix_stripped",
            }
        } else {
            GuardrailDecision::Allow { text: text.to_string() }
        }
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let head = text.get(..name.len())?;
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    let rest = text[name.len()..].trim_start();
    rest.strip_prefix(':').map(str::trim_start)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|ch: char| ch.is_ascii_punctuation())
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use parley_core::domain::message::{Message, MessageKind};

    use super::{GuardrailDecision, GuardrailPolicy};

    fn trigger(text: &str) -> Message {
        Message::new(MessageKind::User, "main-conversation", "user", text)
    }

    #[test]
    fn plain_reply_is_allowed_and_trimmed() {
        let decision =
            GuardrailPolicy::default().evaluate("  Sounds fun!\n", &trigger("hello"), "Ada");
        assert_eq!(decision, GuardrailDecision::Allow { text: "Sounds fun!".to_string() });
    }

    #[test]
    fn own_name_prefix_is_stripped_as_degrade() {
        let decision =
            GuardrailPolicy::default().evaluate("ada:  Happy to help.", &trigger("help?"), "Ada");

        let (text, reason_code) = match decision {
            GuardrailDecision::Degrade { text, reason_code } => (text, reason_code),
            _ => (String::new(), ""),
        };
        assert_eq!(text, "Happy to help.");
        assert_eq!(reason_code, "speaker_prefix_stripped");
    }

    #[test]
    fn another_speakers_name_is_left_alone() {
        let decision =
            GuardrailPolicy::default().evaluate("Bob: agreed", &trigger("thoughts?"), "Ada");
        assert_eq!(decision.publishable_text(), Some("Bob: agreed"));
    }

    #[test]
    fn empty_and_prefix_only_replies_are_denied() {
        let policy = GuardrailPolicy::default();
        for draft in ["", "   ", "Ada:"] {
            let decision = policy.evaluate(draft, &trigger("hi"), "Ada");
            assert!(matches!(
                decision,
                GuardrailDecision::Deny { reason_code: "empty_reply", .. }
            ));
        }
    }

    #[test]
    fn overlong_reply_is_denied() {
        let policy = GuardrailPolicy { max_reply_chars: 10, ..GuardrailPolicy::default() };
        let decision = policy.evaluate("this is far too long", &trigger("hi"), "Ada");

        let (reason_code, detail) = match decision {
            GuardrailDecision::Deny { reason_code, detail } => (reason_code, detail),
            _ => ("", String::new()),
        };
        assert_eq!(reason_code, "reply_too_long");
        assert!(detail.contains("limit of 10"));
    }

    #[test]
    fn echo_of_trigger_is_denied_regardless_of_case_and_spacing() {
        let decision = GuardrailPolicy::default().evaluate(
            "what  is Rust",
            &trigger("What is rust?"),
            "Ada",
        );
        assert!(decision.publishable_text().is_none());
    }
}
