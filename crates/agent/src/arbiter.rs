//! Per-agent decision on whether an incoming message deserves a reply.
//!
//! The checks run in a fixed order and the first failing one wins:
//!
//! 1. an agent never answers itself
//! 2. the message must be relevant (system notice, direct reply, capability keyword,
//!    `relevance=high` hint, temperament heuristic, or a lucky overhear draw)
//! 3. a probability draw against the agent's base response chance
//! 4. the anti-spam cap over the recent history window
//!
//! Everything here is pure apart from the injected [`DrawSource`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use parley_core::config::ArbiterConfig;
use parley_core::domain::message::{Message, MessageKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::profile::{AgentProfile, Personality};

/// Uniform draws in `[0, 1)`.
pub trait DrawSource: Send + Sync {
    fn draw(&self) -> f64;
}

/// Fresh thread-local randomness on every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngDraws;

impl DrawSource for ThreadRngDraws {
    fn draw(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Reproducible sequence for simulations.
#[derive(Debug)]
pub struct SeededDraws {
    rng: Mutex<StdRng>,
}

impl SeededDraws {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl DrawSource for SeededDraws {
    fn draw(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen::<f64>(),
            Err(poisoned) => poisoned.into_inner().gen::<f64>(),
        }
    }
}

/// Replays a fixed list of draws, then repeats `fallback` forever.
#[derive(Debug)]
pub struct ScriptedDraws {
    draws: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl ScriptedDraws {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self { draws: Mutex::new(draws.into_iter().collect()), fallback: 0.0 }
    }

    pub fn constant(value: f64) -> Self {
        Self::new([]).with_fallback(value)
    }

    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn remaining(&self) -> usize {
        match self.draws.lock() {
            Ok(draws) => draws.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl DrawSource for ScriptedDraws {
    fn draw(&self) -> f64 {
        let next = match self.draws.lock() {
            Ok(mut draws) => draws.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or(self.fallback)
    }
}

/// Why a message counted as relevant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Relevance {
    SystemNotice,
    DirectReply,
    Capability(String),
    HighRelevanceHint,
    Temperament,
    Overheard,
}

impl Relevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemNotice => "system_notice",
            Self::DirectReply => "direct_reply",
            Self::Capability(_) => "capability",
            Self::HighRelevanceHint => "relevance_hint",
            Self::Temperament => "temperament",
            Self::Overheard => "overheard",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Suppression {
    OwnMessage,
    NotRelevant,
    ProbabilityGate { draw: f64, threshold: f64 },
    SpamCap { authored: usize, window: usize },
}

impl Suppression {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::OwnMessage => "own_message",
            Self::NotRelevant => "not_relevant",
            Self::ProbabilityGate { .. } => "probability_gate",
            Self::SpamCap { .. } => "spam_cap",
        }
    }
}

/// Tone guidance handed to the reply composer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleHint {
    pub personality: Personality,
    pub trigger_kind: MessageKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    Respond { style_hint: StyleHint, relevance: Relevance },
    Suppress(Suppression),
}

impl Decision {
    pub fn respond(&self) -> bool {
        matches!(self, Self::Respond { .. })
    }

    pub fn style_hint(&self) -> Option<&StyleHint> {
        match self {
            Self::Respond { style_hint, .. } => Some(style_hint),
            Self::Suppress(_) => None,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Respond { relevance, .. } => relevance.as_str(),
            Self::Suppress(suppression) => suppression.reason_code(),
        }
    }
}

pub struct ResponseArbiter {
    config: ArbiterConfig,
    draws: Arc<dyn DrawSource>,
}

impl Default for ResponseArbiter {
    fn default() -> Self {
        Self::new(ArbiterConfig::default(), Arc::new(ThreadRngDraws))
    }
}

impl ResponseArbiter {
    pub fn new(config: ArbiterConfig, draws: Arc<dyn DrawSource>) -> Self {
        Self { config, draws }
    }

    /// How many trailing history entries [`ResponseArbiter::decide`] looks at.
    pub fn history_window(&self) -> usize {
        self.config.history_window
    }

    /// `history` is the conversation tail, oldest first. Only the last `history_window` entries
    /// count towards the anti-spam cap.
    pub fn decide(
        &self,
        message: &Message,
        profile: &AgentProfile,
        history: &[Message],
    ) -> Decision {
        if message.sender_id == profile.id {
            return Decision::Suppress(Suppression::OwnMessage);
        }

        let Some(relevance) = self.relevance(message, profile) else {
            return Decision::Suppress(Suppression::NotRelevant);
        };

        let draw = self.draws.draw();
        let threshold = profile.base_response_probability;
        if draw >= threshold {
            return Decision::Suppress(Suppression::ProbabilityGate { draw, threshold });
        }

        let window = self.config.history_window;
        let tail = &history[history.len().saturating_sub(window)..];
        let authored = tail.iter().filter(|entry| entry.sender_id == profile.id).count();
        if authored >= self.config.spam_cap {
            return Decision::Suppress(Suppression::SpamCap { authored, window });
        }

        Decision::Respond {
            style_hint: StyleHint {
                personality: profile.personality.clone(),
                trigger_kind: message.kind,
            },
            relevance,
        }
    }

    fn relevance(&self, message: &Message, profile: &AgentProfile) -> Option<Relevance> {
        if message.kind == MessageKind::System {
            return Some(Relevance::SystemNotice);
        }
        if message.reply_to.as_ref() == Some(&profile.id) {
            return Some(Relevance::DirectReply);
        }
        if let Some(capability) = profile.matching_capability(&message.text) {
            return Some(Relevance::Capability(capability.to_owned()));
        }
        if message.custom.get("relevance").map(String::as_str) == Some("high") {
            return Some(Relevance::HighRelevanceHint);
        }
        if profile.personality.is_drawn_to(&message.text) {
            return Some(Relevance::Temperament);
        }
        if self.draws.draw() < self.config.overhear_chance {
            return Some(Relevance::Overheard);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::config::ArbiterConfig;
    use parley_core::domain::message::{Message, MessageKind};

    use super::{
        Decision, DrawSource, Relevance, ResponseArbiter, ScriptedDraws, SeededDraws, Suppression,
    };
    use crate::profile::{AgentProfile, Personality};

    fn make_arbiter(draws: ScriptedDraws) -> (ResponseArbiter, Arc<ScriptedDraws>) {
        let draws = Arc::new(draws);
        (ResponseArbiter::new(ArbiterConfig::default(), draws.clone()), draws)
    }

    fn profile(probability: f64) -> AgentProfile {
        AgentProfile::new("agent-7", "Ada", Personality::default())
            .with_capabilities(["app"])
            .with_response_probability(probability)
    }

    fn user_message(text: &str) -> Message {
        Message::new(MessageKind::User, "main-conversation", "user", text)
    }

    fn agent_message(sender: &str) -> Message {
        Message::new(MessageKind::Agent, "main-conversation", sender, "...")
    }

    #[test]
    fn capability_keyword_makes_message_relevant() {
        let (arbiter, draws) = make_arbiter(ScriptedDraws::new([0.0]));
        let message = user_message("I'm building a web app with React");

        let decision = arbiter.decide(&message, &profile(0.7), &[]);

        assert!(decision.respond());
        assert!(matches!(
            decision,
            Decision::Respond { relevance: Relevance::Capability(ref c), .. } if c == "app"
        ));
        let hint = decision.style_hint().expect("style hint on respond");
        assert_eq!(hint.trigger_kind, MessageKind::User);
        assert_eq!(draws.remaining(), 0);
    }

    #[test]
    fn direct_reply_passes_relevance_but_zero_probability_refuses() {
        let (arbiter, _) = make_arbiter(ScriptedDraws::new([0.0]));
        let message = user_message("nothing in particular").with_reply_to("agent-7");

        let decision = arbiter.decide(&message, &profile(0.0), &[]);

        assert_eq!(
            decision,
            Decision::Suppress(Suppression::ProbabilityGate { draw: 0.0, threshold: 0.0 })
        );
    }

    #[test]
    fn own_messages_are_always_suppressed() {
        let (arbiter, draws) = make_arbiter(ScriptedDraws::constant(0.0));
        let own = Message::new(MessageKind::System, "main-conversation", "agent-7", "app");

        assert_eq!(
            arbiter.decide(&own, &profile(1.0), &[]),
            Decision::Suppress(Suppression::OwnMessage)
        );
        assert_eq!(draws.remaining(), 0);
    }

    #[test]
    fn system_messages_are_relevant_to_everyone_else() {
        let (arbiter, _) = make_arbiter(ScriptedDraws::new([0.5]));
        let notice = Message::new(MessageKind::System, "main-conversation", "system", "restart");

        let decision = arbiter.decide(&notice, &profile(0.6), &[]);
        assert_eq!(decision.reason_code(), "system_notice");
    }

    #[test]
    fn relevance_hint_and_temperament_skip_the_overhear_draw() {
        let (arbiter, draws) = make_arbiter(ScriptedDraws::new([0.1]));
        let hinted = user_message("zzz").with_custom("relevance", "high");
        assert_eq!(arbiter.decide(&hinted, &profile(1.0), &[]).reason_code(), "relevance_hint");
        assert_eq!(draws.remaining(), 0);

        let (arbiter, _) = make_arbiter(ScriptedDraws::new([0.1]));
        let social = AgentProfile::new("agent-9", "Sam", Personality::Social);
        let decision = arbiter.decide(&user_message("hey all"), &social, &[]);
        assert_eq!(decision.reason_code(), "temperament");
    }

    #[test]
    fn irrelevant_message_depends_on_overhear_draw() {
        let (arbiter, _) = make_arbiter(ScriptedDraws::new([0.29, 0.0]));
        let decision = arbiter.decide(&user_message("the weather"), &profile(1.0), &[]);
        assert_eq!(decision.reason_code(), "overheard");

        let (arbiter, _) = make_arbiter(ScriptedDraws::new([0.3]));
        let decision = arbiter.decide(&user_message("the weather"), &profile(1.0), &[]);
        assert_eq!(decision, Decision::Suppress(Suppression::NotRelevant));
    }

    #[test]
    fn spam_cap_counts_only_the_history_window() {
        let (arbiter, _) = make_arbiter(ScriptedDraws::constant(0.0));
        let message = user_message("more about the app");

        let crowded = vec![
            agent_message("agent-7"),
            user_message("a"),
            agent_message("agent-7"),
            user_message("b"),
            user_message("c"),
        ];
        assert_eq!(
            arbiter.decide(&message, &profile(1.0), &crowded),
            Decision::Suppress(Suppression::SpamCap { authored: 2, window: 5 })
        );

        let mut older = vec![agent_message("agent-7")];
        older.extend([user_message("a"), agent_message("agent-7")]);
        older.extend((0..4).map(|index| user_message(&index.to_string())));
        assert!(arbiter.decide(&message, &profile(1.0), &older).respond());
    }

    #[test]
    fn seeded_draws_are_reproducible_and_in_range() {
        let first = SeededDraws::new(42);
        let second = SeededDraws::new(42);
        for _ in 0..32 {
            let draw = first.draw();
            assert!((0.0..1.0).contains(&draw));
            assert_eq!(draw, second.draw());
        }
    }
}
