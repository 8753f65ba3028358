use std::fmt;
use std::time::Duration;

use parley_core::config::AgentConfig;
use parley_core::domain::message::ParticipantId;
use serde::{Deserialize, Serialize};

const CURIOUS_WORDS: &[&str] = &["what", "how", "why", "who", "where", "when", "which"];
const HELPFUL_WORDS: &[&str] =
    &["help", "helps", "helping", "problem", "problems", "issue", "issues", "stuck"];
const GREETING_WORDS: &[&str] = &["hello", "hi", "hey", "greetings", "howdy", "morning"];
const TECHNICAL_WORDS: &[&str] = &[
    "code",
    "coding",
    "programming",
    "software",
    "system",
    "systems",
    "algorithm",
    "algorithms",
    "data",
    "function",
    "method",
    "api",
    "database",
    "bug",
];
const PHILOSOPHICAL_WORDS: &[&str] = &[
    "think",
    "believe",
    "feel",
    "meaning",
    "purpose",
    "life",
    "existence",
    "truth",
    "reality",
    "consciousness",
];

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Personality {
    Curious,
    Helpful,
    Social,
    Technical,
    Philosophical,
    Other(String),
}

impl Personality {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "curious" => Self::Curious,
            "helpful" => Self::Helpful,
            "social" => Self::Social,
            "technical" => Self::Technical,
            "philosophical" => Self::Philosophical,
            "" => Self::Other("default".to_owned()),
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Curious => "curious",
            Self::Helpful => "helpful",
            Self::Social => "social",
            Self::Technical => "technical",
            Self::Philosophical => "philosophical",
            Self::Other(label) => label,
        }
    }

    /// Whether the text contains something this temperament reacts to. Words are matched whole so
    /// that `hi` does not fire on `this`.
    pub fn is_drawn_to(&self, text: &str) -> bool {
        let vocabulary = match self {
            Self::Curious if text.contains('?') => return true,
            Self::Curious => CURIOUS_WORDS,
            Self::Helpful => HELPFUL_WORDS,
            Self::Social => GREETING_WORDS,
            Self::Technical => TECHNICAL_WORDS,
            Self::Philosophical => PHILOSOPHICAL_WORDS,
            Self::Other(_) => return false,
        };
        words(text).any(|word| vocabulary.contains(&word.as_str()))
    }

    /// Multiplier applied to the base pacing delay when personality-scaled pacing is enabled.
    pub fn pacing_factor(&self) -> f64 {
        match self {
            Self::Social => 0.5,
            Self::Curious => 0.75,
            Self::Helpful | Self::Other(_) => 1.0,
            Self::Technical => 1.25,
            Self::Philosophical => 1.5,
        }
    }

    pub fn scale_pacing(&self, base: Duration) -> Duration {
        base.mul_f64(self.pacing_factor())
    }
}

impl Default for Personality {
    fn default() -> Self {
        Self::Other("default".to_owned())
    }
}

impl From<String> for Personality {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Personality> for String {
    fn from(value: Personality) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric() && ch != '\'')
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

/// Everything the arbiter and the reply composer need to know about one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: ParticipantId,
    pub name: String,
    pub capabilities: Vec<String>,
    pub personality: Personality,
    pub base_response_probability: f64,
    /// Free-form persona text added to model prompts.
    #[serde(default)]
    pub description: Option<String>,
}

impl AgentProfile {
    pub fn new(
        id: impl Into<ParticipantId>,
        name: impl Into<String>,
        personality: Personality,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            personality,
            base_response_probability: parley_core::config::DEFAULT_RESPONSE_CHANCE,
            description: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities
            .into_iter()
            .map(Into::into)
            .filter(|capability: &String| !capability.trim().is_empty())
            .collect();
        self
    }

    /// Clamped into `[0, 1]`; NaN counts as never responding.
    pub fn with_response_probability(mut self, probability: f64) -> Self {
        self.base_response_probability =
            if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) };
        self
    }

    pub fn matching_capability(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.capabilities
            .iter()
            .find(|capability| lowered.contains(&capability.to_lowercase()))
            .map(String::as_str)
    }
}

impl From<&AgentConfig> for AgentProfile {
    fn from(config: &AgentConfig) -> Self {
        let personality = Personality::parse(&config.personality);
        Self::new(config.id.as_str(), config.display_name(), personality)
            .with_capabilities(config.interests.iter().cloned())
            .with_response_probability(config.effective_response_chance())
            .with_description(config.description.clone())
    }
}
