//! Agent side of parley - deciding, pacing, and composing replies.
//!
//! Every agent runs as its own [`runtime::AgentRuntime`] with a private bus subscription. For each
//! message it sees, the runtime:
//! 1. **Decides** (`arbiter`) - self-suppression, relevance, probability, anti-spam
//! 2. **Paces** - waits before speaking so replies do not arrive instantly
//! 3. **Composes** (`llm`) - template or chat-model text from the recent history
//! 4. **Checks** (`guardrails`) - trims and refuses empty, oversized, or echoed drafts
//! 5. **Publishes** - an `Agent` message back onto the same topic
//!
//! # Key Types
//!
//! - `AgentProfile` - identity, capabilities, personality, base response chance
//! - `ResponseArbiter` - pure decision function with an injectable `DrawSource`
//! - `TextGenerator` - pluggable reply backend (templates, Ollama, OpenAI-compatible)
//! - `AgentFleet` - all configured runtimes, started and stopped together
//!
//! Agents never coordinate directly. The only shared state is the conversation store, and the
//! only channel between agents is the bus.

pub mod arbiter;
pub mod fleet;
pub mod guardrails;
pub mod llm;
pub mod profile;
pub mod runtime;

pub use arbiter::{
    Decision, DrawSource, Relevance, ResponseArbiter, ScriptedDraws, SeededDraws, StyleHint,
    Suppression, ThreadRngDraws,
};
pub use fleet::{AgentFleet, FleetError};
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use llm::{
    generator_from_config, GenerationError, GenerationRequest, HttpTextGenerator,
    TemplateTextGenerator, TextGenerator,
};
pub use profile::{AgentProfile, Personality};
pub use runtime::{
    AgentRuntime, ReplyOutcome, RuntimeDeps, RuntimeError, RuntimeSettings, RuntimeState,
};
