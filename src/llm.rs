//! Language-model connector.
//!
//! Strategies consume a narrow chat contract: `chat(messages, opts)` returns
//! the reply text plus the provider that produced it. The crate ships the
//! round-robin multi-provider pool with per-provider daily quotas and a
//! simulated client; a real HTTP transport is a drop-in `LlmClient` impl.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::market::Asset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

impl ChatOptions {
    /// Low-temperature options for the secretary's correction pass.
    pub fn corrective() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Every provider in the pool is over quota or failing.
    Exhausted,
    /// A single provider call failed.
    Provider { provider: String, message: String },
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Exhausted => write!(f, "all language-model providers exhausted"),
            LlmError::Provider { provider, message } => {
                write!(f, "provider {} failed: {}", provider, message)
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// The only contract strategies may rely on.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], opts: ChatOptions) -> Result<ChatReply, LlmError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Round-robin provider pool
// ============================================================================

struct ProviderSlot {
    client: Box<dyn LlmClient>,
    daily_quota: u32,
    used: AtomicU32,
}

/// Rotates across providers, skipping any over its daily quota, and falls
/// through to the next provider on failure. Full depletion surfaces as
/// `LlmError::Exhausted`.
pub struct ProviderPool {
    slots: Vec<ProviderSlot>,
    cursor: AtomicUsize,
}

impl ProviderPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn push(mut self, client: Box<dyn LlmClient>, daily_quota: u32) -> Self {
        self.slots.push(ProviderSlot {
            client,
            daily_quota,
            used: AtomicU32::new(0),
        });
        self
    }

    pub fn provider_count(&self) -> usize {
        self.slots.len()
    }

    /// Calls made against a named provider (quota accounting introspection).
    pub fn used(&self, provider: &str) -> u32 {
        self.slots
            .iter()
            .find(|s| s.client.name() == provider)
            .map(|s| s.used.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for ProviderPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ProviderPool {
    async fn chat(&self, messages: &[ChatMessage], opts: ChatOptions) -> Result<ChatReply, LlmError> {
        if self.slots.is_empty() {
            return Err(LlmError::Exhausted);
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut last_err = LlmError::Exhausted;
        for offset in 0..self.slots.len() {
            let slot = &self.slots[(start + offset) % self.slots.len()];
            if slot.used.load(Ordering::Relaxed) >= slot.daily_quota {
                continue;
            }
            slot.used.fetch_add(1, Ordering::Relaxed);
            match slot.client.chat(messages, opts).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    log::warn!(
                        "provider {} failed, trying next: {}",
                        slot.client.name(),
                        err
                    );
                    last_err = err;
                }
            }
        }
        match last_err {
            LlmError::Exhausted => Err(LlmError::Exhausted),
            other => Err(other),
        }
    }

    fn name(&self) -> &str {
        "pool"
    }
}

// ============================================================================
// Offline clients
// ============================================================================

/// Emits plausible (not always sensible) gladiator decisions as JSON.
///
/// The point is to exercise the full parse → guardrail → secretary path in
/// offline runs: stakes may fall outside class bounds and combat targets may
/// be garbled, exactly the traffic the repair pipeline exists for.
pub struct SimulatedClient {
    label: String,
    rng: Mutex<StdRng>,
}

impl SimulatedClient {
    pub fn new(label: impl Into<String>, seed: u64) -> Self {
        Self {
            label: label.into(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl LlmClient for SimulatedClient {
    async fn chat(&self, _messages: &[ChatMessage], _opts: ChatOptions) -> Result<ChatReply, LlmError> {
        let mut rng = self.rng.lock().unwrap();
        let asset = Asset::ALL[rng.random_range(0..4)];
        let direction = if rng.random_bool(0.5) { "UP" } else { "DOWN" };
        let stake = rng.random_range(1..80);
        let stance = match rng.random_range(0..10) {
            0..=3 => "NONE",
            4..=6 => "DEFEND",
            7..=8 => "ATTACK",
            _ => "SABOTAGE",
        };
        let content = format!(
            concat!(
                "{{\"prediction\":{{\"asset\":\"{}\",\"direction\":\"{}\",\"stake\":{}}},",
                "\"combatStance\":\"{}\",\"reasoning\":\"the tape says {} {}\"}}"
            ),
            asset, direction, stake, stance, asset, direction
        );
        Ok(ChatReply {
            content,
            provider: self.label.clone(),
        })
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Returns queued replies in order, then fails. Test double.
pub struct ScriptedClient {
    label: String,
    replies: Mutex<std::collections::VecDeque<String>>,
}

impl ScriptedClient {
    pub fn new(label: impl Into<String>, replies: Vec<String>) -> Self {
        Self {
            label: label.into(),
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat(&self, _messages: &[ChatMessage], _opts: ChatOptions) -> Result<ChatReply, LlmError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .map(|content| ChatReply {
                content,
                provider: self.label.clone(),
            })
            .ok_or_else(|| LlmError::Provider {
                provider: self.label.clone(),
                message: "script exhausted".to_string(),
            })
    }

    fn name(&self) -> &str {
        &self.label
    }
}
