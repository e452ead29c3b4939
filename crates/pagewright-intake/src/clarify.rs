//! Prompt clarification.
//!
//! Before a build request reaches the manager it may go through one round
//! of classification: a clear prompt is turned into build instructions, an
//! unclear one gets a question back and a short-lived conversation entry.
//! A follow-up carrying the conversation id merges both messages and
//! completes intake.
//!
//! The conversation map is process-local with a TTL; the contract
//! (insert-with-TTL, delete-on-completion) is the seam for an external
//! short-TTL store in multi-instance deployments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use pagewright_core::error::{Error, Result};

/// Default lifetime of a pending clarification.
pub const CONVERSATION_TTL: Duration = Duration::from_secs(15 * 60);

/// Outcome of classifying a user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The prompt is actionable; `instructions` is what the worker gets.
    Clear {
        /// Synthesized build instructions.
        instructions: String,
    },
    /// The prompt needs one more round with the user.
    NeedsClarification {
        /// The question to send back.
        question: String,
    },
}

/// Classifies user prompts ahead of job creation.
#[async_trait]
pub trait PromptClassifier: Send + Sync + 'static {
    /// Classifies `prompt`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the classifier backend cannot be
    /// reached.
    async fn classify(&self, prompt: &str) -> Result<Classification>;
}

/// Treats every prompt as clear (dev mode and tests).
#[derive(Debug, Default)]
pub struct PassthroughClassifier;

#[async_trait]
impl PromptClassifier for PassthroughClassifier {
    async fn classify(&self, prompt: &str) -> Result<Classification> {
        Ok(Classification::Clear {
            instructions: prompt.to_string(),
        })
    }
}

const CLASSIFIER_SYSTEM_PROMPT: &str = "You triage website-change requests. \
If the request is specific enough to act on, reply with a single line \
starting with CLEAR: followed by concrete build instructions. If it is \
too vague, reply with a single line starting with QUESTION: followed by \
one clarifying question for the user.";

/// Classifier backed by an OpenAI-style chat-completions endpoint.
pub struct LlmClassifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmClassifier {
    /// Creates a classifier against the given endpoint.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn parse_reply(prompt: &str, reply: &str) -> Classification {
        let reply = reply.trim();
        if let Some(question) = reply.strip_prefix("QUESTION:") {
            return Classification::NeedsClarification {
                question: question.trim().to_string(),
            };
        }
        let instructions = reply
            .strip_prefix("CLEAR:")
            .map_or(prompt, str::trim)
            .to_string();
        // An unparseable reply falls back to the raw prompt: the build
        // proceeds rather than blocking intake on classifier drift.
        Classification::Clear { instructions }
    }
}

#[async_trait]
impl PromptClassifier for LlmClassifier {
    async fn classify(&self, prompt: &str) -> Result<Classification> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": CLASSIFIER_SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("classifier request failed", e))?;

        if !response.status().is_success() {
            return Err(Error::unavailable(format!(
                "classifier returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| Error::Serialization {
            message: format!("invalid classifier response: {e}"),
        })?;
        let reply = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();
        Ok(Self::parse_reply(prompt, reply))
    }
}

/// A pending clarification conversation.
#[derive(Debug, Clone)]
pub struct PendingConversation {
    /// The site the original request targeted.
    pub site_id: String,
    /// The original (unclear) prompt.
    pub original_prompt: String,
    created_at: Instant,
}

/// Short-lived `conversation_id → pending request` map.
#[derive(Debug)]
pub struct ConversationMap {
    entries: Mutex<HashMap<String, PendingConversation>>,
    ttl: Duration,
}

impl Default for ConversationMap {
    fn default() -> Self {
        Self::new(CONVERSATION_TTL)
    }
}

impl ConversationMap {
    /// Creates a map with the given entry TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Stores a pending conversation and returns its id.
    pub fn insert(&self, site_id: impl Into<String>, original_prompt: impl Into<String>) -> String {
        let conversation_id = Ulid::new().to_string();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                conversation_id.clone(),
                PendingConversation {
                    site_id: site_id.into(),
                    original_prompt: original_prompt.into(),
                    created_at: Instant::now(),
                },
            );
        }
        conversation_id
    }

    /// Removes and returns a pending conversation; expired entries are
    /// gone.
    #[must_use]
    pub fn take(&self, conversation_id: &str) -> Option<PendingConversation> {
        let mut entries = self.entries.lock().ok()?;
        let pending = entries.remove(conversation_id)?;
        if pending.created_at.elapsed() > self.ttl {
            return None;
        }
        Some(pending)
    }

    /// Evicts expired entries.
    pub fn sweep(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, pending| pending.created_at.elapsed() <= self.ttl);
        }
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Returns whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the eviction sweeper until `shutdown` is cancelled. Ticks at a
    /// quarter of the TTL.
    pub fn spawn_sweeper(
        self: std::sync::Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let interval = (self.ttl / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => self.sweep(),
                }
            }
        })
    }
}
