//! History-aware task suggestions.
//!
//! The generator has no memory of the learner, so every request carries the
//! recent history and rejects candidates that repeat it. Attempts are awaited
//! one after another; nothing here writes history.

use crate::{
    model::{normalize_topic, Level},
    provider::{ProviderError, SuggestionProvider},
};
use std::collections::HashSet;
use tracing::{debug, warn};

pub const MAX_ATTEMPTS: u32 = 5;
pub const MISSING_KEY_MESSAGE: &str = "API Key missing.";
pub const BUSY_MESSAGE: &str = "AI is busy. Please try again in a moment!";
const EMPTY_HISTORY: &str = "None yet";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SuggestionOutcome {
    Accepted { text: String, attempts: u32 },
    Busy { attempts: u32 },
    NotConfigured,
}

impl SuggestionOutcome {
    /// Text shown to the learner.
    pub fn message(&self) -> &str {
        match self {
            Self::Accepted { text, .. } => text,
            Self::Busy { .. } => BUSY_MESSAGE,
            Self::NotConfigured => MISSING_KEY_MESSAGE,
        }
    }
}

/// Framing added to the prompt based on keywords in the topic.
pub fn context_hint(topic: &str) -> &'static str {
    let t = normalize_topic(topic);
    if t.contains("python") {
        "Focus on Python programming, automation, and scripting for security."
    } else if t.contains("hack") || t.contains("ctf") {
        "Focus on Capture The Flag strategies, penetration testing methodologies, and tools (nmap, burpsuite, etc)."
    } else if t.contains("linux") || t.contains("shell") {
        "Focus on the Linux command line, bash scripting, file permissions, and system administration."
    } else {
        "Focus on steady, hands-on practice of the subject, building from fundamentals toward fluency."
    }
}

fn joined_history(history: &[String]) -> String {
    if history.is_empty() {
        EMPTY_HISTORY.to_string()
    } else {
        history.join(" -> ")
    }
}

pub fn next_task_prompt(topic: &str, history: &[String], level: Level) -> String {
    let topic = topic.trim();
    format!(
        "As a technical mentor, suggest a learning task for a student.\n\
         \n\
         Topic: {topic} ({context})\n\
         Student's history (oldest first): {history}\n\
         Target difficulty: {level} ({guide})\n\
         \n\
         Instructions:\n\
         1. Suggest a new, specific, actionable task that does NOT appear in the history.\n\
         2. The task must match the '{level}' difficulty.\n\
         3. Respond with a SINGLE sentence only. No intro or extra text.\n",
        context = context_hint(topic),
        history = joined_history(history),
        guide = level.guide(),
    )
}

pub fn follow_up_prompt(topic: &str, learning: &str, history: &[String]) -> String {
    let topic = topic.trim();
    format!(
        "You are an expert cybersecurity and programming mentor.\n\
         Topic: {topic} ({context})\n\
         \n\
         The student has previously done (oldest first): {history}\n\
         Most recently, they learned/did: '{learning}'.\n\
         \n\
         Suggest the SINGLE next logical step or a deeper dive into the recent topic, \
         different from everything they have already done.\n\
         Keep it actionable and specific. Limit the response to one sentence. No intro text.\n",
        context = context_hint(topic),
        history = joined_history(history),
        learning = learning.trim(),
    )
}

/// Ask for a new task at `level` that is not in `recent_history`.
pub async fn request_suggestion(
    topic: &str,
    recent_history: &[String],
    level: Level,
    provider: &dyn SuggestionProvider,
) -> SuggestionOutcome {
    let prompt = next_task_prompt(topic, recent_history, level);
    generate_novel(&prompt, recent_history, Some(level), provider).await
}

/// Ask for the step after `learning`, avoiding `recent_history`.
pub async fn request_follow_up(
    topic: &str,
    learning: &str,
    recent_history: &[String],
    provider: &dyn SuggestionProvider,
) -> SuggestionOutcome {
    let prompt = follow_up_prompt(topic, learning, recent_history);
    generate_novel(&prompt, recent_history, None, provider).await
}

/// History row for an accepted suggestion, e.g. `(Advanced) Enumerate SMB shares.`
pub fn history_entry(text: &str, level: Option<Level>) -> String {
    match level {
        Some(level) => format!("{} {}", level.tag(), text.trim()),
        None => text.trim().to_string(),
    }
}

async fn generate_novel(
    prompt: &str,
    recent_history: &[String],
    level: Option<Level>,
    provider: &dyn SuggestionProvider,
) -> SuggestionOutcome {
    if let Err(err) = provider.check_configured() {
        warn!("suggestion provider unavailable: {err}");
        return SuggestionOutcome::NotConfigured;
    }

    let seen: HashSet<&str> = recent_history.iter().map(|s| s.as_str()).collect();

    for attempt in 1..=MAX_ATTEMPTS {
        match provider.generate(prompt).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    debug!("attempt {attempt}: empty suggestion");
                    continue;
                }
                let tagged = history_entry(text, level);
                if seen.contains(text) || seen.contains(tagged.as_str()) {
                    debug!("attempt {attempt}: duplicate suggestion rejected");
                    continue;
                }
                return SuggestionOutcome::Accepted {
                    text: text.to_string(),
                    attempts: attempt,
                };
            }
            Err(ProviderError::MissingCredential) => return SuggestionOutcome::NotConfigured,
            Err(err) => {
                debug!("attempt {attempt}: provider failed: {err}");
            }
        }
    }

    warn!("no novel suggestion after {MAX_ATTEMPTS} attempts");
    SuggestionOutcome::Busy {
        attempts: MAX_ATTEMPTS,
    }
}
