//! Prompt rendering.
//!
//! Pure template over the bot's identity and the memory snapshot. The
//! `<START>` delimiter and the greeting exchange follow the KoboldAI
//! chat-prompt conventions; the trailing `<name>:` line cues the model to
//! speak as the bot.

use crate::memory::MemoryEntry;

/// Placeholder speaker for the greeting when nobody else has spoken yet.
const FALLBACK_SPEAKER: &str = "User";

/// Render the model input text. Deterministic and side-effect free.
pub fn build_prompt(
    name: &str,
    persona: Option<&str>,
    hello: Option<&str>,
    memory: &[MemoryEntry],
) -> String {
    let mut prompt = String::new();

    if let Some(persona) = persona {
        prompt.push_str(&format!("{name}'s Persona: {persona}\n"));
    }

    prompt.push_str("<START>\n");

    if let Some(hello) = hello {
        let other = memory
            .iter()
            .find(|entry| entry.speaker != name)
            .map(|entry| entry.speaker.as_str())
            .unwrap_or(FALLBACK_SPEAKER);
        prompt.push_str(&format!("{other}: Hello {name}!\n"));
        prompt.push_str(&format!("{name}: {hello}\n"));
    }

    for entry in memory {
        prompt.push_str(&format!("{}: {}\n", entry.speaker, entry.text));
    }

    prompt.push_str(&format!("{name}:"));
    prompt
}
