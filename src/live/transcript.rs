//! Per-turn transcript aggregation

use serde::Serialize;

use super::channel::InboundEvent;

/// One finalized conversational turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    /// What the user said (may be empty)
    pub user: String,
    /// What the model said (may be empty)
    pub model: String,
}

/// Finalized turns of one session, append-only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TranscriptEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a TranscriptEntry;
    type IntoIter = std::slice::Iter<'a, TranscriptEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Accumulates streamed transcription until the turn completes
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    user: String,
    model: String,
}

impl TranscriptAggregator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            user: String::new(),
            model: String::new(),
        }
    }

    /// Feed one inbound event; returns the finalized turn on `TurnComplete`
    ///
    /// Events other than text fragments and turn markers are ignored.
    pub fn apply(&mut self, event: &InboundEvent) -> Option<TranscriptEntry> {
        match event {
            InboundEvent::PartialUserText(text) => {
                self.user.push_str(text);
                None
            }
            InboundEvent::PartialModelText(text) => {
                self.model.push_str(text);
                None
            }
            InboundEvent::TurnComplete => self.complete_turn(),
            _ => None,
        }
    }

    /// Close the current turn
    ///
    /// Emits the trimmed pair when either side said something, then resets
    /// both buffers either way.
    pub fn complete_turn(&mut self) -> Option<TranscriptEntry> {
        let user = std::mem::take(&mut self.user);
        let model = std::mem::take(&mut self.model);
        let user = user.trim();
        let model = model.trim();

        if user.is_empty() && model.is_empty() {
            return None;
        }

        Some(TranscriptEntry {
            user: user.to_string(),
            model: model.to_string(),
        })
    }

    /// User text accumulated in the current turn
    #[must_use]
    pub fn pending_user(&self) -> &str {
        &self.user
    }

    /// Model text accumulated in the current turn
    #[must_use]
    pub fn pending_model(&self) -> &str {
        &self.model
    }
}
