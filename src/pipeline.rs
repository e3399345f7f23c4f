//! The inference pipeline: validation, token budgeting, guarded generation,
//! decode and cleanup.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::TaskError;
use crate::model::{GenerationParams, LyricCodec, ModelLoader, ModelSlot};

/// Instruction wrapped around every submitted lyric.
pub const PROMPT_PREFIX: &str = "Translate and explain the context of this French lyric: ";

/// Pure transformation from submitted text to explanation text. The only
/// suspension point is the slot acquisition; the only side effects are slot
/// acquisition and release.
pub struct InferencePipeline {
    loader: Arc<dyn ModelLoader>,
    slot: Arc<ModelSlot>,
    codec: OnceCell<Arc<dyn LyricCodec>>,
    params: GenerationParams,
    input_token_budget: usize,
}

impl InferencePipeline {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        slot: Arc<ModelSlot>,
        params: GenerationParams,
        input_token_budget: usize,
    ) -> Self {
        Self {
            loader,
            slot,
            codec: OnceCell::new(),
            params,
            input_token_budget,
        }
    }

    /// Rejects empty and whitespace-only input. Also run by the submission
    /// endpoint, so invalid requests never reach the queue.
    pub fn validate(text: &str) -> Result<(), TaskError> {
        if text.trim().is_empty() {
            return Err(TaskError::Validation("Lyric is required".into()));
        }
        Ok(())
    }

    /// The tokenizer half of the resource, built on first use and shared for
    /// the rest of the process lifetime.
    async fn codec(&self) -> Result<&Arc<dyn LyricCodec>, TaskError> {
        self.codec
            .get_or_try_init(|| async { self.loader.load_codec() })
            .await
    }

    pub async fn run(&self, lyric: &str) -> Result<String, TaskError> {
        Self::validate(lyric)?;
        let prompt = format!("{PROMPT_PREFIX}{}", lyric.trim());

        let codec = self.codec().await?;
        let mut input_ids = codec.encode(&prompt)?;
        if input_ids.len() > self.input_token_budget {
            tracing::debug!(
                tokens = input_ids.len(),
                budget = self.input_token_budget,
                "truncating over-budget input"
            );
            input_ids.truncate(self.input_token_budget);
        }

        let mut guard = self.slot.acquire().await?;
        let output_ids = guard.model().generate(&input_ids, &self.params)?;
        let text = codec.decode(&output_ids)?;
        drop(guard);

        Ok(normalize_output(&text))
    }
}

fn normalize_output(text: &str) -> String {
    unescape_entities(text).trim().to_string()
}

const ENTITIES: [(&str, &str); 6] = [
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    // Last, so double-escaped text unescapes exactly one level.
    ("&amp;", "&"),
];

/// Unescapes the handful of HTML entities the decode step can introduce.
fn unescape_entities(text: &str) -> String {
    let mut out = text.to_string();
    for (entity, replacement) in ENTITIES {
        if out.contains(entity) {
            out = out.replace(entity, replacement);
        }
    }
    out
}
