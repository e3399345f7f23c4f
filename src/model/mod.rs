//! Model backends and the single-occupancy slot guarding them.

pub mod loader;
pub mod mt5;
pub mod slot;
pub mod testing;

use std::sync::Arc;

use crate::error::TaskError;

pub use loader::Mt5Loader;
pub use slot::{ModelSlot, SlotGuard};

/// Token-level view of the backend's tokenizer.
///
/// Shared outside the slot so that length accounting and truncation happen
/// before the expensive half of the resource is touched.
pub trait LyricCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TaskError>;

    /// Decode token ids to text with special/control tokens stripped.
    fn decode(&self, ids: &[u32]) -> Result<String, TaskError>;
}

/// The heavyweight half of the resource: generation over token ids.
///
/// Exclusively owned by the [`ModelSlot`]; nothing outside the slot holds a
/// reference to an implementation.
pub trait ContextModel: Send {
    fn generate(
        &mut self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, TaskError>;

    /// Best-effort release of transient device memory. Runs after every slot
    /// release; the process is long-lived and allocation cycles under a
    /// memory ceiling add up.
    fn reclaim(&mut self);
}

/// Builds the two halves of the resource. Constructing a loader is cheap;
/// the expensive work happens in [`ModelLoader::load_model`], which the slot
/// defers until the first acquisition.
pub trait ModelLoader: Send + Sync {
    fn load_codec(&self) -> Result<Arc<dyn LyricCodec>, TaskError>;

    fn load_model(&self) -> Result<Box<dyn ContextModel>, TaskError>;
}

/// Decoding constants, fixed per deployment rather than per call, so a given
/// input always produces the same output for a given model version.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Number of hypotheses kept per decode step. Width 1 selects the
    /// KV-cached greedy path.
    pub beam_width: usize,
    /// Bans any token that would repeat an n-gram already generated.
    /// 0 disables the constraint.
    pub no_repeat_ngram: usize,
    /// Exponent applied to hypothesis length when ranking finished beams.
    pub length_penalty: f32,
    /// Hard cap on generated tokens.
    pub max_output_tokens: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            beam_width: 4,
            no_repeat_ngram: 3,
            length_penalty: 1.0,
            max_output_tokens: 150,
        }
    }
}
