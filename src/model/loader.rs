//! Hub download and construction of the mT5 backend.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::t5;
use hf_hub::api::sync::ApiBuilder;
use tokenizers::Tokenizer;

use super::mt5::Mt5Model;
use super::{ContextModel, LyricCodec, ModelLoader};
use crate::error::TaskError;

/// Loads the mT5 family from the hub or a local directory.
///
/// The upstream mT5 checkpoints ship a sentencepiece model only; the fast
/// tokenizer comes from a companion repo carrying the converted
/// `<model>.tokenizer.json` files.
pub struct Mt5Loader {
    model_id: String,
    tokenizer_id: String,
    weight_path: Option<PathBuf>,
    device: Device,
}

impl Mt5Loader {
    pub fn new(
        model_id: String,
        tokenizer_id: String,
        weight_path: Option<PathBuf>,
        device: Device,
    ) -> Self {
        Self {
            model_id,
            tokenizer_id,
            weight_path,
            device,
        }
    }

    /// Short model name, e.g. `google/mt5-small` -> `mt5-small`.
    fn model_name(&self) -> &str {
        self.model_id.rsplit('/').next().unwrap_or(&self.model_id)
    }

    fn hub_file(&self, repo_id: &str, filename: &str) -> Result<PathBuf, TaskError> {
        let api = ApiBuilder::new()
            .with_progress(true)
            .build()
            .map_err(|e| TaskError::Dependency(format!("hub client init failed: {e}")))?;
        api.model(repo_id.to_string()).get(filename).map_err(|e| {
            TaskError::Transient(format!("download of {repo_id}/{filename} failed: {e}"))
        })
    }

    fn local_file(dir: &std::path::Path, filename: &str) -> Result<PathBuf, TaskError> {
        let path = dir.join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(TaskError::Dependency(format!(
                "missing model artifact {}",
                path.display()
            )))
        }
    }

    fn tokenizer_file(&self) -> Result<PathBuf, TaskError> {
        match &self.weight_path {
            Some(dir) => Self::local_file(dir, "tokenizer.json"),
            None => self.hub_file(
                &self.tokenizer_id,
                &format!("{}.tokenizer.json", self.model_name()),
            ),
        }
    }

    fn model_files(&self) -> Result<(PathBuf, PathBuf), TaskError> {
        match &self.weight_path {
            Some(dir) => Ok((
                Self::local_file(dir, "config.json")?,
                Self::local_file(dir, "model.safetensors")?,
            )),
            None => Ok((
                self.hub_file(&self.model_id, "config.json")?,
                self.hub_file(&self.model_id, "model.safetensors")?,
            )),
        }
    }
}

impl ModelLoader for Mt5Loader {
    fn load_codec(&self) -> Result<Arc<dyn LyricCodec>, TaskError> {
        let path = self.tokenizer_file()?;
        let tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| TaskError::Dependency(format!("tokenizer load failed: {e}")))?;
        Ok(Arc::new(Mt5Codec { tokenizer }))
    }

    fn load_model(&self) -> Result<Box<dyn ContextModel>, TaskError> {
        let (config_path, weights_path) = self.model_files()?;
        let config_text = fs::read_to_string(&config_path).map_err(|e| {
            TaskError::Dependency(format!("reading {} failed: {e}", config_path.display()))
        })?;
        let config: t5::Config = serde_json::from_str(&config_text)
            .map_err(|e| TaskError::Dependency(format!("model config parse failed: {e}")))?;

        tracing::info!(model = %self.model_id, device = ?self.device, "loading model weights");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &self.device)?
        };
        let model = t5::T5ForConditionalGeneration::load(vb, &config)?;
        Ok(Box::new(Mt5Model::new(model, config, self.device.clone())))
    }
}

/// Fast-tokenizer codec shared between pre-slot truncation and decode.
pub struct Mt5Codec {
    tokenizer: Tokenizer,
}

impl LyricCodec for Mt5Codec {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TaskError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| TaskError::Unexpected(format!("tokenization failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, TaskError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| TaskError::Unexpected(format!("detokenization failed: {e}")))
    }
}
