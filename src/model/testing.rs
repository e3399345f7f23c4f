//! Test doubles for the model seam.
//!
//! These run the full pipeline without weights or a hub connection: an echo
//! backend over an interning word codec, plus loaders that fail on demand to
//! exercise the construction-failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{ContextModel, GenerationParams, LyricCodec, ModelLoader};
use crate::error::TaskError;

/// Shared counters observed by tests.
#[derive(Clone, Default)]
pub struct Probe {
    pub generate_calls: Arc<AtomicUsize>,
    pub reclaim_calls: Arc<AtomicUsize>,
    pub peak_concurrency: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
}

/// Word-level codec: one token per whitespace-separated word, ids interned
/// in call order so decode(encode(x)) reproduces x's words.
#[derive(Default)]
pub struct WordCodec {
    vocab: RwLock<(Vec<String>, HashMap<String, u32>)>,
}

impl WordCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LyricCodec for WordCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TaskError> {
        let mut vocab = self.vocab.write();
        let mut ids = Vec::new();
        for word in text.split_whitespace() {
            let id = match vocab.1.get(word) {
                Some(&id) => id,
                None => {
                    let id = vocab.0.len() as u32;
                    vocab.0.push(word.to_string());
                    vocab.1.insert(word.to_string(), id);
                    id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, TaskError> {
        let vocab = self.vocab.read();
        let words: Vec<&str> = ids
            .iter()
            .filter_map(|&id| vocab.0.get(id as usize).map(String::as_str))
            .collect();
        Ok(words.join(" "))
    }
}

/// Echoes its input ids back, capped to the output limit.
pub struct EchoModel {
    probe: Probe,
    generate_error: Option<TaskError>,
}

impl ContextModel for EchoModel {
    fn generate(
        &mut self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, TaskError> {
        let in_flight = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe
            .peak_concurrency
            .fetch_max(in_flight, Ordering::SeqCst);
        self.probe.generate_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the race window so overlapping holders would be caught.
        std::thread::sleep(std::time::Duration::from_millis(1));
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = &self.generate_error {
            return Err(err.clone());
        }
        let mut output = input_ids.to_vec();
        output.truncate(params.max_output_tokens);
        Ok(output)
    }

    fn reclaim(&mut self) {
        self.probe.reclaim_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader producing [`EchoModel`]s over a shared [`WordCodec`].
pub struct EchoLoader {
    codec: Arc<WordCodec>,
    probe: Probe,
    generate_error: Option<TaskError>,
    model_builds: AtomicUsize,
}

impl EchoLoader {
    pub fn new() -> Self {
        Self {
            codec: Arc::new(WordCodec::new()),
            probe: Probe::default(),
            generate_error: None,
            model_builds: AtomicUsize::new(0),
        }
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    /// Built models fail every generation with `err` while loading stays
    /// healthy.
    pub fn with_generate_error(mut self, err: TaskError) -> Self {
        self.generate_error = Some(err);
        self
    }

    pub fn model_builds(&self) -> usize {
        self.model_builds.load(Ordering::SeqCst)
    }
}

impl Default for EchoLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for EchoLoader {
    fn load_codec(&self) -> Result<Arc<dyn LyricCodec>, TaskError> {
        Ok(self.codec.clone())
    }

    fn load_model(&self) -> Result<Box<dyn ContextModel>, TaskError> {
        self.model_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EchoModel {
            probe: self.probe.clone(),
            generate_error: self.generate_error.clone(),
        }))
    }
}

/// Fails the first `failures` model builds, then behaves like [`EchoLoader`].
pub struct FlakyLoader {
    inner: EchoLoader,
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyLoader {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            inner: EchoLoader::new(),
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Model-build attempts, successful or not.
    pub fn model_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ModelLoader for FlakyLoader {
    fn load_codec(&self) -> Result<Arc<dyn LyricCodec>, TaskError> {
        self.inner.load_codec()
    }

    fn load_model(&self) -> Result<Box<dyn ContextModel>, TaskError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(TaskError::Dependency(
                "model weights unavailable (simulated)".into(),
            ));
        }
        self.inner.load_model()
    }
}

/// Never builds a model; every attempt fails with the given message.
pub struct FailingLoader {
    codec: Arc<WordCodec>,
    message: String,
    attempts: AtomicUsize,
}

impl FailingLoader {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            codec: Arc::new(WordCodec::new()),
            message: message.into(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn model_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ModelLoader for FailingLoader {
    fn load_codec(&self) -> Result<Arc<dyn LyricCodec>, TaskError> {
        Ok(self.codec.clone())
    }

    fn load_model(&self) -> Result<Box<dyn ContextModel>, TaskError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TaskError::Dependency(self.message.clone()))
    }
}
