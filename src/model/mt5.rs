//! Deterministic encoder-decoder generation over candle's T5 family.
//!
//! No RNG anywhere: greedy and beam paths both resolve ties on token id, so
//! a given input and model version always produce the same output.

use candle_core::{DType, Device, Tensor, D};
use candle_transformers::models::t5;

use super::{ContextModel, GenerationParams};
use crate::error::TaskError;

pub struct Mt5Model {
    model: t5::T5ForConditionalGeneration,
    config: t5::Config,
    device: Device,
}

impl Mt5Model {
    pub fn new(model: t5::T5ForConditionalGeneration, config: t5::Config, device: Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }

    fn decoder_start(&self) -> u32 {
        self.config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32
    }

    /// Log-probabilities over the vocabulary for the next position.
    fn step_logprobs(
        &mut self,
        decoder_ids: &[u32],
        encoder_output: &Tensor,
    ) -> Result<Vec<f32>, TaskError> {
        let input = Tensor::new(decoder_ids, &self.device)?.unsqueeze(0)?;
        let logits = self.model.decode(&input, encoder_output)?.squeeze(0)?;
        let logits = if logits.rank() > 1 {
            logits.get(logits.dim(0)? - 1)?
        } else {
            logits
        };
        let logprobs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
        Ok(logprobs.to_vec1::<f32>()?)
    }
}

impl ContextModel for Mt5Model {
    fn generate(
        &mut self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, TaskError> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        self.model.clear_kv_cache();
        let encoder_output = self.model.encode(&input)?;
        let start = self.decoder_start();
        let eos = self.config.eos_token_id as u32;
        let use_cache = self.config.use_cache;

        let result = if params.beam_width <= 1 {
            greedy_search(
                |history: &[u32], index: usize| {
                    let feed: &[u32] = if index == 0 || !use_cache {
                        history
                    } else {
                        &history[history.len() - 1..]
                    };
                    self.step_logprobs(feed, &encoder_output)
                },
                start,
                eos,
                params,
            )
        } else {
            beam_search(
                |history: &[u32]| {
                    // Hypotheses share one decoder, so the cache is rebuilt
                    // from the full prefix on every step.
                    self.model.clear_kv_cache();
                    self.step_logprobs(history, &encoder_output)
                },
                start,
                eos,
                params,
            )
        };
        self.model.clear_kv_cache();
        result
    }

    fn reclaim(&mut self) {
        self.model.clear_kv_cache();
        let _ = self.device.synchronize();
    }
}

/// Greedy decode. `step` maps the generated history (decoder start token
/// included) and the step index to next-token log-probabilities.
pub(crate) fn greedy_search<F>(
    mut step: F,
    start: u32,
    eos: u32,
    params: &GenerationParams,
) -> Result<Vec<u32>, TaskError>
where
    F: FnMut(&[u32], usize) -> Result<Vec<f32>, TaskError>,
{
    let mut tokens = vec![start];
    for index in 0..params.max_output_tokens {
        let mut logprobs = step(&tokens, index)?;
        if logprobs.is_empty() {
            return Err(TaskError::Unexpected("empty logits from decoder".into()));
        }
        ban_repeated_ngrams(&tokens, params.no_repeat_ngram, &mut logprobs);
        let next = argmax(&logprobs);
        if next == eos {
            break;
        }
        tokens.push(next);
    }
    Ok(tokens[1..].to_vec())
}

#[derive(Debug, Clone)]
pub(crate) struct BeamHypothesis {
    pub tokens: Vec<u32>,
    pub sum_logprob: f32,
    pub finished: bool,
}

impl BeamHypothesis {
    fn seed(start: u32) -> Self {
        Self {
            tokens: vec![start],
            sum_logprob: 0.0,
            finished: false,
        }
    }

    /// Length-normalized score used for the final ranking.
    pub fn score(&self, length_penalty: f32) -> f32 {
        let generated = self.tokens.len().saturating_sub(1).max(1) as f32;
        self.sum_logprob / generated.powf(length_penalty)
    }
}

/// Beam decode. `step` maps a hypothesis's full history to next-token
/// log-probabilities.
pub(crate) fn beam_search<F>(
    mut step: F,
    start: u32,
    eos: u32,
    params: &GenerationParams,
) -> Result<Vec<u32>, TaskError>
where
    F: FnMut(&[u32]) -> Result<Vec<f32>, TaskError>,
{
    let width = params.beam_width.max(1);
    let mut beams = vec![BeamHypothesis::seed(start)];
    for _ in 0..params.max_output_tokens {
        if beams.iter().all(|b| b.finished) {
            break;
        }
        let mut candidates: Vec<BeamHypothesis> = Vec::with_capacity(width * width);
        for beam in &beams {
            if beam.finished {
                candidates.push(beam.clone());
                continue;
            }
            let mut logprobs = step(&beam.tokens)?;
            if logprobs.is_empty() {
                return Err(TaskError::Unexpected("empty logits from decoder".into()));
            }
            ban_repeated_ngrams(&beam.tokens, params.no_repeat_ngram, &mut logprobs);
            for (token, logprob) in top_k(&logprobs, width) {
                let mut next = beam.clone();
                next.sum_logprob += logprob;
                if token == eos {
                    next.finished = true;
                } else {
                    next.tokens.push(token);
                }
                candidates.push(next);
            }
        }
        // Stable sort: score ties keep hypothesis insertion order.
        candidates.sort_by(|a, b| b.sum_logprob.total_cmp(&a.sum_logprob));
        candidates.truncate(width);
        beams = candidates;
    }
    let best = beams
        .into_iter()
        .max_by(|a, b| {
            a.score(params.length_penalty)
                .total_cmp(&b.score(params.length_penalty))
        })
        .ok_or_else(|| TaskError::Unexpected("beam search produced no hypotheses".into()))?;
    Ok(best.tokens[1..].to_vec())
}

/// Bans every token that would complete an n-gram already present in
/// `history` by pushing its log-probability to negative infinity.
pub(crate) fn ban_repeated_ngrams(history: &[u32], n: usize, logprobs: &mut [f32]) {
    if n == 0 || history.len() + 1 < n {
        return;
    }
    let prefix = &history[history.len() + 1 - n..];
    for window in history.windows(n) {
        if window[..n - 1] == *prefix {
            let banned = window[n - 1] as usize;
            if banned < logprobs.len() {
                logprobs[banned] = f32::NEG_INFINITY;
            }
        }
    }
}

/// First index of the maximum value; ties resolve to the lowest token id.
pub(crate) fn argmax(logprobs: &[f32]) -> u32 {
    let mut best = 0usize;
    let mut best_value = f32::NEG_INFINITY;
    for (index, &value) in logprobs.iter().enumerate() {
        if value > best_value {
            best_value = value;
            best = index;
        }
    }
    best as u32
}

/// The `k` highest-scoring tokens, highest first; ties resolve to the lower
/// token id.
pub(crate) fn top_k(logprobs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indices: Vec<u32> = (0..logprobs.len() as u32).collect();
    let k = k.min(indices.len());
    if k == 0 {
        return Vec::new();
    }
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| {
            logprobs[b as usize]
                .total_cmp(&logprobs[a as usize])
                .then(a.cmp(&b))
        });
        indices.truncate(k);
    }
    indices.sort_by(|&a, &b| {
        logprobs[b as usize]
            .total_cmp(&logprobs[a as usize])
            .then(a.cmp(&b))
    });
    indices
        .into_iter()
        .map(|i| (i, logprobs[i as usize]))
        .collect()
}
