//! Process configuration: one structure, explicit knobs, profile presets.

use std::path::PathBuf;
use std::time::Duration;

use candle_core::Device;
use clap::{Parser, ValueEnum};

use crate::model::GenerationParams;
use crate::task::RetryPolicy;

/// Hard ceiling on generated tokens, regardless of profile or override.
pub const MAX_OUTPUT_TOKENS_CEILING: usize = 512;

/// Deployment profile bundling the generation limits for a memory class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Small-memory hosts; short outputs.
    Compact,
    /// Default service profile.
    Standard,
    /// Long-form explanation hosts.
    Extended,
}

impl Profile {
    pub fn max_output_tokens(&self) -> usize {
        match self {
            Profile::Compact => 96,
            Profile::Standard => 150,
            Profile::Extended => 512,
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Profile::Compact => write!(f, "compact"),
            Profile::Standard => write!(f, "standard"),
            Profile::Extended => write!(f, "extended"),
        }
    }
}

/// Compute device for the model handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    Cpu,
    Cuda(usize),
    Metal,
}

impl DeviceSelection {
    /// Parses `cpu`, `cuda`, `cuda:<ordinal>` or `metal`.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "cpu" => Ok(DeviceSelection::Cpu),
            "cuda" => Ok(DeviceSelection::Cuda(0)),
            "metal" => Ok(DeviceSelection::Metal),
            other => match other.strip_prefix("cuda:") {
                Some(ordinal) => ordinal
                    .parse()
                    .map(DeviceSelection::Cuda)
                    .map_err(|_| format!("invalid cuda ordinal in '{other}'")),
                None => Err(format!(
                    "unknown device '{other}' (expected cpu, cuda[:N] or metal)"
                )),
            },
        }
    }

    /// Opens the device. Backends missing from the build surface their own
    /// error here rather than at argument parsing.
    pub fn device(&self) -> Result<Device, candle_core::Error> {
        match self {
            DeviceSelection::Cpu => Ok(Device::Cpu),
            DeviceSelection::Cuda(ordinal) => Device::new_cuda(*ordinal),
            DeviceSelection::Metal => Device::new_metal(0),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Interface to bind.
    #[arg(long, default_value = "0.0.0.0", env = "PAROLIER_HOST")]
    pub host: String,

    /// Port to serve on.
    #[arg(long, default_value_t = 8080, env = "PAROLIER_PORT")]
    pub port: u16,

    /// Hub id of the conditional-generation model.
    #[arg(long, default_value = "google/mt5-small", env = "PAROLIER_MODEL_ID")]
    pub model_id: String,

    /// Hub repo carrying the converted fast-tokenizer files for the model
    /// family.
    #[arg(long, default_value = "lmz/mt5-tokenizers", env = "PAROLIER_TOKENIZER_ID")]
    pub tokenizer_id: String,

    /// Local directory with config.json, model.safetensors and
    /// tokenizer.json; bypasses the hub.
    #[arg(long, env = "PAROLIER_WEIGHT_PATH")]
    pub weight_path: Option<PathBuf>,

    /// Compute device: cpu, cuda[:N] or metal.
    #[arg(long, default_value = "cpu", value_parser = DeviceSelection::parse, env = "PAROLIER_DEVICE")]
    pub device: DeviceSelection,

    /// Generation limits preset.
    #[arg(long, value_enum, default_value_t = Profile::Standard, env = "PAROLIER_PROFILE")]
    pub profile: Profile,

    /// Executions per task before it fails for good.
    #[arg(long, default_value_t = 3, env = "PAROLIER_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Fixed delay between retry attempts.
    #[arg(long, default_value_t = 60, env = "PAROLIER_RETRY_DELAY_SECS")]
    pub retry_delay_secs: u64,

    /// Input tokens kept after truncation.
    #[arg(long, default_value_t = 256, env = "PAROLIER_INPUT_TOKEN_BUDGET")]
    pub input_token_budget: usize,

    /// Overrides the profile's output limit (clamped to 512).
    #[arg(long, env = "PAROLIER_MAX_OUTPUT_TOKENS")]
    pub max_output_tokens: Option<usize>,

    /// Hypotheses kept per decode step; 1 selects the cached greedy path.
    #[arg(long, default_value_t = 4, env = "PAROLIER_BEAM_WIDTH")]
    pub beam_width: usize,

    /// Bans n-gram repetition in the output; 0 disables.
    #[arg(long, default_value_t = 3, env = "PAROLIER_NO_REPEAT_NGRAM")]
    pub no_repeat_ngram: usize,

    /// Length-normalization exponent for beam ranking.
    #[arg(long, default_value_t = 1.0, env = "PAROLIER_LENGTH_PENALTY")]
    pub length_penalty: f32,

    /// Model handle rebuilds after this many processed tasks; 0 disables.
    #[arg(long, default_value_t = 50, env = "PAROLIER_TASKS_PER_RECYCLE")]
    pub tasks_per_recycle: u32,

    /// Newline-separated word list for the match endpoint; a built-in
    /// French frequency list is used when absent.
    #[arg(long, env = "PAROLIER_LEXICON_PATH")]
    pub lexicon_path: Option<PathBuf>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub model_id: String,
    pub tokenizer_id: String,
    pub weight_path: Option<PathBuf>,
    pub device: DeviceSelection,
    pub generation: GenerationParams,
    pub retry: RetryPolicy,
    pub input_token_budget: usize,
    pub tasks_per_recycle: u32,
    pub lexicon_path: Option<PathBuf>,
}

impl Config {
    pub fn from_args(args: Args) -> Self {
        let max_output_tokens = args
            .max_output_tokens
            .unwrap_or_else(|| args.profile.max_output_tokens())
            .min(MAX_OUTPUT_TOKENS_CEILING);
        Self {
            host: args.host,
            port: args.port,
            model_id: args.model_id,
            tokenizer_id: args.tokenizer_id,
            weight_path: args.weight_path,
            device: args.device,
            generation: GenerationParams {
                beam_width: args.beam_width.max(1),
                no_repeat_ngram: args.no_repeat_ngram,
                length_penalty: args.length_penalty,
                max_output_tokens,
            },
            retry: RetryPolicy::new(
                args.max_attempts,
                Duration::from_secs(args.retry_delay_secs),
            ),
            input_token_budget: args.input_token_budget.max(1),
            tasks_per_recycle: args.tasks_per_recycle,
            lexicon_path: args.lexicon_path,
        }
    }
}
