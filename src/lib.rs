#![warn(clippy::cast_lossless)]

pub mod config;
pub mod error;
pub mod lexicon;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod task;

pub use config::{Args, Config};
pub use error::TaskError;
pub use pipeline::InferencePipeline;
