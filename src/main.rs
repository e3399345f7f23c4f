use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parolier::config::{Args, Config};
use parolier::lexicon::{StaticLexicon, WordLexicon};
use parolier::model::{ModelSlot, Mt5Loader};
use parolier::pipeline::InferencePipeline;
use parolier::server::{self, AppState};
use parolier::task::{InMemoryTaskStore, RetryController, TaskQueue, TaskStore, Worker};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_args(Args::parse());
    let device = config.device.device()?;
    info!(
        model_id = %config.model_id,
        device = ?config.device,
        max_output_tokens = config.generation.max_output_tokens,
        "starting"
    );

    let loader = Arc::new(Mt5Loader::new(
        config.model_id.clone(),
        config.tokenizer_id.clone(),
        config.weight_path.clone(),
        device,
    ));
    let slot = Arc::new(ModelSlot::new(loader.clone()));
    let pipeline = Arc::new(InferencePipeline::new(
        loader,
        slot.clone(),
        config.generation.clone(),
        config.input_token_budget,
    ));

    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let queue = TaskQueue::new();
    let lexicon: Arc<dyn WordLexicon> = match &config.lexicon_path {
        Some(path) => Arc::new(StaticLexicon::from_file(path)?),
        None => Arc::new(StaticLexicon::french()),
    };

    let controller = RetryController::new(
        store.clone(),
        queue.clone(),
        pipeline,
        config.retry.clone(),
    );
    let worker = Worker::new(queue.clone(), controller, slot, config.tasks_per_recycle);
    tokio::spawn(worker.run());

    let app = server::router(AppState {
        store,
        queue,
        lexicon,
    });
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
