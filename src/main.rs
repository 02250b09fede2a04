use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod analytics;
mod cli;
mod config;
mod publish;
mod video;

use analytics::PersonDetector;
use cli::Args;
use config::Config;
use publish::MqttPublisher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the frame stream
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("people_counter=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    let prob_threshold = config::validate_threshold(args.prob_threshold)?;

    let detector = PersonDetector::new(&args.model, args.device, &config.model, prob_threshold)
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    let publisher = MqttPublisher::connect(&config.mqtt);

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut handle = analytics::spawn_pipeline(
        args.input.clone(),
        detector,
        publisher,
        config.output.clone(),
        Arc::clone(&shutdown),
    );

    let result = tokio::select! {
        result = &mut handle => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
            handle.await
        }
    };

    match result {
        Ok(Ok(summary)) => {
            tracing::info!(
                frames = summary.frames,
                skipped = summary.skipped_frames,
                total_people = summary.total_people,
                "processing complete"
            );
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "pipeline failed");
            return Err(e.into());
        }
        Err(e) => {
            tracing::error!("pipeline task failed: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
