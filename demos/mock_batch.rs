//! Runs a small batch against `MockBackend`, no provider needed.
//!
//! cargo run --example mock_batch

use std::sync::Arc;
use std::time::Duration;

use llm_prompt_batch::{
    Args, BatchOptions, Event, ExecCtx, FnEventHandler, MockBackend, PromptFunction,
    RequestConfig,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mock = Arc::new(
        MockBackend::new(vec![
            "Rust favors safety.".to_string(),
            "Tokio schedules tasks.".to_string(),
        ])
        .with_failures(2)
        .with_latency(Duration::from_millis(50)),
    );

    let ctx = ExecCtx::builder("http://mock.invalid")
        .backend(mock.clone())
        .event_handler(Arc::new(FnEventHandler(|event: Event| match event {
            Event::TaskRetry { index, attempt, reason } => {
                println!("  retry #{} for element {}: {}", attempt, index, reason)
            }
            Event::TaskEnd { completed, total, .. } => println!("  {}/{} done", completed, total),
            _ => {}
        })))
        .build();

    let summarize = PromptFunction::new(RequestConfig::new("mock-model").with_max_tokens(32))
        .with_system_message_template("You summarize {{ topic }} texts in one sentence.")?
        .with_prompt_template("Summarize: {{ text }}")?;
    println!("variables: {:?}", summarize.variables());

    let batch: Vec<Args> = [
        ("programming", "Rust is a language empowering everyone."),
        ("programming", "Tokio is an asynchronous runtime."),
        ("cooking", "Bread needs flour, water, salt and time."),
    ]
    .iter()
    .map(|(topic, text)| {
        Args::from([
            ("topic".to_string(), json!(topic)),
            ("text".to_string(), json!(text)),
        ])
    })
    .collect();

    let options = BatchOptions::default()
        .with_concurrency_limit(2)
        .with_num_retries(3)
        .with_timeout(Duration::from_secs(10));

    println!("Running batch of {}...", batch.len());
    let results = summarize.run_batch(&ctx, batch, &options).await?;

    for (i, result) in results.iter().enumerate() {
        match result {
            Some(response) => println!("[{}] {}", i, response.content().unwrap_or_default()),
            None => println!("[{}] <failed>", i),
        }
    }
    println!("backend calls: {}", mock.calls());
    Ok(())
}
