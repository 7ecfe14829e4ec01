//! Runs a small batch against a mock client and polls its status.
//!
//! ```sh
//! RUST_LOG=structured_batch=debug cargo run --example mock_batch
//! ```

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use structured_batch::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "structured_batch=info".into()),
        )
        .init();

    // Every fifth answer is prose instead of JSON, to show placeholder records.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let client = MockClient::new(move |_req| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 5 == 0 {
            return Ok("I'm sorry, I can't produce JSON right now.".to_string());
        }
        Ok(format!(
            r#"{{"question": "What is {n} squared?", "answer": "{}", "difficulty": "easy"}}"#,
            n * n
        ))
    })
    .with_latency(Duration::from_millis(150));

    let output = std::env::temp_dir().join("structured-batch-demo");
    let service = JobService::new(
        Arc::new(client),
        Arc::new(MemoryStatusStore::new()),
        Arc::new(JsonFileSink::new(&output).with_diagnostics(true)),
    );

    let request = GenerationRequest::builder(
        "You write short arithmetic drills.",
        "Produce one drill about squares.",
        vec![
            FieldSpec::new("question", "Question"),
            FieldSpec::new("answer", "Answer"),
            FieldSpec::new("difficulty", "Difficulty"),
        ],
    )
    .count(12)
    .concurrent_tasks(3)
    .progress_interval(500)
    .build()?;

    let job_id = service.submit(request).await?;
    println!("submitted job {job_id}");

    loop {
        let Some(status) = service.status(&job_id).await? else {
            println!("job record expired");
            break;
        };
        println!(
            "{:?}: {}/{} ({:.2}%)",
            status.status, status.progress.current, status.progress.total, status.progress.percentage
        );
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(status.progress_interval.unwrap_or(1000))).await;
    }

    let path = service.artifact(&job_id).await?;
    println!("records written to {}", path.display());
    println!("{}", tokio::fs::read_to_string(&path).await?);
    Ok(())
}
