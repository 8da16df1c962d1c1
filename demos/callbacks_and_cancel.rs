use std::sync::mpsc;
use std::time::Duration;

use netclient::prelude::{CompletionContext, NetworkClient, NetworkRequest, RetryPolicy};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let client = NetworkClient::builder("https://httpbin.org")
        .runtime(runtime.handle().clone())
        .completion_context(CompletionContext::executor(|job| {
            std::thread::spawn(job);
        }))
        .retry_policy(RetryPolicy::standard())
        .metrics_enabled(true)
        .try_build()?;

    let (sender, receiver) = mpsc::channel();

    let quick_sender = sender.clone();
    client.perform_text(NetworkRequest::get("/get"), move |response| {
        let _ = quick_sender.send(format!("quick: status={:?}", response.status()));
    });

    let slow = client.perform_data(NetworkRequest::get("/delay/5"), move |response| {
        let outcome = match response.error() {
            Some(error) if error.is_cancelled() => "cancelled".to_owned(),
            Some(error) => format!("failed: {error}"),
            None => "finished".to_owned(),
        };
        let _ = sender.send(format!("slow: {outcome}"));
    });

    std::thread::sleep(Duration::from_millis(200));
    println!(
        "in flight: {:?}",
        client
            .in_flight()
            .iter()
            .map(|task| format!("{} {} {}", task.id(), task.method(), task.path()))
            .collect::<Vec<_>>()
    );
    client.cancel(slow.id());

    for line in receiver.iter().take(2) {
        println!("{line}");
    }
    println!("metrics: {:?}", client.metrics_snapshot());
    Ok(())
}
