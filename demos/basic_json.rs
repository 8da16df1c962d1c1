use std::time::Duration;

use netclient::prelude::{NetworkClient, NetworkError, NetworkRequest, RetryPolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Todo {
    user_id: u64,
    id: u64,
    title: String,
    completed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewTodo<'a> {
    user_id: u64,
    title: &'a str,
    completed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = NetworkClient::builder("https://jsonplaceholder.typicode.com")
        .timeout(Duration::from_secs(10))
        .retry_policy(
            RetryPolicy::standard()
                .max_attempts(3)
                .base_backoff(Duration::from_millis(100))
                .max_backoff(Duration::from_millis(800)),
        )
        .try_build()?;

    let todo = client
        .send_json::<Todo>(NetworkRequest::get("/todos/1"))
        .await
        .into_result()?;
    println!("GET /todos/1 => {todo:?}");

    let open = client
        .send_json::<Vec<Todo>>(
            NetworkRequest::get("/todos")
                .query_item("userId", "1")
                .query_item("completed", "false"),
        )
        .await
        .into_result()?
        .unwrap_or_default();
    println!("GET /todos => {} open todos for user 1", open.len());

    let created = client
        .send_dictionary(NetworkRequest::post("/todos").json(&NewTodo {
            user_id: 1,
            title: "try netclient",
            completed: false,
        })?)
        .await;
    println!(
        "POST /todos => status={:?} id={:?}",
        created.status(),
        created.result().and_then(|body| body.get("id"))
    );

    let missing = client
        .send_json::<Todo>(NetworkRequest::get("/todos/0").max_attempts(1))
        .await;
    match missing.error() {
        Some(NetworkError::FailedResponse { status, .. }) => {
            println!("GET /todos/0 => failed with status {status}");
        }
        Some(other) => println!("GET /todos/0 => {} ({other})", other.code().as_str()),
        None => println!("GET /todos/0 => unexpected success"),
    }

    Ok(())
}
