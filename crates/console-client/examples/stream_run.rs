use std::time::Duration;

use console_client::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    console_core::observability::init_observability();

    let console = Console::connect(
        ClientConfig::from_env()?,
        RequestPolicy::new(Duration::from_secs(10), 2),
    )?;

    let prompt = std::env::args().nth(1).unwrap_or_else(|| "Say hello.".to_string());
    let result = console
        .run(
            RunInput::prompt(prompt),
            RequestPolicy::new(Duration::from_secs(60), 1),
            |chunk| print!("{chunk}"),
        )
        .await;
    println!();

    match result {
        Ok(_) => {}
        Err(err) => {
            if let Some(partial) = err.partial_text() {
                eprintln!("run interrupted after {} bytes: {err}", partial.len());
            } else {
                eprintln!("run failed: {err}");
            }
        }
    }

    console.close().await;
    Ok(())
}
