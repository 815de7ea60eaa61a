use std::time::Duration;

use console_client::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    console_core::observability::init_observability();

    let console = Console::connect(
        ClientConfig::from_env()?,
        RequestPolicy::new(Duration::from_secs(10), 2),
    )?;

    let policy = RequestPolicy::new(Duration::from_secs(5), 1);
    for agent in console.list_agents(&policy).await? {
        println!("{}\t{}", agent.id, agent.name);
    }

    console.close().await;
    Ok(())
}
