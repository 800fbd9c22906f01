use std::env;
use std::sync::Arc;

use icomfort::{CredentialConfig, IComfortClient, MemoryStore, Poller};

#[tokio::main]
async fn main() -> icomfort::Result<()> {
    tracing_subscriber::fmt::init();

    let secs: u64 = env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or(60);

    let store = Arc::new(MemoryStore::new());
    let client = IComfortClient::builder()
        .credentials(CredentialConfig::from_env())
        .mirror_state(store.clone())
        .polling(secs)
        .build()?;

    let poller = Poller::from_options(Arc::new(client))
        .expect("usage: poll <seconds>  (seconds must be > 0)")
        .on_outcome(|outcome| {
            if let Some(e) = outcome.error_message() {
                eprintln!("Poll error: {e}");
                return;
            }
            for record in outcome.payload["tStatInfo"].as_array().into_iter().flatten() {
                println!(
                    "zone {} | heat {} | cool {} | mode {} | fan {} | {}",
                    record["Zone_Number"],
                    record["Heat_Set_Point"],
                    record["Cool_Set_Point"],
                    record["Operation_Mode"],
                    record["Fan_Mode"],
                    record["DateTime_Local"],
                );
            }
        });

    println!("Polling every {secs}s, ctrl-c to stop...");
    let handle = poller.start();
    let _ = tokio::signal::ctrl_c().await;
    handle.stop().await;

    println!("Mirrored {} state record(s)", store.len());
    Ok(())
}
