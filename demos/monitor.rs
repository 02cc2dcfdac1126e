use std::env;
use std::sync::Arc;

use hoval_connect::{Coordinator, CoordinatorConfig, HovalClient, MessageLogMode};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> hoval_connect::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let email = env::var("HOVAL_EMAIL").expect("HOVAL_EMAIL must be set");
    let password = env::var("HOVAL_PASSWORD").expect("HOVAL_PASSWORD must be set");
    let log_path = env::args().nth(1);

    let mut builder = HovalClient::builder(email, password);
    if let Some(path) = log_path {
        builder = builder.message_log(MessageLogMode::Diffed, path);
    }
    let client = Arc::new(builder.build()?);
    let coordinator = Arc::new(Coordinator::new(client, CoordinatorConfig::default()));

    let cancel = CancellationToken::new();
    let poller = tokio::spawn({
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        async move { coordinator.run(cancel).await }
    });

    let mut updates = coordinator.subscribe();
    let mut discovered = coordinator.new_circuits();
    println!("Polling Hoval Connect, Ctrl-C to stop...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(keys) = discovered.recv() => {
                for key in keys {
                    println!("New circuit {} on {}", key.path, key.plant_id);
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                for plant in snapshot.plants.values() {
                    let status = if !plant.is_online {
                        "offline"
                    } else if plant.has_error {
                        "ERROR"
                    } else {
                        "ok"
                    };
                    println!("[{}] {status}", plant.name);
                    for circuit in plant.circuits.values() {
                        println!(
                            "  {} ({}) mode: {} | program: {} | fan: {}",
                            circuit.name,
                            circuit.circuit_type.as_hoval_str(),
                            circuit.operation_mode.as_deref().unwrap_or("-"),
                            circuit.active_program.as_deref().unwrap_or("-"),
                            circuit
                                .fan_speed
                                .map_or_else(|| "-".to_string(), |s| format!("{s}%")),
                        );
                    }
                    if let Some(temp) = plant
                        .weather
                        .as_ref()
                        .and_then(|w| w.current())
                        .and_then(|w| w.outside_temperature)
                    {
                        println!("  Outdoor: {temp:.1}\u{00b0}C");
                    }
                }
            }
        }
    }

    cancel.cancel();
    let _ = poller.await;
    Ok(())
}
