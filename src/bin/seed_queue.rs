//! Queue Seeding Tool
//!
//! Appends synthetic DDL changes to a monitored store's capture queue, for
//! load testing the relay.
//!
//! Run with: cargo run --bin seed_queue --release -- --store sales --events 1000

use std::time::Instant;

use ddl_relay::domain::CapturedChange;
use ddl_relay::store::{Connector, PgConnector};
use ddl_relay::Config;

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let event_count: u64 = arg_value(&args, "--events")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let config = Config::from_env()?;
    let target = match arg_value(&args, "--store") {
        Some(name) => config
            .source(name)
            .ok_or_else(|| anyhow::anyhow!("No monitored store named {}", name))?,
        None => config
            .sources
            .first()
            .ok_or_else(|| anyhow::anyhow!("MONITORED_DATABASES is empty"))?,
    };

    println!("Seeding {} changes into {}", event_count, target.name);
    println!("Connecting to database...");

    let store = PgConnector.connect(target).await?;

    let start = Instant::now();
    let mut success_count = 0u64;

    for i in 0..event_count {
        let object_name = format!("seed_table_{}", i);
        let change = CapturedChange::new("CREATE_TABLE", "TABLE", &object_name)
            .with_schema("public")
            .with_statement(&format!("CREATE TABLE public.{} (id bigint)", object_name))
            .with_principal("seed", "seed", "localhost")
            .with_application("seed_queue", 0);

        if store.insert_captured(&change).await.is_ok() {
            success_count += 1;
        }

        if (i + 1) % 1000 == 0 {
            println!("Inserted {} changes...", i + 1);
        }
    }

    let elapsed = start.elapsed();
    let rate = success_count as f64 / elapsed.as_secs_f64();

    println!("\n=== Seed Results ===");
    println!("Total changes: {}", event_count);
    println!("Successful: {}", success_count);
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Rate: {:.0} changes/sec", rate);

    Ok(())
}
