//! Walk the relay board through its channels and read the coil states back.
//!
//! Run:
//!   cargo run -p instr-driver-waveshare --example relay_demo -- 192.168.1.200:4196

use std::time::Duration;

use instr_driver_waveshare::{Framing, Relay, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.1.200:4196".to_string());
    let relay = Relay::open(&RelayConfig {
        host,
        framing: Framing::RtuOverTcp,
        unit: 1,
    })
    .await?;

    relay.all_off().await?;
    relay.on(0).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    relay.off(0).await?;
    relay.on(7).await?;
    relay.on(1).await?;

    for ch in [7u8, 1, 0] {
        println!("channel {ch}: {}", relay.read(ch).await?);
    }
    println!("all: {:?}", relay.read_all().await?);

    relay.all_off().await?;
    Ok(())
}
