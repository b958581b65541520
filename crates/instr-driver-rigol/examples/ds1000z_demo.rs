//! Capture a waveform and a screenshot from a DS1000Z oscilloscope.
//!
//! Run:
//!   cargo run -p instr-driver-rigol --example ds1000z_demo -- 192.168.1.41:5555

use instr_driver_rigol::{Ds1000z, ImageFormat, WaveformMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.1.41:5555".to_string());
    let scope = Ds1000z::open(&host).await?;
    println!("connected: {}", scope.idn());

    let ch1 = scope.channel(1)?;
    ch1.set_enabled(true).await?;
    scope.single().await?;

    let waveform = ch1.read_waveform(WaveformMode::Raw).await?;
    println!(
        "captured {} points, {:.3e} s/pt",
        waveform.volts.len(),
        waveform.preamble.x_increment
    );
    if let Some(first) = waveform.volts.first() {
        println!("first sample: {first:.4} V");
    }

    let png = scope.screenshot(ImageFormat::Png).await?;
    std::fs::write("ds1000z.png", &png)?;
    println!("saved screenshot ({} bytes) to ds1000z.png", png.len());

    scope.run().await?;
    Ok(())
}
