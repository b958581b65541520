//! Exercise a DP832 power supply: program channel 1 and watch it settle.
//!
//! Run against hardware:
//!   cargo run -p instr-driver-rigol --example dp832_demo -- 192.168.1.40:5555
//! Or without an argument to run against the built-in simulator.

use instr_driver_mock::{SimPowerSupply, SimPowerSupplyConfig};
use instr_driver_rigol::{Confirm, Dp832, Dp832Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let psu = match std::env::args().nth(1) {
        Some(host) => Dp832::open(Dp832Config::new(host)).await?,
        None => {
            let sim = SimPowerSupply::spawn(SimPowerSupplyConfig::default());
            Dp832::from_transport(sim, Dp832Config::new("sim")).await?
        }
    };
    println!("connected: {}", psu.idn());

    psu.set_ovp_limit(1, 5.5).await?;
    psu.set_ovp_enabled(1, true).await?;
    psu.set_output(1, true).await?;

    println!("programming 5.00 V / 0.100 A, waiting for the output to settle");
    psu.set_voltage(1, 5.0, Confirm::Default).await?;
    psu.set_current(1, 0.1, Confirm::Default).await?;

    let volts = psu.measure_voltage(1).await?;
    let amps = psu.measure_current(1).await?;
    let watts = psu.measure_power(1).await?;
    println!("CH1: {volts:.4} V  {amps:.4} A  {watts:.4} W");

    psu.set_output(1, false).await?;
    Ok(())
}
