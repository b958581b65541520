//! Step an ELL14 rotation mount through a few positions.
//!
//! Run against hardware:
//!   cargo run -p instr-driver-thorlabs --example ell14_demo -- /dev/ttyUSB0 0
//! Or without arguments to run against the built-in simulator.

use instr_core::serial::wrap_shared_unbuffered;
use instr_driver_mock::{SimElliptec, SimElliptecConfig};
use instr_driver_thorlabs::{Ell14, Ell14Config, HomeDirection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let rotator = match (args.next(), args.next()) {
        (Some(port), address) => {
            let config = Ell14Config {
                port,
                address: address.unwrap_or_else(|| "0".to_string()),
                pulses_per_degree: None,
            };
            Ell14::open(&config).await?
        }
        _ => {
            let sim = SimElliptec::spawn(SimElliptecConfig::default());
            Ell14::new(wrap_shared_unbuffered(sim), "0")
        }
    };

    println!("homing");
    rotator.home(HomeDirection::Clockwise).await?;

    for target in [45.0, 90.0, 180.0] {
        let reached = rotator.move_absolute(target).await?;
        println!("moved to {reached:.3} deg (target {target} deg)");
    }

    rotator.move_relative(-30.0).await?;
    println!("final position: {:.3} deg", rotator.position().await?);
    Ok(())
}
