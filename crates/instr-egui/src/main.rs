//! Instrument control panel.
//!
//! A desktop front end for the drivers in this workspace. Each instrument
//! gets its own panel; all hardware I/O runs on a tokio runtime owned by
//! the app so the UI thread never blocks on the wire.

mod app;
mod config;
mod panels;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "instr-panel", about = "Instrument control panel")]
struct Args {
    /// Path to the device configuration file.
    #[arg(long, default_value = "devices.toml")]
    config: std::path::PathBuf,

    /// Run against in-memory simulators instead of real hardware.
    #[arg(long)]
    demo: bool,
}

fn main() -> eframe::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    tracing::info!(config = %args.config.display(), demo = args.demo, "starting instrument panel");

    let config = match config::DevicesConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(%err, "could not load device configuration, starting empty");
            config::DevicesConfig::default()
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 700.0])
            .with_min_inner_size([700.0, 500.0])
            .with_title("Instrument Panel"),
        ..Default::default()
    };

    eframe::run_native(
        "Instrument Panel",
        options,
        Box::new(move |cc| Ok(Box::new(app::InstrApp::new(cc, config, args.demo)))),
    )
}
