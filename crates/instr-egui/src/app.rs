//! Top-level application state.

use std::sync::Arc;
use std::time::Duration;


use instr_driver_mock::{SimElliptec, SimElliptecConfig, SimPowerSupply, SimPowerSupplyConfig};
use instr_driver_rigol::{Dp832, Dp832Config};
use instr_driver_thorlabs::Ell14;

use crate::config::DevicesConfig;
use crate::panels::{cld1010::Cld1010Panel, dp832::Dp832Panel, ell14::Ell14Panel, relay::RelayPanel};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Selected {
    Psu,
    Laser,
    Rotator,
    Relay,
}

pub struct InstrApp {
    runtime: tokio::runtime::Runtime,
    demo: bool,
    selected: Selected,

    psu: Dp832Panel,
    laser: Cld1010Panel,
    rotator: Ell14Panel,
    relay: RelayPanel,
}

impl InstrApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: DevicesConfig, demo: bool) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("failed to create tokio runtime");

        let mut psu = Dp832Panel::new(config.psu);
        let laser = Cld1010Panel::new(config.laser);
        let mut rotator = Ell14Panel::new(config.rotator);
        let relay = RelayPanel::new(config.relay);

        if demo {
            // Run the simulators in place of hardware. The laser and relay
            // have no simulator; those panels stay disconnected.
            match runtime.block_on(open_demo_psu()) {
                Ok(driver) => psu.attach(driver),
                Err(err) => tracing::warn!(%err, "demo PSU failed to open"),
            }
            rotator.attach(runtime.block_on(async { open_demo_rotator() }));
        }

        Self {
            runtime,
            demo,
            selected: Selected::Psu,
            psu,
            laser,
            rotator,
            relay,
        }
    }
}

async fn open_demo_psu() -> anyhow::Result<Arc<Dp832>> {
    let transport = SimPowerSupply::spawn(SimPowerSupplyConfig::default());
    let driver = Dp832::from_transport(transport, Dp832Config::new("sim")).await?;
    Ok(Arc::new(driver))
}

fn open_demo_rotator() -> Arc<Ell14> {
    let transport = SimElliptec::spawn(SimElliptecConfig::default());
    let port = instr_core::serial::wrap_shared_unbuffered(transport);
    Arc::new(Ell14::new(port, "0"))
}

impl eframe::App for InstrApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::SidePanel::left("instruments")
            .resizable(false)
            .default_width(160.0)
            .show(ctx, |ui| {
                ui.heading("Instruments");
                if self.demo {
                    ui.weak("demo mode");
                }
                ui.separator();
                ui.selectable_value(&mut self.selected, Selected::Psu, "DP832 supply");
                ui.selectable_value(&mut self.selected, Selected::Laser, "CLD1010 laser");
                ui.selectable_value(&mut self.selected, Selected::Rotator, "ELL14 rotator");
                ui.selectable_value(&mut self.selected, Selected::Relay, "Relay board");
            });

        egui::CentralPanel::default().show(ctx, |ui| match self.selected {
            Selected::Psu => self.psu.ui(ui, &self.runtime),
            Selected::Laser => self.laser.ui(ui, &self.runtime),
            Selected::Rotator => self.rotator.ui(ui, &self.runtime),
            Selected::Relay => self.relay.ui(ui, &self.runtime),
        });

        // Async results arrive outside the frame loop; poll again soon.
        ctx.request_repaint_after(Duration::from_millis(200));
    }
}
