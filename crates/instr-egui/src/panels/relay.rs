//! Waveshare relay board panel.

use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use instr_driver_waveshare::{Framing, Relay, RelayConfig, NUM_CHANNELS};

use super::{busy_indicator, status_row};

enum ActionResult {
    Connected(Result<Arc<Relay>, String>),
    States(Result<[bool; NUM_CHANNELS as usize], String>),
    Done { what: String, error: Option<String> },
}

pub struct RelayPanel {
    host: String,
    framing: Framing,
    unit: u8,
    driver: Option<Arc<Relay>>,

    states: Option<[bool; NUM_CHANNELS as usize]>,

    status: Option<String>,
    error: Option<String>,
    action_tx: mpsc::Sender<ActionResult>,
    action_rx: mpsc::Receiver<ActionResult>,
    in_flight: usize,
}

impl RelayPanel {
    pub fn new(config: Option<RelayConfig>) -> Self {
        let (action_tx, action_rx) = mpsc::channel(16);
        Self {
            host: config.as_ref().map(|c| c.host.clone()).unwrap_or_default(),
            framing: config.as_ref().map(|c| c.framing).unwrap_or(Framing::RtuOverTcp),
            unit: config.as_ref().map(|c| c.unit).unwrap_or(1),
            driver: None,
            states: None,
            status: None,
            error: None,
            action_tx,
            action_rx,
            in_flight: 0,
        }
    }

    pub fn ui(&mut self, ui: &mut egui::Ui, runtime: &Runtime) {
        self.poll_results(runtime);

        ui.heading("Waveshare relay");
        ui.separator();

        if self.driver.is_none() {
            ui.horizontal(|ui| {
                ui.label("Host:");
                ui.text_edit_singleline(&mut self.host);
            });
            ui.horizontal(|ui| {
                egui::ComboBox::from_label("Framing")
                    .selected_text(match self.framing {
                        Framing::RtuOverTcp => "RTU over TCP",
                        Framing::ModbusTcp => "Modbus TCP",
                    })
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut self.framing, Framing::RtuOverTcp, "RTU over TCP");
                        ui.selectable_value(&mut self.framing, Framing::ModbusTcp, "Modbus TCP");
                    });
                ui.label("Unit:");
                ui.add(egui::DragValue::new(&mut self.unit).range(0..=247));
                if ui.button("Connect").clicked() && !self.host.is_empty() {
                    self.connect(runtime);
                }
            });
            busy_indicator(ui, self.in_flight);
            status_row(ui, &self.status, &self.error);
            return;
        }

        ui.horizontal(|ui| {
            for ch in 0..NUM_CHANNELS {
                let on = self.states.map_or(false, |s| s[ch as usize]);
                let label = egui::RichText::new(format!("{ch}")).strong();
                let button = egui::Button::new(label).fill(if on {
                    egui::Color32::DARK_GREEN
                } else {
                    egui::Color32::DARK_GRAY
                });
                if ui.add(button).clicked() {
                    self.set(runtime, ch, !on);
                }
            }
        });

        ui.horizontal(|ui| {
            if ui.button("All on").clicked() {
                self.all(runtime, true);
            }
            if ui.button("All off").clicked() {
                self.all(runtime, false);
            }
            if ui.button("Refresh").clicked() {
                self.refresh(runtime);
            }
        });

        busy_indicator(ui, self.in_flight);
        status_row(ui, &self.status, &self.error);
    }

    fn poll_results(&mut self, runtime: &Runtime) {
        let mut need_refresh = false;
        while let Ok(result) = self.action_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            match result {
                ActionResult::Connected(Ok(driver)) => {
                    self.driver = Some(driver);
                    self.status = Some("connected".to_string());
                    self.error = None;
                    need_refresh = true;
                }
                ActionResult::Connected(Err(e)) => self.error = Some(e),
                ActionResult::States(Ok(states)) => {
                    self.states = Some(states);
                    self.error = None;
                }
                ActionResult::States(Err(e)) => self.error = Some(e),
                ActionResult::Done { what, error } => {
                    match error {
                        None => {
                            self.status = Some(what);
                            self.error = None;
                        }
                        Some(e) => self.error = Some(format!("{what}: {e}")),
                    }
                    need_refresh = true;
                }
            }
        }
        // Re-read coil state after connecting or switching so the buttons
        // track what the board actually did.
        if need_refresh {
            self.refresh(runtime);
        }
    }

    fn connect(&mut self, runtime: &Runtime) {
        let config = RelayConfig {
            host: self.host.clone(),
            framing: self.framing,
            unit: self.unit,
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        self.error = None;
        runtime.spawn(async move {
            let result = Relay::open(&config)
                .await
                .map(Arc::new)
                .map_err(|e| e.to_string());
            let _ = tx.send(ActionResult::Connected(result)).await;
        });
    }

    fn refresh(&mut self, runtime: &Runtime) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let result = driver.read_all().await.map_err(|e| e.to_string());
            let _ = tx.send(ActionResult::States(result)).await;
        });
    }

    fn set(&mut self, runtime: &Runtime, channel: u8, on: bool) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let error = driver.set(channel, on).await.err().map(|e| e.to_string());
            let _ = tx
                .send(ActionResult::Done {
                    what: format!("relay {channel} {}", if on { "on" } else { "off" }),
                    error,
                })
                .await;
        });
    }

    fn all(&mut self, runtime: &Runtime, on: bool) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let result = if on { driver.all_on().await } else { driver.all_off().await };
            let _ = tx
                .send(ActionResult::Done {
                    what: format!("all relays {}", if on { "on" } else { "off" }),
                    error: result.err().map(|e| e.to_string()),
                })
                .await;
        });
    }
}
