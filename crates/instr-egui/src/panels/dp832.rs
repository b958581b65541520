//! Rigol DP832 power supply panel.

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use instr_driver_rigol::{Confirm, Dp832, Dp832Config, NUM_CHANNELS};

use super::{busy_indicator, status_row};

const AUTO_REFRESH_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);

/// One channel's measurement snapshot.
#[derive(Clone, Copy, Default)]
struct ChannelReading {
    volts: f64,
    amps: f64,
    watts: f64,
}

enum ActionResult {
    Connected(Result<(Arc<Dp832>, String), String>),
    Readings(Result<[ChannelReading; NUM_CHANNELS as usize], String>),
    Done {
        what: String,
        error: Option<String>,
    },
}

pub struct Dp832Panel {
    host: String,
    config: Option<Dp832Config>,
    driver: Option<Arc<Dp832>>,
    idn: String,

    voltage_target: [f64; NUM_CHANNELS as usize],
    current_target: [f64; NUM_CHANNELS as usize],
    readings: [ChannelReading; NUM_CHANNELS as usize],

    confirm_settle: bool,
    auto_refresh: bool,
    last_refresh: Option<Instant>,

    status: Option<String>,
    error: Option<String>,
    action_tx: mpsc::Sender<ActionResult>,
    action_rx: mpsc::Receiver<ActionResult>,
    in_flight: usize,
}

impl Dp832Panel {
    pub fn new(config: Option<Dp832Config>) -> Self {
        let (action_tx, action_rx) = mpsc::channel(16);
        Self {
            host: config.as_ref().map(|c| c.host.clone()).unwrap_or_default(),
            config,
            driver: None,
            idn: String::new(),
            voltage_target: [0.0; NUM_CHANNELS as usize],
            current_target: [0.1; NUM_CHANNELS as usize],
            readings: [ChannelReading::default(); NUM_CHANNELS as usize],
            confirm_settle: true,
            auto_refresh: false,
            last_refresh: None,
            status: None,
            error: None,
            action_tx,
            action_rx,
            in_flight: 0,
        }
    }

    /// Hand the panel an already-open driver (demo mode).
    pub fn attach(&mut self, driver: Arc<Dp832>) {
        self.idn = driver.idn().to_string();
        self.driver = Some(driver);
        self.status = Some("connected (demo)".to_string());
    }

    pub fn ui(&mut self, ui: &mut egui::Ui, runtime: &Runtime) {
        self.poll_results();

        ui.heading("Rigol DP832");
        ui.separator();

        if self.driver.is_none() {
            ui.horizontal(|ui| {
                ui.label("Host:");
                ui.text_edit_singleline(&mut self.host);
                if ui.button("Connect").clicked() && !self.host.is_empty() {
                    self.connect(runtime);
                }
            });
            busy_indicator(ui, self.in_flight);
            status_row(ui, &self.status, &self.error);
            return;
        }

        ui.weak(&self.idn);
        ui.horizontal(|ui| {
            ui.checkbox(&mut self.confirm_settle, "Confirm setpoints settle");
            ui.checkbox(&mut self.auto_refresh, "Auto refresh");
            if ui.button("Refresh").clicked() {
                self.refresh(runtime);
            }
        });

        if self.auto_refresh
            && self.in_flight == 0
            && self
                .last_refresh
                .map_or(true, |t| t.elapsed() >= AUTO_REFRESH_PERIOD)
        {
            self.refresh(runtime);
        }

        for ch in 1..=NUM_CHANNELS {
            self.channel_ui(ui, runtime, ch);
        }

        busy_indicator(ui, self.in_flight);
        status_row(ui, &self.status, &self.error);
    }

    fn channel_ui(&mut self, ui: &mut egui::Ui, runtime: &Runtime, ch: u8) {
        let idx = (ch - 1) as usize;
        let reading = self.readings[idx];

        egui::CollapsingHeader::new(format!("Channel {ch}"))
            .default_open(true)
            .show(ui, |ui| {
                ui.horizontal(|ui| {
                    ui.label(format!(
                        "{:.3} V   {:.3} A   {:.3} W",
                        reading.volts, reading.amps, reading.watts
                    ));
                });
                ui.horizontal(|ui| {
                    ui.add(
                        egui::DragValue::new(&mut self.voltage_target[idx])
                            .range(0.0..=32.0)
                            .speed(0.01)
                            .suffix(" V"),
                    );
                    if ui.button("Set voltage").clicked() {
                        self.set_voltage(runtime, ch);
                    }
                    ui.add(
                        egui::DragValue::new(&mut self.current_target[idx])
                            .range(0.0..=3.2)
                            .speed(0.001)
                            .suffix(" A"),
                    );
                    if ui.button("Set current").clicked() {
                        self.set_current(runtime, ch);
                    }
                });
                ui.horizontal(|ui| {
                    if ui.button("Output on").clicked() {
                        self.set_output(runtime, ch, true);
                    }
                    if ui.button("Output off").clicked() {
                        self.set_output(runtime, ch, false);
                    }
                    if ui.button("Clear OVP").clicked() {
                        self.clear_alarms(runtime, ch);
                    }
                });
            });
    }

    fn poll_results(&mut self) {
        while let Ok(result) = self.action_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            match result {
                ActionResult::Connected(Ok((driver, idn))) => {
                    self.idn = idn;
                    self.driver = Some(driver);
                    self.status = Some("connected".to_string());
                    self.error = None;
                }
                ActionResult::Connected(Err(e)) => self.error = Some(e),
                ActionResult::Readings(Ok(readings)) => {
                    self.readings = readings;
                    self.last_refresh = Some(Instant::now());
                    self.error = None;
                }
                ActionResult::Readings(Err(e)) => self.error = Some(e),
                ActionResult::Done { what, error } => match error {
                    None => {
                        self.status = Some(what);
                        self.error = None;
                    }
                    Some(e) => self.error = Some(format!("{what}: {e}")),
                },
            }
        }
    }

    fn connect(&mut self, runtime: &Runtime) {
        let config = self
            .config
            .clone()
            .unwrap_or_else(|| Dp832Config::new(self.host.clone()));
        let config = Dp832Config {
            host: self.host.clone(),
            ..config
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        self.error = None;
        runtime.spawn(async move {
            let result = match Dp832::open(config).await {
                Ok(driver) => {
                    let idn = driver.idn().to_string();
                    Ok((Arc::new(driver), idn))
                }
                Err(e) => Err(e.to_string()),
            };
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
            let result = async {
                let mut readings = [ChannelReading::default(); NUM_CHANNELS as usize];
                for ch in 1..=NUM_CHANNELS {
                    let idx = (ch - 1) as usize;
                    readings[idx] = ChannelReading {
                        volts: driver.measure_voltage(ch).await?,
                        amps: driver.measure_current(ch).await?,
                        watts: driver.measure_power(ch).await?,
                    };
                }
                Ok::<_, anyhow::Error>(readings)
            }
            .await
            .map_err(|e| e.to_string());
            let _ = tx.send(ActionResult::Readings(result)).await;
        });
    }

    fn set_voltage(&mut self, runtime: &Runtime, ch: u8) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let volts = self.voltage_target[(ch - 1) as usize];
        let confirm = if self.confirm_settle {
            Confirm::Default
        } else {
            Confirm::Off
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let error = driver
                .set_voltage(ch, volts, confirm)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = tx
                .send(ActionResult::Done {
                    what: format!("CH{ch} voltage -> {volts:.3} V"),
                    error,
                })
                .await;
        });
    }

    fn set_current(&mut self, runtime: &Runtime, ch: u8) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let amps = self.current_target[(ch - 1) as usize];
        let confirm = if self.confirm_settle {
            Confirm::Default
        } else {
            Confirm::Off
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let error = driver
                .set_current(ch, amps, confirm)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = tx
                .send(ActionResult::Done {
                    what: format!("CH{ch} current -> {amps:.3} A"),
                    error,
                })
                .await;
        });
    }

    fn set_output(&mut self, runtime: &Runtime, ch: u8, on: bool) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let error = driver.set_output(ch, on).await.err().map(|e| e.to_string());
            let _ = tx
                .send(ActionResult::Done {
                    what: format!("CH{ch} output {}", if on { "on" } else { "off" }),
                    error,
                })
                .await;
        });
    }

    fn clear_alarms(&mut self, runtime: &Runtime, ch: u8) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let result = async {
                driver.clear_ovp_alarm(ch).await?;
                driver.clear_ocp_alarm(ch).await
            }
            .await;
            let _ = tx
                .send(ActionResult::Done {
                    what: format!("CH{ch} alarms cleared"),
                    error: result.err().map(|e| e.to_string()),
                })
                .await;
        });
    }
}
