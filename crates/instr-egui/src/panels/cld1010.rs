//! Thorlabs CLD1010 laser diode controller panel.

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use instr_driver_thorlabs::{Cld1010, Cld1010Config};

use super::{busy_indicator, status_row};

const AUTO_REFRESH_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);

#[derive(Clone, Copy, Default)]
struct Snapshot {
    lasing: bool,
    tec_on: bool,
    current: f64,
    setpoint: f64,
    limit: f64,
    temperature: f64,
}

enum ActionResult {
    Connected(Result<(Arc<Cld1010>, String), String>),
    Snapshot(Result<Snapshot, String>),
    Done { what: String, error: Option<String> },
}

pub struct Cld1010Panel {
    host: String,
    max_diode_current: f64,
    driver: Option<Arc<Cld1010>>,
    idn: String,

    snapshot: Snapshot,
    setpoint_target: f64,
    limit_target: f64,

    auto_refresh: bool,
    last_refresh: Option<Instant>,

    status: Option<String>,
    error: Option<String>,
    action_tx: mpsc::Sender<ActionResult>,
    action_rx: mpsc::Receiver<ActionResult>,
    in_flight: usize,
}

impl Cld1010Panel {
    pub fn new(config: Option<Cld1010Config>) -> Self {
        let (action_tx, action_rx) = mpsc::channel(16);
        Self {
            host: config.as_ref().map(|c| c.host.clone()).unwrap_or_default(),
            max_diode_current: config.as_ref().map(|c| c.max_diode_current).unwrap_or(0.1),
            driver: None,
            idn: String::new(),
            snapshot: Snapshot::default(),
            setpoint_target: 0.0,
            limit_target: 0.05,
            auto_refresh: false,
            last_refresh: None,
            status: None,
            error: None,
            action_tx,
            action_rx,
            in_flight: 0,
        }
    }

    pub fn ui(&mut self, ui: &mut egui::Ui, runtime: &Runtime) {
        self.poll_results();

        ui.heading("Thorlabs CLD1010");
        ui.separator();

        if self.driver.is_none() {
            ui.horizontal(|ui| {
                ui.label("Host:");
                ui.text_edit_singleline(&mut self.host);
            });
            ui.horizontal(|ui| {
                ui.label("Diode limit:");
                ui.add(
                    egui::DragValue::new(&mut self.max_diode_current)
                        .range(0.0..=1.5)
                        .speed(0.001)
                        .suffix(" A"),
                );
                if ui.button("Connect").clicked() && !self.host.is_empty() {
                    self.connect(runtime);
                }
            });
            busy_indicator(ui, self.in_flight);
            status_row(ui, &self.status, &self.error);
            return;
        }

        ui.weak(&self.idn);
        let snap = self.snapshot;
        ui.label(format!(
            "Laser {}   TEC {}   {:.1} mA / set {:.1} mA (limit {:.1} mA)   {:.2} C",
            if snap.lasing { "ON" } else { "off" },
            if snap.tec_on { "on" } else { "off" },
            snap.current * 1e3,
            snap.setpoint * 1e3,
            snap.limit * 1e3,
            snap.temperature,
        ));

        ui.horizontal(|ui| {
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

        ui.horizontal(|ui| {
            if ui.button("Laser on").clicked() {
                self.simple(runtime, "laser on", |d| async move { d.on().await });
            }
            if ui.button("Laser off").clicked() {
                self.simple(runtime, "laser off", |d| async move { d.off().await });
            }
            if ui.button("TEC on").clicked() {
                self.simple(runtime, "TEC on", |d| async move { d.set_tec_state(true).await });
            }
            if ui.button("TEC off").clicked() {
                self.simple(runtime, "TEC off", |d| async move {
                    d.set_tec_state(false).await
                });
            }
        });

        ui.horizontal(|ui| {
            ui.add(
                egui::DragValue::new(&mut self.setpoint_target)
                    .range(0.0..=self.max_diode_current)
                    .speed(0.0001)
                    .suffix(" A"),
            );
            if ui.button("Set current").clicked() {
                let amps = self.setpoint_target;
                self.simple(runtime, "setpoint", move |d| async move {
                    d.set_current_setpoint(amps).await
                });
            }
            ui.add(
                egui::DragValue::new(&mut self.limit_target)
                    .range(0.0..=self.max_diode_current)
                    .speed(0.0001)
                    .suffix(" A"),
            );
            if ui.button("Set limit").clicked() {
                let amps = self.limit_target;
                self.simple(runtime, "limit", move |d| async move {
                    d.set_max_current(amps).await
                });
            }
        });

        busy_indicator(ui, self.in_flight);
        status_row(ui, &self.status, &self.error);
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
                ActionResult::Snapshot(Ok(snap)) => {
                    self.snapshot = snap;
                    self.last_refresh = Some(Instant::now());
                    self.error = None;
                }
                ActionResult::Snapshot(Err(e)) => self.error = Some(e),
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
        let config = Cld1010Config {
            host: self.host.clone(),
            max_diode_current: self.max_diode_current,
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        self.error = None;
        runtime.spawn(async move {
            let result = match Cld1010::open(&config).await {
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
                Ok::<_, anyhow::Error>(Snapshot {
                    lasing: driver.ld_state().await?,
                    tec_on: driver.tec_state().await?,
                    current: driver.measure_current().await?,
                    setpoint: driver.current_setpoint().await?,
                    limit: driver.max_current().await?,
                    temperature: driver.temperature().await?,
                })
            }
            .await
            .map_err(|e| e.to_string());
            let _ = tx.send(ActionResult::Snapshot(result)).await;
        });
    }

    /// Spawn a fire-and-forget driver call, reporting success or failure.
    fn simple<F, Fut>(&mut self, runtime: &Runtime, what: &str, f: F)
    where
        F: FnOnce(Arc<Cld1010>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
    {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let what = what.to_string();
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let error = f(driver).await.err().map(|e| e.to_string());
            let _ = tx.send(ActionResult::Done { what, error }).await;
        });
    }
}
