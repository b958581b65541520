//! Thorlabs ELL14 rotation mount panel.

use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use instr_driver_thorlabs::{Ell14, Ell14Config, HomeDirection};

use super::{busy_indicator, status_row};

enum ActionResult {
    Connected(Result<Arc<Ell14>, String>),
    Position(Result<f64, String>),
    Done { what: String, error: Option<String> },
}

pub struct Ell14Panel {
    port: String,
    address: String,
    driver: Option<Arc<Ell14>>,

    position: Option<f64>,
    move_target: f64,
    jog_step: f64,

    status: Option<String>,
    error: Option<String>,
    action_tx: mpsc::Sender<ActionResult>,
    action_rx: mpsc::Receiver<ActionResult>,
    in_flight: usize,
}

impl Ell14Panel {
    pub fn new(config: Option<Ell14Config>) -> Self {
        let (action_tx, action_rx) = mpsc::channel(16);
        Self {
            port: config.as_ref().map(|c| c.port.clone()).unwrap_or_default(),
            address: config
                .as_ref()
                .map(|c| c.address.clone())
                .unwrap_or_else(|| "0".to_string()),
            driver: None,
            position: None,
            move_target: 0.0,
            jog_step: 10.0,
            status: None,
            error: None,
            action_tx,
            action_rx,
            in_flight: 0,
        }
    }

    /// Hand the panel an already-open driver (demo mode).
    pub fn attach(&mut self, driver: Arc<Ell14>) {
        self.driver = Some(driver);
        self.status = Some("connected (demo)".to_string());
    }

    pub fn ui(&mut self, ui: &mut egui::Ui, runtime: &Runtime) {
        self.poll_results();

        ui.heading("Thorlabs ELL14");
        ui.separator();

        if self.driver.is_none() {
            ui.horizontal(|ui| {
                ui.label("Port:");
                ui.text_edit_singleline(&mut self.port);
                ui.label("Address:");
                ui.add(egui::TextEdit::singleline(&mut self.address).desired_width(30.0));
                if ui.button("Connect").clicked() && !self.port.is_empty() {
                    self.connect(runtime);
                }
            });
            busy_indicator(ui, self.in_flight);
            status_row(ui, &self.status, &self.error);
            return;
        }

        match self.position {
            Some(deg) => ui.label(format!("Position: {deg:.3} deg")),
            None => ui.label("Position: unknown"),
        };

        ui.horizontal(|ui| {
            ui.add(
                egui::DragValue::new(&mut self.move_target)
                    .speed(0.1)
                    .suffix(" deg"),
            );
            if ui.button("Move absolute").clicked() {
                let deg = self.move_target;
                self.spawn_move(runtime, "move absolute", move |d| async move {
                    d.move_absolute(deg).await
                });
            }
            if ui.button("Move relative").clicked() {
                let deg = self.move_target;
                self.spawn_move(runtime, "move relative", move |d| async move {
                    d.move_relative(deg).await
                });
            }
        });

        ui.horizontal(|ui| {
            if ui.button("Jog -").clicked() {
                self.spawn_move(runtime, "jog backward", |d| async move {
                    d.jog_backward().await
                });
            }
            if ui.button("Jog +").clicked() {
                self.spawn_move(runtime, "jog forward", |d| async move {
                    d.jog_forward().await
                });
            }
            ui.add(
                egui::DragValue::new(&mut self.jog_step)
                    .range(0.001..=180.0)
                    .speed(0.1)
                    .suffix(" deg"),
            );
            if ui.button("Set jog step").clicked() {
                let deg = self.jog_step;
                self.spawn_move(runtime, "jog step", move |d| async move {
                    d.set_jog_step(deg).await
                });
            }
        });

        ui.horizontal(|ui| {
            if ui.button("Home CW").clicked() {
                self.spawn_move(runtime, "home", |d| async move {
                    d.home(HomeDirection::Clockwise).await
                });
            }
            if ui.button("Home CCW").clicked() {
                self.spawn_move(runtime, "home", |d| async move {
                    d.home(HomeDirection::CounterClockwise).await
                });
            }
            if ui.button("Read position").clicked() {
                self.spawn_move(runtime, "position", |d| async move { d.position().await });
            }
            if ui.button("Stop").clicked() {
                self.stop(runtime);
            }
        });

        busy_indicator(ui, self.in_flight);
        status_row(ui, &self.status, &self.error);
    }

    fn poll_results(&mut self) {
        while let Ok(result) = self.action_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            match result {
                ActionResult::Connected(Ok(driver)) => {
                    self.driver = Some(driver);
                    self.status = Some("connected".to_string());
                    self.error = None;
                }
                ActionResult::Connected(Err(e)) => self.error = Some(e),
                ActionResult::Position(Ok(deg)) => {
                    self.position = Some(deg);
                    self.error = None;
                }
                ActionResult::Position(Err(e)) => self.error = Some(e),
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
        let config = Ell14Config {
            port: self.port.clone(),
            address: self.address.clone(),
            pulses_per_degree: None,
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        self.error = None;
        runtime.spawn(async move {
            let result = Ell14::open(&config)
                .await
                .map(Arc::new)
                .map_err(|e| e.to_string());
            let _ = tx.send(ActionResult::Connected(result)).await;
        });
    }

    /// Spawn a driver call that ends at a position, and show that position.
    fn spawn_move<F, Fut>(&mut self, runtime: &Runtime, what: &str, f: F)
    where
        F: FnOnce(Arc<Ell14>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<f64>> + Send,
    {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let what = what.to_string();
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let result = f(driver).await.map_err(|e| format!("{what}: {e}"));
            let _ = tx.send(ActionResult::Position(result)).await;
        });
    }

    fn stop(&mut self, runtime: &Runtime) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let tx = self.action_tx.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let error = driver.stop().await.err().map(|e| e.to_string());
            let _ = tx
                .send(ActionResult::Done {
                    what: "stop".to_string(),
                    error,
                })
                .await;
        });
    }
}
