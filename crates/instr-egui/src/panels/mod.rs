//! Per-instrument panels.
//!
//! Every panel follows the same shape: UI interactions queue an action,
//! the action is spawned onto the shared tokio runtime with an `Arc` clone
//! of the driver, and the result comes back through an mpsc channel that
//! the panel drains at the top of each frame.

pub mod cld1010;
pub mod dp832;
pub mod ell14;
pub mod relay;


/// Render the status / error line every panel shows at the bottom.
pub fn status_row(ui: &mut egui::Ui, status: &Option<String>, error: &Option<String>) {
    if let Some(error) = error {
        ui.colored_label(egui::Color32::LIGHT_RED, error);
    } else if let Some(status) = status {
        ui.weak(status);
    }
}

/// Render a spinner while async work is outstanding.
pub fn busy_indicator(ui: &mut egui::Ui, in_flight: usize) {
    if in_flight > 0 {
        ui.horizontal(|ui| {
            ui.spinner();
            ui.weak(format!("{in_flight} pending"));
        });
    }
}
