//! End-to-end tests of the ELL14 driver against the simulated bus module.

use instr_core::serial::wrap_shared_unbuffered;
use instr_driver_mock::{SimElliptec, SimElliptecConfig};
use instr_driver_thorlabs::{Ell14, ElliptecStatus, HomeDirection};

fn sim_rotator(address: char, busy_replies: usize) -> Ell14 {
    let transport = SimElliptec::spawn(SimElliptecConfig {
        address,
        busy_replies,
        ..SimElliptecConfig::default()
    });
    Ell14::new(wrap_shared_unbuffered(transport), &address.to_string())
}

#[tokio::test]
async fn absolute_move_round_trips_in_degrees() {
    let rotator = sim_rotator('2', 0);
    let reached = rotator.move_absolute(45.0).await.unwrap();
    assert!((reached - 45.0).abs() < 1e-3, "reached {reached}");
    let position = rotator.position().await.unwrap();
    assert!((position - 45.0).abs() < 1e-3);
}

#[tokio::test]
async fn busy_lines_during_motion_are_tolerated() {
    let rotator = sim_rotator('0', 3);
    let reached = rotator.move_absolute(90.0).await.unwrap();
    assert!((reached - 90.0).abs() < 1e-3);
}

#[tokio::test]
async fn homing_returns_to_zero() {
    let rotator = sim_rotator('0', 0);
    rotator.move_absolute(120.0).await.unwrap();
    let home = rotator.home(HomeDirection::Clockwise).await.unwrap();
    assert_eq!(home, 0.0);
}

#[tokio::test]
async fn relative_moves_accumulate() {
    let rotator = sim_rotator('0', 0);
    rotator.move_absolute(10.0).await.unwrap();
    let reached = rotator.move_relative(-40.0).await.unwrap();
    assert!((reached - -30.0).abs() < 1e-3, "reached {reached}");
}

#[tokio::test]
async fn jog_step_applies_to_jogs() {
    let rotator = sim_rotator('0', 0);
    rotator.set_jog_step(15.0).await.unwrap();
    let forward = rotator.jog_forward().await.unwrap();
    assert!((forward - 15.0).abs() < 1e-2, "forward {forward}");
    let back = rotator.jog_backward().await.unwrap();
    assert!(back.abs() < 1e-2, "back {back}");
}

#[tokio::test]
async fn calibration_is_read_from_module_info() {
    let transport = SimElliptec::spawn(SimElliptecConfig::default());
    let rotator = Ell14::open_calibrated(wrap_shared_unbuffered(transport), "0")
        .await
        .unwrap();
    // 143360 pulses per 360 degree travel.
    assert!((rotator.pulses_per_degree() - 143_360.0 / 360.0).abs() < 1e-6);
}

#[tokio::test]
async fn status_reports_ok_when_idle() {
    let rotator = sim_rotator('0', 0);
    assert_eq!(rotator.status().await.unwrap(), ElliptecStatus::Ok);
    rotator.wait_settled().await.unwrap();
}
