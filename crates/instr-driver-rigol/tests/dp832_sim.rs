//! End-to-end tests of the DP832 driver against the simulated supply.

use instr_driver_mock::{SimPowerSupply, SimPowerSupplyConfig};
use instr_driver_rigol::{Confirm, Dp832, Dp832Config};

async fn sim_psu() -> Dp832 {
    let transport = SimPowerSupply::spawn(SimPowerSupplyConfig::default());
    Dp832::from_transport(transport, Dp832Config::new("sim"))
        .await
        .expect("simulated supply should open")
}

#[tokio::test]
async fn identifies_on_open() {
    let psu = sim_psu().await;
    assert!(psu.idn().starts_with("SIMULATED"));
}

#[tokio::test]
async fn confirmed_setpoint_converges() {
    let psu = sim_psu().await;
    psu.set_output(1, true).await.unwrap();
    psu.set_voltage(1, 5.0, Confirm::Default).await.unwrap();

    let measured = psu.measure_voltage(1).await.unwrap();
    assert!((measured - 5.0).abs() < 0.05, "measured {measured}");
    assert_eq!(psu.voltage_setpoint(1).await.unwrap(), 5.0);
}

#[tokio::test]
async fn channels_are_independent() {
    let psu = sim_psu().await;
    psu.set_output(2, true).await.unwrap();
    psu.set_current(2, 0.25, Confirm::Default).await.unwrap();

    assert_eq!(psu.current_setpoint(2).await.unwrap(), 0.25);
    assert_eq!(psu.current_setpoint(1).await.unwrap(), 0.0);
}

#[tokio::test]
async fn protection_commands_are_accepted() {
    let psu = sim_psu().await;
    psu.set_ovp_limit(1, 5.5).await.unwrap();
    psu.set_ovp_enabled(1, true).await.unwrap();
    assert!(!psu.ovp_alarm(1).await.unwrap());
    psu.set_ocp_limit(1, 0.5).await.unwrap();
    assert!(!psu.ocp_alarm(1).await.unwrap());
}

#[tokio::test]
async fn unconfirmed_write_returns_immediately() {
    let psu = sim_psu().await;
    // Output stays off so the measurement never converges; Confirm::Off
    // must not wait on it.
    psu.set_voltage(1, 12.0, Confirm::Off).await.unwrap();
    assert_eq!(psu.voltage_setpoint(1).await.unwrap(), 12.0);
}
