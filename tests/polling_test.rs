//! Timer-driven polling with simulated time.

use std::time::Duration;

use eom_regulator::monitor::{poll_until, Indicator, StatusLine, DEFAULT_POLL_INTERVAL};
use eom_regulator::{DeviceConfig, DeviceController, DriverCall, MockDriver};

fn config() -> DeviceConfig {
    DeviceConfig {
        board_index: 1,
        dac_min: -10.0,
        dac_max: 10.0,
        adc_min: -10.0,
        adc_max: 10.0,
        min_threshold: 0.1,
        max_threshold: 0.5,
        library_path: None,
        use_alternate_calling_convention: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_polls_on_each_tick_until_shutdown() {
    let driver = MockDriver::new();
    driver.set_signal(0.2, 1.0);
    let mut eom = DeviceController::with_driver(driver.clone(), config()).unwrap();
    eom.start().unwrap();

    let mut lines = Vec::new();
    let shutdown = tokio::time::sleep(Duration::from_millis(350));
    let polls = poll_until(&eom, DEFAULT_POLL_INTERVAL, shutdown, |r| {
        lines.push(StatusLine::from_result(&r));
    })
    .await;

    // Ticks at 0, 100, 200 and 300 ms.
    assert_eq!(polls, 4);
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|l| l.indicator == Indicator::Running));
    assert_eq!(lines[0].text, "PD: 0.200  B: 1.000");
    assert_eq!(driver.count(&DriverCall::GetValue), 4);

    eom.close();
}

#[tokio::test(start_paused = true)]
async fn test_read_faults_reach_the_sink() {
    let driver = MockDriver::new();
    let eom = DeviceController::with_driver(driver.clone(), config()).unwrap();
    driver.fail_read(true);

    let mut faults = 0;
    let shutdown = tokio::time::sleep(Duration::from_millis(150));
    poll_until(&eom, DEFAULT_POLL_INTERVAL, shutdown, |r| {
        if r.is_err() {
            faults += 1;
        }
    })
    .await;

    assert_eq!(faults, 2);
}

#[tokio::test(start_paused = true)]
async fn test_closed_controller_ends_polling() {
    let driver = MockDriver::new();
    let mut eom = DeviceController::with_driver(driver.clone(), config()).unwrap();
    eom.close();

    let polls = poll_until(&eom, DEFAULT_POLL_INTERVAL, std::future::pending::<()>(), |_| {}).await;

    assert_eq!(polls, 0);
    assert_eq!(driver.count(&DriverCall::GetValue), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_period_polls_at_the_floor_interval() {
    let driver = MockDriver::new();
    let eom = DeviceController::with_driver(driver.clone(), config()).unwrap();

    let shutdown = tokio::time::sleep(Duration::from_micros(3500));
    let polls = poll_until(&eom, Duration::ZERO, shutdown, |_| {}).await;

    // Ticks at 0, 1, 2 and 3 ms.
    assert_eq!(polls, 4);
    assert_eq!(driver.count(&DriverCall::GetValue), 4);
}
