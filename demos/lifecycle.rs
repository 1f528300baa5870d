#![forbid(unsafe_code)]
#![warn(clippy::all)]

use stayawake::{AssertionCategory, AssertionManager};
use tracing::info;

fn main() {
  tracing_subscriber::fmt().init();

  let manager = AssertionManager::new().unwrap();
  info!("is_active: {}", manager.is_active());

  let handle = manager
    .start(AssertionCategory::PreventDisplaySleep)
    .unwrap();
  info!("started {}", handle);
  info!("is_active: {}", manager.is_active());

  manager.stop(handle).unwrap();
  info!("stopped {}", handle);
  info!("is_active: {}", manager.is_active());

  match manager.stop(handle) {
    Ok(()) => info!("second stop unexpectedly succeeded"),
    Err(err) => info!("second stop refused: {}", err),
  }
}
