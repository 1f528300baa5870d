//! Runs against the real power management facility. These need a logged-in desktop session, run
//! them with `cargo test -- --ignored`.

use std::sync::{Mutex, MutexGuard};

use stayawake::{AssertionCategory, AssertionManager, Error};

// every backend answers is_active for the whole process, so tests must not overlap
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
  SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
#[ignore]
fn every_category_starts_and_stops() {
  let _serial = serial();
  let manager = AssertionManager::new().unwrap();
  for category in AssertionCategory::ALL {
    let handle = manager.start(category).unwrap();
    assert!(manager.is_active());
    manager.stop(handle).unwrap();
  }
  assert!(!manager.is_active());
}

#[test]
#[ignore]
fn display_sleep_lifecycle() {
  let _serial = serial();
  let manager = AssertionManager::new().unwrap();
  assert!(!manager.is_active());

  let handle = manager.start(AssertionCategory::PreventDisplaySleep).unwrap();
  assert!(manager.is_active());
  manager.stop(handle).unwrap();
  assert!(!manager.is_active());

  assert!(matches!(
    manager.stop(handle),
    Err(Error::AssertionReleaseFailed { .. })
  ));
}

#[test]
#[ignore]
fn guard_holds_for_its_scope() {
  let _serial = serial();
  let manager = AssertionManager::new().unwrap();
  {
    let _guard = manager.guard(AssertionCategory::PreventIdleSleep).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(500));
    assert!(manager.is_active());
  }
  assert!(!manager.is_active());
}
