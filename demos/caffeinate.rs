#![forbid(unsafe_code)]
#![warn(clippy::all)]

//! Keep the machine awake until Ctrl-C.
//!
//! cargo run --example caffeinate -- [idle|display]

use stayawake::{AssertionCategory, AssertionManager};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let category = match std::env::args().nth(1) {
    Some(arg) => arg.parse().unwrap_or_else(|err| {
      error!("{}", err);
      std::process::exit(2);
    }),
    None => AssertionCategory::PreventIdleSleep,
  };

  let manager = AssertionManager::new().unwrap();
  info!(active = manager.is_active(), "before");

  let guard = match manager.guard(category) {
    Ok(guard) => guard,
    Err(err) => {
      error!("sleep prevention could not be established: {}", err);
      std::process::exit(1);
    }
  };
  info!(%category, handle = ?guard.handle(), active = manager.is_active(), "chugging the caffeine. Ctrl-C to stop");

  tokio::signal::ctrl_c().await.unwrap();
  if let Err(err) = guard.release() {
    error!("{}", err);
  }
  info!(active = manager.is_active(), "after");
}
