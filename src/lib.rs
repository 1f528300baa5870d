//! Keep the machine awake while a sleep assertion is held.
//!
//! ```no_run
//! use stayawake::{AssertionCategory, AssertionManager};
//!
//! # fn main() -> Result<(), stayawake::Error> {
//! let manager = AssertionManager::new()?;
//! let handle = manager.start(AssertionCategory::PreventDisplaySleep)?;
//! assert!(manager.is_active());
//! // ... long running work ...
//! manager.stop(handle)?;
//! # Ok(())
//! # }
//! ```
//!
//! Assertions are released by the OS when the process exits. Use [`AssertionManager::guard`] to
//! tie an assertion to a scope instead.

#![warn(clippy::all)]

use std::{fmt, str::FromStr};

mod manager;
pub use manager::{AssertionGuard, AssertionManager};

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::IoKitBackend;
#[cfg(target_os = "macos")]
pub type PlatformBackend = IoKitBackend;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::DBusBackend;
#[cfg(target_os = "linux")]
pub type PlatformBackend = DBusBackend;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use self::windows::PowerRequestBackend;
#[cfg(target_os = "windows")]
pub type PlatformBackend = PowerRequestBackend;

mod unsupported;
pub use unsupported::UnsupportedBackend;
#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
pub type PlatformBackend = UnsupportedBackend;

#[cfg(test)]
mod testing;

/// Human readable reason attached to every assertion this crate creates.
pub const ASSERTION_REASON: &str = "stayawake is keeping the system awake";

/// Application id reported to session managers that ask for one.
pub const APP_ID: &str = "io.github.stayawake";

/// The kind of sleep an assertion prevents.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertionCategory {
  /// Keep the system from sleeping due to a lack of user activity. The display may still dim.
  /// For example: downloading a file in the background.
  PreventIdleSleep,
  /// Keep the display from dimming or locking, which also keeps the system awake.
  /// For example: playing a video.
  PreventDisplaySleep,
}

impl AssertionCategory {
  pub const ALL: [AssertionCategory; 2] = [
    AssertionCategory::PreventIdleSleep,
    AssertionCategory::PreventDisplaySleep,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      AssertionCategory::PreventIdleSleep => "prevent-idle-sleep",
      AssertionCategory::PreventDisplaySleep => "prevent-display-sleep",
    }
  }
}

impl fmt::Display for AssertionCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sleep assertion category {0:?}, expected one of: idle, display")]
pub struct ParseCategoryError(String);

impl FromStr for AssertionCategory {
  type Err = ParseCategoryError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "prevent-idle-sleep" | "idle" | "system" => Ok(AssertionCategory::PreventIdleSleep),
      "prevent-display-sleep" | "display" => Ok(AssertionCategory::PreventDisplaySleep),
      _ => Err(ParseCategoryError(s.to_string())),
    }
  }
}

/// Names one live assertion. Only [`AssertionManager::start`] hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssertionHandle(u32);

impl AssertionHandle {
  pub(crate) fn new(id: u32) -> Self {
    Self(id)
  }

  /// The platform's id for this assertion. Useful for logging, nothing else.
  pub fn id(&self) -> u32 {
    self.0
  }
}

impl fmt::Display for AssertionHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// What the platform said when it refused a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Status {
  #[error("code={0:08x}")]
  Code(i32),
  #[error("{0}")]
  Message(String),
  #[error("no such assertion")]
  UnknownHandle,
  #[error("not supported on this platform")]
  Unsupported,
  #[error("no assertion ids left")]
  Exhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("could not prevent sleep ({category}): {status}")]
  AssertionCreationFailed {
    category: AssertionCategory,
    status: Status,
  },
  #[error("could not release sleep assertion {handle}: {status}")]
  AssertionReleaseFailed {
    handle: AssertionHandle,
    status: Status,
  },
  #[error("power management is unavailable: {0}")]
  BackendUnavailable(Status),
}

/// The OS facility that actually holds assertions.
///
/// Ids returned by `create` are wrapped into [`AssertionHandle`]s by the manager and come back
/// through `release`. Implementations must reject ids they never issued or already released.
pub trait Backend: Send + Sync {
  fn create(&self, category: AssertionCategory, reason: &str) -> Result<u32, Status>;
  fn release(&self, id: u32) -> Result<(), Status>;
  /// Whether the current process holds an assertion of any [`AssertionCategory`].
  fn is_active(&self) -> Result<bool, Status>;
}
