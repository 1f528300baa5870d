use tracing::{debug, warn};

use crate::{
  AssertionCategory, AssertionHandle, Backend, Error, PlatformBackend, ASSERTION_REASON,
};

/// Creates, releases and probes sleep assertions.
///
/// The manager keeps no record of the handles it hands out. Whoever holds a handle owns the
/// assertion and is expected to [`stop`](Self::stop) it on every path, or let an
/// [`AssertionGuard`] do that.
pub struct AssertionManager<B = PlatformBackend> {
  backend: B,
}

impl AssertionManager<PlatformBackend> {
  /// Connects to the power management facility of the current platform.
  pub fn new() -> Result<Self, Error> {
    Ok(Self::with_backend(PlatformBackend::new()?))
  }
}

impl<B: Backend> AssertionManager<B> {
  pub fn with_backend(backend: B) -> Self {
    Self { backend }
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  /// Asks the OS to hold off the kind of sleep named by `category` until the returned handle is
  /// passed to [`stop`](Self::stop) or the process exits.
  pub fn start(&self, category: AssertionCategory) -> Result<AssertionHandle, Error> {
    match self.backend.create(category, ASSERTION_REASON) {
      Ok(id) => {
        let handle = AssertionHandle::new(id);
        debug!(%category, %handle, "sleep assertion created");
        Ok(handle)
      }
      Err(status) => {
        warn!(%category, %status, "sleep assertion refused");
        Err(Error::AssertionCreationFailed { category, status })
      }
    }
  }

  /// Releases an assertion. Releasing the same handle twice is an error.
  pub fn stop(&self, handle: AssertionHandle) -> Result<(), Error> {
    match self.backend.release(handle.id()) {
      Ok(()) => {
        debug!(%handle, "sleep assertion released");
        Ok(())
      }
      Err(status) => Err(Error::AssertionReleaseFailed { handle, status }),
    }
  }

  /// Whether this process currently holds a sleep assertion of any category. A failed probe
  /// reads as `false`.
  pub fn is_active(&self) -> bool {
    match self.backend.is_active() {
      Ok(active) => active,
      Err(status) => {
        warn!(%status, "sleep assertion query failed");
        false
      }
    }
  }

  /// Starts an assertion that is stopped when the returned guard goes out of scope.
  pub fn guard(&self, category: AssertionCategory) -> Result<AssertionGuard<'_, B>, Error> {
    let handle = self.start(category)?;
    Ok(AssertionGuard {
      manager: self,
      category,
      handle: Some(handle),
    })
  }
}

/// Holds an assertion for as long as it lives.
#[must_use = "the assertion is released as soon as the guard is dropped"]
pub struct AssertionGuard<'a, B: Backend = PlatformBackend> {
  manager: &'a AssertionManager<B>,
  category: AssertionCategory,
  // None once released
  handle: Option<AssertionHandle>,
}

impl<B: Backend> AssertionGuard<'_, B> {
  pub fn handle(&self) -> Option<AssertionHandle> {
    self.handle
  }

  pub fn category(&self) -> AssertionCategory {
    self.category
  }

  /// Stops the assertion now and reports whether the OS accepted the release.
  pub fn release(mut self) -> Result<(), Error> {
    match self.handle.take() {
      Some(handle) => self.manager.stop(handle),
      None => Ok(()),
    }
  }
}

impl<B: Backend> Drop for AssertionGuard<'_, B> {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      if let Err(err) = self.manager.stop(handle) {
        warn!(%err, "failed to release sleep assertion on drop");
      }
    }
  }
}
