//! Power requests through kernel32.
//!
//! Every assertion is one power request object with `PowerRequestSystemRequired` set, plus
//! `PowerRequestDisplayRequired` for display sleep. Closing the request handle ends it, and the
//! kernel closes every handle when the process exits.

use std::{
  collections::BTreeMap,
  sync::{Mutex, MutexGuard, PoisonError},
};

use ::windows::{
  core::PWSTR,
  Win32::{
    Foundation::{CloseHandle, HANDLE},
    System::{
      Power::{
        PowerClearRequest, PowerCreateRequest, PowerRequestDisplayRequired,
        PowerRequestSystemRequired, PowerSetRequest, POWER_REQUEST_TYPE,
      },
      Threading::{POWER_REQUEST_CONTEXT_SIMPLE_STRING, REASON_CONTEXT, REASON_CONTEXT_0},
    },
  },
};
use tracing::{debug, trace};

use crate::{AssertionCategory, Backend, Error, Status};

const POWER_REQUEST_CONTEXT_VERSION: u32 = 0;

// SAFETY: a power request handle is a kernel object handle and may be used from any thread
struct RequestHandle(HANDLE);
unsafe impl Send for RequestHandle {}

struct Request {
  handle: RequestHandle,
  types: &'static [POWER_REQUEST_TYPE],
}

struct Requests {
  next_id: u32,
  held: BTreeMap<u32, Request>,
}

static REQUESTS: Mutex<Requests> = Mutex::new(Requests {
  next_id: 0,
  held: BTreeMap::new(),
});

fn requests() -> MutexGuard<'static, Requests> {
  REQUESTS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds assertions as Win32 power requests. Ids and `is_active` cover the whole process.
#[derive(Debug, Default)]
pub struct PowerRequestBackend;

impl PowerRequestBackend {
  pub fn new() -> Result<Self, Error> {
    Ok(Self)
  }
}

fn request_types(category: AssertionCategory) -> &'static [POWER_REQUEST_TYPE] {
  match category {
    AssertionCategory::PreventIdleSleep => &[PowerRequestSystemRequired],
    AssertionCategory::PreventDisplaySleep => {
      &[PowerRequestSystemRequired, PowerRequestDisplayRequired]
    }
  }
}

// The HRESULT wraps the GetLastError code of the failed call
fn win32_status(err: ::windows::core::Error) -> Status {
  Status::Code(err.code().0)
}

// Clears the given request types, then closes the handle. Returns the first failure.
fn close(handle: HANDLE, types: &[POWER_REQUEST_TYPE]) -> Result<(), Status> {
  let mut first_err = None;
  for request_type in types {
    // SAFETY: the handle came from PowerCreateRequest and is still open
    if let Err(err) = unsafe { PowerClearRequest(handle, *request_type) } {
      debug!("PowerClearRequest failed. type={} err={}", request_type.0, err);
      first_err.get_or_insert(win32_status(err));
    }
  }
  // SAFETY: closed exactly once, the record holding it is gone by now
  if let Err(err) = unsafe { CloseHandle(handle) } {
    debug!("CloseHandle failed. err={}", err);
    first_err.get_or_insert(win32_status(err));
  }
  match first_err {
    Some(status) => Err(status),
    None => Ok(()),
  }
}

impl Backend for PowerRequestBackend {
  fn create(&self, category: AssertionCategory, reason: &str) -> Result<u32, Status> {
    let id = {
      let mut requests = requests();
      let id = requests.next_id.checked_add(1).ok_or(Status::Exhausted)?;
      requests.next_id = id;
      id
    };

    let mut reason: Vec<u16> = reason.encode_utf16().chain(Some(0)).collect();
    let context = REASON_CONTEXT {
      Version: POWER_REQUEST_CONTEXT_VERSION,
      Flags: POWER_REQUEST_CONTEXT_SIMPLE_STRING,
      Reason: REASON_CONTEXT_0 {
        SimpleReasonString: PWSTR(reason.as_mut_ptr()),
      },
    };
    // SAFETY: the reason buffer outlives the call and the kernel copies it
    let handle = unsafe { PowerCreateRequest(&context) }.map_err(win32_status)?;

    let types = request_types(category);
    for (set, request_type) in types.iter().enumerate() {
      // SAFETY: handle is the open request created above
      if let Err(err) = unsafe { PowerSetRequest(handle, *request_type) } {
        debug!("PowerSetRequest failed. type={} err={}", request_type.0, err);
        let _ = close(handle, &types[..set]);
        return Err(win32_status(err));
      }
    }
    trace!("power request id={} types={}", id, types.len());

    requests().held.insert(
      id,
      Request {
        handle: RequestHandle(handle),
        types,
      },
    );
    Ok(id)
  }

  /// Closing the handle ends the request even when clearing a type fails, so the record is
  /// dropped either way.
  fn release(&self, id: u32) -> Result<(), Status> {
    let request = requests()
      .held
      .remove(&id)
      .ok_or(Status::UnknownHandle)?;
    close(request.handle.0, request.types)
  }

  fn is_active(&self) -> Result<bool, Status> {
    Ok(!requests().held.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ASSERTION_REASON;

  #[test]
  fn display_sleep_also_requires_the_system() {
    assert_eq!(
      request_types(AssertionCategory::PreventIdleSleep),
      &[PowerRequestSystemRequired]
    );
    assert_eq!(
      request_types(AssertionCategory::PreventDisplaySleep),
      &[PowerRequestSystemRequired, PowerRequestDisplayRequired]
    );
  }

  #[test]
  fn release_of_unknown_id_fails() {
    let backend = PowerRequestBackend::new().unwrap();
    assert_eq!(backend.release(u32::MAX), Err(Status::UnknownHandle));
  }

  // Needs an interactive session
  #[test]
  #[ignore]
  fn create_release_roundtrip() {
    let backend = PowerRequestBackend::new().unwrap();
    let id = backend
      .create(AssertionCategory::PreventDisplaySleep, ASSERTION_REASON)
      .unwrap();
    assert!(backend.is_active().unwrap());
    backend.release(id).unwrap();
    assert_eq!(backend.release(id), Err(Status::UnknownHandle));
  }
}
