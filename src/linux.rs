//! Sleep inhibition over the session bus.
//!
//! GNOME's session manager is asked first. Desktops without it get the freedesktop screen saver
//! and power management interfaces instead, which need one inhibit call per kind of sleep.
//!
//! Held cookies live in one registry for the whole process, so ids are unique across every
//! [`DBusBackend`] and `is_active` answers for the process, not for one backend.

use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use dbus::{
  blocking::{BlockingSender, SyncConnection},
  Message,
};
use tracing::{debug, trace, warn};

use crate::{AssertionCategory, Backend, Error, Status, APP_ID};

const REPLY_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Api {
  // org.gnome.SessionManager
  Gnome,
  // org.freedesktop.PowerManagement
  FreeDesktopPower,
  // org.freedesktop.ScreenSaver
  FreeDesktopScreenSaver,
}

// Inhibit flags of the org.gnome.SessionManager interface
const INHIBIT_SUSPEND_SESSION: u32 = 4;
const INHIBIT_MARK_SESSION_IDLE: u32 = 8;

/// Sends method calls and waits for the reply.
trait Bus: Send + Sync {
  fn call(&self, msg: Message) -> Result<Message, Status>;
}

impl Bus for SyncConnection {
  fn call(&self, msg: Message) -> Result<Message, Status> {
    self
      .send_with_reply_and_block(msg, REPLY_TIMEOUT)
      .map_err(|err| dbus_status(&err))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cookie {
  api: Api,
  value: u32,
}

struct Record {
  // cookies are only valid on the connection that took them
  bus: Arc<dyn Bus>,
  cookies: Vec<Cookie>,
  releasing: bool,
}

struct Registry {
  next_id: u32,
  held: BTreeMap<u32, Record>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
  next_id: 0,
  held: BTreeMap::new(),
});

fn registry() -> MutexGuard<'static, Registry> {
  REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds assertions as D-Bus inhibit cookies on the session bus.
///
/// The bus drops every inhibition of a connection when it closes, so nothing outlives the process.
pub struct DBusBackend {
  bus: Arc<dyn Bus>,
}

impl DBusBackend {
  pub fn new() -> Result<Self, Error> {
    let bus = SyncConnection::new_session()
      .map_err(|err| Error::BackendUnavailable(dbus_status(&err)))?;
    Ok(Self::with_bus(Arc::new(bus)))
  }

  fn with_bus(bus: Arc<dyn Bus>) -> Self {
    Self { bus }
  }

  fn inhibit(&self, api: Api, category: AssertionCategory, reason: &str) -> Result<Cookie, Status> {
    let reply = self.bus.call(inhibit_msg(api, category, reason))?;
    let value = reply
      .get1::<u32>()
      .ok_or_else(|| Status::Message(format!("{:?} Inhibit returned no cookie", api)))?;
    trace!(?api, cookie = value, "inhibited");
    Ok(Cookie { api, value })
  }

  fn inhibit_freedesktop(
    &self,
    category: AssertionCategory,
    reason: &str,
  ) -> Result<Vec<Cookie>, Status> {
    let mut cookies = Vec::with_capacity(2);
    if category == AssertionCategory::PreventDisplaySleep {
      cookies.push(self.inhibit(Api::FreeDesktopScreenSaver, category, reason)?);
    }
    match self.inhibit(Api::FreeDesktopPower, category, reason) {
      Ok(cookie) => cookies.push(cookie),
      Err(status) => {
        // give back what we already took so a failed create leaves nothing behind
        for cookie in cookies {
          if let Err(err) = uninhibit(self.bus.as_ref(), cookie) {
            warn!(%err, "failed to roll back partial inhibit");
          }
        }
        return Err(status);
      }
    }
    Ok(cookies)
  }
}

fn uninhibit(bus: &dyn Bus, cookie: Cookie) -> Result<(), Status> {
  bus.call(uninhibit_msg(cookie.api, cookie.value))?;
  trace!(api = ?cookie.api, cookie = cookie.value, "uninhibited");
  Ok(())
}

impl Backend for DBusBackend {
  fn create(&self, category: AssertionCategory, reason: &str) -> Result<u32, Status> {
    // ids are taken up front and never reused, a failed inhibit just skips one
    let id = {
      let mut registry = registry();
      let id = registry.next_id.checked_add(1).ok_or(Status::Exhausted)?;
      registry.next_id = id;
      id
    };

    let cookies = match self.inhibit(Api::Gnome, category, reason) {
      Ok(cookie) => vec![cookie],
      Err(status) => {
        debug!(%status, "gnome session manager unavailable, trying freedesktop");
        self.inhibit_freedesktop(category, reason)?
      }
    };

    registry().held.insert(
      id,
      Record {
        bus: self.bus.clone(),
        cookies,
        releasing: false,
      },
    );
    Ok(id)
  }

  /// Uninhibits every cookie of `id` on the connection that took it.
  ///
  /// The record is kept until the bus confirms each uninhibit. Cookies whose uninhibit failed
  /// stay registered under the same id, so `is_active` keeps reporting them and a later release
  /// can retry. The first failure is returned.
  fn release(&self, id: u32) -> Result<(), Status> {
    let (bus, cookies) = {
      let mut registry = registry();
      let record = match registry.held.get_mut(&id) {
        Some(record) if !record.releasing => record,
        _ => return Err(Status::UnknownHandle),
      };
      record.releasing = true;
      (record.bus.clone(), record.cookies.clone())
    };

    let mut first_err = None;
    let mut kept = Vec::new();
    for cookie in cookies {
      if let Err(status) = uninhibit(bus.as_ref(), cookie) {
        kept.push(cookie);
        first_err.get_or_insert(status);
      }
    }

    let mut registry = registry();
    if kept.is_empty() {
      registry.held.remove(&id);
    } else if let Some(record) = registry.held.get_mut(&id) {
      record.cookies = kept;
      record.releasing = false;
    }
    match first_err {
      Some(status) => Err(status),
      None => Ok(()),
    }
  }

  fn is_active(&self) -> Result<bool, Status> {
    Ok(!registry().held.is_empty())
  }
}

fn dbus_status(err: &dbus::Error) -> Status {
  Status::Message(format!(
    "{}: {}",
    err.name().unwrap_or("org.freedesktop.DBus.Error.Failed"),
    err.message().unwrap_or("no message")
  ))
}

fn gnome_flags(category: AssertionCategory) -> u32 {
  match category {
    AssertionCategory::PreventIdleSleep => INHIBIT_SUSPEND_SESSION,
    AssertionCategory::PreventDisplaySleep => INHIBIT_SUSPEND_SESSION | INHIBIT_MARK_SESSION_IDLE,
  }
}

fn inhibit_msg(api: Api, category: AssertionCategory, reason: &str) -> Message {
  match api {
    // app_id, toplevel_xid, reason, flags
    Api::Gnome => Message::call_with_args(
      "org.gnome.SessionManager",
      "/org/gnome/SessionManager",
      "org.gnome.SessionManager",
      "Inhibit",
      (APP_ID, 0u32, reason, gnome_flags(category)),
    ),
    // app_id, reason
    Api::FreeDesktopPower => Message::call_with_args(
      "org.freedesktop.PowerManagement",
      "/org/freedesktop/PowerManagement/Inhibit",
      "org.freedesktop.PowerManagement.Inhibit",
      "Inhibit",
      (APP_ID, reason),
    ),
    Api::FreeDesktopScreenSaver => Message::call_with_args(
      "org.freedesktop.ScreenSaver",
      "/org/freedesktop/ScreenSaver",
      "org.freedesktop.ScreenSaver",
      "Inhibit",
      (APP_ID, reason),
    ),
  }
}

fn uninhibit_msg(api: Api, cookie: u32) -> Message {
  match api {
    Api::Gnome => Message::call_with_args(
      "org.gnome.SessionManager",
      "/org/gnome/SessionManager",
      "org.gnome.SessionManager",
      "Uninhibit",
      (cookie,),
    ),
    Api::FreeDesktopPower => Message::call_with_args(
      "org.freedesktop.PowerManagement",
      "/org/freedesktop/PowerManagement/Inhibit",
      "org.freedesktop.PowerManagement.Inhibit",
      "UnInhibit",
      (cookie,),
    ),
    Api::FreeDesktopScreenSaver => Message::call_with_args(
      "org.freedesktop.ScreenSaver",
      "/org/freedesktop/ScreenSaver",
      "org.freedesktop.ScreenSaver",
      "UnInhibit",
      (cookie,),
    ),
  }
}
