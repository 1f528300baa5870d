//! In-memory backend with IOKit-like semantics for unit tests.

use std::{
  collections::HashSet,
  sync::{Mutex, PoisonError},
};

use crate::{AssertionCategory, Backend, Status};

#[derive(Default)]
struct State {
  next_id: u32,
  live: HashSet<u32>,
  created: Vec<(AssertionCategory, String)>,
  fail_queries: bool,
}

#[derive(Default)]
pub struct RecordingBackend {
  rejected: Option<AssertionCategory>,
  state: Mutex<State>,
}

impl RecordingBackend {
  // kIOReturnNotFound
  pub const NOT_FOUND: i32 = 0xe00002f0_u32 as i32;

  pub fn rejecting(category: AssertionCategory) -> Self {
    Self {
      rejected: Some(category),
      ..Self::default()
    }
  }

  pub fn with_next_id(next_id: u32) -> Self {
    let backend = Self::default();
    backend.state().next_id = next_id;
    backend
  }

  pub fn created(&self) -> Vec<(AssertionCategory, String)> {
    self.state().created.clone()
  }

  pub fn live_count(&self) -> usize {
    self.state().live.len()
  }

  pub fn fail_queries(&self, fail: bool) {
    self.state().fail_queries = fail;
  }

  fn state(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Backend for RecordingBackend {
  fn create(&self, category: AssertionCategory, reason: &str) -> Result<u32, Status> {
    if self.rejected == Some(category) {
      return Err(Status::Unsupported);
    }
    let mut state = self.state();
    let id = state.next_id.checked_add(1).ok_or(Status::Exhausted)?;
    state.next_id = id;
    state.live.insert(id);
    state.created.push((category, reason.to_string()));
    Ok(id)
  }

  fn release(&self, id: u32) -> Result<(), Status> {
    if self.state().live.remove(&id) {
      Ok(())
    } else {
      Err(Status::Code(Self::NOT_FOUND))
    }
  }

  fn is_active(&self) -> Result<bool, Status> {
    let state = self.state();
    if state.fail_queries {
      return Err(Status::Message("query refused".to_string()));
    }
    Ok(!state.live.is_empty())
  }
}
