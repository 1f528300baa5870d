use crate::{AssertionCategory, Backend, Error, Status};

/// Backend for platforms without a known power management facility. Every assertion is refused.
#[derive(Debug, Default)]
pub struct UnsupportedBackend;

impl UnsupportedBackend {
  pub fn new() -> Result<Self, Error> {
    Ok(Self)
  }
}

impl Backend for UnsupportedBackend {
  fn create(&self, _category: AssertionCategory, _reason: &str) -> Result<u32, Status> {
    Err(Status::Unsupported)
  }

  fn release(&self, _id: u32) -> Result<(), Status> {
    Err(Status::UnknownHandle)
  }

  fn is_active(&self) -> Result<bool, Status> {
    Ok(false)
  }
}
