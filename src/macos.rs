#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]

use std::{
  ffi::{c_int, c_void},
  marker::{PhantomData, PhantomPinned},
  ptr::null,
};

use tracing::{debug, trace};

use crate::{AssertionCategory, Backend, Error, Status};

/// Holds assertions through IOKit's power management API.
///
/// Assertions are owned by powerd on behalf of this process and are dropped by it when the
/// process exits.
#[derive(Debug, Default)]
pub struct IoKitBackend;

impl IoKitBackend {
  pub fn new() -> Result<Self, Error> {
    Ok(Self)
  }
}

fn assertion_type(category: AssertionCategory) -> &'static str {
  match category {
    AssertionCategory::PreventIdleSleep => kIOPMAssertionTypePreventUserIdleSystemSleep,
    AssertionCategory::PreventDisplaySleep => kIOPMAssertionTypePreventUserIdleDisplaySleep,
  }
}

impl Backend for IoKitBackend {
  fn create(&self, category: AssertionCategory, reason: &str) -> Result<u32, Status> {
    let assertion_type = CFOwned::string(assertion_type(category))?;
    let name = CFOwned::string(reason)?;

    let mut id: IOPMAssertionID = 0;
    // SAFETY: both strings stay alive until after the call and IOKit copies what it keeps
    let ret = unsafe {
      IOPMAssertionCreateWithName(
        assertion_type.as_ptr() as CFStringRef,
        kIOPMAssertionLevelOn,
        name.as_ptr() as CFStringRef,
        &mut id,
      )
    };
    if ret != kIOReturnSuccess {
      debug!("IOPMAssertionCreateWithName failed. ret={:08x}", ret);
      return Err(Status::Code(ret));
    }
    trace!("IOPMAssertionCreateWithName id={}", id);
    Ok(id)
  }

  fn release(&self, id: u32) -> Result<(), Status> {
    // SAFETY: powerd validates the id, unknown or released ids come back as an error
    let ret = unsafe { IOPMAssertionRelease(id) };
    if ret != kIOReturnSuccess {
      debug!("IOPMAssertionRelease failed. id={} ret={:08x}", id, ret);
      return Err(Status::Code(ret));
    }
    Ok(())
  }

  fn is_active(&self) -> Result<bool, Status> {
    let mut by_pid: CFDictionaryRef = null();
    // SAFETY: on success we own the returned dictionary (copy rule) and wrap it right away
    let ret = unsafe { IOPMCopyAssertionsByProcess(&mut by_pid) };
    if ret != kIOReturnSuccess {
      return Err(Status::Code(ret));
    }
    if by_pid.is_null() {
      return Ok(false);
    }
    let by_pid = CFOwned(by_pid as CFTypeRef);

    let pid = std::process::id() as i32;
    let pid_key = CFOwned::number(pid)?;

    // SAFETY: get rule, the array is owned by by_pid which outlives every use below
    let assertions =
      unsafe { CFDictionaryGetValue(by_pid.as_ptr() as CFDictionaryRef, pid_key.as_ptr()) }
        as CFArrayRef;
    if assertions.is_null() {
      return Ok(false);
    }

    let type_key = CFOwned::string(kIOPMAssertionTypeKey)?;
    let managed = AssertionCategory::ALL
      .iter()
      .map(|category| CFOwned::string(assertion_type(*category)))
      .collect::<Result<Vec<_>, _>>()?;

    let count = unsafe { CFArrayGetCount(assertions) };
    trace!("pid {} holds {} assertions", pid, count);
    for index in 0..count {
      // SAFETY: index is in bounds, entries are dictionaries describing one assertion each
      let assertion = unsafe { CFArrayGetValueAtIndex(assertions, index) } as CFDictionaryRef;
      if assertion.is_null() {
        continue;
      }
      let found = unsafe { CFDictionaryGetValue(assertion, type_key.as_ptr()) };
      if found.is_null() {
        continue;
      }
      if managed
        .iter()
        .any(|wanted| unsafe { CFEqual(wanted.as_ptr(), found) } != 0)
      {
        return Ok(true);
      }
    }
    Ok(false)
  }
}

// An owned Core Foundation reference, released on drop
struct CFOwned(CFTypeRef);

impl CFOwned {
  fn string(s: &str) -> Result<Self, Status> {
    // SAFETY: the bytes are copied into the new string
    let string = unsafe {
      CFStringCreateWithBytes(
        null(),
        s.as_ptr(),
        s.len() as CFIndex,
        kCFStringEncodingUTF8,
        0,
      )
    };
    if string.is_null() {
      return Err(Status::Code(kIOReturnNoMemory));
    }
    Ok(Self(string as CFTypeRef))
  }

  fn number(value: i32) -> Result<Self, Status> {
    // SAFETY: the value is copied into the new number
    let number =
      unsafe { CFNumberCreate(null(), kCFNumberSInt32Type, &value as *const i32 as *const c_void) };
    if number.is_null() {
      return Err(Status::Code(kIOReturnNoMemory));
    }
    Ok(Self(number as CFTypeRef))
  }

  fn as_ptr(&self) -> CFTypeRef {
    self.0
  }
}

impl Drop for CFOwned {
  fn drop(&mut self) {
    // SAFETY: we hold the only reference created by a create/copy call
    unsafe { CFRelease(self.0) };
  }
}

type kern_return_t = c_int;

//
// Core Foundation
//

type CFTypeRef = *const c_void;
type CFIndex = isize;
type CFAllocatorRef = *const c_void;
type Boolean = u8;
type CFStringEncoding = u32;
type CFNumberType = CFIndex;

const kCFStringEncodingUTF8: CFStringEncoding = 0x0800_0100;
const kCFNumberSInt32Type: CFNumberType = 3;

#[repr(C)]
struct __CFString(c_void);
type CFStringRef = *const __CFString;

#[repr(C)]
struct __CFNumber {
  _data: [u8; 0],
  _marker: PhantomData<(*mut u8, PhantomPinned)>,
}
type CFNumberRef = *const __CFNumber;

#[repr(C)]
struct __CFDictionary {
  _data: [u8; 0],
  _marker: PhantomData<(*mut u8, PhantomPinned)>,
}
type CFDictionaryRef = *const __CFDictionary;

#[repr(C)]
struct __CFArray {
  _data: [u8; 0],
  _marker: PhantomData<(*mut u8, PhantomPinned)>,
}
type CFArrayRef = *const __CFArray;

#[cfg_attr(target_os = "macos", link(name = "CoreFoundation", kind = "framework"))]
extern "C" {
  fn CFStringCreateWithBytes(
    alloc: CFAllocatorRef,
    bytes: *const u8,
    numBytes: CFIndex,
    encoding: CFStringEncoding,
    isExternalRepresentation: Boolean,
  ) -> CFStringRef;
  fn CFNumberCreate(
    allocator: CFAllocatorRef,
    theType: CFNumberType,
    valuePtr: *const c_void,
  ) -> CFNumberRef;

  fn CFDictionaryGetValue(theDict: CFDictionaryRef, key: *const c_void) -> *const c_void;
  fn CFArrayGetCount(theArray: CFArrayRef) -> CFIndex;
  fn CFArrayGetValueAtIndex(theArray: CFArrayRef, idx: CFIndex) -> *const c_void;

  fn CFEqual(cf1: CFTypeRef, cf2: CFTypeRef) -> Boolean;
  fn CFRelease(cf: CFTypeRef);
}

//
// IOKit
//

const kIOReturnSuccess: IOReturn = 0;
const kIOReturnNoMemory: IOReturn = 0xe00002bd_u32 as i32;

type IOReturn = kern_return_t;
type IOPMAssertionID = u32;
type IOPMAssertionLevel = u32;

const kIOPMAssertionLevelOn: IOPMAssertionLevel = 255;

const kIOPMAssertionTypePreventUserIdleSystemSleep: &str = "PreventUserIdleSystemSleep";
const kIOPMAssertionTypePreventUserIdleDisplaySleep: &str = "PreventUserIdleDisplaySleep";
const kIOPMAssertionTypeKey: &str = "AssertType";

#[cfg_attr(target_os = "macos", link(name = "IOKit", kind = "framework"))]
extern "C" {
  fn IOPMAssertionCreateWithName(
    AssertionType: CFStringRef,
    AssertionLevel: IOPMAssertionLevel,
    AssertionName: CFStringRef,
    AssertionID: *mut IOPMAssertionID,
  ) -> IOReturn;
  fn IOPMAssertionRelease(AssertionID: IOPMAssertionID) -> IOReturn;
  fn IOPMCopyAssertionsByProcess(AssertionsByPID: *mut CFDictionaryRef) -> IOReturn;
}
