//! Shared fakes and harness for integration tests
//!
//! The vendor client, entity platforms and wall clock are replaced by
//! in-memory fakes so the integration can be driven end to end.

#![allow(dead_code)]

mod fake_platforms;
mod fake_vendor;
mod harness;
mod time;

pub use fake_platforms::*;
pub use fake_vendor::*;
pub use harness::*;
pub use time::*;
