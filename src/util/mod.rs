//! Utilities shared by the policy, plan and scheduler.

pub mod address;
pub mod bitmap;
pub mod constants;
pub mod conversions;
pub mod logger;
pub mod memory;
pub mod object_forwarding;
pub mod options;
#[cfg(test)]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
