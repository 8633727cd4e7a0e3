//! Memory policies. This crate has a single one: regions.

pub mod region;
