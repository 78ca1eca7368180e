//! Shared wire objects for the reward relayer.
//!
//! Producers publish [`objects::RewardGranted`] onto the event topic; the
//! relayer answers health probes with the types in [`objects::health`].

#![forbid(unsafe_code)]

pub mod objects;
