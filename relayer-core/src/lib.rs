#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod chain;
pub mod entities;
pub mod events;
pub mod framework;
pub mod processors;
pub mod relayer;
pub mod source;
pub mod store;
pub mod workerpool;

#[cfg(test)]
mod testing;
