//! Test doubles for exercising the lifecycle and workers without a broker

pub mod mocks;

pub use mocks::*;
