//! Shared test helpers for the Quanta integration suite.

pub mod helpers;
