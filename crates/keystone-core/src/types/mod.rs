//! Core type definitions used across the Keystone workspace.

pub mod id;

pub use id::*;
