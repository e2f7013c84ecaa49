//! Reasoning engine implementations.

pub mod chat;

pub use chat::ChatEngine;
