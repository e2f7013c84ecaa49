//! Core library for tollgate.
//!
//! Hosts the interrupt/resume control loop (driver, resolver, resume loop),
//! the session store, the tool gateway and the model/tool providers it talks to.

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod prompts;
pub mod providers;
pub mod tools;
