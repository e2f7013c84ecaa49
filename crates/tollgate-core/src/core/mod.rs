//! The interrupt/resume control loop and the state it runs against.

pub mod driver;
pub mod engine;
pub mod events;
pub mod grants;
pub mod interrupt;
pub mod message;
pub mod resolver;
pub mod resume;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
