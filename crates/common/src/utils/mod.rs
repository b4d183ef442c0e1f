//! Common utility helpers
//!
//! - **[`serde`]**: Serialization helpers for settings types

pub mod serde;

pub use self::serde::duration_millis;
