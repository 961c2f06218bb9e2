//! Event types published by the engine on its broadcast channels.
//!
//! Everything derives `serde::Serialize` + `serde::Deserialize` so a host can
//! forward events as JSON (the CLI prints them, a UI could emit them).

pub mod events;
