//! Shared vocabulary for the vigil early-warning pipeline.
//!
//! Everything the engine, the reasoning backends and the alert dispatchers
//! agree on lives here: roles and regions, risk categories and levels,
//! dialogue transcripts, the collaborator traits and the event stream.

pub mod alert;
pub mod dialogue;
pub mod errors;
pub mod events;
pub mod ids;
pub mod pipeline;
pub mod reasoner;
pub mod request;
pub mod risk;
pub mod role;
