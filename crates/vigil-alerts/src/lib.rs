//! Alert dispatchers.
//!
//! The pipeline hands a finalized [`AlertPayload`](vigil_core::alert::AlertPayload)
//! to exactly one [`AlertDispatcher`](vigil_core::alert::AlertDispatcher).

pub mod logging;
pub mod recording;
pub mod webhook;

pub use logging::LogDispatcher;
pub use recording::RecordingDispatcher;
pub use webhook::WebhookDispatcher;
