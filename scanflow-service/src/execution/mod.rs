// Execution Engine Module
// Run lifecycle, step invocation, cancellation and progress events

pub mod cancel;
pub mod context;
pub mod controller;
pub mod events;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use cancel::CancelToken;
pub use context::StepContext;
pub use controller::RunController;
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
