//! Lifecycle callbacks.
//!
//! The orchestrator reports its generation lifecycle through this trait so
//! the collaborator layer (gateway, console) can drive typing indicators and
//! deliver replies. All methods are fire-and-forget with no return value
//! consumed; the defaults do nothing, so implementors override only what
//! they need.

/// Observer of the generation lifecycle.
///
/// Callbacks run synchronously inside the state transition that triggers
/// them, which keeps start/stop ordering deterministic across tasks. They
/// must return quickly and must not call back into the bot; hand anything
/// slow to a channel or a spawned task.
pub trait ChatEvents: Send + Sync {
    /// Fired on the `Idle -> Generating` transition only, never on the
    /// internal restart of a coalesced continuation.
    fn on_start_generating(&self) {}

    /// Fired on the final transition back to `Idle`.
    fn on_stop_generating(&self) {}

    /// Delivers the ordered reply list once per completed (or failed) cycle.
    fn on_generated_messages(&self, _replies: &[String]) {}
}

/// Sink that ignores every event.
#[derive(Debug, Default)]
pub struct NullEvents;

impl ChatEvents for NullEvents {}
