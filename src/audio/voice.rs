use crate::events::Event;

/// An instrument render target: consumes events, produces frames.
///
/// Voices are shared between the render thread and control threads
/// (immediate dispatch calls [`Voice::handle`] from whichever control thread
/// asked for it), so implementations synchronize their own state. Calls made
/// from the render thread must not block or allocate.
pub trait Voice: Send + Sync {
    /// Applies an event. `offset_frame` is the event's position within the
    /// buffer being rendered, or 0 for immediate dispatch.
    fn handle(&self, event: &Event, offset_frame: u32);

    /// Adds `output.len() / channels` interleaved frames into `output`, which
    /// arrives zeroed.
    fn render(&self, output: &mut [f32], channels: usize);

    /// Returns the voice to its initial state (all notes silent).
    fn reset(&self) {}
}
