//! Frame Event Dispatch
//!
//! Subsystems observe the frame lifecycle by registering a
//! [`FrameListener`] with the [`FrameListenerRegistry`]. Events fire in
//! listener priority order; a listener returning `false` short-circuits the
//! remaining listeners for that event and, for `Started`, aborts the frame.

use log::warn;

use crate::core::guid::Guid;

/// The frame lifecycle events, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameEvent {
    Started,
    Process,
    PreRenderStart,
    PreRenderEnd,
    SceneRenderStart,
    PostRenderStart,
    PostRenderEnd,
    Ended,
}

/// Per-event payload: frame ordinal and interpolation factor.
#[derive(Debug, Clone, Copy)]
pub struct FrameEventArgs {
    pub frame_count: u64,
    /// `accumulator / TICK_US` at emission time.
    pub interpolation_factor: f32,
    /// Delta time of this frame in microseconds.
    pub delta_us: u64,
}

/// A frame lifecycle observer.
pub trait FrameListener {
    /// Listener name for diagnostics.
    fn name(&self) -> &str;

    /// Handles one event. Returning `false` cancels the remaining listeners
    /// for this event; for [`FrameEvent::Started`] it also aborts the frame.
    fn on_frame_event(&mut self, event: FrameEvent, args: &FrameEventArgs) -> bool;
}

struct Entry {
    guid: Guid,
    priority: u32,
    listener: Box<dyn FrameListener>,
}

/// Priority-ordered listener set.
///
/// Lower priority values fire first; ties fire in registration order.
#[derive(Default)]
pub struct FrameListenerRegistry {
    entries: Vec<Entry>,
}

impl FrameListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener; returns its GUID for later removal.
    pub fn register(&mut self, priority: u32, listener: Box<dyn FrameListener>) -> Guid {
        let guid = Guid::next();
        let at = self
            .entries
            .partition_point(|entry| entry.priority <= priority);
        self.entries.insert(
            at,
            Entry {
                guid,
                priority,
                listener,
            },
        );
        guid
    }

    /// Removes a listener by GUID. Returns false if it was not registered.
    pub fn unregister(&mut self, guid: Guid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.guid != guid);
        self.entries.len() != before
    }

    /// Emits `event` to every listener in priority order.
    ///
    /// Returns `false` as soon as a listener vetoes; the remaining
    /// listeners are skipped for this event but the registry stays intact.
    pub fn emit(&mut self, event: FrameEvent, args: &FrameEventArgs) -> bool {
        for entry in &mut self.entries {
            if !entry.listener.on_frame_event(event, args) {
                if event != FrameEvent::Started {
                    warn!(
                        "frame listener '{}' cancelled {:?} fan-out",
                        entry.listener.name(),
                        event
                    );
                }
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
