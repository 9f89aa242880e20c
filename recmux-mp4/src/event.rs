//! Asynchronous notifications emitted while muxing.

/// Events reported by the muxer while recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerEvent {
    /// The configured file size limit was reached; the reporting track
    /// stopped accepting samples.
    MaxFileSizeReached,
    /// The configured file duration limit was reached.
    MaxDurationReached,
    /// A track finished without producing any samples.
    StopPrematurely,
}

/// Sink for [`MuxerEvent`] notifications.
///
/// Events are delivered from the track threads, so implementations must
/// be thread safe.
pub trait EventHandler: Send + Sync {
    /// Called when the muxer reports an event.
    fn on_event(&self, event: MuxerEvent);
}
