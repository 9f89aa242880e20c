//! The producer side of the muxing pipeline.

use crate::buffer::MediaBuffer;
use crate::error::Result;
use crate::format::TrackFormat;

/// A producer of encoded frames for a single track.
///
/// The muxer drains each source from a dedicated thread, so `read` may
/// block until a frame is available. Frames must be delivered in
/// presentation order. A stopped source must unblock any pending `read`
/// and report end of stream promptly.
pub trait MediaSource: Send {
    /// The format of the frames this source produces.
    fn format(&self) -> TrackFormat;

    /// Start producing frames.
    fn start(&mut self) -> Result<()>;

    /// Stop producing frames.
    fn stop(&mut self);

    /// Read the next frame, or `Ok(None)` at end of stream.
    fn read(&mut self) -> Result<Option<MediaBuffer>>;
}
