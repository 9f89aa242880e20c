//! Media buffer abstractions for encoded frames.
//!
//! A [`MediaBuffer`] owns one encoded frame together with the metadata the
//! muxer needs: the presentation time and the sync-frame/codec-config
//! flags. Producers hand buffers over by value, so the muxing path never
//! copies a payload; a producer that wants to reuse its memory simply
//! allocates a fresh buffer for the next frame.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Flags for media buffer properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// The buffer holds a sync sample (an IDR frame for AVC).
        const SYNC_FRAME = 0x0001;
        /// The buffer holds codec specific data rather than a sample.
        const CODEC_CONFIG = 0x0002;
    }
}

/// One encoded frame handed from a producer to the muxer.
#[derive(Clone)]
pub struct MediaBuffer {
    /// The frame payload.
    data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
    /// Buffer flags.
    pub flags: BufferFlags,
}

impl MediaBuffer {
    /// Create a new buffer with owned data.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            timestamp_us: 0,
            flags: BufferFlags::empty(),
        }
    }

    /// Create a new buffer with the specified presentation timestamp.
    pub fn with_timestamp(mut self, timestamp_us: i64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// Create a new buffer with the specified flags.
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Get the payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this buffer holds a sync sample.
    pub fn is_sync_frame(&self) -> bool {
        self.flags.contains(BufferFlags::SYNC_FRAME)
    }

    /// Set the sync-frame flag.
    pub fn set_sync_frame(&mut self, sync: bool) {
        if sync {
            self.flags.insert(BufferFlags::SYNC_FRAME);
        } else {
            self.flags.remove(BufferFlags::SYNC_FRAME);
        }
    }

    /// Check if this buffer holds codec specific data.
    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }

    /// Set the codec-config flag.
    pub fn set_codec_config(&mut self, config: bool) {
        if config {
            self.flags.insert(BufferFlags::CODEC_CONFIG);
        } else {
            self.flags.remove(BufferFlags::CODEC_CONFIG);
        }
    }

    /// Drop the first `n` bytes of the payload.
    pub fn trim_front(&mut self, n: usize) {
        self.data.drain(..n);
    }

    /// Take ownership of the payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Debug for MediaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaBuffer")
            .field("len", &self.len())
            .field("timestamp_us", &self.timestamp_us)
            .field("flags", &self.flags)
            .finish()
    }
}
