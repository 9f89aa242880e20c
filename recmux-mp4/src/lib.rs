//! ISO base media (MP4) file writer.
//!
//! Multiplexes one or more compressed elementary streams (H.263, MPEG-4
//! Visual, H.264/AVC video; AMR-NB, AMR-WB, AAC audio) into a single
//! seekable MP4 file. Each source is drained from its own thread and the
//! samples are interleaved into the shared `mdat` box in wall-time
//! chunks. The `moov` metadata is assembled in memory on stop and copied
//! into a region reserved at the head of the file, keeping the output
//! streamable; if it outgrows the reservation it is appended after
//! `mdat` instead and the file stays valid.

mod avcc;
mod event;
mod track;
mod writer;

pub use event::{EventHandler, MuxerEvent};
pub use writer::Mp4Writer;
