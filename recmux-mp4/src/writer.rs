//! MP4 file writer.
//!
//! The writer owns the output file and the shared append offset. Track
//! pipelines append their sample chunks to the `mdat` box under a single
//! lock; all metadata is emitted on [`Mp4Writer::stop`].
//!
//! Two output destinations share the recursive box writing code. Boxes
//! emitted while recording go straight to the file and have their size
//! back-patched with a seek when they close. The `moov` tree is instead
//! assembled in a memory buffer so it can be copied into the region
//! reserved ahead of `mdat`, keeping the file streamable. If the buffer
//! outgrows the reservation it spills to the end of the file: the open
//! box offsets become file relative, the buffer is flushed after `mdat`
//! and the writer drops back to direct output.

use crate::event::{EventHandler, MuxerEvent};
use crate::track::{Track, TrackCounters};
use parking_lot::Mutex;
use recmux_core::error::{Error, Result};
use recmux_core::source::MediaSource;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default chunk interleave window in microseconds.
const DEFAULT_INTERLEAVE_DURATION_US: i64 = 500_000;

/// Default size of the region reserved for the `moov` box.
const DEFAULT_MOOV_RESERVATION: u32 = 0x0F00;

pub(crate) trait WriteSeek: Write + Seek + Send {}
impl<T: Write + Seek + Send> WriteSeek for T {}

/// Where box writes currently land.
enum Destination {
    /// Straight to the file, back-patching sizes on box close.
    File,
    /// Into the in-memory `moov` staging buffer, patching sizes in place.
    Moov { buf: Vec<u8> },
}

/// The low-level box writer: big-endian primitives, the open-box stack
/// and the two output destinations.
pub(crate) struct Output {
    file: Box<dyn WriteSeek>,
    /// Absolute file offset; authoritative mirror of the file position.
    offset: u64,
    dest: Destination,
    /// Start offsets of the currently open boxes, innermost last.
    boxes: Vec<u64>,
    reserved_moov_size: u32,
    streamable: bool,
    mdat_offset: u64,
    free_box_offset: u64,
    /// Movie-wide start timestamp in microseconds; 0 while unset.
    start_timestamp_us: i64,
}

impl Output {
    fn new(file: Box<dyn WriteSeek>, reserved_moov_size: u32) -> Self {
        Self {
            file,
            offset: 0,
            dest: Destination::File,
            boxes: Vec::new(),
            reserved_moov_size,
            streamable: true,
            mdat_offset: 0,
            free_box_offset: 0,
            start_timestamp_us: 0,
        }
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.offset = position;
        Ok(())
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.dest {
            Destination::Moov { buf }
                if 8 + buf.len() + bytes.len() <= self.reserved_moov_size as usize =>
            {
                buf.extend_from_slice(bytes);
                Ok(())
            }
            Destination::Moov { .. } => self.spill_moov_buffer(bytes),
            Destination::File => {
                self.file.write_all(bytes)?;
                self.offset += bytes.len() as u64;
                Ok(())
            }
        }
    }

    /// Give up on the reservation: flush the staged `moov` bytes (and the
    /// write that overflowed it) to the end of the file and drop back to
    /// direct output. The file is no longer streamable.
    fn spill_moov_buffer(&mut self, pending: &[u8]) -> Result<()> {
        // The saved box offsets were buffer relative; they become file
        // relative once the buffer lands at the current file offset.
        for saved in &mut self.boxes {
            *saved += self.offset;
        }
        let buf = match std::mem::replace(&mut self.dest, Destination::File) {
            Destination::Moov { buf } => buf,
            Destination::File => unreachable!("spill outside of moov buffering"),
        };
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.write_all(&buf)?;
        self.file.write_all(pending)?;
        self.offset += (buf.len() + pending.len()) as u64;
        self.streamable = false;
        Ok(())
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    pub(crate) fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub(crate) fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub(crate) fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub(crate) fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub(crate) fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub(crate) fn write_fourcc(&mut self, fourcc: &str) -> Result<()> {
        assert_eq!(fourcc.len(), 4, "fourcc must be four characters");
        self.write_raw(fourcc.as_bytes())
    }

    pub(crate) fn write_c_string(&mut self, s: &str) -> Result<()> {
        self.write_raw(s.as_bytes())?;
        self.write_u8(0)
    }

    /// Open a box: remember the current output position and emit a zero
    /// size placeholder followed by the box type.
    pub(crate) fn begin_box(&mut self, fourcc: &str) -> Result<()> {
        let position = match &self.dest {
            Destination::File => self.offset,
            Destination::Moov { buf } => buf.len() as u64,
        };
        self.boxes.push(position);
        self.write_u32(0)?;
        self.write_fourcc(fourcc)
    }

    /// Close the innermost open box and patch its final size.
    pub(crate) fn end_box(&mut self) -> Result<()> {
        let start = self
            .boxes
            .pop()
            .expect("end_box without a matching begin_box");
        match &mut self.dest {
            Destination::Moov { buf } => {
                let size = buf.len() as u64 - start;
                buf[start as usize..start as usize + 4]
                    .copy_from_slice(&(size as u32).to_be_bytes());
                Ok(())
            }
            Destination::File => {
                let size = self.offset - start;
                self.file.seek(SeekFrom::Start(start))?;
                self.file.write_all(&(size as u32).to_be_bytes())?;
                self.file.seek(SeekFrom::Start(self.offset))?;
                Ok(())
            }
        }
    }

    /// Append one sample payload to `mdat`, returning its start offset.
    pub(crate) fn add_sample(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.offset;
        self.file.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(offset)
    }

    /// Append one sample payload preceded by a 4-byte big-endian length,
    /// returning its start offset.
    pub(crate) fn add_length_prefixed_sample(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.offset;
        self.file.write_all(&(data.len() as u32).to_be_bytes())?;
        self.file.write_all(data)?;
        self.offset += data.len() as u64 + 4;
        Ok(offset)
    }

    fn patch_u64_at(&mut self, position: u64, value: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.file.write_all(&value.to_be_bytes())?;
        self.file.seek(SeekFrom::Start(self.offset))?;
        Ok(())
    }

    fn begin_moov_buffer(&mut self) {
        self.dest = Destination::Moov {
            buf: Vec::with_capacity(self.reserved_moov_size as usize),
        };
    }

    /// Copy the buffered `moov` into the reserved region and pad the rest
    /// of the reservation with a trailing `free` box. No-op if the buffer
    /// already spilled past `mdat`.
    fn finish_moov(&mut self) -> Result<()> {
        let buf = match std::mem::replace(&mut self.dest, Destination::File) {
            Destination::Moov { buf } => buf,
            Destination::File => return Ok(()),
        };
        debug_assert!(buf.len() + 8 <= self.reserved_moov_size as usize);
        self.seek_to(self.free_box_offset)?;
        self.write_raw(&buf)?;
        self.write_u32(self.reserved_moov_size - buf.len() as u32)?;
        self.write_fourcc("free")
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// State shared between the muxer and its track threads.
pub(crate) struct MuxContext {
    /// The single muxer lock: protects the file, the append offset and
    /// the start-timestamp handshake.
    pub(crate) output: Mutex<Output>,
    /// Chunk interleave window in microseconds; 0 makes every sample its
    /// own chunk.
    pub(crate) interleave_duration_us: i64,
    max_file_size_bytes: i64,
    max_file_duration_us: i64,
    reserved_moov_size: u32,
    counters: Vec<Arc<TrackCounters>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl MuxContext {
    /// Estimated output size (reservation plus every track's running
    /// estimate) has reached the configured limit.
    pub(crate) fn exceeds_file_size_limit(&self) -> bool {
        if self.max_file_size_bytes == 0 {
            return false;
        }
        let mut estimate = i64::from(self.reserved_moov_size);
        for counters in &self.counters {
            estimate += counters.estimated_size_bytes();
        }
        estimate >= self.max_file_size_bytes
    }

    /// Any track's duration has reached the configured limit.
    pub(crate) fn exceeds_file_duration_limit(&self) -> bool {
        if self.max_file_duration_us == 0 {
            return false;
        }
        self.counters
            .iter()
            .any(|counters| counters.duration_us() >= self.max_file_duration_us)
    }

    pub(crate) fn notify(&self, event: MuxerEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_event(event);
        }
    }

    /// Negotiate the movie-wide start timestamp: the first caller wins
    /// and later calls are ignored.
    pub(crate) fn set_start_timestamp(&self, timestamp_us: i64) {
        debug!(timestamp_us, "set_start_timestamp");
        let mut output = self.output.lock();
        if output.start_timestamp_us == 0 {
            output.start_timestamp_us = timestamp_us;
        }
    }

    pub(crate) fn start_timestamp(&self) -> i64 {
        self.output.lock().start_timestamp_us
    }
}

/// Writes one or more media streams into a seekable MP4 file.
///
/// Sources are added before [`start`](Mp4Writer::start); each runs in
/// its own thread until it reports end of stream, a configured limit is
/// reached or [`stop`](Mp4Writer::stop) is called. `stop` joins the
/// pipelines and finalizes the file; dropping the writer finalizes it as
/// well if `stop` was never called.
pub struct Mp4Writer {
    output: Option<Box<dyn WriteSeek>>,
    tracks: Vec<Track>,
    ctx: Option<Arc<MuxContext>>,
    interleave_duration_us: i64,
    max_file_size_bytes: i64,
    max_file_duration_us: i64,
    reserved_moov_size: u32,
    event_handler: Option<Arc<dyn EventHandler>>,
    stopped: bool,
}

impl Mp4Writer {
    /// Create a writer producing the file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_output(File::create(path)?))
    }

    /// Create a writer producing into an arbitrary seekable output.
    pub fn with_output<W: Write + Seek + Send + 'static>(output: W) -> Self {
        Self {
            output: Some(Box::new(output)),
            tracks: Vec::new(),
            ctx: None,
            interleave_duration_us: DEFAULT_INTERLEAVE_DURATION_US,
            max_file_size_bytes: 0,
            max_file_duration_us: 0,
            reserved_moov_size: DEFAULT_MOOV_RESERVATION,
            event_handler: None,
            stopped: false,
        }
    }

    /// Add a media source. Must be called before `start`.
    pub fn add_source(&mut self, source: Box<dyn MediaSource>) -> Result<()> {
        if self.ctx.is_some() {
            return Err(Error::invalid_param("cannot add sources after start"));
        }
        self.tracks.push(Track::new(source));
        Ok(())
    }

    /// Override the chunk interleave window (default 500,000 µs). A zero
    /// window writes every sample as its own chunk.
    pub fn set_interleave_duration(&mut self, duration_us: i64) {
        self.interleave_duration_us = duration_us;
    }

    /// Limit the estimated output file size in bytes; 0 means unlimited.
    pub fn set_max_file_size(&mut self, bytes: i64) {
        self.max_file_size_bytes = bytes;
    }

    /// Limit the recorded duration in microseconds; 0 means unlimited.
    pub fn set_max_file_duration(&mut self, duration_us: i64) {
        self.max_file_duration_us = duration_us;
    }

    /// Override the size of the region reserved for the `moov` box.
    pub fn set_estimated_moov_box_size(&mut self, bytes: u32) {
        self.reserved_moov_size = bytes;
    }

    /// Install a sink for muxer events.
    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    /// Whether the output keeps `moov` ahead of `mdat`. True until the
    /// buffered `moov` outgrows its reservation during `stop`.
    pub fn is_streamable(&self) -> bool {
        match &self.ctx {
            Some(ctx) => ctx.output.lock().streamable,
            None => true,
        }
    }

    /// All tracks have reached end of stream.
    pub fn reached_eos(&self) -> bool {
        self.tracks.iter().all(|track| track.reached_eos())
    }

    /// Write the file header and launch one pipeline thread per source.
    ///
    /// If any source fails to start, the already-started pipelines are
    /// stopped and the error is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.ctx.is_some() {
            return Err(Error::invalid_param("muxer already started"));
        }
        if self.reserved_moov_size < 8 {
            return Err(Error::invalid_param(
                "moov reservation must be at least 8 bytes",
            ));
        }
        let file = self
            .output
            .take()
            .ok_or_else(|| Error::invalid_param("muxer already stopped"))?;

        let mut output = Output::new(file, self.reserved_moov_size);

        output.begin_box("ftyp")?;
        output.write_fourcc("isom")?;
        output.write_u32(0)?; // minor version
        output.write_fourcc("isom")?;
        output.end_box()?;

        // Reserve room for moov with a free box; moov replaces it on stop.
        output.free_box_offset = output.offset;
        output.write_u32(self.reserved_moov_size)?;
        output.write_fourcc("free")?;

        // Large-size mdat header; the 64-bit size is patched on stop.
        output.mdat_offset = output.free_box_offset + u64::from(self.reserved_moov_size);
        output.seek_to(output.mdat_offset)?;
        output.write_raw(b"\x00\x00\x00\x01mdat????????")?;

        let ctx = Arc::new(MuxContext {
            output: Mutex::new(output),
            interleave_duration_us: self.interleave_duration_us,
            max_file_size_bytes: self.max_file_size_bytes,
            max_file_duration_us: self.max_file_duration_us,
            reserved_moov_size: self.reserved_moov_size,
            counters: self.tracks.iter().map(|track| track.counters()).collect(),
            event_handler: self.event_handler.clone(),
        });

        for index in 0..self.tracks.len() {
            if let Err(err) = self.tracks[index].start(ctx.clone()) {
                for track in &mut self.tracks[..index] {
                    track.stop();
                }
                return Err(err);
            }
        }

        self.ctx = Some(ctx);
        Ok(())
    }

    /// Stop every pipeline, back-patch the `mdat` size and emit `moov`.
    ///
    /// Calling `stop` before `start`, or a second time, is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let Some(ctx) = self.ctx.clone() else {
            return Ok(());
        };
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        for track in &mut self.tracks {
            track.stop();
        }

        let max_duration_us = self
            .tracks
            .iter()
            .map(|track| track.duration_us())
            .max()
            .unwrap_or(0);

        let mut output = ctx.output.lock();

        // Fix up the size of the mdat box.
        let mdat_offset = output.mdat_offset;
        let mdat_size = output.offset - mdat_offset;
        output.patch_u64_at(mdat_offset + 8, mdat_size)?;

        let now = creation_time();

        output.begin_moov_buffer();
        output.begin_box("moov")?;

        output.begin_box("mvhd")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(now)?; // creation time
        output.write_u32(now)?; // modification time
        output.write_u32(1000)?; // timescale
        output.write_u32((max_duration_us / 1000) as u32)?;
        output.write_u32(0x10000)?; // rate
        output.write_u16(0x100)?; // volume
        output.write_u16(0)?; // reserved
        output.write_u32(0)?; // reserved
        output.write_u32(0)?; // reserved
        write_identity_matrix(&mut output)?;
        for _ in 0..6 {
            output.write_u32(0)?; // predefined
        }
        output.write_u32(self.tracks.len() as u32 + 1)?; // next track ID
        output.end_box()?; // mvhd

        for (index, track) in self.tracks.iter().enumerate() {
            track.write_header(index as u32 + 1, now, &mut output)?;
        }
        output.end_box()?; // moov

        output.finish_moov()?;
        debug_assert!(output.boxes.is_empty());
        output.flush()
    }
}

impl Drop for Mp4Writer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("failed to finalize output file: {err}");
        }
    }
}

/// Write the identity transformation matrix.
pub(crate) fn write_identity_matrix(output: &mut Output) -> Result<()> {
    output.write_u32(0x10000)?;
    output.write_u32(0)?;
    output.write_u32(0)?;
    output.write_u32(0)?;
    output.write_u32(0x10000)?;
    output.write_u32(0)?;
    output.write_u32(0)?;
    output.write_u32(0)?;
    output.write_u32(0x40000000)
}

fn creation_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}
