//! Per-track sample ingestion pipeline.
//!
//! Each track drains its source from a dedicated thread. Codec specific
//! data is extracted first, then every frame becomes a sample whose
//! size, timing, sync flag and chunk membership are recorded in the
//! sample tables. Samples are appended to `mdat` one chunk at a time
//! under the muxer lock; the tables are emitted as the `trak` tree when
//! the file is finalized.

use crate::avcc::{
    make_avc_codec_specific_data, strip_start_code, NAL_LENGTH_SIZE, NAL_START_CODE,
};
use crate::event::MuxerEvent;
use crate::writer::{write_identity_matrix, MuxContext, Output};
use recmux_core::buffer::MediaBuffer;
use recmux_core::error::{ContainerError, Error, Result};
use recmux_core::format::{Codec, TrackFormat};
use recmux_core::source::MediaSource;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// MPEG-4 Visual VOP start code; bytes ahead of it in the first frame
/// are decoder configuration.
const VOP_START_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0xB6];

/// Per-sample length and integer-millisecond presentation time.
#[derive(Debug, Clone, Copy)]
struct SampleInfo {
    size: u32,
    timestamp_ms: i64,
}

/// Run-length encoded inter-sample duration.
#[derive(Debug, Clone, Copy)]
struct SttsEntry {
    sample_count: u32,
    sample_duration: u32,
}

/// Run-length encoded samples-per-chunk.
#[derive(Debug, Clone, Copy)]
struct StscEntry {
    first_chunk: u32,
    samples_per_chunk: u32,
    sample_description_id: u32,
}

/// Counters a track thread publishes for the muxer and its peers.
pub(crate) struct TrackCounters {
    done: AtomicBool,
    reached_eos: AtomicBool,
    estimated_size_bytes: AtomicI64,
    max_timestamp_us: AtomicI64,
}

impl TrackCounters {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            reached_eos: AtomicBool::new(false),
            estimated_size_bytes: AtomicI64::new(0),
            max_timestamp_us: AtomicI64::new(0),
        }
    }

    fn reset(&self) {
        self.done.store(false, Ordering::Relaxed);
        self.reached_eos.store(false, Ordering::Relaxed);
        self.estimated_size_bytes.store(0, Ordering::Relaxed);
        self.max_timestamp_us.store(0, Ordering::Relaxed);
    }

    pub(crate) fn duration_us(&self) -> i64 {
        self.max_timestamp_us.load(Ordering::Relaxed)
    }

    pub(crate) fn estimated_size_bytes(&self) -> i64 {
        self.estimated_size_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn reached_eos(&self) -> bool {
        self.reached_eos.load(Ordering::Relaxed)
    }

    fn request_stop(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    fn stop_requested(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    fn add_estimated_size(&self, bytes: i64) {
        self.estimated_size_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn update_max_timestamp(&self, timestamp_us: i64) {
        self.max_timestamp_us.fetch_max(timestamp_us, Ordering::Relaxed);
    }

    fn set_eos(&self) {
        self.reached_eos.store(true, Ordering::Relaxed);
    }
}

/// The sample tables accumulated by a track pipeline.
struct TrackTables {
    sample_infos: Vec<SampleInfo>,
    stts_entries: Vec<SttsEntry>,
    stss_entries: Vec<u32>,
    stsc_entries: Vec<StscEntry>,
    chunk_offsets: Vec<u64>,
    samples_have_same_size: bool,
    codec_specific_data: Option<Vec<u8>>,
    got_all_codec_specific_data: bool,
    /// Offset of this track's first sample from the movie start, in
    /// microseconds.
    start_timestamp_us: i64,
}

impl Default for TrackTables {
    fn default() -> Self {
        Self {
            sample_infos: Vec::new(),
            stts_entries: Vec::new(),
            stss_entries: Vec::new(),
            stsc_entries: Vec::new(),
            chunk_offsets: Vec::new(),
            samples_have_same_size: true,
            codec_specific_data: None,
            got_all_codec_specific_data: false,
            start_timestamp_us: 0,
        }
    }
}

/// One track of the output file.
pub(crate) struct Track {
    format: TrackFormat,
    source: Option<Box<dyn MediaSource>>,
    counters: Arc<TrackCounters>,
    handle: Option<JoinHandle<TrackTables>>,
    tables: TrackTables,
}

impl Track {
    pub(crate) fn new(source: Box<dyn MediaSource>) -> Self {
        let format = source.format();
        Self {
            format,
            source: Some(source),
            counters: Arc::new(TrackCounters::new()),
            handle: None,
            tables: TrackTables::default(),
        }
    }

    pub(crate) fn counters(&self) -> Arc<TrackCounters> {
        self.counters.clone()
    }

    pub(crate) fn duration_us(&self) -> i64 {
        self.counters.duration_us()
    }

    pub(crate) fn reached_eos(&self) -> bool {
        self.counters.reached_eos()
    }

    /// Start the source and launch the pipeline thread.
    pub(crate) fn start(&mut self, ctx: Arc<MuxContext>) -> Result<()> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| Error::invalid_param("track already started"))?;
        if let Err(err) = source.start() {
            self.counters.request_stop();
            self.counters.set_eos();
            return Err(err);
        }
        self.counters.reset();
        let counters = self.counters.clone();
        let format = self.format.clone();
        let kind = if format.codec.is_audio() { "audio" } else { "video" };
        let handle = thread::Builder::new()
            .name(format!("mp4-{kind}-track"))
            .spawn(move || run_pipeline(ctx, counters, source, format))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Ask the pipeline to finish and join it, keeping its tables for
    /// header emission. The thread observes the flag at the next frame
    /// boundary.
    pub(crate) fn stop(&mut self) {
        self.counters.request_stop();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(tables) => self.tables = tables,
                Err(_) => error!("track pipeline thread panicked"),
            }
        }
    }

    /// Emit this track's `trak` box tree.
    pub(crate) fn write_header(
        &self,
        track_id: u32,
        creation_time: u32,
        output: &mut Output,
    ) -> Result<()> {
        let format = &self.format;
        let tables = &self.tables;
        let is_audio = format.codec.is_audio();
        let duration_ms = (self.counters.duration_us() / 1000) as u32;

        output.begin_box("trak")?;

        output.begin_box("tkhd")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(creation_time)?;
        output.write_u32(creation_time)?;
        output.write_u32(track_id)?;
        output.write_u32(0)?; // reserved
        output.write_u32(duration_ms)?;
        output.write_u32(0)?; // reserved
        output.write_u32(0)?; // reserved
        output.write_u16(0)?; // layer
        output.write_u16(0)?; // alternate group
        output.write_u16(if is_audio { 0x100 } else { 0 })?; // volume
        output.write_u16(0)?; // reserved
        write_identity_matrix(output)?;
        if is_audio {
            output.write_u32(0)?;
            output.write_u32(0)?;
        } else {
            // width and height as 16.16 fixed point
            output.write_u32(format.width << 16)?;
            output.write_u32(format.height << 16)?;
        }
        output.end_box()?; // tkhd

        // A non-zero offset from the movie start is recorded as a single
        // empty edit.
        if tables.start_timestamp_us != 0 {
            output.begin_box("edts")?;
            output.write_u32(0)?; // version=0, flags=0
            output.begin_box("elst")?;
            output.write_u32(0)?; // version=0, flags=0
            output.write_u32(1)?; // entry count
            output.write_u32((tables.start_timestamp_us / 1000) as u32)?; // edit duration
            output.write_i32(-1)?; // empty edit signals the start offset
            output.write_u32(1)?; // media rate
            output.end_box()?; // elst
            output.end_box()?; // edts
        }

        output.begin_box("mdia")?;

        output.begin_box("mdhd")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(creation_time)?;
        output.write_u32(creation_time)?;
        output.write_u32(1000)?; // timescale
        output.write_u32(duration_ms)?;
        output.write_u16(0)?; // language
        output.write_u16(0)?; // predefined
        output.end_box()?; // mdhd

        output.begin_box("hdlr")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(0)?; // component type
        output.write_fourcc(if is_audio { "soun" } else { "vide" })?;
        output.write_u32(0)?; // reserved
        output.write_u32(0)?; // reserved
        output.write_u32(0)?; // reserved
        output.write_c_string(if is_audio { "SoundHandler" } else { "" })?;
        output.end_box()?; // hdlr

        output.begin_box("minf")?;
        if is_audio {
            output.begin_box("smhd")?;
            output.write_u32(0)?; // version=0, flags=0
            output.write_u16(0)?; // balance
            output.write_u16(0)?; // reserved
            output.end_box()?;
        } else {
            output.begin_box("vmhd")?;
            output.write_u32(0x0000_0001)?; // version=0, flags=1
            output.write_u16(0)?; // graphics mode
            output.write_u16(0)?; // opcolor
            output.write_u16(0)?;
            output.write_u16(0)?;
            output.end_box()?;
        }

        output.begin_box("dinf")?;
        output.begin_box("dref")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(1)?; // entry count
        output.begin_box("url ")?;
        output.write_u32(1)?; // version=0, flags=1: self contained
        output.end_box()?; // url
        output.end_box()?; // dref
        output.end_box()?; // dinf
        output.end_box()?; // minf

        output.begin_box("stbl")?;

        output.begin_box("stsd")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(1)?; // entry count
        if is_audio {
            self.write_audio_sample_entry(output)?;
        } else {
            self.write_video_sample_entry(output)?;
        }
        output.end_box()?; // stsd

        output.begin_box("stts")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(tables.stts_entries.len() as u32)?;
        for entry in &tables.stts_entries {
            output.write_u32(entry.sample_count)?;
            output.write_u32(entry.sample_duration)?;
        }
        output.end_box()?; // stts

        if !is_audio {
            output.begin_box("stss")?;
            output.write_u32(0)?; // version=0, flags=0
            output.write_u32(tables.stss_entries.len() as u32)?;
            for &sample_number in &tables.stss_entries {
                output.write_u32(sample_number)?;
            }
            output.end_box()?; // stss
        }

        output.begin_box("stsz")?;
        output.write_u32(0)?; // version=0, flags=0
        if tables.samples_have_same_size {
            // default sample size
            output.write_u32(tables.sample_infos.first().map_or(0, |info| info.size))?;
        } else {
            output.write_u32(0)?;
        }
        output.write_u32(tables.sample_infos.len() as u32)?;
        if !tables.samples_have_same_size {
            for info in &tables.sample_infos {
                output.write_u32(info.size)?;
            }
        }
        output.end_box()?; // stsz

        output.begin_box("stsc")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(tables.stsc_entries.len() as u32)?;
        for entry in &tables.stsc_entries {
            output.write_u32(entry.first_chunk)?;
            output.write_u32(entry.samples_per_chunk)?;
            output.write_u32(entry.sample_description_id)?;
        }
        output.end_box()?; // stsc

        output.begin_box("co64")?;
        output.write_u32(0)?; // version=0, flags=0
        output.write_u32(tables.chunk_offsets.len() as u32)?;
        for &chunk_offset in &tables.chunk_offsets {
            output.write_u64(chunk_offset)?;
        }
        output.end_box()?; // co64

        output.end_box()?; // stbl
        output.end_box()?; // mdia
        output.end_box() // trak
    }

    fn write_audio_sample_entry(&self, output: &mut Output) -> Result<()> {
        let format = &self.format;
        let csd = self.tables.codec_specific_data.as_deref().unwrap_or(&[]);

        output.begin_box(format.codec.sample_entry_fourcc())?;
        output.write_u32(0)?; // reserved
        output.write_u16(0)?; // reserved
        output.write_u16(0x1)?; // data reference index
        output.write_u32(0)?; // reserved
        output.write_u32(0)?; // reserved
        output.write_u16(format.channels)?;
        output.write_u16(16)?; // sample size
        output.write_u16(0)?; // predefined
        output.write_u16(0)?; // reserved
        output.write_u32(format.sample_rate << 16)?;
        if format.codec == Codec::Aac {
            write_audio_esds(output, csd)?;
        }
        output.end_box()
    }

    fn write_video_sample_entry(&self, output: &mut Output) -> Result<()> {
        let format = &self.format;
        let csd = self.tables.codec_specific_data.as_deref().unwrap_or(&[]);

        output.begin_box(format.codec.sample_entry_fourcc())?;
        output.write_u32(0)?; // reserved
        output.write_u16(0)?; // reserved
        output.write_u16(0)?; // data reference index
        output.write_u16(0)?; // predefined
        output.write_u16(0)?; // reserved
        output.write_u32(0)?; // predefined
        output.write_u32(0)?; // predefined
        output.write_u32(0)?; // predefined
        output.write_u16(format.width as u16)?;
        output.write_u16(format.height as u16)?;
        output.write_u32(0x480000)?; // horiz resolution
        output.write_u32(0x480000)?; // vert resolution
        output.write_u32(0)?; // reserved
        output.write_u16(1)?; // frame count
        output.write_raw(&[b' '; 32])?; // compressor name
        output.write_u16(0x18)?; // depth
        output.write_i16(-1)?; // predefined
        match format.codec {
            Codec::Mpeg4Video => write_visual_esds(output, csd)?,
            Codec::H263 => {
                output.begin_box("d263")?;
                output.write_u32(0)?; // vendor
                output.write_u8(0)?; // decoder version
                output.write_u8(10)?; // level
                output.write_u8(0)?; // profile
                output.end_box()?;
            }
            Codec::Avc => {
                output.begin_box("avcC")?;
                output.write_raw(csd)?;
                output.end_box()?;
            }
            _ => {}
        }
        output.end_box()
    }
}

/// Emit the `esds` descriptor chain for an AAC audio entry.
fn write_audio_esds(output: &mut Output, csd: &[u8]) -> Result<()> {
    if 23 + csd.len() >= 128 {
        return Err(ContainerError::TrackConfig(
            "codec specific data too large for esds descriptor".into(),
        )
        .into());
    }
    output.begin_box("esds")?;
    output.write_u32(0)?; // version=0, flags=0
    output.write_u8(0x03)?; // ES_DescrTag
    output.write_u8((23 + csd.len()) as u8)?;
    output.write_u16(0x0000)?; // ES_ID
    output.write_u8(0x00)?;
    output.write_u8(0x04)?; // DecoderConfigDescrTag
    output.write_u8((15 + csd.len()) as u8)?;
    output.write_u8(0x40)?; // objectTypeIndication
    output.write_u8(0x15)?; // streamType AudioStream
    output.write_u16(0x03)?; // buffer size, 24-bit
    output.write_u8(0x00)?;
    output.write_u32(96000)?; // max bitrate
    output.write_u32(96000)?; // avg bitrate
    output.write_u8(0x05)?; // DecoderSpecificInfoTag
    output.write_u8(csd.len() as u8)?;
    output.write_raw(csd)?;
    output.write_u8(0x06)?; // SLConfigDescriptorTag
    output.write_u8(0x01)?;
    output.write_u8(0x02)?;
    output.end_box()
}

/// Emit the `esds` descriptor chain for an MPEG-4 Visual entry.
fn write_visual_esds(output: &mut Output, csd: &[u8]) -> Result<()> {
    if 23 + csd.len() >= 128 {
        return Err(ContainerError::TrackConfig(
            "codec specific data too large for esds descriptor".into(),
        )
        .into());
    }
    output.begin_box("esds")?;
    output.write_u32(0)?; // version=0, flags=0
    output.write_u8(0x03)?; // ES_DescrTag
    output.write_u8((23 + csd.len()) as u8)?;
    output.write_u16(0x0000)?; // ES_ID
    output.write_u8(0x1f)?;
    output.write_u8(0x04)?; // DecoderConfigDescrTag
    output.write_u8((15 + csd.len()) as u8)?;
    output.write_u8(0x20)?; // objectTypeIndication
    output.write_u8(0x11)?; // streamType VisualStream
    output.write_raw(&[
        0x01, 0x77, 0x00, // buffer size, 24-bit
        0x00, 0x03, 0xe8, 0x00, // max bitrate
        0x00, 0x03, 0xe8, 0x00, // avg bitrate
    ])?;
    output.write_u8(0x05)?; // DecoderSpecificInfoTag
    output.write_u8(csd.len() as u8)?;
    output.write_raw(csd)?;
    output.write_u8(0x06)?; // SLConfigDescriptorTag
    output.write_u8(0x01)?;
    output.write_u8(0x02)?;
    output.end_box()
}

/// Find the offset of the VOP start code in an MPEG-4 Visual frame.
fn find_vop_start(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == VOP_START_CODE)
}

/// Push a sample-to-chunk entry unless it repeats the previous run.
fn push_stsc_entry(entries: &mut Vec<StscEntry>, first_chunk: u32, samples_per_chunk: u32) {
    if entries
        .last()
        .map_or(true, |entry| entry.samples_per_chunk != samples_per_chunk)
    {
        entries.push(StscEntry {
            first_chunk,
            samples_per_chunk,
            sample_description_id: 1,
        });
    }
}

/// Append the queued samples to `mdat` as one chunk under the muxer
/// lock, recording the chunk's start offset.
fn write_one_chunk(
    ctx: &MuxContext,
    is_avc: bool,
    chunk_samples: &mut Vec<MediaBuffer>,
    chunk_offsets: &mut Vec<u64>,
) -> Result<()> {
    let mut output = ctx.output.lock();
    for (index, sample) in chunk_samples.iter().enumerate() {
        let offset = if is_avc {
            output.add_length_prefixed_sample(sample.data())?
        } else {
            output.add_sample(sample.data())?
        };
        if index == 0 {
            chunk_offsets.push(offset);
        }
    }
    drop(output);
    chunk_samples.clear();
    Ok(())
}

fn run_pipeline(
    ctx: Arc<MuxContext>,
    counters: Arc<TrackCounters>,
    mut source: Box<dyn MediaSource>,
    format: TrackFormat,
) -> TrackTables {
    let codec = format.codec;
    let is_avc = codec == Codec::Avc;
    // MPEG-4 Visual and AAC carry their config verbatim in one frame.
    let is_mpeg4 = matches!(codec, Codec::Mpeg4Video | Codec::Aac);

    let interleave_duration_us = ctx.interleave_duration_us;
    let mut tables = TrackTables::default();
    let mut chunk_samples: Vec<MediaBuffer> = Vec::new();
    let mut avc_param_sets: Vec<u8> = Vec::new();

    let mut frames_read = 0u32;
    let mut zero_length_frames = 0u32;
    let mut chunk_timestamp_us = 0i64;
    let mut chunk_count = 0u32;
    // Timestamp of the previous sample and the spacing between the
    // previous two, both in milliseconds.
    let mut last_timestamp_ms = 0i64;
    let mut last_duration_ms = 0i64;
    // Sample count in the current stts run.
    let mut stts_sample_count = 1u32;
    let mut previous_sample_size = 0u32;

    while !counters.stop_requested() {
        let mut buffer = match source.read() {
            Ok(Some(buffer)) => buffer,
            Ok(None) => break,
            Err(err) => {
                error!("source read failed: {err}");
                break;
            }
        };
        if buffer.is_empty() {
            zero_length_frames += 1;
            continue;
        }
        frames_read += 1;

        if buffer.is_codec_config() {
            if tables.got_all_codec_specific_data {
                error!("codec specific data arrived twice; dropping track");
                break;
            }
            if is_avc {
                match make_avc_codec_specific_data(buffer.data()) {
                    Ok(record) => tables.codec_specific_data = Some(record),
                    Err(err) => {
                        error!("malformed AVC codec specific data: {err}");
                        break;
                    }
                }
            } else if is_mpeg4 {
                tables.codec_specific_data = Some(buffer.into_data());
            }
            tables.got_all_codec_specific_data = true;
            continue;
        } else if !tables.got_all_codec_specific_data
            && frames_read == 1
            && codec == Codec::Mpeg4Video
            && tables.codec_specific_data.is_none()
        {
            // Some encoders do not flag their config; everything ahead of
            // the first VOP start code is the decoder configuration.
            let offset = find_vop_start(buffer.data()).unwrap_or(buffer.len());
            tables.codec_specific_data = Some(buffer.data()[..offset].to_vec());
            buffer.trim_front(offset);
            if buffer.is_empty() {
                continue;
            }
            tables.got_all_codec_specific_data = true;
        } else if !tables.got_all_codec_specific_data && is_avc && frames_read < 3 {
            // SPS and PPS may arrive unflagged as the first two frames.
            avc_param_sets.extend_from_slice(&NAL_START_CODE);
            avc_param_sets.extend_from_slice(buffer.data());
            if frames_read == 2 {
                match make_avc_codec_specific_data(&avc_param_sets) {
                    Ok(record) => tables.codec_specific_data = Some(record),
                    Err(err) => {
                        error!("malformed AVC codec specific data: {err}");
                        break;
                    }
                }
                tables.got_all_codec_specific_data = true;
            }
            continue;
        }

        if is_avc {
            strip_start_code(&mut buffer);
        }
        let sample_size = buffer.len() as u32 + if is_avc { NAL_LENGTH_SIZE } else { 0 };

        // Max file size or duration handling.
        counters.add_estimated_size(i64::from(sample_size));
        if ctx.exceeds_file_size_limit() {
            ctx.notify(MuxerEvent::MaxFileSizeReached);
            break;
        }
        if ctx.exceeds_file_duration_limit() {
            ctx.notify(MuxerEvent::MaxDurationReached);
            break;
        }

        let is_sync = buffer.is_sync_frame();
        let timestamp_us = buffer.timestamp_us;

        if tables.sample_infos.is_empty() {
            ctx.set_start_timestamp(timestamp_us);
            tables.start_timestamp_us = timestamp_us - ctx.start_timestamp();
        }
        counters.update_max_timestamp(timestamp_us);

        // The sample tables carry integer milliseconds.
        let timestamp_ms = (timestamp_us + 500) / 1000;
        tables.sample_infos.push(SampleInfo {
            size: sample_size,
            timestamp_ms,
        });
        if tables.sample_infos.len() > 2 {
            if last_duration_ms != timestamp_ms - last_timestamp_ms {
                tables.stts_entries.push(SttsEntry {
                    sample_count: stts_sample_count,
                    sample_duration: last_duration_ms as u32,
                });
                stts_sample_count = 1;
            } else {
                stts_sample_count += 1;
            }
        }
        if tables.samples_have_same_size {
            if tables.sample_infos.len() >= 2 && previous_sample_size != sample_size {
                tables.samples_have_same_size = false;
            }
            previous_sample_size = sample_size;
        }
        last_duration_ms = timestamp_ms - last_timestamp_ms;
        last_timestamp_ms = timestamp_ms;

        if is_sync {
            tables.stss_entries.push(tables.sample_infos.len() as u32);
        }

        chunk_samples.push(buffer);
        if interleave_duration_us == 0 {
            // Every sample is its own chunk.
            chunk_count += 1;
            push_stsc_entry(&mut tables.stsc_entries, chunk_count, 1);
            if let Err(err) =
                write_one_chunk(&ctx, is_avc, &mut chunk_samples, &mut tables.chunk_offsets)
            {
                error!("failed to write chunk: {err}");
                break;
            }
        } else if chunk_timestamp_us == 0 {
            chunk_timestamp_us = timestamp_us;
        } else if timestamp_us - chunk_timestamp_us > interleave_duration_us {
            chunk_count += 1;
            push_stsc_entry(
                &mut tables.stsc_entries,
                chunk_count,
                chunk_samples.len() as u32,
            );
            if let Err(err) =
                write_one_chunk(&ctx, is_avc, &mut chunk_samples, &mut tables.chunk_offsets)
            {
                error!("failed to write chunk: {err}");
                break;
            }
            chunk_timestamp_us = timestamp_us;
        }
    }

    if tables.sample_infos.is_empty() {
        ctx.notify(MuxerEvent::StopPrematurely);
    }

    // Flush the residual chunk.
    if !chunk_samples.is_empty() {
        chunk_count += 1;
        push_stsc_entry(
            &mut tables.stsc_entries,
            chunk_count,
            chunk_samples.len() as u32,
        );
        if let Err(err) =
            write_one_chunk(&ctx, is_avc, &mut chunk_samples, &mut tables.chunk_offsets)
        {
            error!("failed to write final chunk: {err}");
        }
    }

    // The duration of the last sample is unknown; repeat the spacing of
    // the previous two (zero for a single sample).
    if !tables.sample_infos.is_empty() {
        if tables.sample_infos.len() == 1 {
            last_duration_ms = 0;
        } else {
            stts_sample_count += 1;
        }
        tables.stts_entries.push(SttsEntry {
            sample_count: stts_sample_count,
            sample_duration: last_duration_ms as u32,
        });
    }

    counters.set_eos();
    source.stop();
    info!(
        "read {} frames ({} zero length) and muxed {} samples - {}",
        frames_read,
        zero_length_frames,
        tables.sample_infos.len(),
        if codec.is_audio() { "audio" } else { "video" }
    );
    tables
}
