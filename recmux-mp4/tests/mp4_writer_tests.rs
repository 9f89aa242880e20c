//! MP4 writer end-to-end tests.
//!
//! Each test muxes synthetic streams into a temporary file and parses
//! the resulting box structure back to verify the emitted tables.

use recmux_core::buffer::{BufferFlags, MediaBuffer};
use recmux_core::error::Result;
use recmux_core::format::{Codec, TrackFormat};
use recmux_core::source::MediaSource;
use recmux_mp4::{EventHandler, Mp4Writer, MuxerEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Test fixtures
// =============================================================================

struct VectorSource {
    format: TrackFormat,
    frames: VecDeque<MediaBuffer>,
}

impl VectorSource {
    fn new(format: TrackFormat, frames: Vec<MediaBuffer>) -> Box<Self> {
        Box::new(Self {
            format,
            frames: frames.into(),
        })
    }
}

impl MediaSource for VectorSource {
    fn format(&self) -> TrackFormat {
        self.format.clone()
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn read(&mut self) -> Result<Option<MediaBuffer>> {
        Ok(self.frames.pop_front())
    }
}

#[derive(Default)]
struct CollectingHandler {
    events: Mutex<Vec<MuxerEvent>>,
}

impl CollectingHandler {
    fn events(&self) -> Vec<MuxerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventHandler for CollectingHandler {
    fn on_event(&self, event: MuxerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn wait_for_eos(writer: &Mp4Writer) {
    while !writer.reached_eos() {
        std::thread::sleep(Duration::from_millis(5));
    }
}

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const SPS: [u8; 5] = [0x67, 0x42, 0x00, 0x1f, 0xe9];
const PPS: [u8; 4] = [0x68, 0xce, 0x06, 0xe2];

fn avc_config_frame() -> MediaBuffer {
    let mut blob = START_CODE.to_vec();
    blob.extend_from_slice(&SPS);
    blob.extend_from_slice(&START_CODE);
    blob.extend_from_slice(&PPS);
    MediaBuffer::new(blob).with_flags(BufferFlags::CODEC_CONFIG)
}

fn avc_frame(nal: &[u8], timestamp_us: i64, sync: bool) -> MediaBuffer {
    let mut data = START_CODE.to_vec();
    data.extend_from_slice(nal);
    let mut frame = MediaBuffer::new(data).with_timestamp(timestamp_us);
    frame.set_sync_frame(sync);
    frame
}

// =============================================================================
// Box parsing helpers
// =============================================================================

fn be_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap())
}

fn be_u64(data: &[u8], pos: usize) -> u64 {
    u64::from_be_bytes(data[pos..pos + 8].try_into().unwrap())
}

/// List `(fourcc, payload_start, payload_end)` of the boxes directly
/// inside `data[pos..end]`.
fn child_boxes(data: &[u8], mut pos: usize, end: usize) -> Vec<(String, usize, usize)> {
    let mut boxes = Vec::new();
    while pos + 8 <= end {
        let mut size = be_u32(data, pos) as u64;
        let fourcc = String::from_utf8_lossy(&data[pos + 4..pos + 8]).into_owned();
        let mut header = 8;
        if size == 1 {
            size = be_u64(data, pos + 8);
            header = 16;
        }
        assert!(size >= header as u64, "corrupt box size for {fourcc}");
        boxes.push((fourcc, pos + header, pos + size as usize));
        pos += size as usize;
    }
    assert_eq!(pos, end, "box sizes do not cover the region exactly");
    boxes
}

fn find_box(data: &[u8], pos: usize, end: usize, path: &[&str]) -> Option<(usize, usize)> {
    let (first, rest) = path.split_first()?;
    for (fourcc, body_start, body_end) in child_boxes(data, pos, end) {
        if fourcc == *first {
            if rest.is_empty() {
                return Some((body_start, body_end));
            }
            return find_box(data, body_start, body_end, rest);
        }
    }
    None
}

fn find_boxes(data: &[u8], pos: usize, end: usize, fourcc: &str) -> Vec<(usize, usize)> {
    child_boxes(data, pos, end)
        .into_iter()
        .filter(|(name, _, _)| name == fourcc)
        .map(|(_, start, stop)| (start, stop))
        .collect()
}

fn parse_stts(data: &[u8], start: usize) -> Vec<(u32, u32)> {
    let count = be_u32(data, start + 4) as usize;
    (0..count)
        .map(|i| (be_u32(data, start + 8 + i * 8), be_u32(data, start + 12 + i * 8)))
        .collect()
}

fn parse_stss(data: &[u8], start: usize) -> Vec<u32> {
    let count = be_u32(data, start + 4) as usize;
    (0..count).map(|i| be_u32(data, start + 8 + i * 4)).collect()
}

/// Returns `(default_size, sample_count, per_sample_sizes)`.
fn parse_stsz(data: &[u8], start: usize) -> (u32, u32, Vec<u32>) {
    let default_size = be_u32(data, start + 4);
    let count = be_u32(data, start + 8);
    let sizes = if default_size == 0 {
        (0..count as usize)
            .map(|i| be_u32(data, start + 12 + i * 4))
            .collect()
    } else {
        Vec::new()
    };
    (default_size, count, sizes)
}

fn parse_stsc(data: &[u8], start: usize) -> Vec<(u32, u32, u32)> {
    let count = be_u32(data, start + 4) as usize;
    (0..count)
        .map(|i| {
            (
                be_u32(data, start + 8 + i * 12),
                be_u32(data, start + 12 + i * 12),
                be_u32(data, start + 16 + i * 12),
            )
        })
        .collect()
}

fn parse_co64(data: &[u8], start: usize) -> Vec<u64> {
    let count = be_u32(data, start + 4) as usize;
    (0..count).map(|i| be_u64(data, start + 8 + i * 8)).collect()
}

/// Expand the run-length stsc table to a total sample count.
fn stsc_total_samples(entries: &[(u32, u32, u32)], chunk_count: u32) -> u32 {
    let mut total = 0;
    for (i, entry) in entries.iter().enumerate() {
        let next_first = entries.get(i + 1).map_or(chunk_count + 1, |next| next.0);
        total += (next_first - entry.0) * entry.1;
    }
    total
}

fn top_level_names(data: &[u8]) -> Vec<String> {
    child_boxes(data, 0, data.len())
        .into_iter()
        .map(|(name, _, _)| name)
        .collect()
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[test]
fn test_single_aac_track_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audio.mp4");

    let frames = vec![
        MediaBuffer::new(vec![0x12, 0x10]).with_flags(BufferFlags::CODEC_CONFIG),
        MediaBuffer::new(vec![0xAA; 5]).with_timestamp(0),
        MediaBuffer::new(vec![0xBB; 5]).with_timestamp(23_220),
        MediaBuffer::new(vec![0xCC; 5]).with_timestamp(46_440),
    ];

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::Aac, 2, 44_100),
            frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();
    assert!(writer.is_streamable());

    let data = std::fs::read(&path).unwrap();
    assert_eq!(top_level_names(&data), ["ftyp", "moov", "free", "mdat"]);

    // Timescale-1000 movie duration comes from the max sample timestamp.
    let (mvhd, _) = find_box(&data, 0, data.len(), &["moov", "mvhd"]).unwrap();
    assert_eq!(be_u32(&data, mvhd + 12), 1000);
    assert_eq!(be_u32(&data, mvhd + 16), 46);

    let (stbl, stbl_end) =
        find_box(&data, 0, data.len(), &["moov", "trak", "mdia", "stbl"]).unwrap();

    // Identical deltas collapse into a single stts run.
    let (stts, _) = find_box(&data, stbl, stbl_end, &["stts"]).unwrap();
    assert_eq!(parse_stts(&data, stts), vec![(3, 23)]);

    // Equal sizes take the default-size form.
    let (stsz, _) = find_box(&data, stbl, stbl_end, &["stsz"]).unwrap();
    assert_eq!(parse_stsz(&data, stsz), (5, 3, Vec::new()));

    let (stsc, _) = find_box(&data, stbl, stbl_end, &["stsc"]).unwrap();
    assert_eq!(parse_stsc(&data, stsc), vec![(1, 3, 1)]);

    // One chunk, starting at the first mdat payload byte.
    let (mdat_start, mdat_end) = find_box(&data, 0, data.len(), &["mdat"]).unwrap();
    let (co64, _) = find_box(&data, stbl, stbl_end, &["co64"]).unwrap();
    assert_eq!(parse_co64(&data, co64), vec![mdat_start as u64]);
    assert_eq!(mdat_end - mdat_start, 15);

    // No stss for audio tracks.
    assert!(find_box(&data, stbl, stbl_end, &["stss"]).is_none());
}

#[test]
fn test_avc_declared_codec_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("video.mp4");

    let nal_one = [0x65, 0x88, 0x84, 0x21];
    let nal_two = [0x41, 0x9a, 0x02];
    let frames = vec![
        avc_config_frame(),
        avc_frame(&nal_one, 0, true),
        avc_frame(&nal_two, 33_333, false),
    ];

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer
        .add_source(VectorSource::new(
            TrackFormat::video(Codec::Avc, 320, 240),
            frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();

    let data = std::fs::read(&path).unwrap();

    // avcC carries the assembled configuration record.
    let (stsd, stsd_end) = find_box(
        &data,
        0,
        data.len(),
        &["moov", "trak", "mdia", "stbl", "stsd"],
    )
    .unwrap();
    let stsd_bytes = &data[stsd..stsd_end];
    let avcc_pos = stsd_bytes
        .windows(4)
        .position(|window| window == b"avcC")
        .expect("no avcC box in stsd");
    let avcc_size = be_u32(stsd_bytes, avcc_pos - 4) as usize;
    let avcc = &stsd_bytes[avcc_pos + 4..avcc_pos - 4 + avcc_size];

    let mut expected = vec![0x01, 0x42, 0x80, 0x1e, 0xff, 0xe1, 0x00, 0x05];
    expected.extend_from_slice(&SPS);
    expected.extend_from_slice(&[0x01, 0x00, 0x04]);
    expected.extend_from_slice(&PPS);
    assert_eq!(avcc, expected.as_slice());

    // The first sample starts at the first mdat payload byte and every
    // sample is stored with a 4-byte length prefix in place of its
    // start code.
    let (mdat_start, mdat_end) = find_box(&data, 0, data.len(), &["mdat"]).unwrap();
    let (stbl, stbl_end) =
        find_box(&data, 0, data.len(), &["moov", "trak", "mdia", "stbl"]).unwrap();
    let (co64, _) = find_box(&data, stbl, stbl_end, &["co64"]).unwrap();
    assert_eq!(parse_co64(&data, co64)[0], mdat_start as u64);

    let mut pos = mdat_start;
    let mut payloads: Vec<&[u8]> = Vec::new();
    while pos < mdat_end {
        let length = be_u32(&data, pos) as usize;
        payloads.push(&data[pos + 4..pos + 4 + length]);
        pos += 4 + length;
    }
    assert_eq!(payloads, vec![&nal_one[..], &nal_two[..]]);

    // The sync sample table points at the IDR frame.
    let (stss, _) = find_box(&data, stbl, stbl_end, &["stss"]).unwrap();
    assert_eq!(parse_stss(&data, stss), vec![1]);

    let (stsz, _) = find_box(&data, stbl, stbl_end, &["stsz"]).unwrap();
    let (default_size, count, sizes) = parse_stsz(&data, stsz);
    assert_eq!(default_size, 0);
    assert_eq!(count, 2);
    assert_eq!(sizes, vec![nal_one.len() as u32 + 4, nal_two.len() as u32 + 4]);
}

#[test]
fn test_avc_codec_config_split_across_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("split.mp4");

    // SPS and PPS arrive unflagged, without start codes, as the first
    // two frames.
    let frames = vec![
        MediaBuffer::new(SPS.to_vec()),
        MediaBuffer::new(PPS.to_vec()),
        avc_frame(&[0x65, 0x88, 0x80], 0, true),
        avc_frame(&[0x41, 0x9a], 33_333, false),
    ];

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer
        .add_source(VectorSource::new(
            TrackFormat::video(Codec::Avc, 176, 144),
            frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();

    let data = std::fs::read(&path).unwrap();
    let (stsd, stsd_end) = find_box(
        &data,
        0,
        data.len(),
        &["moov", "trak", "mdia", "stbl", "stsd"],
    )
    .unwrap();
    let stsd_bytes = &data[stsd..stsd_end];
    let avcc_pos = stsd_bytes
        .windows(4)
        .position(|window| window == b"avcC")
        .expect("no avcC box in stsd");
    let avcc_size = be_u32(stsd_bytes, avcc_pos - 4) as usize;
    let avcc = &stsd_bytes[avcc_pos + 4..avcc_pos - 4 + avcc_size];

    let mut expected = vec![0x01, 0x42, 0x80, 0x1e, 0xff, 0xe1, 0x00, 0x05];
    expected.extend_from_slice(&SPS);
    expected.extend_from_slice(&[0x01, 0x00, 0x04]);
    expected.extend_from_slice(&PPS);
    assert_eq!(avcc, expected.as_slice());

    // Only the two real frames became samples.
    let (stbl, stbl_end) =
        find_box(&data, 0, data.len(), &["moov", "trak", "mdia", "stbl"]).unwrap();
    let (stsz, _) = find_box(&data, stbl, stbl_end, &["stsz"]).unwrap();
    assert_eq!(parse_stsz(&data, stsz).1, 2);
}

#[test]
fn test_mpeg4_codec_config_extracted_from_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("m4v.mp4");

    let vol_header = [0x00, 0x00, 0x01, 0xB0, 0x08, 0x42];
    let mut first_frame = vol_header.to_vec();
    first_frame.extend_from_slice(&[0x00, 0x00, 0x01, 0xB6, 0x10, 0x20, 0x30]);
    let frames = vec![
        MediaBuffer::new(first_frame).with_timestamp(0),
        MediaBuffer::new(vec![0x00, 0x00, 0x01, 0xB6, 0x11, 0x21]).with_timestamp(33_333),
    ];

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer
        .add_source(VectorSource::new(
            TrackFormat::video(Codec::Mpeg4Video, 176, 144),
            frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();

    let data = std::fs::read(&path).unwrap();
    let (stsd, stsd_end) = find_box(
        &data,
        0,
        data.len(),
        &["moov", "trak", "mdia", "stbl", "stsd"],
    )
    .unwrap();
    let stsd_bytes = &data[stsd..stsd_end];
    assert!(stsd_bytes.windows(4).any(|window| window == b"esds"));

    // DecoderSpecificInfo carries the bytes ahead of the VOP start code.
    let mut dsi = vec![0x05, vol_header.len() as u8];
    dsi.extend_from_slice(&vol_header);
    assert!(stsd_bytes
        .windows(dsi.len())
        .any(|window| window == dsi.as_slice()));

    // The remainder of the first frame became the first sample.
    let (stbl, stbl_end) =
        find_box(&data, 0, data.len(), &["moov", "trak", "mdia", "stbl"]).unwrap();
    let (stsz, _) = find_box(&data, stbl, stbl_end, &["stsz"]).unwrap();
    let (_, count, sizes) = parse_stsz(&data, stsz);
    assert_eq!(count, 2);
    assert_eq!(sizes, vec![7, 6]);
}

#[test]
fn test_two_tracks_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("av.mp4");

    let mut video_frames = vec![avc_config_frame()];
    for i in 0..30i64 {
        video_frames.push(avc_frame(&[0x65, i as u8], i * 33_333, i % 10 == 0));
    }
    let mut audio_frames = vec![MediaBuffer::new(vec![0x12, 0x10]).with_flags(BufferFlags::CODEC_CONFIG)];
    for i in 0..44i64 {
        audio_frames.push(MediaBuffer::new(vec![0x55; 5]).with_timestamp(i * 23_220));
    }

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer
        .add_source(VectorSource::new(
            TrackFormat::video(Codec::Avc, 320, 240),
            video_frames,
        ))
        .unwrap();
    writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::Aac, 1, 44_100),
            audio_frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();

    let data = std::fs::read(&path).unwrap();
    let (moov, moov_end) = find_box(&data, 0, data.len(), &["moov"]).unwrap();
    let traks = find_boxes(&data, moov, moov_end, "trak");
    assert_eq!(traks.len(), 2);

    for (trak, trak_end) in traks {
        let (stbl, stbl_end) = find_box(&data, trak, trak_end, &["mdia", "stbl"]).unwrap();
        let is_video = find_box(&data, stbl, stbl_end, &["stss"]).is_some();

        let (co64, _) = find_box(&data, stbl, stbl_end, &["co64"]).unwrap();
        let offsets = parse_co64(&data, co64);
        assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));

        let (stsc, _) = find_box(&data, stbl, stbl_end, &["stsc"]).unwrap();
        let stsc_entries = parse_stsc(&data, stsc);
        let (stsz, _) = find_box(&data, stbl, stbl_end, &["stsz"]).unwrap();
        let sample_count = parse_stsz(&data, stsz).1;
        assert_eq!(
            stsc_total_samples(&stsc_entries, offsets.len() as u32),
            sample_count
        );

        if is_video {
            // 30 frames over one second with a 500 ms window: the chunk
            // closes with the sample that crossed it, 17 then 13.
            assert_eq!(stsc_entries, vec![(1, 17, 1), (2, 13, 1)]);
            assert_eq!(offsets.len(), 2);
            let (stss, _) = find_box(&data, stbl, stbl_end, &["stss"]).unwrap();
            assert_eq!(parse_stss(&data, stss), vec![1, 11, 21]);
        } else {
            assert_eq!(stsc_entries, vec![(1, 23, 1), (2, 21, 1)]);
            assert_eq!(offsets.len(), 2);
        }
    }
}

#[test]
fn test_file_size_limit_stops_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limited.mp4");
    let handler = Arc::new(CollectingHandler::default());

    let frames = (0..10i64)
        .map(|i| MediaBuffer::new(vec![0x33; 100]).with_timestamp(i * 23_220))
        .collect();

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer.set_event_handler(handler.clone());
    // Default reservation is 0x0F00 bytes; the second 100-byte sample
    // pushes the estimate past the limit.
    writer.set_max_file_size(4_000);
    writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::Aac, 1, 8_000),
            frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();

    assert_eq!(handler.events(), vec![MuxerEvent::MaxFileSizeReached]);

    let data = std::fs::read(&path).unwrap();
    let (stbl, stbl_end) =
        find_box(&data, 0, data.len(), &["moov", "trak", "mdia", "stbl"]).unwrap();
    let (stsz, _) = find_box(&data, stbl, stbl_end, &["stsz"]).unwrap();
    assert_eq!(parse_stsz(&data, stsz).1, 1);
}

#[test]
fn test_file_duration_limit_stops_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timed.mp4");
    let handler = Arc::new(CollectingHandler::default());

    let frames = (0..10i64)
        .map(|i| MediaBuffer::new(vec![0x33; 8]).with_timestamp(i * 100_000))
        .collect();

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer.set_event_handler(handler.clone());
    writer.set_max_file_duration(250_000);
    writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::AmrNb, 1, 8_000),
            frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();

    assert_eq!(handler.events(), vec![MuxerEvent::MaxDurationReached]);
}

#[test]
fn test_moov_spills_past_reservation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spill.mp4");

    let frames = (0..100i64)
        .map(|i| {
            MediaBuffer::new(vec![0x44; 10 + (i % 7) as usize]).with_timestamp(i * 23_220)
        })
        .collect();

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer.set_estimated_moov_box_size(0x100);
    writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::Aac, 1, 44_100),
            frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();
    assert!(!writer.is_streamable());

    let data = std::fs::read(&path).unwrap();
    // The reservation stays a free box and moov lands after mdat.
    assert_eq!(top_level_names(&data), ["ftyp", "free", "mdat", "moov"]);
    let boxes = child_boxes(&data, 0, data.len());
    let (_, free_start, free_end) = boxes[1].clone();
    assert_eq!(free_end - (free_start - 8), 0x100);

    let (stbl, stbl_end) =
        find_box(&data, 0, data.len(), &["moov", "trak", "mdia", "stbl"]).unwrap();
    let (stsz, _) = find_box(&data, stbl, stbl_end, &["stsz"]).unwrap();
    let (default_size, count, sizes) = parse_stsz(&data, stsz);
    assert_eq!(default_size, 0);
    assert_eq!(count, 100);
    assert_eq!(sizes.len(), 100);
}

#[test]
fn test_empty_source_reports_stop_prematurely() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.mp4");
    let handler = Arc::new(CollectingHandler::default());

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer.set_event_handler(handler.clone());
    writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::Aac, 1, 44_100),
            Vec::new(),
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();

    assert_eq!(handler.events(), vec![MuxerEvent::StopPrematurely]);

    let data = std::fs::read(&path).unwrap();
    let (mdat_start, mdat_end) = find_box(&data, 0, data.len(), &["mdat"]).unwrap();
    assert_eq!(mdat_start, mdat_end);

    let (stbl, stbl_end) =
        find_box(&data, 0, data.len(), &["moov", "trak", "mdia", "stbl"]).unwrap();
    let (stsz, _) = find_box(&data, stbl, stbl_end, &["stsz"]).unwrap();
    assert_eq!(parse_stsz(&data, stsz).1, 0);
    let (stts, _) = find_box(&data, stbl, stbl_end, &["stts"]).unwrap();
    assert!(parse_stts(&data, stts).is_empty());
    let (co64, _) = find_box(&data, stbl, stbl_end, &["co64"]).unwrap();
    assert!(parse_co64(&data, co64).is_empty());
}

#[test]
fn test_zero_interleave_writes_chunk_per_sample() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunky.mp4");

    let frames = (0..4i64)
        .map(|i| MediaBuffer::new(vec![0x22; 6]).with_timestamp(i * 20_000))
        .collect();

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer.set_interleave_duration(0);
    writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::AmrNb, 1, 8_000),
            frames,
        ))
        .unwrap();
    writer.start().unwrap();
    wait_for_eos(&writer);
    writer.stop().unwrap();

    let data = std::fs::read(&path).unwrap();
    let (stbl, stbl_end) =
        find_box(&data, 0, data.len(), &["moov", "trak", "mdia", "stbl"]).unwrap();
    let (co64, _) = find_box(&data, stbl, stbl_end, &["co64"]).unwrap();
    let offsets = parse_co64(&data, co64);
    assert_eq!(offsets.len(), 4);
    assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));

    // One-sample chunks collapse into a single stsc run.
    let (stsc, _) = find_box(&data, stbl, stbl_end, &["stsc"]).unwrap();
    assert_eq!(parse_stsc(&data, stsc), vec![(1, 1, 1)]);
}

#[test]
fn test_lifecycle_misuse_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("misuse.mp4");

    let mut writer = Mp4Writer::new(&path).unwrap();
    writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::Aac, 1, 44_100),
            Vec::new(),
        ))
        .unwrap();
    writer.start().unwrap();

    assert!(writer
        .add_source(VectorSource::new(
            TrackFormat::audio(Codec::Aac, 1, 44_100),
            Vec::new(),
        ))
        .is_err());
    assert!(writer.start().is_err());

    wait_for_eos(&writer);
    writer.stop().unwrap();
    // A second stop is a no-op.
    writer.stop().unwrap();
}
