//! AVC decoder configuration assembly.
//!
//! Encoders deliver the initial H.264 parameter sets as one Annex-B blob
//! holding the SPS followed by the PPS. This module splits the blob into
//! the two NAL units and assembles the `AVCDecoderConfigurationRecord`
//! carried by the `avcC` box.

use byteorder::{BigEndian, WriteBytesExt};
use recmux_core::buffer::MediaBuffer;
use recmux_core::error::{CodecError, Result};

/// Annex-B NAL start code.
pub(crate) const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Size of the length prefix written before each AVC sample.
pub(crate) const NAL_LENGTH_SIZE: u32 = 4;

/// Remove a leading Annex-B start code, if present.
pub(crate) fn strip_start_code(buffer: &mut MediaBuffer) {
    if buffer.len() < 4 {
        return;
    }
    if buffer.data()[..4] == NAL_START_CODE {
        buffer.trim_front(4);
    }
}

/// Assemble an `AVCDecoderConfigurationRecord` from an Annex-B blob
/// containing the SPS followed by the PPS.
pub(crate) fn make_avc_codec_specific_data(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 4 || data[..4] != NAL_START_CODE {
        return Err(CodecError::InvalidNalUnit(
            "codec config must begin with a start code".into(),
        )
        .into());
    }

    // Find the start code separating the SPS from the PPS.
    let mut pic_param_offset = 4;
    while pic_param_offset + 3 < data.len()
        && data[pic_param_offset..pic_param_offset + 4] != NAL_START_CODE
    {
        pic_param_offset += 1;
    }
    if pic_param_offset + 3 >= data.len() {
        return Err(CodecError::InvalidNalUnit(
            "no start code found for the picture parameter set".into(),
        )
        .into());
    }

    let sps = &data[4..pic_param_offset];
    let pps = &data[pic_param_offset + 4..];

    let mut record = Vec::with_capacity(7 + sps.len() + 3 + pps.len());
    record.push(0x01); // configurationVersion
    record.push(0x42); // AVCProfileIndication: Baseline
    record.push(0x80); // profile_compatibility
    record.push(0x1e); // AVCLevelIndication
    record.push(0xfc | 3); // lengthSizeMinusOne: 4-byte NAL lengths
    record.push(0xe0 | 1); // one sequence parameter set
    record.write_u16::<BigEndian>(sps.len() as u16)?;
    record.extend_from_slice(sps);
    record.push(0x01); // one picture parameter set
    record.write_u16::<BigEndian>(pps.len() as u16)?;
    record.extend_from_slice(pps);

    Ok(record)
}
