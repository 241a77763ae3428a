//! # G.711 u-law Transcoding
//!
//! Stateless conversion between 8-bit u-law telephone samples and 16-bit linear
//! PCM samples, in both directions. The telephone side of every call speaks
//! 8 kHz u-law; the AI streaming service speaks linear PCM16, so every audio
//! chunk crosses through this module exactly once per direction.
//!
//! ## Key Properties:
//! - **Bit-exact**: Matches the published G.711 u-law companding tables
//!   (the classic Sun `g711.c` pairing used by telephony stacks everywhere)
//! - **Stateless**: Pure functions, no framing, safe to call from any thread
//! - **Round-trip**: `linear_to_ulaw(ulaw_to_linear(b)) == b` for every byte
//!   except 0x7F (negative zero), which decodes to 0 and re-encodes as 0xFF —
//!   u-law has 255 distinct levels, both zero codes collapse to silence

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const BIAS: i16 = 0x84;
const CLIP: i16 = 8159;

/// Segment end points for the 8 u-law chords, on the bias-adjusted 14-bit scale.
const SEG_UEND: [i16; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

/// Decode a single u-law sample to a 16-bit linear PCM sample.
///
/// Output range is the standard decoder table range [-32124, 32124].
pub fn ulaw_to_linear(u_val: u8) -> i16 {
    let u_val = !u_val;
    let mut t = (((u_val & 0x0F) as i16) << 3) + BIAS;
    t <<= (u_val & 0x70) >> 4;
    if u_val & 0x80 != 0 {
        BIAS - t
    } else {
        t - BIAS
    }
}

/// Encode a single 16-bit linear PCM sample to u-law.
///
/// Magnitude is clipped to the codec's representable range before companding,
/// so the full i16 range is accepted.
pub fn linear_to_ulaw(pcm_val: i16) -> u8 {
    // Work on the 14-bit scale the segment table is defined for.
    let mut pcm = pcm_val >> 2;
    let mask: u8 = if pcm < 0 {
        pcm = -pcm;
        0x7F
    } else {
        0xFF
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS >> 2;

    let seg = SEG_UEND.iter().position(|&end| pcm <= end);
    match seg {
        Some(seg) => {
            let uval = ((seg as u8) << 4) | (((pcm >> (seg + 1)) & 0x0F) as u8);
            uval ^ mask
        }
        None => 0x7F ^ mask,
    }
}

/// Decode a u-law byte buffer into 16-bit linear samples.
pub fn decode_buffer(ulaw: &[u8]) -> Vec<i16> {
    ulaw.iter().map(|&b| ulaw_to_linear(b)).collect()
}

/// Encode 16-bit linear samples into a u-law byte buffer.
pub fn encode_buffer(linear: &[i16]) -> Vec<u8> {
    linear.iter().map(|&s| linear_to_ulaw(s)).collect()
}

/// Decode a u-law byte buffer straight to little-endian PCM16 bytes.
///
/// This is the telephone -> AI direction: each u-law byte becomes two PCM
/// bytes, ready for base64 framing into an audio-input event.
pub fn ulaw_to_pcm_bytes(ulaw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ulaw.len() * 2);
    for &b in ulaw {
        // Writing into a Vec cannot fail.
        out.write_i16::<LittleEndian>(ulaw_to_linear(b)).unwrap();
    }
    out
}

/// Encode little-endian PCM16 bytes to a u-law byte buffer.
///
/// This is the AI -> telephone direction. Returns an error for odd-length
/// input, since a trailing half sample means the buffer is malformed.
pub fn pcm_bytes_to_ulaw(pcm: &[u8]) -> Result<Vec<u8>, String> {
    if pcm.len() % 2 != 0 {
        return Err("PCM16 buffer length must be even for 16-bit samples".to_string());
    }

    let mut cursor = Cursor::new(pcm);
    let mut out = Vec::with_capacity(pcm.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        out.push(linear_to_ulaw(sample));
    }
    Ok(out)
}
