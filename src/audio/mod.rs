//! # Audio Module
//!
//! Everything that touches raw audio bytes on the telephone leg of a call.
//!
//! ## Key Components:
//! - **Transcoding**: Stateless G.711 u-law <-> linear PCM16 conversion
//! - **Relay Queue**: Blocking handoff from AI session callbacks to the
//!   fixed-clock telephone transmitter, with interruption clearing
//! - **Outbound Publisher**: Frames caller audio into AI audio-input events
//!
//! ## Audio Format:
//! - **Telephone side**: 8 kHz u-law, 8-bit, mono, 20 ms frames (160 bytes)
//! - **AI side**: 8 kHz linear PCM, 16-bit little-endian, mono, base64 framed

pub mod outbound;     // Caller audio -> AI audio-input events
pub mod relay_queue;  // AI audio -> telephone playback handoff
pub mod transcode;    // G.711 u-law codec
