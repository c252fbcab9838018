//! External audio codec collaborators (spec §1, §6: "audio codecs are external
//! libraries" — MP2 and AAC-LC decoding are explicitly out of this crate's scope,
//! the same way `SampleSource`/`AudioSink` are narrow traits owned by the caller
//! in `dab_core::collaborators`). Frame processors hold `&mut dyn` trait objects
//! and never decode PCM themselves.

/// Decodes one MPEG-1/2 Layer II frame (spec §4.10). Implementations own their own
/// ISO 11172-3 tables; this crate only assembles frames and hands them over.
pub trait Mp2Decoder {
    /// `frame` is one complete MP2 frame including its 4-byte header. Returns
    /// interleaved stereo PCM samples, or `None` if the frame could not be decoded.
    fn decode_frame(&mut self, frame: &[u8]) -> Option<Vec<i16>>;
}

/// Decodes one AAC-LC access unit wrapped in a LATM/LOAS envelope (spec §4.11).
pub trait AacLcDecoder {
    /// `loas_frame` is the full LATM/LOAS-wrapped AU built by
    /// [`crate::frame_processor::mp4::wrap_latm_loas`]. `sbr`/`channels` are passed
    /// through from the super-frame header so the decoder can configure SBR/PS
    /// without re-parsing `AudioSpecificConfig` itself.
    fn decode_au(&mut self, loas_frame: &[u8], sbr: bool, channels: u8) -> Option<Vec<i16>>;
}
