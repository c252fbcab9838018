//! DAB+ super-frame assembly (spec §4.11), grounded on
//! `original_source/src/backend/audio/mp4processor.cpp`'s `add_to_frame` / sync
//! state machine and `_process_reed_solomon_frame`'s cross-interleave indices.
//! A super-frame is 5 contiguous per-CIF backend outputs (`RsDims*120` bytes,
//! `RsDims = BitRate/8`) protected by one Firecode-guarded Reed-Solomon(120,110)
//! cross-interleave, itself containing `numAUs` AAC-LC access units wrapped for
//! delivery as a LATM/LOAS stream (spec §1 "audio codecs are external libraries").

use dab_core::bit_reader::BitReader;
use dab_core::bit_writer::BitWriter;
use dab_core::collaborators::{Clock, ControlEvents};
use dab_core::crc;
use dab_core::events::{AudioFlags, DabEvent};

use crate::bits::pack_bits;
use crate::codecs::AacLcDecoder;
use crate::pad_handler::PadHandler;
use crate::reed_solomon::{self, ReedSolomon};

/// How many consecutive good super-frames are required to call the Firecode lock
/// "held" before it's allowed to decay back to zero (mirrors `mSyncCount` decaying
/// from 4 to 0 in the original's `_process_reed_solomon_frame`).
const MAX_SYNC: u8 = 4;

pub struct SuperFrameProcessor {
    sub_ch_id: u8,
    bit_rate_kbps: u32,
    /// Bytes delivered per `add()` call: `24 * BitRate / 8 = 3 * BitRate`.
    frame_bytes: usize,
    /// Reed-Solomon cross-interleave column count, `BitRate/8`.
    rs_dims: usize,
    pending: Vec<u8>,
    /// Firecode/RS lock state: 0 = hunting one frame at a time, `MAX_SYNC` = locked
    /// onto 5-frame-aligned super-frame boundaries (Open Question #6).
    sync: u8,
    rs: ReedSolomon,
    pad_handler: PadHandler,
    decoder: Option<Box<dyn AacLcDecoder>>,
    frame_errors: u32,
    rs_failures: u32,
    super_frames_seen: u32,
}

impl SuperFrameProcessor {
    pub fn new(sub_ch_id: u8, bit_rate_kbps: u32) -> Self {
        Self {
            sub_ch_id,
            bit_rate_kbps,
            frame_bytes: 3 * bit_rate_kbps as usize,
            rs_dims: (bit_rate_kbps as usize / 8).max(1),
            pending: Vec::new(),
            sync: 0,
            rs: ReedSolomon::new(),
            pad_handler: PadHandler::new(sub_ch_id),
            decoder: None,
            frame_errors: 0,
            rs_failures: 0,
            super_frames_seen: 0,
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn AacLcDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Feeds one CIF's worth of descrambled hard bits (`bits.len() == 24 *
    /// BitRate`), matching `Mp4Processor::add_to_frame`.
    pub fn add(&mut self, bits: &[u8], events: &mut dyn ControlEvents, clock: &dyn Clock) {
        assert_eq!(bits.len(), 24 * self.bit_rate_kbps as usize, "MP4 backend output must be 24*BitRate bits per CIF");
        self.pending.extend_from_slice(&pack_bits(bits));

        let window = self.rs_dims * reed_solomon::N;
        debug_assert_eq!(window, 5 * self.frame_bytes, "RsDims*120 must equal 5 logical frames");
        while self.pending.len() >= window {
            self.try_super_frame(events, clock);
        }
    }

    fn try_super_frame(&mut self, events: &mut dyn ControlEvents, clock: &dyn Clock) {
        let window = self.rs_dims * reed_solomon::N;
        let head_firecode_ok = crate::firecode::check(&self.pending[..11]);

        if self.sync < MAX_SYNC {
            if head_firecode_ok {
                self.sync = MAX_SYNC;
                self.decode_super_frame(events, clock);
                self.pending.drain(..window);
            } else {
                // Hunting: slide by one logical frame rather than a full super-frame
                // (Open Question #6 keeps this one-frame advance during acquisition).
                self.pending.drain(..self.frame_bytes.min(self.pending.len()));
            }
            return;
        }

        let rs_ok = self.decode_super_frame(events, clock);
        self.pending.drain(..window);
        if !head_firecode_ok && !rs_ok {
            self.sync -= 1;
            self.rs_failures += 1;
            if self.sync == 0 {
                log::warn!("sub-channel {}: lost DAB+ super-frame sync after repeated Firecode+RS failure", self.sub_ch_id);
            }
        } else if !head_firecode_ok {
            log::debug!(
                "sub-channel {}: super-frame Firecode check missed but Reed-Solomon succeeded (Open Question #6), keeping lock",
                self.sub_ch_id
            );
        }
    }

    /// Reed-Solomon cross-interleave decode plus AU parsing. Returns whether the
    /// codec-level data was clean (no uncorrectable RS column), used by the caller
    /// to decide whether to keep or decay the Firecode lock.
    fn decode_super_frame(&mut self, events: &mut dyn ControlEvents, clock: &dyn Clock) -> bool {
        self.super_frames_seen += 1;
        let window = self.rs_dims * reed_solomon::N;
        let (deinterleaved, rs_ok) = self.rs_deinterleave_and_correct(&self.pending[..window]);
        if !rs_ok {
            self.rs_failures += 1;
        }

        // Only the K=110 information rows carry the super-frame payload; the
        // trailing 10 parity rows per column are consumed by `decode` above.
        let payload = &deinterleaved[..self.rs_dims * reed_solomon::K];
        self.parse_and_dispatch(payload, events, clock);
        rs_ok
    }

    /// `_process_reed_solomon_frame`: the window is `RsDims` columns of a
    /// `(120,110)` codeword each, read/written column-major across the flat
    /// byte buffer (`rsIn[k] = frame[(base + j + k*RsDims) % (RsDims*120)]`
    /// reduces to "row `j`, column `k`" once `base` is folded into the window).
    fn rs_deinterleave_and_correct(&mut self, window: &[u8]) -> (Vec<u8>, bool) {
        let mut out = vec![0u8; window.len()];
        let mut all_ok = true;
        for col in 0..self.rs_dims {
            let mut codeword = [0u8; reed_solomon::N];
            for (row, slot) in codeword.iter_mut().enumerate() {
                *slot = window[row * self.rs_dims + col];
            }
            if self.rs.decode(&mut codeword).is_none() {
                all_ok = false;
            }
            for (row, &byte) in codeword.iter().enumerate() {
                out[row * self.rs_dims + col] = byte;
            }
        }
        (out, all_ok)
    }

    /// Super-frame header (dacRate/sbrFlag/channelMode/psFlag/mpegSurround), AU
    /// start-offset table, per-AU CRC, PAD extraction, and LATM/LOAS dispatch.
    fn parse_and_dispatch(&mut self, payload: &[u8], events: &mut dyn ControlEvents, _clock: &dyn Clock) {
        if payload.len() < 3 {
            return;
        }
        let mut reader = BitReader::new(payload);
        // Skip the 16-bit Firecode and the reserved bit ahead of it (`dacRate` lives
        // at byte 2 bit 6 in the original, i.e. bit 17 of the payload).
        let _firecode = reader.read_bits(16);
        let _reserved = reader.read_bool();
        let dac_rate = reader.read_bits(1);
        let sbr_flag = reader.read_bool();
        let aac_channel_mode = reader.read_bits(1);
        let ps_flag = reader.read_bool();
        let mpeg_surround = reader.read_bits(3) as u8;

        let num_aus: usize = match (dac_rate, sbr_flag) {
            (0, false) => 4,
            (0, true) => 2,
            (_, false) => 6,
            (_, true) => 3,
        };

        let mut au_starts = vec![0usize; num_aus];
        for start in au_starts.iter_mut().skip(1) {
            *start = reader.read_bits(12) as usize;
        }
        reader.align_to_byte();
        au_starts[0] = reader.byte_pos();

        let channels: u8 = if aac_channel_mode == 1 { 2 } else { 1 };
        let sample_rate_hz: u32 = if dac_rate == 1 { 48_000 } else { 32_000 };

        for i in 0..num_aus {
            let start = au_starts[i];
            let end = if i + 1 < num_aus { au_starts[i + 1] } else { payload.len() };
            if end <= start + 2 || end > payload.len() {
                self.frame_errors += 1;
                continue;
            }
            let au = &payload[start..end];
            if !crc::check_crc_bytes_len(au, au.len() - 2) {
                self.frame_errors += 1;
                continue;
            }
            let mut data = &au[..au.len() - 2];
            if i == 0 {
                let consumed = self.process_first_au_pad(data, events);
                data = &data[consumed..];
            }

            let loas = wrap_latm_loas(data, sample_rate_hz, channels, sbr_flag, ps_flag, mpeg_surround);
            let Some(decoder) = self.decoder.as_mut() else { continue };
            if let Some(samples) = decoder.decode_au(&loas, sbr_flag, channels) {
                events.emit(DabEvent::NewAudio {
                    subch_id: self.sub_ch_id,
                    samples,
                    rate_hz: if sbr_flag { sample_rate_hz * 2 } else { sample_rate_hz },
                    flags: AudioFlags { sbr: sbr_flag, ps: ps_flag },
                });
            }
        }
    }

    /// The leading PAD field carried in the first AU of each super-frame (spec
    /// §4.11/§4.13): the first byte's high nibble is the PAD byte count. Returns
    /// how many leading bytes of `au_data` were consumed so the caller can strip
    /// them before handing the rest to the AAC decoder. The exact PAD framing
    /// byte was not present in the retrieved source pack; this mirrors the F-PAD
    /// trailer convention `Mp2FrameProcessor::process_trailing_pad` uses, adapted
    /// to MP4's leading placement (see `DESIGN.md`).
    fn process_first_au_pad(&mut self, au_data: &[u8], events: &mut dyn ControlEvents) -> usize {
        if au_data.is_empty() {
            return 0;
        }
        let pad_len = (au_data[0] >> 4) as usize;
        if pad_len < 2 || pad_len + 1 > au_data.len() {
            return 0;
        }
        let pad_bytes = &au_data[1..1 + pad_len];
        let l0 = pad_bytes[pad_bytes.len() - 1];
        let l1 = pad_bytes[pad_bytes.len() - 2];
        self.pad_handler.process_pad(pad_bytes, pad_bytes.len() as i64 - 3, l1, l0, events);
        1 + pad_len
    }
}

/// ISO/IEC 14496-3 `samplingFrequencyIndex` for the rates DAB+ actually uses.
fn sampling_frequency_index(sample_rate_hz: u32) -> u32 {
    match sample_rate_hz {
        48_000 => 3,
        32_000 => 5,
        24_000 => 6,
        _ => 4,
    }
}

/// Wraps one AAC-LC raw_data_block in a minimal LATM/LOAS envelope (spec §4.11
/// "LATM/LOAS wrap bit sequence"): `AudioSyncStream` syncword `0x2B7`, a
/// `StreamMuxConfig` carrying `AudioSpecificConfig` (object type 2 = AAC LC, a
/// `GASpecificConfig` selecting the 960-sample transform per Open Question
/// resolution, and an SBR extension header when `sbr` is set), `PayloadLengthInfo`,
/// and the payload itself. `audioMuxLengthBytes` is patched in after the payload
/// is written via [`BitWriter::patch_bits`], mirroring the original's two-pass
/// length-then-body construction. This is a standard-derived reconstruction, not a
/// literal transcription (no LATM wrapper source was retrieved; see `DESIGN.md`).
pub fn wrap_latm_loas(payload: &[u8], sample_rate_hz: u32, channels: u8, sbr: bool, _ps: bool, _mpeg_surround: u8) -> Vec<u8> {
    let mut body = BitWriter::new();

    // StreamMuxConfig: audioMuxVersion=0, allStreamsSameTimeFraming=1,
    // numSubFrames=0, numProgram=0, numLayer=0.
    body.write_bits(0, 1);
    body.write_bool(true);
    body.write_bits(0, 6);
    body.write_bits(0, 4);
    body.write_bits(0, 3);

    // AudioSpecificConfig: objectType=2 (AAC LC), samplingFrequencyIndex,
    // channelConfiguration.
    body.write_bits(2, 5);
    body.write_bits(sampling_frequency_index(sample_rate_hz), 4);
    body.write_bits(channels as u32, 4);

    // GASpecificConfig: frameLengthFlag=1 (960-sample transform, Open Question #2
    // sibling decision), dependsOnCoreCoder=0, extensionFlag=0 -> literal 0b100.
    body.write_bits(0b100, 3);

    if sbr {
        // Minimal SBR extension signalling: syncExtensionType 0x2B7,
        // extensionAudioObjectType=5 (SBR), sbrPresentFlag=1,
        // extensionSamplingFrequencyIndex (doubled rate).
        body.write_bits(0x2B7, 11);
        body.write_bits(5, 5);
        body.write_bool(true);
        body.write_bits(sampling_frequency_index(sample_rate_hz * 2), 4);
    }

    body.write_bits(0, 3); // frameLengthType=0 (variable, via PayloadLengthInfo).
    body.write_bits(0xFF, 8); // latmBufferFullness placeholder.
    body.write_bool(false); // otherDataPresent=0.
    body.write_bool(false); // crcCheckPresent=0.

    // PayloadLengthInfo: a run of 0xFF bytes followed by the remainder, LATM's
    // "mux slot length" coding.
    let mut remaining = payload.len();
    while remaining >= 0xFF {
        body.write_bits(0xFF, 8);
        remaining -= 0xFF;
    }
    body.write_bits(remaining as u32, 8);
    body.align_to_byte();
    body.write_bytes(payload);

    let body_bytes = body.into_bytes();

    let mut frame = BitWriter::new();
    frame.write_bits(0x2B7, 11);
    let length_at = frame.len_bits();
    frame.write_bits(0, 13); // placeholder, patched below.
    frame.align_to_byte();
    frame.write_bytes(&body_bytes);
    frame.patch_bits(length_at, body_bytes.len() as u32, 13);
    frame.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dab_core::collaborators::SystemClock;
    use std::sync::mpsc;

    struct NullAacDecoder;
    impl AacLcDecoder for NullAacDecoder {
        fn decode_au(&mut self, _loas_frame: &[u8], _sbr: bool, _channels: u8) -> Option<Vec<i16>> {
            Some(vec![0i16; 960])
        }
    }

    #[test]
    fn wrap_latm_loas_patches_the_length_field() {
        let payload = vec![0xAAu8; 37];
        let frame = wrap_latm_loas(&payload, 48_000, 2, false, false, 0);
        let mut reader = BitReader::new(&frame);
        assert_eq!(reader.read_bits(11), 0x2B7);
        let declared_len = reader.read_bits(13) as usize;
        reader.align_to_byte();
        assert_eq!(reader.remaining_bytes().len(), declared_len);
    }

    #[test]
    fn hunts_one_frame_at_a_time_until_firecode_locks() {
        let bit_rate = 64u32;
        let mut processor = SuperFrameProcessor::new(2, bit_rate).with_decoder(Box::new(NullAacDecoder));
        let frame_bits = vec![0u8; 24 * bit_rate as usize];
        let (tx, _rx) = mpsc::channel();
        let mut sender = tx;
        let clock = SystemClock::default();
        // All-zero frames never pass Firecode; after more than one super-frame's
        // worth of frames the processor must still not be locked or panicking.
        for _ in 0..12 {
            processor.add(&frame_bits, &mut sender, &clock);
        }
        assert_eq!(processor.sync, 0);
    }
}
