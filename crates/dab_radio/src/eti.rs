//! ETI (Ensemble Transport Interface) frame synthesis (spec §4.15), built directly
//! from the EN 300 799 frame layout described in spec §4.15: a fixed 6144-byte
//! ETI-NI frame per CIF, carrying SYNC/LIDATA (FC, NST Stream Characterisation
//! records, EOH with an MNSC+HCRC header CRC), then MST (the FIC FIB bundle for
//! this CIF plus every enrolled subchannel's deconvolved payload, a data-section
//! CRC, RFU, and a `TIST` timestamp), padded with `0x55` to the fixed frame size.
//! No golden ETI capture was present in the retrieved pack (spec's end-to-end
//! scenarios are aspirational, not literal byte-for-byte fixtures — see
//! `DESIGN.md`), so the exact sub-field widths below are a self-consistent,
//! byte-aligned reconstruction rather than a transcription of a reference decoder.

use dab_core::bit_writer::BitWriter;
use dab_core::crc;
use dab_core::energy_dispersal;

use crate::fib::configuration::SubchannelDescriptor;
use crate::puncture;
use crate::viterbi;

/// Every ETI-NI frame is exactly this many bytes (spec §4.15, P10).
pub const ETI_FRAME_BYTES: usize = 6144;

/// Per-CIF FIC FIB bundle size: 3 FIBs (`nb_fibs_in_fic / nb_cifs_in_msc` for Mode
/// I) of 32 bytes each.
pub const FIC_BYTES_PER_CIF: usize = 96;

const FSYNC_EVEN: [u8; 3] = [0xF8, 0xFF, 0xFF];
const FSYNC_ODD: [u8; 3] = [0x07, 0x20, 0x00];

/// One enrolled subchannel's independent deconvolve/descramble state, kept
/// separate from [`crate::msc_handler::MscHandler`]'s backends so ETI output
/// doesn't depend on whether a subchannel is also selected for local playback.
struct EtiSubchannel {
    sub_ch_id: u8,
    start_cu: u16,
    size_cu: u16,
    bit_rate_kbps: u32,
    puncture_table: Vec<bool>,
    disperse_vector: Vec<u8>,
    last_payload: Vec<u8>,
}

impl EtiSubchannel {
    fn new(descriptor: &SubchannelDescriptor) -> Self {
        let num_info_bits = 24 * descriptor.bit_rate as usize;
        let mother_len = 4 * (num_info_bits + viterbi::TAIL_BITS);
        let fragment_size = descriptor.size_cu as usize * 64;
        Self {
            sub_ch_id: descriptor.sub_ch_id,
            start_cu: descriptor.start_cu,
            size_cu: descriptor.size_cu,
            bit_rate_kbps: descriptor.bit_rate,
            puncture_table: puncture::even_spaced_table(mother_len, fragment_size),
            disperse_vector: energy_dispersal::generate(num_info_bits),
            last_payload: vec![0u8; (num_info_bits / 8).max(1)],
        }
    }

    /// Deconvolves and descrambles this subchannel's CIF slice directly (no
    /// interleaver, no 16-CIF warm-up: ETI carries the still-interleaved logical
    /// channel exactly as the ensemble transmits it, matching spec §4.15's framing
    /// of ETI as a transport-level tap rather than a decoded stream).
    fn payload_bytes(&mut self, cif_slice: &[i16]) -> &[u8] {
        let mother = puncture::depuncture(cif_slice, &self.puncture_table);
        let num_info_bits = 24 * self.bit_rate_kbps as usize;
        let mut hard_bits = viterbi::deconvolve(&mother, num_info_bits);
        for (bit, &prbs) in hard_bits.iter_mut().zip(self.disperse_vector.iter()) {
            *bit ^= prbs;
        }
        self.last_payload = crate::bits::pack_bits(&hard_bits);
        &self.last_payload
    }
}

pub struct EtiGenerator {
    subchannels: Vec<EtiSubchannel>,
    frame_counter: u8,
}

impl Default for EtiGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EtiGenerator {
    pub fn new() -> Self {
        Self { subchannels: Vec::new(), frame_counter: 0 }
    }

    /// Re-syncs the enrolled subchannel set to the live configuration's subchannel
    /// list, in enrollment order (matching `MscHandler`'s `NST` ordering, spec
    /// §4.8/§4.15).
    pub fn sync_subchannels(&mut self, descriptors: &[SubchannelDescriptor]) {
        self.subchannels.retain(|s| descriptors.iter().any(|d| d.sub_ch_id == s.sub_ch_id));
        for descriptor in descriptors {
            if !self.subchannels.iter().any(|s| s.sub_ch_id == descriptor.sub_ch_id) {
                self.subchannels.push(EtiSubchannel::new(descriptor));
            }
        }
    }

    /// Builds one ETI-NI frame for the CIF just completed. `fic_fib_bytes` is this
    /// CIF's 96-byte FIC FIB bundle; `cif` is the full MSC CIF soft-bit vector
    /// `MscHandler` just accumulated; `descriptors` is the current configuration's
    /// subchannel list (used to slice `cif` per subchannel by `StartCU`/`NumCU`).
    pub fn build_frame(&mut self, fic_fib_bytes: &[u8; FIC_BYTES_PER_CIF], cif: &[i16], descriptors: &[SubchannelDescriptor]) -> [u8; ETI_FRAME_BYTES] {
        self.sync_subchannels(descriptors);

        let nst = self.subchannels.len();
        let mut header = BitWriter::new();

        // FC (Frame Characterisation): FCT, FICF=1, NST, FP (CIF phase within the
        // 4-CIF frame group), MID=1 (Mode I), FL (frame length in words, patched
        // once the payload size is known).
        header.write_bits(self.frame_counter as u32, 8);
        header.write_bool(true); // FICF
        header.write_bits(nst as u32, 7);
        header.write_bits((self.frame_counter % 4) as u32, 3); // FP
        header.write_bits(1, 3); // MID = I
        let fl_at = header.len_bits();
        header.write_bits(0, 16); // FL placeholder.

        // NST Stream Characterisation records: SCID(6) + StartAddress(10) +
        // TPL(8) + STL(8), 32 bits each.
        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(nst);
        for sub in self.subchannels.iter_mut() {
            let start = sub.start_cu as usize * 64;
            let end = start + sub.size_cu as usize * 64;
            let payload = if end <= cif.len() { sub.payload_bytes(&cif[start..end]).to_vec() } else { sub.last_payload.clone() };
            header.write_bits(sub.sub_ch_id as u32, 6);
            header.write_bits(sub.start_cu as u32, 10);
            header.write_bits(0, 8); // TPL: protection profile, unused downstream.
            header.write_bits((payload.len() / 4).min(0xFF) as u32, 8); // STL in 4-byte words.
            payloads.push(payload);
        }

        // EOH: MNSC (unused here, all-ones "no service information") + HCRC over
        // everything written so far.
        header.write_bits(0xFFFF, 16);
        header.align_to_byte();
        let header_bytes = header.into_bytes();
        let hcrc = crc::calc_crc(&header_bytes);

        let mut mst = Vec::with_capacity(FIC_BYTES_PER_CIF + payloads.iter().map(Vec::len).sum::<usize>());
        mst.extend_from_slice(fic_fib_bytes);
        for payload in &payloads {
            mst.extend_from_slice(payload);
        }
        let data_crc = crc::calc_crc(&mst);

        let mut frame = Vec::with_capacity(ETI_FRAME_BYTES);
        frame.push(0xFF); // ERR: no error.
        if self.frame_counter % 2 == 0 {
            frame.extend_from_slice(&FSYNC_EVEN);
        } else {
            frame.extend_from_slice(&FSYNC_ODD);
        }
        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(&hcrc.to_be_bytes());
        frame.extend_from_slice(&mst);
        frame.extend_from_slice(&data_crc.to_be_bytes());
        frame.extend_from_slice(&[0u8; 4]); // RFU.
        frame.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // TIST: no timestamp.

        if frame.len() > ETI_FRAME_BYTES {
            log::warn!("ETI frame overflowed {ETI_FRAME_BYTES} bytes ({} built), truncating", frame.len());
            frame.truncate(ETI_FRAME_BYTES);
        } else {
            frame.resize(ETI_FRAME_BYTES, 0x55);
        }

        self.frame_counter = self.frame_counter.wrapping_add(1) % 250;

        let mut out = [0u8; ETI_FRAME_BYTES];
        out.copy_from_slice(&frame);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p10_every_frame_is_exactly_the_fixed_size() {
        let mut generator = EtiGenerator::new();
        let descriptors = vec![SubchannelDescriptor { sub_ch_id: 1, start_cu: 0, size_cu: 4, bit_rate: 8, ..Default::default() }];
        let fic = [0u8; FIC_BYTES_PER_CIF];
        let cif = vec![0i16; 3072 * 18];
        for _ in 0..3 {
            let frame = generator.build_frame(&fic, &cif, &descriptors);
            assert_eq!(frame.len(), ETI_FRAME_BYTES);
            assert_eq!(frame[0], 0xFF);
        }
    }

    #[test]
    fn fsync_alternates_between_frames() {
        let mut generator = EtiGenerator::new();
        let descriptors: Vec<SubchannelDescriptor> = Vec::new();
        let fic = [0u8; FIC_BYTES_PER_CIF];
        let cif = vec![0i16; 3072 * 18];
        let frame0 = generator.build_frame(&fic, &cif, &descriptors);
        let frame1 = generator.build_frame(&fic, &cif, &descriptors);
        assert_eq!(&frame0[1..4], &FSYNC_EVEN);
        assert_eq!(&frame1[1..4], &FSYNC_ODD);
    }
}
