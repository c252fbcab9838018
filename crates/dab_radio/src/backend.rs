//! Per-subchannel deinterleaver/deconvolver/descrambler (spec §4.9), grounded on
//! `original_source/src/backend/backend.cpp` and `backend.h`. One `Backend` is
//! enrolled per active subchannel by [`crate::msc_handler::MscHandler`] and fed one
//! CIF slice at a time, in CIF arrival order (spec §5 "strict FIFO").

use dab_core::energy_dispersal;

use crate::puncture;
use crate::viterbi;

/// Fixed 16-deep bit-reversal interleave permutation (spec §4.9, `backend.cpp`'s
/// module-level `interleaveMap`). Row `i mod 16` written `CIFIdx` frames ago is read
/// back via `MAP[i mod 16]` rows after the write pointer, spreading a burst error
/// of up to 15 consecutive CIFs across the decoded stream.
const INTERLEAVE_MAP: [usize; 16] = [0, 8, 4, 12, 2, 10, 6, 14, 1, 9, 5, 13, 3, 11, 7, 15];

/// Deinterleaver warm-up depth: the first 16 CIFs fill the interleave buffer without
/// producing output (spec P4, "starting no earlier than the 17th CIF").
const WARMUP_CIFS: u32 = 16;

pub struct Backend {
    pub sub_ch_id: u8,
    bit_rate_kbps: u32,
    fragment_size: usize,
    /// 16 rows of `fragment_size` soft bits each (spec §4.9 "16 rows of interleave
    /// buffers"), indexed `[row][position]`.
    interleave_rows: Vec<Vec<i16>>,
    interleaver_index: usize,
    cifs_seen: u32,
    puncture_table: Vec<bool>,
    disperse_vector: Vec<u8>,
}

impl Backend {
    /// `cu_size` is the subchannel's size in CUs (`SubchannelDescriptor::size_cu`);
    /// `bit_rate_kbps` is its derived bit rate (spec §3 `BitRate`).
    pub fn new(sub_ch_id: u8, cu_size: u16, bit_rate_kbps: u32) -> Self {
        let fragment_size = cu_size as usize * 64;
        let num_info_bits = 24 * bit_rate_kbps as usize;
        let mother_len = 4 * (num_info_bits + viterbi::TAIL_BITS);
        let puncture_table = puncture::even_spaced_table(mother_len, fragment_size);
        let disperse_vector = energy_dispersal::generate(num_info_bits);

        Self {
            sub_ch_id,
            bit_rate_kbps,
            fragment_size,
            interleave_rows: vec![vec![0i16; fragment_size]; 16],
            interleaver_index: 0,
            cifs_seen: 0,
            puncture_table,
            disperse_vector,
        }
    }

    pub fn bit_rate_kbps(&self) -> u32 {
        self.bit_rate_kbps
    }

    /// Feeds one CIF's worth of soft bits for this subchannel (`cif_slice.len() ==
    /// fragment_size`). Returns the descrambled hard-bit payload once the
    /// deinterleaver has warmed up, or `None` during the first 16 CIFs.
    pub fn process(&mut self, cif_slice: &[i16]) -> Option<Vec<u8>> {
        assert_eq!(cif_slice.len(), self.fragment_size, "CIF slice size must equal fragmentSize = NumCU*64");

        let idx = self.interleaver_index;
        let mut deinterleaved = vec![0i16; self.fragment_size];
        for (i, out) in deinterleaved.iter_mut().enumerate() {
            let row = (idx + INTERLEAVE_MAP[i % 16]) % 16;
            *out = self.interleave_rows[row][i];
        }
        self.interleave_rows[idx].copy_from_slice(cif_slice);
        self.interleaver_index = (idx + 1) % 16;

        self.cifs_seen += 1;
        if self.cifs_seen <= WARMUP_CIFS {
            return None;
        }

        let mother = puncture::depuncture(&deinterleaved, &self.puncture_table);
        let num_info_bits = 24 * self.bit_rate_kbps as usize;
        let mut hard_bits = viterbi::deconvolve(&mother, num_info_bits);
        for (bit, &prbs) in hard_bits.iter_mut().zip(self.disperse_vector.iter()) {
            *bit ^= prbs;
        }
        Some(hard_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p4_deinterleaver_warms_up_in_exactly_16_cifs() {
        // A tiny subchannel: 4 CU -> fragment_size = 256, bit rate chosen so the
        // mother code (4*(24*bitrate+6)) comfortably exceeds fragment_size.
        let mut backend = Backend::new(1, 4, 8);
        let constant_input = vec![100i16; 256];
        let mut first_output_at = None;
        for cif_idx in 1..=20u32 {
            if let Some(_bits) = backend.process(&constant_input) {
                first_output_at = Some(cif_idx);
                break;
            }
        }
        assert_eq!(first_output_at, Some(17));
    }

    #[test]
    fn process_panics_on_mismatched_fragment_size() {
        let mut backend = Backend::new(1, 4, 8);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| backend.process(&[0i16; 10])));
        assert!(result.is_err());
    }
}
