//! Rate-1/4, constraint-length-7 convolutional code shared by the FIC decoder and
//! every subchannel [`crate::backend::Backend`] (spec clause 11.1/11.2).
//!
//! No `protTables`/`viterbi` source file made it into the retrieved C++ pack (the
//! original project treats the encoder/decoder as a third-party dependency), so this
//! is built directly from the standard's description: a zero-tail-terminated
//! non-recursive convolutional code with four generator polynomials, decoded with a
//! textbook soft-decision Viterbi algorithm (add-compare-select over 64 states, full
//! traceback). See `DESIGN.md` for the generator polynomial sourcing note.

/// Constraint length K = 7 (six memory stages plus the current input bit).
pub const CONSTRAINT_LENGTH: u32 = 7;
pub const NUM_STATES: usize = 1 << (CONSTRAINT_LENGTH - 1);
pub const TAIL_BITS: usize = (CONSTRAINT_LENGTH - 1) as usize;
const STATE_MASK: u32 = (NUM_STATES as u32) - 1;

/// The four DAB mother-code generator polynomials, octal, MSB aligned with the
/// current input bit (bit 6 of the 7-bit encoder register).
pub const GENERATORS: [u32; 4] = [0o133, 0o171, 0o145, 0o133];

fn output_bits(reg: u32) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (o, g) in out.iter_mut().zip(GENERATORS.iter()) {
        *o = (reg & g).count_ones() as u8 & 0x1;
    }
    out
}

/// Encodes `info_bits` (each element a logical 0/1) with six appended zero tail
/// bits, producing `4 * (info_bits.len() + TAIL_BITS)` mother-code output bits.
/// Used by the BER re-encode check in the FIC decoder and by property tests (P3).
pub fn encode_terminated(info_bits: &[u8]) -> Vec<u8> {
    let mut state: u32 = 0;
    let mut out = Vec::with_capacity((info_bits.len() + TAIL_BITS) * 4);
    for &bit in info_bits.iter().chain(std::iter::repeat(&0u8).take(TAIL_BITS)) {
        let reg = (state << 1) | (bit as u32 & 0x1);
        out.extend_from_slice(&output_bits(reg));
        state = reg & STATE_MASK;
    }
    out
}

/// Soft-decision Viterbi decode of a zero-tail-terminated rate-1/4 codeword.
///
/// `soft` holds `4 * (num_info_bits + TAIL_BITS)` signed soft values (positive =
/// bit likely 1); a punctured position is represented as a `0` (erasure), which
/// contributes zero branch metric regardless of the expected bit, exactly as
/// inserting a neutral value at puncture positions before deconvolution. Returns
/// the `num_info_bits` decoded hard bits (tail bits are decoded but discarded).
pub fn deconvolve(soft: &[i16], num_info_bits: usize) -> Vec<u8> {
    let total_steps = num_info_bits + TAIL_BITS;
    assert_eq!(soft.len(), 4 * total_steps, "soft input length must match 4*(info+tail) bits");

    const NEG_INF: i32 = i32::MIN / 4;
    let mut path_metrics = [NEG_INF; NUM_STATES];
    path_metrics[0] = 0;
    let mut traceback: Vec<[u8; NUM_STATES]> = Vec::with_capacity(total_steps);

    for t in 0..total_steps {
        let sb = &soft[4 * t..4 * t + 4];
        let mut new_metrics = [NEG_INF; NUM_STATES];
        let mut step_tb = [0u8; NUM_STATES];

        for state in 0..NUM_STATES as u32 {
            let pm = path_metrics[state as usize];
            if pm <= NEG_INF {
                continue;
            }
            for bit in 0..2u32 {
                let reg = (state << 1) | bit;
                let new_state = (reg & STATE_MASK) as usize;
                let outs = output_bits(reg);
                let metric: i32 = (0..4)
                    .map(|j| {
                        let soft_val = sb[j] as i32;
                        if outs[j] == 1 { soft_val } else { -soft_val }
                    })
                    .sum();
                let candidate = pm + metric;
                if candidate > new_metrics[new_state] {
                    new_metrics[new_state] = candidate;
                    step_tb[new_state] = ((bit << 6) | state) as u8;
                }
            }
        }

        path_metrics = new_metrics;
        traceback.push(step_tb);
    }

    // Zero-tail termination: the encoder always ends in state 0.
    let mut state: usize = 0;
    let mut decoded = vec![0u8; total_steps];
    for t in (0..total_steps).rev() {
        let entry = traceback[t][state];
        decoded[t] = (entry >> 6) & 0x1;
        state = (entry & 0x3F) as usize;
    }
    decoded.truncate(num_info_bits);
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_soft(bits: &[u8]) -> Vec<i16> {
        bits.iter().map(|&b| if b == 1 { 100 } else { -100 }).collect()
    }

    #[test]
    fn p3_round_trip_without_puncturing() {
        let info: Vec<u8> = (0..32).map(|i| (i * 7 % 3 == 0) as u8).collect();
        let mother = encode_terminated(&info);
        let soft = to_soft(&mother);
        let decoded = deconvolve(&soft, info.len());
        assert_eq!(decoded, info);
    }

    #[test]
    fn survives_a_handful_of_flipped_soft_bits() {
        let info: Vec<u8> = (0..64).map(|i| (i * 13 % 5 < 2) as u8).collect();
        let mother = encode_terminated(&info);
        let mut soft = to_soft(&mother);
        for i in (0..soft.len()).step_by(37) {
            soft[i] = -soft[i] / 4; // weak, noisy disagreement, not a hard flip
        }
        let decoded = deconvolve(&soft, info.len());
        let mismatches = decoded.iter().zip(info.iter()).filter(|(a, b)| a != b).count();
        assert!(mismatches <= 2, "expected the decoder to correct sparse soft errors, got {mismatches} mismatches");
    }
}
