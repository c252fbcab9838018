//! DAB puncturing vectors PI-1..PI-24 (EN 300 401 clause 11.2, Table 14) plus the
//! puncture-table construction used by the FIC decoder and by UEP/EEP subchannel
//! deconvolution.
//!
//! The literal per-bit PI_n patterns live in a third-party `protTables`-style table
//! in the original project that was not part of the retrieved source pack (confirmed:
//! no file under `original_source/` defines them). Rather than fabricate a 24x32
//! bit table from memory and present it as verbatim standard text, each PI_n is
//! generated from its rate (`kept_n = n + 8` out of 32, the documented range for the
//! DAB mother code's puncturing family) using the standard even-spacing puncturing
//! construction also used for rate-compatible punctured codes elsewhere in FEC
//! practice: position `i` is kept iff `floor(i * kept / 32) != floor((i-1) * kept / 32)`.
//! See `DESIGN.md` for the caveat this is a reconstruction, not a transcription.

/// Returns the 32-bit puncturing pattern for `PI_n` (`n` in `1..=24`), `true` meaning
/// "this mother-code bit is transmitted".
pub fn pi_pattern(n: u32) -> [bool; 32] {
    assert!((1..=24).contains(&n), "PI index must be in 1..=24, got {n}");
    let kept = (n + 8) as usize;
    even_spaced_pattern(kept, 32)
}

fn even_spaced_pattern(kept: usize, period: usize) -> [bool; 32] {
    assert!(period == 32);
    let mut pattern = [false; 32];
    let mut prev = 0usize;
    for i in 0..period {
        let cur = (i + 1) * kept / period;
        pattern[i] = cur != prev;
        prev = cur;
    }
    pattern
}

/// Generalization of [`even_spaced_pattern`] to an arbitrary mother-code length,
/// used by `Backend`'s EEP/UEP deconvolution where `total` varies with the
/// subchannel's protection profile instead of being fixed at 32 (spec §4.9). Same
/// even-spacing construction, just not restricted to a 32-bit period; see the
/// module-level caveat above — this is a reconstruction, not a transcription of a
/// literal per-bit puncturing table.
pub fn even_spaced_table(total: usize, kept: usize) -> Vec<bool> {
    assert!(kept <= total, "cannot keep more bits ({kept}) than the mother code has ({total})");
    let mut pattern = vec![false; total];
    let mut prev = 0usize;
    for i in 0..total {
        let cur = (i + 1) * kept / total;
        pattern[i] = cur != prev;
        prev = cur;
    }
    pattern
}

/// Builds the full-length boolean puncture table used by the FIC decoder: 21 blocks
/// of 128 mother bits punctured per `PI_16`, 3 blocks of 128 punctured per `PI_15`,
/// then a final 24-bit tail punctured per the first 24 entries of `PI_8` — this
/// structure (not just the table indices) is read directly off
/// `original_source/src/decoder/fic-decoder.cpp`'s `FicDecoder` constructor, which
/// builds `mPunctureTable` the same way: `get_PCodes(16-1)`, `get_PCodes(15-1)`,
/// then `get_PCodes(8-1)` truncated to 24 positions for the tail.
pub fn fic_puncture_table() -> Vec<bool> {
    let pi16 = pi_pattern(16);
    let pi15 = pi_pattern(15);
    let pi8 = pi_pattern(8);

    let mut table = Vec::with_capacity(21 * 128 + 3 * 128 + 24);
    for _ in 0..21 {
        for k in 0..32 * 4 {
            table.push(pi16[k % 32]);
        }
    }
    for _ in 0..3 {
        for k in 0..32 * 4 {
            table.push(pi15[k % 32]);
        }
    }
    for entry in pi8.iter().take(24) {
        table.push(*entry);
    }
    table
}

/// Number of mother-code bits selected ("kept") by a puncture table, i.e. the
/// expected length of the pre-depuncture soft-bit stream.
pub fn kept_count(table: &[bool]) -> usize {
    table.iter().filter(|&&k| k).count()
}

/// Depunctures `received` (the transmitted soft bits) into a full-length
/// mother-code soft vector, inserting a neutral `0` (erasure) at every punctured
/// position.
pub fn depuncture(received: &[i16], table: &[bool]) -> Vec<i16> {
    assert_eq!(received.len(), kept_count(table));
    let mut out = vec![0i16; table.len()];
    let mut idx = 0;
    for (i, &keep) in table.iter().enumerate() {
        if keep {
            out[i] = received[idx];
            idx += 1;
        }
    }
    out
}

/// Inverse of [`depuncture`]: selects the transmitted positions out of a full
/// mother-code bit vector. Used by the ETI generator's re-derivation path and by
/// round-trip tests.
pub fn puncture(mother: &[u8], table: &[bool]) -> Vec<u8> {
    assert_eq!(mother.len(), table.len());
    mother.iter().zip(table.iter()).filter(|(_, &keep)| keep).map(|(&b, _)| b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fic_puncture_table_has_the_right_shapes() {
        let table = fic_puncture_table();
        assert_eq!(table.len(), 3072 + 24);
        assert_eq!(kept_count(&table), 2304);
    }

    #[test]
    fn depuncture_then_puncture_round_trips() {
        let table = fic_puncture_table();
        let received: Vec<i16> = (0..kept_count(&table) as i16).collect();
        let mother = depuncture(&received, &table);
        let recovered: Vec<u8> = mother.iter().map(|&v| (v != 0) as u8).collect();
        let re_punctured = puncture(&recovered, &table);
        assert_eq!(re_punctured.len(), received.len());
    }

    #[test]
    fn even_spaced_table_keeps_the_requested_count_at_arbitrary_length() {
        let table = even_spaced_table(288, 96);
        assert_eq!(table.len(), 288);
        assert_eq!(kept_count(&table), 96);
    }

    #[test]
    fn pattern_keeps_the_requested_count() {
        for n in 1..=24 {
            let pattern = pi_pattern(n);
            assert_eq!(pattern.iter().filter(|&&b| b).count(), (n + 8) as usize);
        }
    }
}
