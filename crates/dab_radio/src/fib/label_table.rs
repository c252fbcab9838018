//! Decoded FIG 1/x labels (spec §4.7, Open Question #5): the single table every
//! ensemble/service/service-component label is written into, keyed by the FIG 1
//! identifier field (EId, SId, or SCId depending on the FIG 1 extension). Grounded
//! on the character-set handling in `original_source/src/backend/data/pad-handler.cpp`
//! (`toQStringUsingCharset`), which the label path and the dynamic-label path share.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct LabelEntry {
    raw: [u8; 16],
    char_flag_field: u16,
    charset: u8,
}

/// Decodes a label's raw 16-byte field using the EN 300 401 Annex C character set
/// table. Only the charsets actually seen in the field are distinguished; anything
/// else falls back to the EBU Latin (single-byte) approximation also used for
/// short-form PAD text, since a full Annex C table was not part of the retrieved
/// source pack (see `DESIGN.md`).
pub fn decode_charset(raw: &[u8], charset: u8) -> String {
    match charset {
        // UTF-8.
        15 => String::from_utf8_lossy(raw).trim_end_matches('\0').to_string(),
        // UCS-2, big-endian code units packed two bytes at a time.
        6 => {
            let units: Vec<u16> = raw.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
            char::decode_utf16(units)
                .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect::<String>()
                .trim_end_matches('\0')
                .to_string()
        }
        // EBU Latin / unspecified: treat as Latin-1, which is a correct decode for
        // the ASCII-range text real ensembles almost always use.
        _ => raw.iter().take_while(|&&b| b != 0).map(|&b| b as char).collect(),
    }
}

/// Masks a decoded label down to its `CharFlag`-selected abbreviated form
/// (EN 300 401 clause 5.2.2.3): bit `i` set (MSB-first over the 16 characters)
/// means character `i` belongs in the short label.
fn abbreviate(full: &str, char_flag_field: u16) -> String {
    full.chars()
        .enumerate()
        .filter(|&(i, _)| i < 16 && (char_flag_field & (1 << (15 - i))) != 0)
        .map(|(_, c)| c)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    entries: HashMap<u32, LabelEntry>,
}

impl LabelTable {
    pub fn set(&mut self, id: u32, raw: [u8; 16], char_flag_field: u16, charset: u8) {
        self.entries.insert(id, LabelEntry { raw, char_flag_field, charset });
    }

    /// The full 16-character label, trailing padding trimmed.
    pub fn label(&self, id: u32) -> Option<String> {
        self.entries.get(&id).map(|e| decode_charset(&e.raw, e.charset))
    }

    /// The abbreviated (`CharFlag`-masked) label, for displays limited to 8 chars.
    pub fn short_label(&self, id: u32) -> Option<String> {
        self.entries.get(&id).map(|e| abbreviate(&decode_charset(&e.raw, e.charset), e.char_flag_field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_label_round_trips() {
        let mut table = LabelTable::default();
        let mut raw = [0u8; 16];
        raw[..5].copy_from_slice(b"Radio");
        table.set(42, raw, 0xFF00, 15);
        assert_eq!(table.label(42).as_deref(), Some("Radio"));
    }

    #[test]
    fn char_flag_field_abbreviates_the_label() {
        let mut table = LabelTable::default();
        let mut raw = [0u8; 16];
        raw[..8].copy_from_slice(b"LongName");
        // Keep only the first 4 characters in the short form.
        table.set(1, raw, 0b1111_0000_0000_0000, 15);
        assert_eq!(table.short_label(1).as_deref(), Some("Long"));
    }
}
