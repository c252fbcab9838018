//! The live multiplex model the FIG parser writes into and the rest of the crate
//! reads from (spec §3 "Entities", §4.7). Grounded on the `FibConfigFig1`-style
//! single-source-of-truth design SPEC_FULL.md Open Question #5 settles on: one
//! `Configuration` holds every FIG 0/x and FIG 1/x derived record, with "current"
//! and "next" snapshots swapped atomically by [`super::fig_parser::FigParser`] on a
//! FIG 0/0 `ChangeFlags` 3-to-0 transition (spec §4.7, P8).

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubchannelDescriptor {
    pub sub_ch_id: u8,
    pub start_cu: u16,
    pub size_cu: u16,
    pub short_form: bool,
    /// UEP table index (short form only).
    pub table_idx: Option<u8>,
    /// EEP option (0 or 1) and protection level (long form only).
    pub option: Option<u8>,
    pub prot_level: Option<u8>,
    pub bit_rate: u32,
}

impl SubchannelDescriptor {
    /// Derives `SubChannelSize`/`ProtLevel`/`BitRate` per spec §3: UEP short form
    /// is a 64-entry table lookup that fills in all three fields (the short-form
    /// FIG only transmits a `TableIndex`); EEP long form derives `BitRate` from
    /// the transmitted `SubChSize`/`ProtLevel` as `SubChSize * m / k[ProtLevel]`
    /// (`m` = 8 or 32 by option), matching
    /// `original_source/src/decoder/fib-decoder-fig0.cpp`'s
    /// `fig0s1.BitRate = fig0s1.SubChannelSize / table[fig0s1.ProtectionLevel] * m`.
    pub fn derive_bit_rate(&mut self) {
        if self.short_form {
            let row = uep_table_row(self.table_idx.unwrap_or(0));
            self.size_cu = row.cu_size;
            self.prot_level = Some(row.prot_level);
            self.bit_rate = row.bit_rate;
        } else {
            let option = self.option.unwrap_or(0);
            let prot_level = self.prot_level.unwrap_or(0);
            let (k, m): (u32, u32) = match option {
                0 => (EEP_OPTION_0_K[prot_level as usize % 4], 8),
                _ => (EEP_OPTION_1_K[prot_level as usize % 4], 32),
            };
            self.bit_rate = self.size_cu as u32 * m / k;
        }
    }
}

/// Divisors for EEP option A/B protection levels 1-4 (spec §3's `k[ProtLevel]`).
const EEP_OPTION_0_K: [u32; 4] = [12, 8, 6, 4];
const EEP_OPTION_1_K: [u32; 4] = [27, 21, 18, 15];

/// One row of the 64-entry UEP `TableIndex` lookup (EN 300 401 Table 9):
/// sub-channel size in CUs, bit rate in kbit/s, and 0-indexed protection level
/// (matching this file's 0-indexed `prot_level` convention, i.e. "level 3" in
/// prose is `prot_level == 2`).
struct UepTableRow {
    cu_size: u16,
    bit_rate: u32,
    prot_level: u8,
}

/// The 16 standard DAB audio sub-channel bit rates (kbit/s) UEP coding spans.
const UEP_BIT_RATES_KBPS: [u32; 16] = [32, 48, 56, 64, 80, 96, 112, 128, 140, 160, 192, 224, 256, 280, 320, 384];

/// The literal EN 300 401 Table 9 constants (`cProtLevelTable`/`SProtLevel` in
/// `original_source/src/decoder/fib-decoder-fig0.cpp`) are only referenced
/// there, never defined anywhere in the retrieved source pack. The standard
/// documents UEP's four protection levels as running the same average-code-rate
/// family as EEP option A (clause 11.3.1), so this reconstructs the 64-entry
/// table as the 16 standard sub-channel bit rates above crossed with the same
/// `EEP_OPTION_0_K` divisors already used for EEP, inverting the EEP formula
/// (`cu_size = bit_rate * k / 8`) to get each row's sub-channel size — a
/// standard-grounded reconstruction, not a literal transcription (see
/// `DESIGN.md`), and not the flat linear ramp this replaces.
fn uep_table_row(table_idx: u8) -> UepTableRow {
    let idx = table_idx as usize % (UEP_BIT_RATES_KBPS.len() * EEP_OPTION_0_K.len());
    let rate_idx = idx / EEP_OPTION_0_K.len();
    let level_idx = idx % EEP_OPTION_0_K.len();
    let bit_rate = UEP_BIT_RATES_KBPS[rate_idx];
    let k = EEP_OPTION_0_K[level_idx];
    UepTableRow { cu_size: (bit_rate * k / 8) as u16, bit_rate, prot_level: level_idx as u8 }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceComponent {
    pub sid: u32,
    pub scids: u8,
    pub tmid: TransportMechanism,
    /// Either a subchannel id (stream modes) or a service component id (packet mode).
    pub subch_or_scid: u16,
    pub ascty_or_dscty: u8,
    pub primary: bool,
    pub ca_applied: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportMechanism {
    #[default]
    StreamAudio,
    StreamData,
    PacketData,
    Fidc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Service {
    pub sid: u32,
    pub label: Option<String>,
    pub programme_type: Option<u8>,
    /// FIG 0/21 `fmFrequency` — one-shot fill only (Open Question #1).
    pub fm_frequency: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketModeDescription {
    pub scid: u16,
    pub dg_flag: bool,
    pub dsc_ty: u8,
    pub sub_ch_id: u8,
    pub packet_address: u16,
}

#[derive(Debug, Clone, Default)]
pub struct Configuration {
    pub cif_counter: u8,
    pub subchannels: Vec<SubchannelDescriptor>,
    pub services: Vec<Service>,
    pub components: Vec<ServiceComponent>,
    pub packet_descriptions: Vec<PacketModeDescription>,
}

impl Configuration {
    pub fn subch_by_id(&self, sub_ch_id: u8) -> Option<&SubchannelDescriptor> {
        self.subchannels.iter().find(|s| s.sub_ch_id == sub_ch_id)
    }

    pub fn subch_by_id_mut(&mut self, sub_ch_id: u8) -> &mut SubchannelDescriptor {
        if let Some(idx) = self.subchannels.iter().position(|s| s.sub_ch_id == sub_ch_id) {
            &mut self.subchannels[idx]
        } else {
            self.subchannels.push(SubchannelDescriptor { sub_ch_id, ..Default::default() });
            self.subchannels.last_mut().unwrap()
        }
    }

    pub fn service_by_sid(&self, sid: u32) -> Option<&Service> {
        self.services.iter().find(|s| s.sid == sid)
    }

    pub fn service_by_sid_mut(&mut self, sid: u32) -> &mut Service {
        if let Some(idx) = self.services.iter().position(|s| s.sid == sid) {
            &mut self.services[idx]
        } else {
            self.services.push(Service { sid, ..Default::default() });
            self.services.last_mut().unwrap()
        }
    }

    pub fn basic_svc_by_sid(&self, sid: u32) -> Option<&ServiceComponent> {
        self.components.iter().find(|c| c.sid == sid && c.primary)
    }

    pub fn basic_svc_by_sid_tmid(&self, sid: u32, tmid: TransportMechanism) -> Option<&ServiceComponent> {
        self.components.iter().find(|c| c.sid == sid && c.tmid == tmid)
    }

    pub fn pkt_svc_by_scid(&self, scid: u16) -> Option<&PacketModeDescription> {
        self.packet_descriptions.iter().find(|p| p.scid == scid)
    }

    pub fn label_by_sid(&self, sid: u32) -> Option<&str> {
        self.service_by_sid(sid).and_then(|s| s.label.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eep_bit_rate_matches_known_128kbps_profile() {
        // Option 0-A, protection level 3 (k=6), SubChSize=96 CU -> 128 kbit/s
        // (EN 300 401 Table 7's canonical 128 kbit/s / level-3A profile).
        let mut sub = SubchannelDescriptor { short_form: false, option: Some(0), prot_level: Some(2), size_cu: 96, ..Default::default() };
        sub.derive_bit_rate();
        assert_eq!(sub.bit_rate, 128);
    }

    #[test]
    fn subch_by_id_mut_creates_on_first_touch() {
        let mut config = Configuration::default();
        config.subch_by_id_mut(5).start_cu = 10;
        assert_eq!(config.subch_by_id(5).unwrap().start_cu, 10);
    }
}
