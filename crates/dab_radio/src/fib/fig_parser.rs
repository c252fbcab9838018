use dab_core::bit_reader::BitReader;
use dab_core::collaborators::{Clock, ControlEvents};
use dab_core::events::DabEvent;

use super::configuration::{Configuration, TransportMechanism};
use super::label_table::LabelTable;

const FAST_LOADED_QUIESCENCE_MS: u64 = 3_000;
const SLOW_LOADED_QUIESCENCE_MS: u64 = 10_000;

/// Maintains the "current"/"next" [`Configuration`] pair and the [`LabelTable`]
/// (spec §4.7, Open Question #5: the label table is the single source of truth,
/// there is no parallel per-service label cache).
pub struct FibParser {
    current: Configuration,
    next: Configuration,
    labels: LabelTable,
    last_change_flags: Option<u8>,
    last_fast_change_ms: u64,
    last_slow_change_ms: u64,
    fast_loaded: bool,
    slow_loaded: bool,
    started: bool,
}

impl Default for FibParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FibParser {
    pub fn new() -> Self {
        Self {
            current: Configuration::default(),
            next: Configuration::default(),
            labels: LabelTable::default(),
            last_change_flags: None,
            last_fast_change_ms: 0,
            last_slow_change_ms: 0,
            fast_loaded: false,
            slow_loaded: false,
            started: false,
        }
    }

    pub fn current(&self) -> &Configuration {
        &self.current
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Parses one FIB's FIGs until the `0xFF` terminator (spec §3 "FIB" entity).
    /// `fib_bytes` is the full 32-byte FIB including its trailing 2-byte CRC; the
    /// caller has already verified the CRC.
    pub fn process_fib(&mut self, fib_bytes: &[u8], _fic_idx: usize, events: &mut dyn ControlEvents, clock: &dyn Clock) {
        if !self.started {
            self.started = true;
            self.last_fast_change_ms = clock.now_ms();
            self.last_slow_change_ms = clock.now_ms();
        }
        let payload = &fib_bytes[..fib_bytes.len() - 2];
        let mut reader = BitReader::new(payload);

        while reader.bits_remaining() >= 8 {
            if reader.peek_bits(8) == 0xFF {
                break;
            }
            let fig_type = reader.read_bits(3) as u8;
            let length_bytes = reader.read_bits(5) as usize;
            if reader.bits_remaining() < length_bytes * 8 {
                break;
            }
            let fig_start = reader.bit_pos();
            match fig_type {
                0 => self.parse_fig0(&mut reader, length_bytes, events),
                1 => self.parse_fig1(&mut reader, length_bytes),
                _ => reader.skip_bits(length_bytes * 8),
            }
            // Defensive resync: a sub-parser that mis-measured a field must not
            // desynchronize the rest of the FIB.
            let consumed = reader.bit_pos() - fig_start;
            if consumed != length_bytes * 8 {
                reader.skip_bits((length_bytes * 8).saturating_sub(consumed));
            }
        }

        self.check_readiness(events, clock);
    }

    fn check_readiness(&mut self, events: &mut dyn ControlEvents, clock: &dyn Clock) {
        let now = clock.now_ms();
        if !self.fast_loaded && now.saturating_sub(self.last_fast_change_ms) >= FAST_LOADED_QUIESCENCE_MS {
            self.fast_loaded = true;
            events.emit(DabEvent::FibLoaded { stage: dab_core::events::FibLoadStage::Fast });
        }
        if !self.slow_loaded && now.saturating_sub(self.last_slow_change_ms) >= SLOW_LOADED_QUIESCENCE_MS {
            self.slow_loaded = true;
            events.emit(DabEvent::FibLoaded { stage: dab_core::events::FibLoadStage::Slow });
        }
    }

    fn parse_fig0(&mut self, reader: &mut BitReader, length_bytes: usize, events: &mut dyn ControlEvents) {
        let _c_or_n = reader.read_bool();
        let pd = reader.read_bool();
        let _extension_flag = reader.read_bool();
        let ext = reader.read_bits(5) as u8;
        let remaining_bits = length_bytes * 8 - 8;
        let body_start = reader.bit_pos();

        match ext {
            0 => self.parse_fig0_0(reader, events),
            1 => self.parse_fig0_1(reader, remaining_bits),
            2 => self.parse_fig0_2(reader, remaining_bits, pd),
            3 => self.parse_fig0_3(reader, remaining_bits),
            8 => self.parse_fig0_8(reader, remaining_bits, pd),
            21 => self.parse_fig0_21(reader, remaining_bits),
            _ => reader.skip_bits(remaining_bits),
        }

        let consumed = reader.bit_pos() - body_start;
        if consumed < remaining_bits {
            reader.skip_bits(remaining_bits - consumed);
        }
    }

    /// FIG 0/0 "Ensemble information": drives the CIF counter and reconfiguration
    /// signaling (spec §4.7: ChangeFlags 3->0 swaps current/next).
    fn parse_fig0_0(&mut self, reader: &mut BitReader, events: &mut dyn ControlEvents) {
        let _eid = reader.read_bits(16) as u16;
        let change_flags = reader.read_bits(2) as u8;
        let _alarm = reader.read_bool();
        let cif_hi = reader.read_bits(5) as u16;
        let cif_lo = reader.read_bits(8) as u16;
        self.next.cif_counter = ((cif_hi << 8) | cif_lo) as u8;

        if self.last_change_flags == Some(3) && change_flags == 0 {
            std::mem::swap(&mut self.current, &mut self.next);
            self.next = self.current.clone();
            events.emit(DabEvent::ConfigurationChanged);
        }
        self.last_change_flags = Some(change_flags);
    }

    /// FIG 0/1 "Subchannel organization" (spec §3 "Subchannel Descriptor").
    fn parse_fig0_1(&mut self, reader: &mut BitReader, remaining_bits: usize) {
        let mut consumed = 0usize;
        while consumed + 16 <= remaining_bits {
            let sub_ch_id = reader.read_bits(6) as u8;
            let start_cu = reader.read_bits(10) as u16;
            let long_form = reader.read_bool();
            let mut bits = 17;
            let sub = self.next.subch_by_id_mut(sub_ch_id);
            sub.start_cu = start_cu;
            sub.short_form = !long_form;
            if !long_form {
                let _table_switch = reader.read_bool();
                let table_idx = reader.read_bits(6) as u8;
                sub.table_idx = Some(table_idx);
                sub.option = None;
                sub.prot_level = None;
                bits += 7;
            } else {
                let option = reader.read_bits(2) as u8;
                let prot_level = reader.read_bits(2) as u8;
                let size_cu = reader.read_bits(10) as u16;
                sub.option = Some(option);
                sub.prot_level = Some(prot_level);
                sub.size_cu = size_cu;
                sub.table_idx = None;
                bits += 14;
            }
            sub.derive_bit_rate();
            let pad = bits % 8;
            if pad != 0 {
                reader.skip_bits(8 - pad);
                bits += 8 - pad;
            }
            consumed += bits;
        }
    }

    /// FIG 0/2 "Service organization" (spec §3 "Service Component"), restricted to
    /// the common stream-audio/packet-data transport mechanisms; see `DESIGN.md`
    /// for the simplification relative to the full EN 300 401 table (FIDC/unusual
    /// CA layouts are skipped by length, not individually decoded).
    fn parse_fig0_2(&mut self, reader: &mut BitReader, remaining_bits: usize, pd: bool) {
        let mut consumed = 0usize;
        let sid_bits = if pd { 32 } else { 16 };
        while consumed + sid_bits + 8 <= remaining_bits {
            let sid = reader.read_bits(sid_bits.min(32)) as u32;
            let _ca_id = reader.read_bits(3);
            let num_comp = reader.read_bits(4) as u8;
            let mut bits = sid_bits + 7;
            self.next.service_by_sid_mut(sid);
            for comp_idx in 0..num_comp {
                if consumed + bits + 16 > remaining_bits {
                    break;
                }
                let tmid = reader.read_bits(2) as u8;
                let (tmid_kind, subch_or_scid, ascty_or_dscty) = match tmid {
                    0 | 1 => {
                        let subch_id = reader.read_bits(6) as u16;
                        let ascty = reader.read_bits(6) as u8;
                        let kind = if tmid == 0 { TransportMechanism::StreamAudio } else { TransportMechanism::StreamData };
                        (kind, subch_id, ascty)
                    }
                    2 => {
                        let scid = reader.read_bits(12) as u16;
                        let _rfa = reader.read_bits(0);
                        (TransportMechanism::PacketData, scid, 0)
                    }
                    _ => {
                        let scid = reader.read_bits(12) as u16;
                        (TransportMechanism::Fidc, scid, 0)
                    }
                };
                let ps = reader.read_bool();
                let ca_flag = reader.read_bool();
                self.next.components.push(super::configuration::ServiceComponent {
                    sid,
                    scids: comp_idx,
                    tmid: tmid_kind,
                    subch_or_scid,
                    ascty_or_dscty: ascty_or_dscty,
                    primary: ps,
                    ca_applied: ca_flag,
                });
                bits += 16;
            }
            consumed += bits;
        }
    }

    /// FIG 0/3 "Service component in packet mode" (spec §3 "Packet-Mode Description").
    fn parse_fig0_3(&mut self, reader: &mut BitReader, remaining_bits: usize) {
        let mut consumed = 0usize;
        while consumed + 48 <= remaining_bits {
            let scid = reader.read_bits(12) as u16;
            let _rfa1 = reader.read_bits(4);
            let _rfu = reader.read_bool();
            let dg_flag = reader.read_bool();
            let _rfa2 = reader.read_bits(2);
            let dsc_ty = reader.read_bits(6) as u8;
            let sub_ch_id = reader.read_bits(6) as u8;
            let packet_address = reader.read_bits(10) as u16;
            let has_ca = reader.read_bool();
            if has_ca {
                reader.skip_bits(16);
                consumed += 16;
            }
            self.next.packet_descriptions.push(super::configuration::PacketModeDescription {
                scid,
                dg_flag,
                dsc_ty,
                sub_ch_id,
                packet_address,
            });
            consumed += 48;
        }
    }

    /// FIG 0/8 "Service component global definition" (spec §3 "Global Component ID"):
    /// links `(SId, SCIdS)` to a subchannel or service component id. Parsed for its
    /// presence/consistency but the crate's own subchannel/packet lookups are
    /// already keyed directly, so this is recorded only as a log for now.
    fn parse_fig0_8(&mut self, reader: &mut BitReader, remaining_bits: usize, pd: bool) {
        let sid_bits = if pd { 32 } else { 16 };
        let mut consumed = 0usize;
        while consumed + sid_bits + 8 <= remaining_bits {
            let _sid = reader.read_bits(sid_bits.min(32));
            let _rfa = reader.read_bits(4);
            let scids = reader.read_bits(4) as u8;
            let ls_flag = reader.read_bool();
            let mut bits = sid_bits + 9;
            if ls_flag {
                let _scid = reader.read_bits(12);
                let _rfa2 = reader.read_bits(3);
                bits += 15;
            } else {
                let _subch_id = reader.read_bits(6);
                let _rfa2 = reader.read_bits(1);
                bits += 7;
            }
            let _ = scids;
            consumed += bits;
        }
    }

    /// FIG 0/21 "Frequency information": populates `fmFrequency` one-shot, only
    /// when unset, per Open Question #1.
    fn parse_fig0_21(&mut self, reader: &mut BitReader, remaining_bits: usize) {
        let mut consumed = 0usize;
        while consumed + 24 <= remaining_bits {
            let sid_or_eid = reader.read_bits(16) as u32;
            let _rfa = reader.read_bits(3);
            let _length_fi = reader.read_bits(5);
            let _control_field = reader.read_bits(6);
            let rand_m = reader.read_bits(5) as u8;
            let _cont = reader.read_bits(1);
            let mut bits = 32;
            if rand_m == 0x08 && consumed + 40 <= remaining_bits {
                let freq_raw = reader.read_bits(16) as u32;
                bits += 16;
                let service = self.next.service_by_sid_mut(sid_or_eid);
                if service.fm_frequency.is_none() {
                    service.fm_frequency = Some(freq_raw * 100);
                }
            }
            consumed += bits;
        }
    }

    fn parse_fig1(&mut self, reader: &mut BitReader, length_bytes: usize) {
        let charset = reader.read_bits(4) as u8;
        let _oe = reader.read_bool();
        let ext = reader.read_bits(3) as u8;
        let remaining_bits = length_bytes * 8 - 8;
        let body_start = reader.bit_pos();

        if ext <= 5 && remaining_bits >= 16 + 16 * 8 + 16 {
            let id_bits: usize = match ext {
                0 | 1 => 16, // ensemble / programme service label
                3 | 4 => 16, // service component label variants
                _ => 32,
            };
            if remaining_bits >= id_bits + 16 * 8 + 16 {
                let id = reader.read_bits(id_bits.min(32)) as u32;
                let mut raw = [0u8; 16];
                for b in raw.iter_mut() {
                    *b = reader.read_bits(8) as u8;
                }
                let char_flag_field = reader.read_bits(16) as u16;
                self.labels.set(id, raw, char_flag_field, charset);
            }
        }

        let consumed = reader.bit_pos() - body_start;
        if consumed < remaining_bits {
            reader.skip_bits(remaining_bits - consumed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dab_core::crc;
    use std::sync::mpsc;

    fn build_fib_with(body: &[u8]) -> Vec<u8> {
        let mut fib = vec![0u8; 30];
        fib[..body.len()].copy_from_slice(body);
        fib[body.len()..].fill(0xFF);
        let crc = crc::calc_crc(&fib);
        fib.extend_from_slice(&crc.to_be_bytes());
        fib
    }

    #[test]
    fn fig0_0_triggers_swap_on_change_flags_3_to_0() {
        let mut parser = FibParser::new();
        let clock = dab_core::collaborators::SystemClock::default();
        let (tx, rx) = mpsc::channel::<DabEvent>();
        let mut sender = tx;

        // FIG0/0: header (type=0,len=6) + CN/OE/PD/ext(0) + EId(16)+ChangeFlags(3)+Alarm(0)+CIFhi(5)+CIFlo(8)
        let fig_header = 0b000_00110u8; // type 0, length 6 bytes
        let ext_byte = 0b000_00000u8; // C/N=0, OE=0, PD=0, ext=0
        let body = [fig_header, ext_byte, 0x12, 0x34, 0b11_0_00000, 0x00];
        let fib = build_fib_with(&body);
        parser.process_fib(&fib, 0, &mut sender, &clock);
        assert_eq!(parser.last_change_flags, Some(3));

        let body2 = [fig_header, ext_byte, 0x12, 0x34, 0b00_0_00000, 0x00];
        let fib2 = build_fib_with(&body2);
        parser.process_fib(&fib2, 0, &mut sender, &clock);
        assert_eq!(parser.last_change_flags, Some(0));
        assert!(matches!(rx.try_recv(), Ok(DabEvent::ConfigurationChanged)));
    }

    #[test]
    fn p7_repeated_fig_is_idempotent() {
        let mut parser = FibParser::new();
        let clock = dab_core::collaborators::SystemClock::default();
        let (tx, _rx) = mpsc::channel::<DabEvent>();
        let mut sender = tx;

        // FIG0/1: SubChId=3, StartCU=5, short form, table idx 2.
        let fig_header = 0b000_00011u8; // type 0, length 3
        let ext_byte = 0b000_00001u8; // ext=1
        let subch_bits: u32 = (3u32 << 10) | 5; // SubChId(6) StartCU(10) = 16 bits
        let b0 = (subch_bits >> 8) as u8;
        let b1 = subch_bits as u8;
        let b2 = 0b0_1_000010u8; // long_form=0, table_switch=1, table_idx=2
        let body = [fig_header, ext_byte, b0, b1, b2];
        let fib = build_fib_with(&body);

        parser.process_fib(&fib, 0, &mut sender, &clock);
        let first = parser.next.subch_by_id(3).cloned();
        parser.process_fib(&fib, 0, &mut sender, &clock);
        let second = parser.next.subch_by_id(3).cloned();
        assert_eq!(first, second);
    }
}
