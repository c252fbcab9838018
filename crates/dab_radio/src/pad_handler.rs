//! Extracts X-PAD fields from MP2/MP4 access units (spec §4.13), grounded on
//! `original_source/src/backend/data/pad-handler.h`/`.cpp`. Both frame processors
//! share one `PadHandler` entry point, `process_pad`, mirroring
//! `PadHandler::process_PAD` being fed from both `Mp2Processor::_process_pad_data`
//! and the MP4 super-frame's leading PAD field.
//!
//! X-PAD data arrives **reversed**: callers pass the buffer and the index of its
//! last logical element (`iLast`/`last` in the original), and fields are read
//! walking *downward* from that index.

use dab_core::collaborators::ControlEvents;
use dab_core::crc;
use dab_core::events::DabEvent;

use crate::fib::label_table::decode_charset;
use crate::mot::{self, MotRegistry};

/// `ContInd` length table (EN 300 401 clause 7.4.2.2, Table 22), indexed by the
/// top 3 bits of the contents-indicator byte.
const CI_LENGTH_TABLE: [usize; 8] = [4, 6, 8, 12, 16, 24, 32, 48];

fn at(buffer: &[u8], idx: i64) -> u8 {
    if idx < 0 {
        return 0;
    }
    buffer.get(idx as usize).copied().unwrap_or(0)
}

pub struct PadHandler {
    sub_ch_id: u8,
    dynamic_label_text: Vec<u8>,
    char_set: u8,
    last_conv_char_set: Option<u8>,

    // Short-PAD dynamic label segment state.
    first_segment: bool,
    last_segment: bool,
    segment_number_short: u8,
    still_to_go: i32,
    short_pad_data: Vec<u8>,

    // Variable-PAD dynamic label segment state.
    segment_no: i32,
    more_xpad: bool,
    is_last_segment: bool,
    remain_data_length: i32,

    // Variable-PAD MSC (MOT) element state.
    x_pad_length: i32,
    last_app_type: u8,
    msc_group_element: bool,
    data_group_length: usize,
    msc_data_group_buffer: Vec<u8>,

    mot_registry: MotRegistry,
}

impl PadHandler {
    pub fn new(sub_ch_id: u8) -> Self {
        Self {
            sub_ch_id,
            dynamic_label_text: Vec::new(),
            char_set: 0,
            last_conv_char_set: None,
            first_segment: false,
            last_segment: false,
            segment_number_short: 0,
            still_to_go: 0,
            short_pad_data: Vec::new(),
            segment_no: -1,
            more_xpad: false,
            is_last_segment: false,
            remain_data_length: 0,
            x_pad_length: 0,
            last_app_type: 0,
            msc_group_element: false,
            data_group_length: 0,
            msc_data_group_buffer: Vec::new(),
            mot_registry: MotRegistry::new(false),
        }
    }

    /// `buffer[..=last]` is the reversed X-PAD field; `l1`/`l0` are the two F-PAD
    /// bytes (`process_PAD`'s `iL1`/`iL0`).
    pub fn process_pad(&mut self, buffer: &[u8], last: i64, l1: u8, l0: u8, events: &mut dyn ControlEvents) {
        let fpad_type = (l1 >> 6) & 0x3;
        if fpad_type != 0 {
            return;
        }

        let x_pad_ind = (l1 >> 4) & 0x3;
        let ci_flag = (l0 & 0x2) != 0;

        match x_pad_ind {
            1 => self.handle_short_pad(buffer, last, ci_flag, events),
            2 => self.handle_variable_pad(buffer, last, ci_flag, events),
            _ => {}
        }
    }

    fn emit_label_if_ready(&mut self, events: &mut dyn ControlEvents) {
        if !self.dynamic_label_text.is_empty() {
            let text = decode_charset(&self.dynamic_label_text, self.char_set);
            events.emit(DabEvent::DynamicLabel { subch_id: self.sub_ch_id, text });
        }
        self.dynamic_label_text.clear();
        self.reset_charset_change();
    }

    fn reset_charset_change(&mut self) {
        self.last_conv_char_set = None;
    }

    fn check_charset_change(&mut self) {
        match self.last_conv_char_set {
            None => self.last_conv_char_set = Some(self.char_set),
            Some(prev) if prev != self.char_set => {
                log::warn!("PAD charset changed from {prev} to {} mid-segment", self.char_set);
            }
            _ => {}
        }
    }

    /// `_handle_short_PAD`: short PAD is 4-byte frames with a segmented 3-byte
    /// payload (spec §4.13 "Short PAD").
    fn handle_short_pad(&mut self, buffer: &[u8], last: i64, ci_flag: bool, events: &mut dyn ControlEvents) {
        if ci_flag {
            let ci_val = at(buffer, last);
            let ci_appl_type = ci_val & 0x1F;
            self.first_segment = (at(buffer, last - 1) & 0x40) != 0;
            self.last_segment = (at(buffer, last - 1) & 0x20) != 0;
            self.char_set = at(buffer, last - 2) & 0x0F;

            if self.first_segment {
                self.dynamic_label_text.clear();
                self.reset_charset_change();
            }

            match ci_appl_type {
                0 => {}
                2 => {
                    if self.first_segment && !self.last_segment {
                        self.segment_number_short = at(buffer, last - 2) >> 4;
                        self.emit_label_if_ready(events);
                    }
                    self.still_to_go = (at(buffer, last - 1) & 0x0F) as i32;
                    self.short_pad_data.clear();
                    self.short_pad_data.push(at(buffer, last - 3));
                }
                3 => {
                    let mut i = 0i64;
                    while i < 3 && self.still_to_go > 0 {
                        self.still_to_go -= 1;
                        self.short_pad_data.push(at(buffer, last - 1 - i));
                        i += 1;
                    }
                    if self.still_to_go <= 0 && self.short_pad_data.len() > 1 {
                        self.dynamic_label_text.extend_from_slice(&self.short_pad_data);
                        self.check_charset_change();
                        self.short_pad_data.clear();
                    }
                }
                _ => {}
            }
        } else {
            let mut i = 0i64;
            while i < 4 && self.still_to_go > 0 {
                self.short_pad_data.push(at(buffer, last - i));
                self.still_to_go -= 1;
                i += 1;
            }
            if self.still_to_go <= 0 && !self.short_pad_data.is_empty() {
                self.dynamic_label_text.extend_from_slice(&self.short_pad_data);
                self.check_charset_change();
                self.short_pad_data.clear();
                if !self.first_segment && self.last_segment {
                    self.emit_label_if_ready(events);
                }
            }
        }
    }

    /// `_handle_variable_PAD`: F-PAD type 00, X-PAD Ind 10 (spec §4.13's "possibly
    /// chunked in short or variable PAD").
    fn handle_variable_pad(&mut self, buffer: &[u8], last: i64, ci_flag: bool, events: &mut dyn ControlEvents) {
        let mut base = last;

        if !ci_flag {
            if self.x_pad_length > 0 {
                if last < self.x_pad_length - 1 {
                    return;
                }
                let data: Vec<u8> = (0..self.x_pad_length).map(|j| at(buffer, last - j as i64)).collect();
                match self.last_app_type {
                    2 | 3 => self.dynamic_label(&data, 3, events),
                    12 | 13 => {
                        if self.msc_group_element {
                            self.add_msc_element(&data, events);
                        }
                    }
                    _ => {}
                }
            }
            return;
        }

        // Local contents indicators (up to 4, appType 0 terminates early).
        let mut ci_table: Vec<(u8, usize)> = Vec::with_capacity(4);
        for _ in 0..4 {
            let val = at(buffer, base);
            base -= 1;
            let appl_type = val & 0x1F;
            let length = CI_LENGTH_TABLE[(val >> 5) as usize];
            if appl_type == 0 {
                break;
            }
            ci_table.push((appl_type, length));
        }

        self.x_pad_length = ci_table.iter().map(|&(_, len)| len as i32).sum();
        self.x_pad_length += if ci_table.len() == 4 { 4 } else { ci_table.len() as i32 + 1 };

        for (appl_type, length) in ci_table {
            let data: Vec<u8> = (0..length).map(|j| at(buffer, base - j as i64)).collect();

            match appl_type {
                1 => {
                    if length == 4 && crc::check_crc_bytes_len(&data, 2) {
                        self.data_group_length = (((data[0] & 0x3F) as usize) << 8) | data[1] as usize;
                    } else {
                        log::warn!("dataGroupLengthField fails CRC check, length={length}");
                    }
                }
                2 | 3 => self.dynamic_label(&data, appl_type, events),
                12 => self.new_msc_element(&data, events),
                13 => self.add_msc_element(&data, events),
                _ => return,
            }

            self.last_app_type = appl_type;
            base -= length as i64;
            if base < -1 {
                log::warn!("variable PAD base underflow, length={length}");
                return;
            }
        }
    }

    /// `_dynamic_label`: dynamic label segment state machine for the variable-PAD
    /// path (appType 2 start, 3 continuation).
    fn dynamic_label(&mut self, data: &[u8], appl_type: u8, events: &mut dyn ControlEvents) {
        if appl_type == 2 {
            if data.len() < 2 {
                return;
            }
            let prefix: u16 = ((data[0] as u16) << 8) | data[1] as u16;
            let field_1 = (prefix >> 8) & 0x0F;
            let c_flag = (prefix >> 12) & 0x01;
            let first = (prefix >> 14) & 0x01;
            let last = (prefix >> 13) & 0x01;

            if first != 0 {
                self.segment_no = 1;
                self.char_set = ((prefix >> 4) & 0x0F) as u8;
                self.dynamic_label_text.clear();
                self.reset_charset_change();
            } else {
                let test = ((prefix >> 4) & 0x07) as i32 + 1;
                if test != self.segment_no + 1 {
                    self.segment_no = -1;
                    return;
                }
                self.segment_no = test;
            }

            if c_flag != 0 {
                let command = (prefix >> 8) & 0x0F;
                if command == 1 {
                    self.dynamic_label_text.clear();
                    self.reset_charset_change();
                    self.segment_no = -1;
                }
                return;
            }

            let total_data_length = field_1 as i32 + 1;
            let available = data.len() as i32 - 2;
            let data_length;
            if available < total_data_length {
                data_length = available.max(0);
                self.more_xpad = true;
            } else {
                data_length = total_data_length;
                self.more_xpad = false;
            }

            if data_length > 0 {
                self.dynamic_label_text.extend_from_slice(&data[2..2 + data_length as usize]);
            }
            self.check_charset_change();

            if last != 0 {
                if !self.more_xpad {
                    self.emit_label_if_ready(events);
                    self.segment_no = -1;
                } else {
                    self.is_last_segment = true;
                }
            } else {
                self.is_last_segment = false;
            }
            self.remain_data_length = total_data_length - data_length;
        } else if appl_type == 3 && self.more_xpad {
            let data_length;
            if self.remain_data_length > data.len() as i32 {
                data_length = data.len() as i32;
                self.remain_data_length -= data.len() as i32;
            } else {
                data_length = self.remain_data_length;
                self.more_xpad = false;
            }
            if data_length > 0 {
                self.dynamic_label_text.extend_from_slice(&data[..data_length as usize]);
            }
            self.check_charset_change();

            if !self.more_xpad && self.is_last_segment {
                self.emit_label_if_ready(events);
            }
        }
    }

    /// `_new_MSC_element`: start of an MOT X-PAD data group.
    fn new_msc_element(&mut self, data: &[u8], events: &mut dyn ControlEvents) {
        if data.len() >= self.data_group_length {
            self.msc_data_group_buffer.clear();
            self.build_msc_segment(data, events);
            self.msc_group_element = false;
            return;
        }
        self.msc_group_element = true;
        self.msc_data_group_buffer.clear();
        self.msc_data_group_buffer.extend_from_slice(data);
    }

    /// `_add_MSC_element`: continuation of an MOT X-PAD data group.
    fn add_msc_element(&mut self, data: &[u8], events: &mut dyn ControlEvents) {
        if self.msc_data_group_buffer.is_empty() {
            return;
        }
        self.msc_data_group_buffer.extend_from_slice(data);
        if self.msc_data_group_buffer.len() >= self.data_group_length {
            let buffer = std::mem::take(&mut self.msc_data_group_buffer);
            self.build_msc_segment(&buffer, events);
        }
    }

    /// `_build_MSC_segment`: parses the MSC Data Group header and dispatches to
    /// the shared MOT reassembler.
    fn build_msc_segment(&mut self, data: &[u8], events: &mut dyn ControlEvents) {
        mot::dispatch_msc_data_group(data, self.data_group_length, &mut self.mot_registry, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn short_pad_with_no_ci_flag_ignored_until_still_to_go_set() {
        let mut handler = PadHandler::new(0);
        let (tx, _rx) = mpsc::channel::<DabEvent>();
        let mut sender = tx;
        // No CI flag, still_to_go is 0 so nothing is collected; must not panic.
        handler.process_pad(&[0, 1, 2, 3], 3, 0b0000_0000, 0b0000_0000, &mut sender);
    }

    #[test]
    fn unsupported_fpad_type_is_ignored() {
        let mut handler = PadHandler::new(0);
        let (tx, _rx) = mpsc::channel::<DabEvent>();
        let mut sender = tx;
        handler.process_pad(&[0, 1, 2, 3], 3, 0b1000_0000, 0, &mut sender);
        assert!(handler.dynamic_label_text.is_empty());
    }
}
