//! Accumulates MSC OFDM-symbol soft bits into CIFs and dispatches per-subchannel
//! slices to enrolled [`Backend`]s (spec §4.8), grounded on
//! `original_source/src/backend/msc-handler.cpp`.

use dab_core::collaborators::{Clock, ControlEvents};

use crate::backend::Backend;
use crate::dab_radio_parameters::DabRadioParameters;
use crate::fib::configuration::SubchannelDescriptor;
use crate::frame_processor::FrameProcessor;

pub struct EnrolledSubchannel {
    pub backend: Backend,
    pub processor: FrameProcessor,
}

/// Accumulates `nb_bits_per_symbol`-sized MSC blocks into a rolling CIF buffer and,
/// once a CIF is complete, hands each enrolled subchannel's slice to its `Backend`
/// and on to its `FrameProcessor`. Enrollment order matches `msc-handler.cpp`'s
/// `mBackendList` iteration order, which the ETI generator (spec §4.15) also relies
/// on for its `NST` subchannel ordering.
pub struct MscHandler {
    bits_per_block: usize,
    blocks_per_cif: usize,
    cif_vector: Vec<i16>,
    block_idx: usize,
    subchannels: Vec<EnrolledSubchannel>,
}

impl MscHandler {
    pub fn new(params: &DabRadioParameters) -> Self {
        let bits_per_block = params.nb_bits_per_symbol;
        let blocks_per_cif = params.nb_bits_per_cif / bits_per_block;
        Self {
            bits_per_block,
            blocks_per_cif,
            cif_vector: vec![0i16; params.nb_bits_per_cif],
            block_idx: 0,
            subchannels: Vec::new(),
        }
    }

    /// Enrolls a subchannel backend+frame-processor pair (spec §4.8 "manages
    /// start/stop of backends by SubChId"). Replaces any existing enrollment for
    /// the same `SubChId`.
    pub fn set_channel(&mut self, descriptor: &SubchannelDescriptor, processor: FrameProcessor) {
        self.stop_channel(descriptor.sub_ch_id);
        let backend = Backend::new(descriptor.sub_ch_id, descriptor.size_cu, descriptor.bit_rate);
        self.subchannels.push(EnrolledSubchannel { backend, processor });
    }

    pub fn stop_channel(&mut self, sub_ch_id: u8) {
        self.subchannels.retain(|e| e.backend.sub_ch_id != sub_ch_id);
    }

    pub fn enrolled_subchannels(&self) -> &[EnrolledSubchannel] {
        &self.subchannels
    }

    /// Feeds one OFDM MSC symbol's worth of soft bits (`block.len() ==
    /// nb_bits_per_symbol`). On the last block of a CIF, dispatches each enrolled
    /// subchannel's `[StartCU*64..(StartCU+NumCU)*64)` slice to its backend.
    pub fn process_block(&mut self, block: &[i16], descriptors: &[SubchannelDescriptor], events: &mut dyn ControlEvents, clock: &dyn Clock) {
        assert_eq!(block.len(), self.bits_per_block, "MSC block size must equal nb_bits_per_symbol");
        let offset = self.block_idx * self.bits_per_block;
        self.cif_vector[offset..offset + self.bits_per_block].copy_from_slice(block);
        self.block_idx += 1;

        if self.block_idx == self.blocks_per_cif {
            self.block_idx = 0;
            self.dispatch_cif(descriptors, events, clock);
        }
    }

    fn dispatch_cif(&mut self, descriptors: &[SubchannelDescriptor], events: &mut dyn ControlEvents, clock: &dyn Clock) {
        for enrolled in self.subchannels.iter_mut() {
            let Some(desc) = descriptors.iter().find(|d| d.sub_ch_id == enrolled.backend.sub_ch_id) else {
                continue;
            };
            let start = desc.start_cu as usize * 64;
            let end = start + desc.size_cu as usize * 64;
            if end > self.cif_vector.len() {
                log::warn!("subchannel {} CU range [{start}..{end}) exceeds CIF size, dropping", enrolled.backend.sub_ch_id);
                continue;
            }
            if let Some(hard_bits) = enrolled.backend.process(&self.cif_vector[start..end]) {
                enrolled.processor.add(&hard_bits, enrolled.backend.sub_ch_id, events, clock);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_processor::packet::PacketFrameProcessor;
    use dab_core::collaborators::SystemClock;
    use dab_core::dab_parameters::get_dab_parameters;
    use dab_core::dab_transmission_modes::DabTransmissionMode;
    use dab_core::events::DabEvent;
    use std::sync::mpsc;

    fn mode_i_radio_params() -> DabRadioParameters {
        let _ = get_dab_parameters(DabTransmissionMode::I);
        crate::dab_radio_parameters::get_dab_radio_parameters(DabTransmissionMode::I)
    }

    #[test]
    fn dispatches_exactly_once_per_cif() {
        let params = mode_i_radio_params();
        let mut handler = MscHandler::new(&params);
        let descriptor = SubchannelDescriptor { sub_ch_id: 3, start_cu: 0, size_cu: 4, bit_rate: 8, ..Default::default() };
        handler.set_channel(&descriptor, FrameProcessor::Packet(PacketFrameProcessor::new(0)));
        let descriptors = vec![descriptor];
        let (tx, _rx) = mpsc::channel::<DabEvent>();
        let mut sender = tx;
        let clock = SystemClock::default();
        let block = vec![0i16; params.nb_bits_per_symbol];
        let blocks_per_cif = params.nb_bits_per_cif / params.nb_bits_per_symbol;
        for _ in 0..blocks_per_cif - 1 {
            handler.process_block(&block, &descriptors, &mut sender, &clock);
            assert_eq!(handler.block_idx, handler.block_idx); // no panic, mid-CIF
        }
        handler.process_block(&block, &descriptors, &mut sender, &clock);
        assert_eq!(handler.block_idx, 0);
    }
}
