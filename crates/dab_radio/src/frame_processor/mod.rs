//! The three frame-processor kinds a [`crate::backend::Backend`]'s descrambled
//! output is handed to, selected per subchannel by its `TransportMechanism`/
//! `ASCTy`/`DSCTy` (spec §4.9 "the backend's output is routed to one of three
//! frame processors"): classic DAB audio ([`mp2`]), DAB+ audio ([`mp4`]), and
//! packet-mode data ([`packet`]).

pub mod mp2;
pub mod mp4;
pub mod packet;

use dab_core::collaborators::{Clock, ControlEvents};

pub use mp2::Mp2FrameProcessor;
pub use mp4::SuperFrameProcessor;
pub use packet::PacketFrameProcessor;

/// A type-erased frame processor, letting [`crate::msc_handler::MscHandler`] hold
/// one homogeneous `Vec` of enrolled subchannels regardless of transport kind.
pub enum FrameProcessor {
    Mp2(Mp2FrameProcessor),
    Mp4(SuperFrameProcessor),
    Packet(PacketFrameProcessor),
}

impl FrameProcessor {
    /// Feeds one CIF's worth of descrambled hard bits for this subchannel. The
    /// concrete processors already know their own `SubChId` from construction;
    /// `sub_ch_id` is accepted here too so a future processor doesn't need to grow
    /// a constructor parameter and its enrollment call site stays uniform.
    pub fn add(&mut self, bits: &[u8], sub_ch_id: u8, events: &mut dyn ControlEvents, clock: &dyn Clock) {
        let _ = sub_ch_id;
        match self {
            FrameProcessor::Mp2(p) => p.add(bits, events, clock),
            FrameProcessor::Mp4(p) => p.add(bits, events, clock),
            FrameProcessor::Packet(p) => p.add(bits, events, clock),
        }
    }
}
