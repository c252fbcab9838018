//! The DAB/DAB+ protocol stack above OFDM demodulation (spec §4.6-§4.15):
//! FIC/FIB/FIG parsing, MSC handling, per-subchannel backends, frame processors
//! (MP2/MP4/Packet), PAD/MOT, and ETI generation.

pub mod backend;
pub mod bits;
pub mod codecs;
pub mod dab_radio_parameters;
pub mod error;
pub mod eti;
pub mod fib;
pub mod fic;
pub mod firecode;
pub mod frame_processor;
pub mod mot;
pub mod msc_handler;
pub mod pad_handler;
pub mod puncture;
pub mod reed_solomon;
pub mod viterbi;

pub use error::{DecodeError, DecodeResult};
pub use fic::FicDecoder;
pub use msc_handler::MscHandler;
