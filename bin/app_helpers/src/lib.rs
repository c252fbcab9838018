//! Process-lifecycle helpers shared by the `ofdm_demod` binary: thread handoff
//! synchronisation ([`barrier`]).

pub mod barrier;
