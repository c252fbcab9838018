use num::complex::Complex32;

use crate::error::DabResult;
use crate::events::DabEvent;

/// The external IQ source (spec §6 "Inbound samples", §9 narrow collaborator set).
/// Implementations own a device or file handle; `pull` blocks until `n` samples are
/// available, an error occurs, or the source is cancelled.
pub trait SampleSource {
    /// Pulls exactly `n` samples, or fewer at end of stream (an empty result means
    /// end of stream / cancellation, translated by the caller into
    /// [`crate::error::DabError::ReaderStopped`]).
    fn pull(&mut self, n: usize, out: &mut Vec<Complex32>) -> DabResult<usize>;
    fn set_vfo_hz(&mut self, hz: i64);
    fn reset_buffer(&mut self);
    fn is_file_source(&self) -> bool;
}

/// Destination for decoded PCM audio (spec §6 "Outbound audio").
pub trait AudioSink {
    fn new_audio(&mut self, subch_id: u8, samples: &[i16], rate_hz: u32, flags: crate::events::AudioFlags);
}

/// Destination for decoded ancillary data (spec §6 "Outbound data").
pub trait DataSink {
    fn new_data_group(&mut self, subch_id: u8, kind: crate::events::DataGroupKind, bytes: &[u8]);
    fn mot_object(&mut self, transport_id: u16, name: &str, content_type: u16, bytes: &[u8], in_directory: bool);
    fn dynamic_label(&mut self, subch_id: u8, text: &str);
}

/// The control-plane event sink (spec §9: typed events over a single-consumer
/// channel). A blanket impl over `std::sync::mpsc::Sender<DabEvent>` is provided so
/// the common case needs no bespoke wiring.
pub trait ControlEvents {
    fn emit(&mut self, event: DabEvent);
}

impl ControlEvents for std::sync::mpsc::Sender<DabEvent> {
    fn emit(&mut self, event: DabEvent) {
        // A disconnected receiver means the consumer shut down; dropping the event
        // is the correct behavior, there is nothing left to notify.
        let _ = self.send(event);
    }
}

/// Narrow time source, abstracted so the FIB parser's readiness latches
/// (`fast_loaded`/`slow_loaded`, spec §4.7) can be driven by a fake clock in tests.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Default)]
pub struct SystemClock {
    start: std::sync::OnceLock<std::time::Instant>,
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let start = self.start.get_or_init(std::time::Instant::now);
        start.elapsed().as_millis() as u64
    }
}
