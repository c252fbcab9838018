/// Replaces the Qt signal/slot cross-thread dispatch used throughout the original
/// decoder (every `emit signal_...` call site) with a single closed tagged union
/// delivered over a plain channel. Emitters hold the sender half (typically
/// `std::sync::mpsc::Sender<DabEvent>`); the control plane/consumer holds the
/// receiver half. See spec §9 "Qt signal/slot cross-thread dispatch".
#[derive(Debug, Clone)]
pub enum DabEvent {
    /// A `Backend`'s frame processor decoded a new block of PCM audio.
    NewAudio { subch_id: u8, samples: Vec<i16>, rate_hz: u32, flags: AudioFlags },
    /// A data handler produced a new data-group payload (IP/TDC/Journaline).
    NewDataGroup { subch_id: u8, kind: DataGroupKind, bytes: Vec<u8> },
    /// The MOT reassembler completed an object.
    MotObject { transport_id: u16, name: String, content_type: u16, bytes: Vec<u8>, in_directory: bool },
    /// A dynamic label segment was fully reassembled and decoded to UTF-8.
    DynamicLabel { subch_id: u8, text: String },
    /// FIB readiness latch fired (spec §4.7 "fast_loaded"/"slow_loaded").
    FibLoaded { stage: FibLoadStage },
    /// Time synchronizer saw 8 consecutive NULL-detect failures.
    NoSignal,
    /// TII detector produced a fresh set of transmitter fingerprints.
    Tii { detections: Vec<crate::tii::TiiFingerprint> },
    /// FIB parser learned of a new service (first time a SId/label pair resolves).
    ServiceAdded { sid: u32, label: String },
    /// FIG 0/0 ChangeFlags transitioned 3 -> 0: "current"/"next" configuration swapped.
    ConfigurationChanged,
    /// The sample source signalled end of stream / cancellation.
    ReaderStopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioFlags {
    pub sbr: bool,
    pub ps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataGroupKind {
    Mot,
    Ip,
    Journaline,
    Tdc,
    Epg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FibLoadStage {
    /// ~3s of FIG quiescence on fast (audio-relevant) tables.
    Fast,
    /// ~10s of FIG quiescence on slow (label/EPG) tables.
    Slow,
}
