/// A detected Transmitter Identification Information fingerprint (spec §4.5, §3
/// "TII fingerprint"). Field names match the derived-data shape the original
/// decoder's TII list display consumes (`support/tii_list_display.h`
/// `SDerivedData`: `strength_dB`, `phase_deg`, `isNonEtsiPhase`), minus the
/// transmitter-site lookup (`distance_km`/`corner_deg`), which requires an
/// external site database and is out of this system's scope (spec §1, long-term
/// on-disk service catalogs are a collaborator).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiiFingerprint {
    pub main_id: u8,
    pub sub_id: u8,
    pub strength_db: f32,
    pub phase_deg: f32,
    pub non_etsi_phase: bool,
}
