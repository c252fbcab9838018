/// The four DAB transmission modes defined in ETSI EN 300 401.
///
/// Only Mode I parameters are exercised by the rest of this workspace (spec-mandated
/// sample rate of 2.048 MHz and Mode I framing), but the parameter tables in
/// [`crate::dab_parameters`] are kept complete since the discriminant is a public,
/// serializable part of the CLI surface (`--mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DabTransmissionMode {
    I,
    II,
    III,
    IV,
}
