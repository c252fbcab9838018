pub mod fic_decoder;

pub use fic_decoder::FicDecoder;
