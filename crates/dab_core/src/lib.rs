pub mod dab_transmission_modes;
pub mod dab_parameters;
pub mod bit_reader;
pub mod bit_writer;
pub mod crc;
pub mod energy_dispersal;
pub mod error;
pub mod events;
pub mod tii;
pub mod collaborators;
