//! Output container formats

pub mod ciso;

pub use ciso::CisoWriter;
