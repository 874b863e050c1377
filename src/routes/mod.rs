pub mod geo;
pub mod ws;
