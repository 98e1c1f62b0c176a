pub mod conversions;
pub mod display;
pub mod position;
