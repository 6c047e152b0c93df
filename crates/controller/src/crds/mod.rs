pub mod networkperformance;

pub use networkperformance::*;
