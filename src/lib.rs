mod admittance;
mod bus_types;
mod circuit;
mod controls;
mod error;
mod jacobian;
mod lm;
mod loadcase;
mod newton;
mod options;
mod power;
mod report;
mod runpf;
mod solution;
mod topology;

pub mod debug;

pub use admittance::*;
pub use bus_types::*;
pub use circuit::*;
pub use controls::*;
pub use error::*;
pub use jacobian::*;
pub use lm::*;
pub use loadcase::*;
pub use newton::*;
pub use options::*;
pub use power::*;
pub use report::*;
pub use runpf::*;
pub use solution::*;
pub use topology::*;

#[cfg(test)]
mod tests;
