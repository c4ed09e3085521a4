//! Cell host: the bounded, concurrently accessed cache of resident cells

pub mod cell_host;

pub use cell_host::{CellHost, CellKey, ConsumerId};
