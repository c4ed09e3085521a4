//! Consumer-side streaming: keeps a window of cells around a moving position

pub mod cell_source;
pub mod window_manager;

pub use cell_source::{CellSource, LocalCellSource, RemoteCellSource};
pub use window_manager::{CellEvent, WindowManager, WindowState};
