//! Built-in native modules.

mod io;

pub use io::io_module;
