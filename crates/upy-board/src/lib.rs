//! The board session façade (§4.6) and inspector (§4.7): an interactive
//! raw-REPL session over any byte channel, plus the handful of queries
//! used to learn a board's architecture, bytecode format, interpreter
//! version, and library path.

mod inspector;
mod quote;
mod session;

pub use inspector::{architecture, interpreter_version, library_path, mpy_format};
pub use quote::py_repr;
pub use session::{BoardChannel, Error, RawReply, Session};
