//! Thorn virtual machine: chunk loader, bytecode interpreter and resource
//! governor.
//!
//! ```no_run
//! use thorn_vm::{Runtime, Value};
//!
//! let bytes = std::fs::read("script.out").unwrap();
//! let mut rt = Runtime::new();
//! rt.set_global("answer", Value::Number(42.0));
//! let exec = rt.do_chunk(&bytes, "=script").unwrap();
//! print!("{}", exec.output);
//! ```

pub mod arith;
pub mod binary_chunk;
pub mod callinfo;
pub mod coerce;
pub mod compare;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod governor;
pub mod vm;

pub use config::RuntimeConfig;
pub use error::{Limit, Location, VmError};
pub use thorn_core::gc::CollectStats;
pub use thorn_core::value::{ScriptEnum, Value};
pub use vm::{Compiler, Execution, Runtime};
