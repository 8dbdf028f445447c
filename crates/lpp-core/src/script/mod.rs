//! The embedded script-VM boundary: the ABI functions the generated meta
//! script calls (`abi`), the thread-local "currently executing Metaprogram"
//! lookup the bare `CFunction` callbacks use to recover Rust state
//! (`context`), and VM lifecycle (`vm`).

pub mod abi;
pub(crate) mod context;
pub mod vm;
