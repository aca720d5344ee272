//! Host glue: per-closure dispatch tables and the user-facing compile,
//! disassemble and eval entry points.

extern crate rho_codegen as codegen;
extern crate rho_pir as pir;
extern crate rho_runtime as runtime;

pub mod api;
pub mod dispatch;

pub use api::{
    body, compile, disassemble, eval, mark_optimize, pir_compile, run_tests, startup, PirBuild,
};
pub use dispatch::{DispatchTable, FunctionVersion, VersionBody};
