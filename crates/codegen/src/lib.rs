//! Native lowering of PIR code units.
//!
//! This layer translates PIR instructions into low-level, runtime-aware
//! native instructions through a pluggable code-generator facade. The facade
//! can translate to a backend IR or emit machine code on the fly; the
//! in-tree [`baseline`] backend records a linear native IR and executes it
//! directly against the runtime.
//!
//! # Runtime integration
//! The lowering is necessarily aware of runtime details:
//! * A predefined table of native builtins covers everything that touches
//!   the host heap or environments: variable loads and stores, promise
//!   creation and forcing, boxing, calls, errors, and deoptimization. Their
//!   addresses and signatures come from [`builtins`].
//! * Boxed values are accessed through the header offsets the runtime
//!   publishes (the tagged header word, scalar payloads, binding-cell cars,
//!   promise value slots).
//! * Before anything that may allocate, a GC safepoint spills every live
//!   boxed value into local node-stack slots reserved at function entry, so
//!   the collector sees them as roots.
//! * Every compiled function has the same six-parameter signature:
//!   `(code, ctx, args, env, closure, caller_code) -> sexp`.
//!
//! Lowering either produces an executable function or fails cleanly on the
//! first construct it does not support; the caller then falls back to the
//! bytecode interpreter.

extern crate rho_pir as pir;
extern crate rho_runtime as runtime;

pub mod backend;
pub mod baseline;
pub mod builtins;
pub mod lower;
pub mod representation;

pub use baseline::CompiledCode;
pub use lower::try_compile;
pub use representation::Representation;
