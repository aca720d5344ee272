//! The host runtime the lowered code runs against: boxed values with tagged
//! headers, a garbage-collected node heap, the interpreter node stack, the
//! constant pool, and the native builtin entry points.

mod builtins;
mod cell;
mod ctx;
mod error;
mod heap;
mod stack;
mod value;

pub use builtins::{raise, BuiltinFn};
pub use builtins::{
    bi_as_logical, bi_as_test, bi_binop, bi_binop_env, bi_call, bi_call_builtin,
    bi_cons_nr_tagged, bi_cons_nr_tagged_missing, bi_create_environment, bi_create_promise,
    bi_deopt, bi_error, bi_force_promise, bi_ldfun, bi_ldvar, bi_ldvar_cache_miss, bi_length,
    bi_new_int, bi_new_int_from_real, bi_new_lgl, bi_new_lgl_from_real, bi_new_real,
    bi_new_real_from_int, bi_stvar, BinopKind,
};
pub use cell::GlobalCell;
pub use ctx::{
    CallHook, ConstantPool, Ctx, DeoptEvent, DeoptFrame, DeoptHandler, DeoptMetadata,
    HostBuiltin, OptimizeHook, PromiseEval, Singletons,
};
pub use error::{Error, Unwind};
pub use heap::Heap;
pub use stack::{NodeStack, StackCell, STACK_CELL_SIZE, STACK_CELL_VALUE_OFS};
pub use value::{
    na_real, Sexp, SexpType, CAR_OFS, NAMED_BIT, NA_INTEGER, NA_LOGICAL, OBJECT_BIT,
    PR_VALUE_OFS, SXPINFO_OFS, STD_VEC_DATA_OFS, TYPE_MASK,
};
