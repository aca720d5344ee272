//! The native builtin table.
//!
//! Each entry pairs the runtime entry point with the fixed signature the
//! lowerer emits calls against.

use crate::backend::{Signature, ValTy};
use runtime::BuiltinFn;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinId {
    Binop,
    BinopEnv,
    Ldvar,
    LdvarCacheMiss,
    Stvar,
    Ldfun,
    Call,
    CallBuiltin,
    ForcePromise,
    CreatePromise,
    CreateEnvironment,
    ConsNrTagged,
    ConsNrTaggedMissing,
    NewInt,
    NewReal,
    NewLgl,
    NewIntFromReal,
    NewRealFromInt,
    NewLglFromReal,
    AsLogical,
    AsTest,
    Length,
    Error,
    Deopt,
}

#[derive(Copy, Clone)]
pub struct NativeBuiltin {
    pub id: BuiltinId,
    pub name: &'static str,
    pub fun: BuiltinFn,
    pub arity: u8,
    pub signature: Signature,
}

use ValTy::{Int, Ptr, Real};

macro_rules! builtin {
    ($const:ident, $id:ident, $name:literal, $fun:path, [$($param:expr),*], $ret:expr) => {
        pub const $const: NativeBuiltin = NativeBuiltin {
            id: BuiltinId::$id,
            name: $name,
            fun: $fun,
            arity: {
                const PARAMS: &[ValTy] = &[$($param),*];
                PARAMS.len() as u8
            },
            signature: Signature::new(&[$($param),*], $ret),
        };
    };
}

pub struct NativeBuiltins;

impl NativeBuiltins {
    builtin!(BINOP, Binop, "binop", runtime::bi_binop, [Ptr, Ptr, Int], Some(Ptr));
    builtin!(
        BINOP_ENV,
        BinopEnv,
        "binopEnv",
        runtime::bi_binop_env,
        [Ptr, Ptr, Ptr, Int, Int],
        Some(Ptr)
    );
    builtin!(LDVAR, Ldvar, "ldvar", runtime::bi_ldvar, [Ptr, Ptr], Some(Ptr));
    builtin!(
        LDVAR_CACHE_MISS,
        LdvarCacheMiss,
        "ldvarCacheMiss",
        runtime::bi_ldvar_cache_miss,
        [Ptr, Ptr, Ptr],
        Some(Ptr)
    );
    builtin!(STVAR, Stvar, "stvar", runtime::bi_stvar, [Ptr, Ptr, Ptr], None);
    builtin!(LDFUN, Ldfun, "ldfun", runtime::bi_ldfun, [Ptr, Ptr], Some(Ptr));
    builtin!(
        CALL,
        Call,
        "call",
        runtime::bi_call,
        [Ptr, Int, Ptr, Ptr, Int, Ptr],
        Some(Ptr)
    );
    builtin!(
        CALL_BUILTIN,
        CallBuiltin,
        "callBuiltin",
        runtime::bi_call_builtin,
        [Ptr, Int, Ptr, Ptr, Int, Ptr],
        Some(Ptr)
    );
    builtin!(
        FORCE_PROMISE,
        ForcePromise,
        "forcePromise",
        runtime::bi_force_promise,
        [Ptr],
        Some(Ptr)
    );
    builtin!(
        CREATE_PROMISE,
        CreatePromise,
        "createPromise",
        runtime::bi_create_promise,
        [Ptr, Int, Ptr, Ptr],
        Some(Ptr)
    );
    builtin!(
        CREATE_ENVIRONMENT,
        CreateEnvironment,
        "createEnvironment",
        runtime::bi_create_environment,
        [Ptr, Ptr, Int],
        Some(Ptr)
    );
    builtin!(
        CONS_NR_TAGGED,
        ConsNrTagged,
        "consNrTagged",
        runtime::bi_cons_nr_tagged,
        [Ptr, Ptr, Ptr],
        Some(Ptr)
    );
    builtin!(
        CONS_NR_TAGGED_MISSING,
        ConsNrTaggedMissing,
        "consNrTaggedMissing",
        runtime::bi_cons_nr_tagged_missing,
        [Ptr, Ptr],
        Some(Ptr)
    );
    builtin!(NEW_INT, NewInt, "newInt", runtime::bi_new_int, [Int], Some(Ptr));
    builtin!(NEW_REAL, NewReal, "newReal", runtime::bi_new_real, [Real], Some(Ptr));
    builtin!(NEW_LGL, NewLgl, "newLgl", runtime::bi_new_lgl, [Int], Some(Ptr));
    builtin!(
        NEW_INT_FROM_REAL,
        NewIntFromReal,
        "newIntFromReal",
        runtime::bi_new_int_from_real,
        [Real],
        Some(Ptr)
    );
    builtin!(
        NEW_REAL_FROM_INT,
        NewRealFromInt,
        "newRealFromInt",
        runtime::bi_new_real_from_int,
        [Int],
        Some(Ptr)
    );
    builtin!(
        NEW_LGL_FROM_REAL,
        NewLglFromReal,
        "newLglFromReal",
        runtime::bi_new_lgl_from_real,
        [Real],
        Some(Ptr)
    );
    builtin!(
        AS_LOGICAL,
        AsLogical,
        "asLogical",
        runtime::bi_as_logical,
        [Ptr],
        Some(Ptr)
    );
    builtin!(AS_TEST, AsTest, "asTest", runtime::bi_as_test, [Ptr], Some(Int));
    builtin!(LENGTH, Length, "length", runtime::bi_length, [Ptr], Some(Int));
    builtin!(ERROR, Error, "error", runtime::bi_error, [], None);
    builtin!(
        DEOPT,
        Deopt,
        "deopt",
        runtime::bi_deopt,
        [Ptr, Ptr, Ptr, Ptr],
        Some(Ptr)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_matches_signature() {
        for b in [
            NativeBuiltins::BINOP,
            NativeBuiltins::BINOP_ENV,
            NativeBuiltins::LDVAR,
            NativeBuiltins::LDVAR_CACHE_MISS,
            NativeBuiltins::STVAR,
            NativeBuiltins::LDFUN,
            NativeBuiltins::CALL,
            NativeBuiltins::CALL_BUILTIN,
            NativeBuiltins::FORCE_PROMISE,
            NativeBuiltins::CREATE_PROMISE,
            NativeBuiltins::CREATE_ENVIRONMENT,
            NativeBuiltins::CONS_NR_TAGGED,
            NativeBuiltins::CONS_NR_TAGGED_MISSING,
            NativeBuiltins::NEW_INT,
            NativeBuiltins::NEW_REAL,
            NativeBuiltins::NEW_LGL,
            NativeBuiltins::NEW_INT_FROM_REAL,
            NativeBuiltins::NEW_REAL_FROM_INT,
            NativeBuiltins::NEW_LGL_FROM_REAL,
            NativeBuiltins::AS_LOGICAL,
            NativeBuiltins::AS_TEST,
            NativeBuiltins::LENGTH,
            NativeBuiltins::ERROR,
            NativeBuiltins::DEOPT,
        ] {
            assert_eq!(b.arity as usize, b.signature.params.len(), "{}", b.name);
        }
    }
}
