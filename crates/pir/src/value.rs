//! SSA values: instruction results and the shared sentinel singletons.

use crate::{
    code::{Code, InstrId},
    typ::{NativeType, PirType, RType},
};

/// Process-wide sentinel values. They are never allocated per compilation
/// and are always compared by identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Singleton {
    True,
    False,
    NaLogical,
    Nil,
    MissingArg,
    UnboundValue,
    /// Placeholder environment argument on instructions whose environment
    /// was proven unnecessary.
    ElidedEnv,
    GlobalEnv,
    TombstoneClosure,
    TombstoneFrameState,
    TombstoneContext,
}

impl Singleton {
    pub fn typ(self) -> PirType {
        match self {
            Singleton::True | Singleton::False => PirType::simple_scalar_logical().not_na_or_nan(),
            Singleton::NaLogical => PirType::simple_scalar_logical(),
            Singleton::Nil => RType::Nil.into(),
            Singleton::MissingArg => RType::Missing.into(),
            Singleton::UnboundValue => PirType::any(),
            Singleton::ElidedEnv | Singleton::GlobalEnv => RType::Env.into(),
            Singleton::TombstoneClosure => RType::Closure.into(),
            Singleton::TombstoneFrameState => NativeType::FrameState.into(),
            Singleton::TombstoneContext => NativeType::Context.into(),
        }
    }
}

/// A use of an SSA value: either the result of an instruction owned by the
/// enclosing `Code`, or one of the shared singletons.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Instr(InstrId),
    Singleton(Singleton),
}

impl Value {
    pub fn typ(self, code: &Code) -> PirType {
        match self {
            Value::Instr(id) => code[id].typ,
            Value::Singleton(s) => s.typ(),
        }
    }

    pub fn as_instr(self) -> Option<InstrId> {
        match self {
            Value::Instr(id) => Some(id),
            Value::Singleton(_) => None,
        }
    }

    pub fn is_singleton(self, s: Singleton) -> bool {
        self == Value::Singleton(s)
    }
}

impl From<InstrId> for Value {
    fn from(id: InstrId) -> Value {
        Value::Instr(id)
    }
}

impl From<Singleton> for Value {
    fn from(s: Singleton) -> Value {
        Value::Singleton(s)
    }
}
