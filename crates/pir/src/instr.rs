//! Instruction definitions.
//!
//! Every instruction is a value (see [`crate::value::Value`]) and carries a
//! result type, an effect set, a source index, and an ordered argument list.
//! The per-tag payload lives in [`InstrData`]; the argument list is uniform
//! across tags, with the environment slot last for env-bearing instructions
//! (both fixed- and variable-arity).
//!
//! Argument layout conventions, by tag:
//! * `LdFun`: `[guessed_binding, env]`
//! * `StVar`/`StVarSuper`: `[val, env]`
//! * `MkArg`: `[eager, env]`
//! * `Force`: `[input, frame_state, env]`
//! * binops/relops: `[lhs, rhs, env]`; unops: `[val, env]`
//! * `MkEnv`: `[locals.., parent_env]`, parallel to `names`/`missing`
//! * `Call`: `[frame_state, callee, call_args.., env]`
//! * `NamedCall`: `[callee, call_args.., env]`
//! * `StaticCall`: `[frame_state, runtime_closure, call_args.., env]`
//! * `CallBuiltin`: `[call_args.., env]`; `CallSafeBuiltin`: `[call_args..]`
//! * `Phi`: one argument per entry of `inputs`
//! * `Assume`: `[test, checkpoint]`
//! * `FrameState`: `[stack.., (inlined next), env]`
//! * `PushContext`: `[call_args.., ast, op, sysparent_env]`
//! * `PopContext`: `[result, push_context]`

use crate::{
    code::{BasicBlockId, Code, PromiseId},
    effects::{Effect, Effects},
    typ::{PirType, RType},
    value::{Singleton, Value},
};
use compact_str::CompactString;
use smallvec::SmallVec;

pub type Sym = CompactString;

/// Control-flow kind of an instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Controlflow {
    None,
    Exit,
    Branch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CastKind {
    /// Assert a wider type without a check.
    Upcast,
    /// Narrow to the intersection with the target.
    Downcast,
}

/// Source-language class tests performed by `Is`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypecheckKind {
    Nil,
    Logical,
    Integer,
    Real,
    String,
    Vector,
    Closure,
    Environment,
    List,
}

/// Index into the host-language builtin function table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RBuiltinId(pub u32);

/// Handle to a compile-time closure object (with its dispatch table),
/// resolved by the host glue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClosureHandle(pub u32);

/// Assumptions a closure version was compiled under. A version is
/// dispatchable when its context is a subset of the assumptions available at
/// the call site.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AssumptionContext(u16);

impl AssumptionContext {
    pub const CORRECT_ARG_COUNT: AssumptionContext = AssumptionContext(1 << 0);
    pub const NO_EXPLICITLY_MISSING: AssumptionContext = AssumptionContext(1 << 1);
    pub const EAGER_ARGS: AssumptionContext = AssumptionContext(1 << 2);
    pub const NON_OBJECT_ARGS: AssumptionContext = AssumptionContext(1 << 3);

    pub const fn empty() -> Self {
        AssumptionContext(0)
    }

    pub fn is_subset_of(self, other: AssumptionContext) -> bool {
        self.0 & !other.0 == 0
    }
}

impl std::ops::BitOr for AssumptionContext {
    type Output = AssumptionContext;
    fn bitor(self, rhs: AssumptionContext) -> AssumptionContext {
        AssumptionContext(self.0 | rhs.0)
    }
}

/// One frame recorded for a scheduled deoptimization: where in the unoptimized
/// code to resume, and how many of the deopt's arguments belong to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameInfo {
    /// Opaque handle of the unoptimized code unit.
    pub code: u32,
    pub pc: u32,
    pub stack_size: u32,
    pub in_promise: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    Typecheck,
    DeadBranchReached,
    EnvStubMaterialized,
    ForceAndCall,
    Unknown,
}

/// Observed runtime type information attached by the feedback collector.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TypeFeedback {
    pub typ: PirType,
    pub src_code: u32,
    pub origin: u32,
    pub used: bool,
}

/// An instruction argument: the used value plus the type the slot declares.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InstrArg {
    pub value: Value,
    pub typ: PirType,
}

impl InstrArg {
    pub fn new(value: Value, typ: PirType) -> Self {
        InstrArg { value, typ }
    }
}

/// Per-tag payload of an instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum InstrData {
    // Loads and stores.
    LdConst { idx: u32 },
    LdVar { name: Sym },
    LdVarSuper { name: Sym },
    LdFun { name: Sym },
    LdArg { index: u32 },
    LdFunctionEnv,
    LdDots,
    StVar { name: Sym, is_st_arg: bool },
    StVarSuper { name: Sym },
    Missing { name: Sym },

    // Environment construction.
    MkEnv {
        names: Vec<Sym>,
        missing: Vec<bool>,
        stub: bool,
        context: i32,
    },
    MaterializeEnv,
    IsEnvStub,

    // Promise plumbing.
    MkArg { prom: PromiseId, no_reflection: bool },
    UpdatePromise,
    Force { strict: bool },
    ChkMissing,
    ChkClosure,

    // Closure construction.
    MkCls,
    MkFunCls { cls: ClosureHandle },

    // Arithmetic, relational, logical.
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    LAnd,
    LOr,
    Not,
    Plus,
    Minus,

    // Indexing.
    Extract1_1D,
    Extract2_1D,
    Extract1_2D,
    Extract2_2D,
    Extract1_3D,
    Subassign1_1D,
    Subassign2_1D,
    Subassign1_2D,
    Subassign2_2D,
    Subassign1_3D,

    // Type tests and casts.
    IsType { test: PirType },
    Is { check: TypecheckKind },
    IsObject,
    AsLogical,
    AsTest,
    CheckTrueFalse,
    CastType { kind: CastKind },
    Identical,

    // Calls.
    Call,
    NamedCall { names: Vec<Sym> },
    StaticCall {
        cls: ClosureHandle,
        given_context: AssumptionContext,
    },
    CallBuiltin { builtin: RBuiltinId },
    CallSafeBuiltin { builtin: RBuiltinId },

    // Control.
    Branch,
    Return,
    NonLocalReturn,
    Unreachable,
    Phi { inputs: SmallVec<[BasicBlockId; 2]> },
    PirCopy,
    Nop,
    Visible,
    Invisible,

    // Speculation.
    Checkpoint,
    Assume { assume_true: bool },
    FrameState {
        pc: u32,
        code: u32,
        stack_size: u32,
        in_promise: bool,
        inlined: bool,
    },
    Deopt,
    ScheduledDeopt { frames: Vec<FrameInfo> },
    RecordDeoptReason { reason: DeoptReason },

    // Contexts.
    PushContext,
    PopContext,
}

impl InstrData {
    pub fn name(&self) -> &'static str {
        use InstrData::*;
        match self {
            LdConst { .. } => "LdConst",
            LdVar { .. } => "LdVar",
            LdVarSuper { .. } => "LdVarSuper",
            LdFun { .. } => "LdFun",
            LdArg { .. } => "LdArg",
            LdFunctionEnv => "LdFunctionEnv",
            LdDots => "LdDots",
            StVar { is_st_arg: false, .. } => "StVar",
            StVar { is_st_arg: true, .. } => "StArg",
            StVarSuper { .. } => "StVarSuper",
            Missing { .. } => "Missing",
            MkEnv { stub: false, .. } => "MkEnv",
            MkEnv { stub: true, .. } => "(MkEnv)",
            MaterializeEnv => "MaterializeEnv",
            IsEnvStub => "IsEnvStub",
            MkArg { .. } => "MkArg",
            UpdatePromise => "UpdatePromise",
            Force { .. } => "Force",
            ChkMissing => "ChkMissing",
            ChkClosure => "ChkClosure",
            MkCls => "MkCls",
            MkFunCls { .. } => "MkFunCls",
            Add => "Add",
            Sub => "Sub",
            Mul => "Mul",
            Div => "Div",
            IDiv => "IDiv",
            Mod => "Mod",
            Pow => "Pow",
            Lt => "Lt",
            Lte => "Lte",
            Gt => "Gt",
            Gte => "Gte",
            Eq => "Eq",
            Neq => "Neq",
            LAnd => "LAnd",
            LOr => "LOr",
            Not => "Not",
            Plus => "Plus",
            Minus => "Minus",
            Extract1_1D => "Extract1_1D",
            Extract2_1D => "Extract2_1D",
            Extract1_2D => "Extract1_2D",
            Extract2_2D => "Extract2_2D",
            Extract1_3D => "Extract1_3D",
            Subassign1_1D => "Subassign1_1D",
            Subassign2_1D => "Subassign2_1D",
            Subassign1_2D => "Subassign1_2D",
            Subassign2_2D => "Subassign2_2D",
            Subassign1_3D => "Subassign1_3D",
            IsType { .. } => "IsType",
            Is { .. } => "Is",
            IsObject => "IsObject",
            AsLogical => "AsLogical",
            AsTest => "AsTest",
            CheckTrueFalse => "CheckTrueFalse",
            CastType { .. } => "CastType",
            Identical => "Identical",
            Call => "Call",
            NamedCall { .. } => "NamedCall",
            StaticCall { .. } => "StaticCall",
            CallBuiltin { .. } => "CallBuiltin",
            CallSafeBuiltin { .. } => "CallSafeBuiltin",
            Branch => "Branch",
            Return => "Return",
            NonLocalReturn => "NonLocalReturn",
            Unreachable => "Unreachable",
            Phi { .. } => "Phi",
            PirCopy => "PirCopy",
            Nop => "Nop",
            Visible => "Visible",
            Invisible => "Invisible",
            Checkpoint => "Checkpoint",
            Assume { assume_true: true } => "Assume",
            Assume { assume_true: false } => "AssumeNot",
            FrameState { .. } => "FrameState",
            Deopt => "Deopt",
            ScheduledDeopt { .. } => "ScheduledDeopt",
            RecordDeoptReason { .. } => "RecordDeoptReason",
            PushContext => "PushContext",
            PopContext => "PopContext",
        }
    }

    pub fn controlflow(&self) -> Controlflow {
        use InstrData::*;
        match self {
            Branch | Checkpoint => Controlflow::Branch,
            Return | NonLocalReturn | Unreachable | Deopt | ScheduledDeopt { .. } => {
                Controlflow::Exit
            }
            _ => Controlflow::None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.controlflow() != Controlflow::None
    }

    /// Whether the last argument slot is the environment.
    pub fn has_env_slot(&self) -> bool {
        use InstrData::*;
        matches!(
            self,
            LdVar { .. }
                | LdVarSuper { .. }
                | LdFun { .. }
                | LdDots
                | StVar { .. }
                | StVarSuper { .. }
                | Missing { .. }
                | MkEnv { .. }
                | MaterializeEnv
                | IsEnvStub
                | MkArg { .. }
                | Force { .. }
                | MkCls
                | MkFunCls { .. }
                | Add
                | Sub
                | Mul
                | Div
                | IDiv
                | Mod
                | Pow
                | Lt
                | Lte
                | Gt
                | Gte
                | Eq
                | Neq
                | Not
                | Plus
                | Minus
                | Extract1_1D
                | Extract2_1D
                | Extract1_2D
                | Extract2_2D
                | Extract1_3D
                | Subassign1_1D
                | Subassign2_1D
                | Subassign1_2D
                | Subassign2_2D
                | Subassign1_3D
                | Call
                | NamedCall { .. }
                | StaticCall { .. }
                | CallBuiltin { .. }
                | NonLocalReturn
                | FrameState { .. }
                | PushContext
        )
    }

    /// The declared effect set of a freshly constructed instruction, before
    /// any inference refines it.
    pub fn initial_effects(&self) -> Effects {
        use InstrData::*;
        match self {
            LdConst { .. } | LdArg { .. } | LdFunctionEnv => Effects::none(),
            LdVar { .. } | LdVarSuper { .. } => {
                Effects::of(Effect::Error) | Effect::ReadsEnv
            }
            LdFun { .. } => Effects::any(),
            LdDots => Effects::of(Effect::ReadsEnv),
            StVar { .. } => Effects::of(Effect::WritesEnv) | Effect::LeakArg,
            StVarSuper { .. } => {
                Effects::of(Effect::ReadsEnv) | Effect::WritesEnv | Effect::LeakArg
            }
            Missing { .. } => Effects::of(Effect::ReadsEnv) | Effect::Error,
            MkEnv { .. } => Effects::of(Effect::LeakArg),
            MaterializeEnv => Effects::none(),
            IsEnvStub => Effects::of(Effect::ReadsEnv),
            MkArg { .. } => Effects::none(),
            UpdatePromise => Effects::of(Effect::MutatesArgument) | Effect::LeakArg,
            Force { .. } => Effects::any(),
            ChkMissing | ChkClosure => Effects::of(Effect::Error),
            MkCls | MkFunCls { .. } => Effects::none(),
            Add | Sub | Mul | Div | IDiv | Mod | Pow | Lt | Lte | Gt | Gte | Eq | Neq | Not
            | Plus | Minus => Effects::any(),
            LAnd | LOr => Effects::none(),
            Extract1_1D | Extract2_1D | Extract1_2D | Extract2_2D | Extract1_3D
            | Subassign1_1D | Subassign2_1D | Subassign1_2D | Subassign2_2D | Subassign1_3D => {
                Effects::any()
            }
            IsType { .. } | Is { .. } | IsObject => Effects::none(),
            AsLogical | AsTest => Effects::of(Effect::Error),
            CheckTrueFalse => Effects::of(Effect::Error) | Effect::Warn,
            CastType { .. } | Identical => Effects::none(),
            Call | NamedCall { .. } | StaticCall { .. } | CallBuiltin { .. } => Effects::any(),
            CallSafeBuiltin { .. } => {
                Effects::of(Effect::Warn)
                    | Effect::Error
                    | Effect::Visibility
                    | Effect::DependsOnAssume
            }
            Branch | Return | Unreachable => Effects::none(),
            NonLocalReturn => Effects::any(),
            Phi { .. } | PirCopy => Effects::none(),
            // Anything prevents a Nop from being optimized away.
            Nop => Effects::any(),
            Visible | Invisible => Effects::of(Effect::Visibility),
            Checkpoint => Effects::none(),
            Assume { .. } => Effects::of(Effect::TriggerDeopt),
            FrameState { .. } => {
                Effects::of(Effect::LeaksEnv) | Effect::ReadsEnv | Effect::LeakArg
            }
            Deopt => Effects::any(),
            ScheduledDeopt { .. } => Effects::none(),
            RecordDeoptReason { .. } => Effects::of(Effect::UpdatesMetadata),
            PushContext => {
                Effects::of(Effect::ChangesContexts) | Effect::LeakArg | Effect::LeaksEnv
            }
            PopContext => Effects::of(Effect::ChangesContexts),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub data: InstrData,
    pub args: SmallVec<[InstrArg; 4]>,
    /// Result type.
    pub typ: PirType,
    pub effects: Effects,
    pub src_idx: u32,
    /// The block this instruction belongs to.
    pub bb: BasicBlockId,
    pub type_feedback: Option<TypeFeedback>,
}

impl Instruction {
    pub fn new(data: InstrData, args: SmallVec<[InstrArg; 4]>, typ: PirType, src_idx: u32) -> Self {
        let effects = data.initial_effects();
        Instruction {
            data,
            args,
            typ,
            effects,
            src_idx,
            bb: BasicBlockId::default(),
            type_feedback: None,
        }
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, i: usize) -> &InstrArg {
        &self.args[i]
    }

    pub fn arg_mut(&mut self, i: usize) -> &mut InstrArg {
        &mut self.args[i]
    }

    pub fn each_arg(&self, mut it: impl FnMut(Value)) {
        for a in &self.args {
            it(a.value);
        }
    }

    pub fn any_arg(&self, mut it: impl FnMut(Value) -> bool) -> bool {
        self.args.iter().any(|a| it(a.value))
    }

    pub fn produces_value(&self) -> bool {
        self.typ != PirType::voyd()
    }

    pub fn may_have_env(&self) -> bool {
        self.data.has_env_slot()
    }

    pub fn env_slot(&self) -> Option<usize> {
        if self.may_have_env() {
            Some(self.args.len() - 1)
        } else {
            None
        }
    }

    pub fn env(&self) -> Option<Value> {
        self.env_slot().map(|s| self.args[s].value)
    }

    pub fn set_env(&mut self, env: Value) {
        let slot = self.env_slot().expect("this instruction has no env");
        self.args[slot].value = env;
    }

    pub fn elide_env(&mut self) {
        self.set_env(Value::Singleton(Singleton::ElidedEnv));
    }

    /// Whether the instruction still has a real (non-elided) environment.
    pub fn has_env(&self) -> bool {
        matches!(self.env(), Some(e) if e != Value::Singleton(Singleton::ElidedEnv))
    }

    pub fn reads_env(&self) -> bool {
        self.has_env() && self.effects.contains(Effect::ReadsEnv)
    }

    pub fn changes_env(&self) -> bool {
        self.has_env() && self.effects.contains(Effect::WritesEnv)
    }

    pub fn leaks_env(&self) -> bool {
        self.has_env() && self.effects.contains(Effect::LeaksEnv)
    }

    pub fn may_use_reflection(&self) -> bool {
        self.effects.contains(Effect::Reflection)
    }

    pub fn has_observable_effects(&self) -> bool {
        !self.effects.observable().is_empty()
    }

    pub fn has_strong_effects(&self) -> bool {
        !self.effects.strong().is_empty()
    }

    pub fn is_deopt_barrier(&self) -> bool {
        self.effects.is_deopt_barrier()
    }

    pub fn is_typecheck(&self) -> bool {
        matches!(self.data, InstrData::IsType { .. })
    }

    /// Range of the call arguments within `args`, for the call family.
    pub fn call_args_range(&self) -> Option<std::ops::Range<usize>> {
        use InstrData::*;
        let n = self.args.len();
        match &self.data {
            Call | StaticCall { .. } => Some(2..n - 1),
            NamedCall { .. } => Some(1..n - 1),
            CallBuiltin { .. } => Some(0..n - 1),
            CallSafeBuiltin { .. } => Some(0..n),
            _ => None,
        }
    }

    pub fn n_call_args(&self) -> usize {
        self.call_args_range().map_or(0, |r| r.len())
    }

    pub fn each_call_arg(&self, mut it: impl FnMut(Value)) {
        if let Some(r) = self.call_args_range() {
            for a in &self.args[r] {
                it(a.value);
            }
        }
    }

    /// Union of all non-env input types.
    pub fn merged_input_type(&self, get: &dyn Fn(Value) -> PirType) -> PirType {
        let env_slot = self.env_slot();
        let mut t = PirType::bottom();
        for (i, a) in self.args.iter().enumerate() {
            if Some(i) != env_slot {
                t = t | get(a.value);
            }
        }
        t
    }

    fn inferred_type_for_arithmetic(&self, get: &dyn Fn(Value) -> PirType) -> PirType {
        let m = self.merged_input_type(get);
        if m.maybe_obj() {
            return self.typ;
        }
        let env_slot = self.env_slot();
        let mut t = PirType::bottom();
        for (i, a) in self.args.iter().enumerate() {
            if Some(i) != env_slot {
                t = t.merge_with_conversion(get(a.value));
            }
        }
        // Everything but numbers throws an error.
        t = t & PirType::num();
        // e.g. TRUE + TRUE == 2
        if m.maybe(RType::Logical) {
            t = t.or_t(RType::Integer).not_t(RType::Logical);
        }
        // The result becomes NA if it cannot be represented in a fixpoint
        // integer (e.g. INT_MAX + 1 == NA).
        if m.maybe(RType::Integer) && t.maybe(RType::Integer) {
            t = t.or_na_or_nan();
        }
        self.typ & t
    }

    fn inferred_type_for_logical(&self, get: &dyn Fn(Value) -> PirType) -> PirType {
        let t = self.merged_input_type(get);
        if t.maybe_obj() {
            return self.typ;
        }
        // Comparing non-objects yields a plain logical.
        let mut res = PirType::from(RType::Logical).not_object();
        if t.is_scalar() {
            res = res.scalar();
        }
        if !t.maybe_na_or_nan() {
            res = res.not_na_or_nan();
        }
        self.typ & res
    }

    fn inferred_effects_for_arithmetic(&self, get: &dyn Fn(Value) -> PirType) -> Effects {
        let mut e = self.effects;
        let t = self.merged_input_type(get);
        if !t.maybe_obj() {
            e = e & Effects::error_warn_visible();
        }
        if t.is_a(PirType::num().not_object()) && t.is_scalar() {
            // 0-sized input might error; a scalar cannot.
            e.reset(Effect::Error);
            e.reset(Effect::Warn);
        }
        e
    }

    fn inferred_effects_for_logical(&self, get: &dyn Fn(Value) -> PirType) -> Effects {
        let mut e = self.effects;
        let t = self.merged_input_type(get);
        if !t.maybe_obj() {
            e = e & Effects::error_warn_visible();
        }
        if t.is_a(PirType::atom_or_simple_vec().not_object()) && t.is_scalar() {
            e.reset(Effect::Error);
            e.reset(Effect::Warn);
        }
        e
    }

    fn if_non_object_args<T>(&self, get: &dyn Fn(Value) -> PirType, then: T, otherwise: T) -> T {
        if !self.merged_input_type(get).maybe_obj() {
            then
        } else {
            otherwise
        }
    }

    /// Refine the result type from the current input types. The result is
    /// always a refinement: it never widens beyond the declared type, except
    /// for `Phi`, whose type is the merge of its inputs.
    pub fn infer_type(&self, code: &Code, get: &dyn Fn(Value) -> PirType) -> PirType {
        use InstrData::*;
        match &self.data {
            Add | Sub | Mul | IDiv | Pow | Plus | Minus => {
                self.inferred_type_for_arithmetic(get)
            }
            Div => {
                // 0 / 0 == NaN
                let t = self.inferred_type_for_arithmetic(get).or_na_or_nan();
                if t.maybe(RType::Integer) || t.maybe(RType::Logical) {
                    t.or_t(RType::Real)
                } else {
                    t
                }
            }
            Mod => self.inferred_type_for_arithmetic(get).or_na_or_nan(),
            Lt | Lte | Gt | Gte | Eq | Neq | LAnd | LOr | Not => {
                self.inferred_type_for_logical(get)
            }
            Force { .. } => self.typ & get(self.args[0].value).forced(),
            CastType { kind: CastKind::Downcast } => {
                let t = get(self.args[0].value) & self.typ;
                // Void can happen in dead code.
                if !t.is_void() {
                    t
                } else {
                    self.typ
                }
            }
            PirCopy => get(self.args[0].value),
            PopContext => get(self.args[0].value),
            Phi { .. } => {
                if self.typ.is_rtype() {
                    self.merged_input_type(get)
                } else {
                    self.typ
                }
            }
            Extract1_1D => self.if_non_object_args(
                get,
                self.typ & get(self.args[0].value).subset_type(get(self.args[1].value)),
                self.typ,
            ),
            Extract2_1D => self.if_non_object_args(
                get,
                self.typ & get(self.args[0].value).extract_type(get(self.args[1].value)),
                self.typ,
            ),
            Extract1_2D | Extract1_3D => self.if_non_object_args(
                get,
                self.typ
                    & get(self.args[0].value)
                        .subset_type(get(self.args[1].value) | get(self.args[2].value)),
                self.typ,
            ),
            Extract2_2D => self.if_non_object_args(
                get,
                self.typ
                    & get(self.args[0].value)
                        .extract_type(get(self.args[1].value) | get(self.args[2].value)),
                self.typ,
            ),
            Subassign1_1D | Subassign2_1D | Subassign1_2D | Subassign2_2D | Subassign1_3D => self
                .if_non_object_args(
                    get,
                    self.typ
                        & get(self.args[1].value)
                            .merge_with_conversion(get(self.args[0].value))
                            .or_not_scalar(),
                    self.typ,
                ),
            _ => {
                let _ = code;
                self.typ
            }
        }
    }

    /// Refine the effect set from the current input types. The result is
    /// always a subset of the declared initial effects.
    pub fn infer_effects(&self, code: &Code, get: &dyn Fn(Value) -> PirType) -> Effects {
        use InstrData::*;
        let inferred = match &self.data {
            Add | Sub | Mul | Div | IDiv | Mod | Pow | Plus | Minus => {
                self.inferred_effects_for_arithmetic(get)
            }
            Lt | Lte | Gt | Gte | Eq | Neq | LAnd | LOr | Not => {
                self.inferred_effects_for_logical(get)
            }
            Extract1_1D | Extract2_1D | Extract1_2D | Extract2_2D | Extract1_3D
            | Subassign1_1D | Subassign2_1D | Subassign1_2D | Subassign2_2D | Subassign1_3D => {
                self.if_non_object_args(
                    get,
                    self.effects & Effects::error_warn_visible(),
                    self.effects,
                )
            }
            Force { .. } => {
                let mut e = if get(self.args[0].value).maybe_lazy() {
                    self.effects
                } else {
                    self.effects & Effects::of(Effect::DependsOnAssume)
                };
                if let Some(mk) = self.args[0]
                    .value
                    .as_instr()
                    .and_then(|id| code.try_instr(id))
                {
                    if let MkArg { no_reflection: true, .. } = mk.data {
                        e.reset(Effect::Reflection);
                    }
                }
                e
            }
            AsLogical => {
                let coercible = (PirType::from(RType::Logical)
                    | RType::Integer.into()
                    | RType::Real.into()
                    | RType::Str.into()
                    | RType::Cplx.into())
                .no_attribs();
                if get(self.args[0].value).is_a(coercible) {
                    Effects::none()
                } else {
                    self.effects
                }
            }
            CheckTrueFalse => {
                if get(self.args[0].value).is_scalar() {
                    // Error on NA is hard to exclude.
                    self.effects.without(Effect::Warn)
                } else {
                    self.effects
                }
            }
            _ => self.effects,
        };
        debug_assert!(inferred.is_subset_of(self.effects));
        inferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CodeBuilder;
    use crate::code::Code;

    fn scalar_int() -> PirType {
        PirType::from(RType::Integer).scalar().not_object()
    }

    #[test]
    fn arithmetic_inference_on_clean_inputs() {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, scalar_int());
        let y = b.ld_arg(1, scalar_int());
        let add = b.add(x, y, Value::Singleton(Singleton::ElidedEnv), 0);
        b.ret(add);
        let code = b.finish();

        let id = add.as_instr().unwrap();
        let get = |v: Value| v.typ(&code);
        let t = code[id].infer_type(&code, &get);
        assert!(t.is_a(PirType::num().not_object()));
        assert!(t.maybe(RType::Integer));
        // INT_MAX + 1 == NA
        assert!(t.maybe_na_or_nan());
        assert!(!t.maybe_obj());

        let e = code[id].infer_effects(&code, &get);
        assert!(e.is_subset_of(code[id].effects));
        assert!(!e.contains(Effect::Error));
        assert!(!e.contains(Effect::Reflection));
    }

    #[test]
    fn div_may_produce_nan_from_clean_inputs() {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, scalar_int().not_na_or_nan());
        let y = b.ld_arg(1, scalar_int().not_na_or_nan());
        let div = b.div(x, y, Value::Singleton(Singleton::ElidedEnv), 0);
        b.ret(div);
        let code = b.finish();

        let get = |v: Value| v.typ(&code);
        let t = code[div.as_instr().unwrap()].infer_type(&code, &get);
        assert!(t.maybe_na_or_nan());
        assert!(t.maybe(RType::Real));
    }

    #[test]
    fn relop_on_scalars_is_effect_free_logical() {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, scalar_int().not_na_or_nan());
        let y = b.ld_arg(1, scalar_int().not_na_or_nan());
        let lt = b.lt(x, y, Value::Singleton(Singleton::ElidedEnv), 0);
        b.ret(lt);
        let code = b.finish();

        let get = |v: Value| v.typ(&code);
        let id = lt.as_instr().unwrap();
        let t = code[id].infer_type(&code, &get);
        assert!(t.is_a(PirType::from(RType::Logical)));
        assert!(t.is_scalar());
        assert!(!t.maybe_na_or_nan());

        let e = code[id].infer_effects(&code, &get);
        assert!(!e.contains(Effect::Error));
        assert!(!e.contains(Effect::Warn));
    }

    #[test]
    fn force_of_eager_mkarg_drops_reflection() {
        let mut b = CodeBuilder::new();
        let env = b.ld_function_env();
        let prom = {
            let p = Code::new();
            b.code_mut().promises.push(p)
        };
        let eager = b.ld_arg(0, scalar_int());
        let arg = b.mk_arg(prom, eager, env, 0);
        let fs = Value::Singleton(Singleton::TombstoneFrameState);
        let forced = b.force(arg, fs, env, 0);
        b.ret(forced);
        let mut code = b.finish();

        // Mark the promise eager and reflection-free.
        let mk = arg.as_instr().unwrap();
        if let InstrData::MkArg { no_reflection, .. } = &mut code.instrs[mk].data {
            *no_reflection = true;
        }

        let get = |v: Value| v.typ(&code);
        let f = forced.as_instr().unwrap();
        let e = code[f].infer_effects(&code, &get);
        assert!(!e.contains(Effect::Reflection));
        assert!(e.is_subset_of(code[f].effects));
        assert!(!code[f].infer_type(&code, &get).maybe_lazy());
    }

    #[test]
    fn effects_inference_is_monotonic_across_tags() {
        let mut b = CodeBuilder::new();
        let env = b.ld_function_env();
        let x = b.ld_arg(0, PirType::any());
        let y = b.ld_arg(1, PirType::any());
        let chk = b.chk_missing(x, 0);
        let add = b.add(chk, y, env, 0);
        let lgl = b.as_logical(add, 0);
        b.ret(lgl);
        let code = b.finish();

        let get = |v: Value| v.typ(&code);
        for (_, instr) in code.instrs.iter() {
            assert!(instr.infer_effects(&code, &get).is_subset_of(instr.effects));
        }
    }
}
