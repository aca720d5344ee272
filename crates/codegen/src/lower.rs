//! The representation-selecting lowering pass.
//!
//! Walks a PIR `Code` unit in lowering order and emits native instructions
//! through the [`CodeBuilder`] facade, choosing per SSA value whether it
//! lives unboxed (integer or real) or boxed, and inserting conversions, GC
//! safepoints and the variable binding cache where required.
//!
//! Lowering never miscompiles: any construct outside the supported subset
//! flips the `success` flag and the caller falls back to the bytecode
//! interpreter.

use crate::{
    backend::{AluOp, CmpMode, CodeBuilder, ValTy},
    baseline::{CompiledCode, NativeBuilder},
    builtins::NativeBuiltins,
    representation::Representation,
};
use pir::{
    analysis::{visitor, Cfg, LivenessIntervals},
    instr::Sym,
    BasicBlockId, Code, Effect, InstrData, InstrId, NativeType, PirType, PromiseId, RType,
    Singleton, Value,
};
use runtime::{
    BinopKind, Ctx, DeoptFrame, DeoptMetadata, SexpType, CAR_OFS, NAMED_BIT, NA_INTEGER,
    OBJECT_BIT, PR_VALUE_OFS, STACK_CELL_SIZE, STACK_CELL_VALUE_OFS, STD_VEC_DATA_OFS, TYPE_MASK,
};
use hashbrown::{HashMap, HashSet};

/// Parameter slots of the uniform native signature.
const PARAM_CODE: usize = 0;
const PARAM_CTX: usize = 1;
const PARAM_ARGS: usize = 2;
const PARAM_ENV: usize = 3;
const PARAM_CLOSURE: usize = 4;

/// Compile a code unit to an executable function, or fail cleanly.
///
/// `prom_map` maps owned promise bodies to their indices in the compiled
/// promise table; `needs_ensure_named` lists values whose reference count
/// must be bumped after definition to suppress copy-on-write misses when
/// they escape.
pub fn try_compile(
    code: &Code,
    ctx: &mut Ctx,
    prom_map: &HashMap<PromiseId, u32>,
    needs_ensure_named: &HashSet<InstrId>,
) -> Option<CompiledCode> {
    Lowerer::new(NativeBuilder::new(), code, ctx, prom_map, needs_ensure_named)
        .run()
        .map(NativeBuilder::finish)
}

struct Lowerer<'a, B: CodeBuilder> {
    b: B,
    code: &'a Code,
    ctx: &'a mut Ctx,
    prom_map: &'a HashMap<PromiseId, u32>,
    needs_ensure_named: &'a HashSet<InstrId>,

    liveness: LivenessIntervals,
    num_locals: usize,

    value_map: HashMap<InstrId, B::VReg>,
    phi_regs: HashMap<InstrId, B::VReg>,
    block_labels: HashMap<BasicBlockId, B::Label>,
    /// Local cache slot offsets per (environment, name) pair.
    bindings_cache: HashMap<(Value, Sym), u32>,
    cache_base: Option<B::VReg>,
    basepointer: Option<B::VReg>,
    pool_base: Option<B::VReg>,

    success: bool,
}

enum RelopInsn {
    Cmp(CmpMode),
    And,
    Or,
}

impl<'a, B: CodeBuilder> Lowerer<'a, B> {
    fn new(
        b: B,
        code: &'a Code,
        ctx: &'a mut Ctx,
        prom_map: &'a HashMap<PromiseId, u32>,
        needs_ensure_named: &'a HashSet<InstrId>,
    ) -> Self {
        let cfg = Cfg::new(code);
        let liveness = LivenessIntervals::new(code, &cfg);
        let num_locals = liveness.max_live;
        Lowerer {
            b,
            code,
            ctx,
            prom_map,
            needs_ensure_named,
            liveness,
            num_locals,
            value_map: HashMap::new(),
            phi_regs: HashMap::new(),
            block_labels: HashMap::new(),
            bindings_cache: HashMap::new(),
            cache_base: None,
            basepointer: None,
            pool_base: None,
            success: true,
        }
    }

    fn fail(&mut self, what: &str) {
        if self.success {
            tracing::debug!(what, "unsupported for native lowering");
        }
        self.success = false;
    }

    fn rep_of(&self, v: Value) -> Representation {
        Representation::of_type(self.code.value_type(v))
    }

    fn rep_ty(&self, r: Representation) -> ValTy {
        match r {
            Representation::Integer => ValTy::Int,
            Representation::Real => ValTy::Real,
            Representation::Boxed => ValTy::Ptr,
            Representation::Bottom => ValTy::Ptr,
        }
    }

    // ---- node stack ----

    fn nodestack_ptr(&mut self) -> B::VReg {
        let top_cell = self.b.const_ptr(self.ctx.stack.top_addr());
        self.b.load(top_cell, 0, ValTy::Ptr)
    }

    fn inc_stack(&mut self, n: usize, zero: bool) {
        if n == 0 {
            return;
        }
        let top_cell = self.b.const_ptr(self.ctx.stack.top_addr());
        let cur = self.b.load(top_cell, 0, ValTy::Ptr);
        let bytes = self.b.const_ptr((n * STACK_CELL_SIZE) as u64);
        if zero {
            self.b.memset(cur, 0, bytes);
        }
        let up = self.b.alu(AluOp::Add, ValTy::Ptr, cur, bytes);
        self.b.store(top_cell, 0, up, ValTy::Ptr);
    }

    fn dec_stack(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let top_cell = self.b.const_ptr(self.ctx.stack.top_addr());
        let cur = self.b.load(top_cell, 0, ValTy::Ptr);
        let bytes = self.b.const_ptr((n * STACK_CELL_SIZE) as u64);
        let down = self.b.alu(AluOp::Sub, ValTy::Ptr, cur, bytes);
        self.b.store(top_cell, 0, down, ValTy::Ptr);
    }

    fn set_local(&mut self, i: usize, v: B::VReg) {
        debug_assert!(i < self.num_locals);
        let base = self.basepointer.expect("locals not set up");
        let ofs = (i * STACK_CELL_SIZE + STACK_CELL_VALUE_OFS) as i64;
        self.b.store(base, ofs, v, ValTy::Ptr);
    }

    /// Write argument cells below the current top, with cleared type tags.
    fn stack_cells(&mut self, args: &[B::VReg]) {
        let stackptr = self.nodestack_ptr();
        let zero = self.b.const_ptr(0);
        let mut ofs = -((args.len() * STACK_CELL_SIZE) as i64);
        for &arg in args {
            self.b.store(stackptr, ofs, zero, ValTy::Ptr);
            self.b
                .store(stackptr, ofs + STACK_CELL_VALUE_OFS as i64, arg, ValTy::Ptr);
            ofs += STACK_CELL_SIZE as i64;
        }
    }

    // ---- boxed-value probes ----

    fn sexptype(&mut self, v: B::VReg) -> B::VReg {
        let info = self.b.load(v, 0, ValTy::Ptr);
        let mask = self.b.const_ptr(TYPE_MASK);
        self.b.alu(AluOp::And, ValTy::Ptr, info, mask)
    }

    fn cmp_sexptype(&mut self, v: B::VReg, ty: SexpType) -> B::VReg {
        let t = self.sexptype(v);
        let want = self.b.const_ptr(ty as u64);
        self.b.cmp(CmpMode::Eq, ValTy::Ptr, t, want)
    }

    fn is_obj(&mut self, v: B::VReg) -> B::VReg {
        let info = self.b.load(v, 0, ValTy::Ptr);
        let bit = self.b.const_ptr(OBJECT_BIT);
        let masked = self.b.alu(AluOp::And, ValTy::Ptr, info, bit);
        let zero = self.b.const_ptr(0);
        self.b.cmp(CmpMode::Ne, ValTy::Ptr, masked, zero)
    }

    fn ensure_named(&mut self, v: B::VReg) {
        let info = self.b.load(v, 0, ValTy::Ptr);
        let bit = self.b.const_ptr(NAMED_BIT);
        let named = self.b.alu(AluOp::Or, ValTy::Ptr, info, bit);
        let is_named = self.b.new_label();
        let same = self.b.cmp(CmpMode::Eq, ValTy::Ptr, named, info);
        self.b.branch_if(same, is_named);
        self.b.store(v, 0, named, ValTy::Ptr);
        self.b.bind_label(is_named);
    }

    fn set_visible(&mut self, visible: i32) {
        let cell = self.b.const_ptr(self.ctx.visible.addr());
        let v = self.b.const_int(visible);
        self.b.store(cell, 0, v, ValTy::Int);
    }

    fn call_error(&mut self) {
        self.b.call_native(&NativeBuiltins::ERROR, &[]);
    }

    fn check_missing(&mut self, v: B::VReg) {
        let ok = self.b.new_label();
        let missing = self.b.const_ptr(self.ctx.singletons.missing_arg.addr());
        let t = self.b.cmp(CmpMode::Eq, ValTy::Ptr, v, missing);
        self.b.branch_if_not(t, ok);
        self.call_error();
        self.b.bind_label(ok);
    }

    fn check_unbound(&mut self, v: B::VReg) {
        let ok = self.b.new_label();
        let unbound = self.b.const_ptr(self.ctx.singletons.unbound_value.addr());
        let t = self.b.cmp(CmpMode::Eq, ValTy::Ptr, v, unbound);
        self.b.branch_if_not(t, ok);
        self.call_error();
        self.b.bind_label(ok);
    }

    // ---- box / unbox ----

    fn unbox_int(&mut self, v: B::VReg) -> B::VReg {
        self.b.load(v, STD_VEC_DATA_OFS as i64, ValTy::Int)
    }

    fn unbox_real(&mut self, v: B::VReg) -> B::VReg {
        self.b.load(v, STD_VEC_DATA_OFS as i64, ValTy::Real)
    }

    fn unbox_real_or_int(&mut self, v: B::VReg) -> B::VReg {
        let is_int = self.b.new_label();
        let done = self.b.new_label();
        let res = self.b.new_register(ValTy::Real);

        let tt = self.cmp_sexptype(v, SexpType::Int);
        self.b.branch_if(tt, is_int);

        let real = self.unbox_real(v);
        self.b.store_register(res, real);
        self.b.jump(done);

        self.b.bind_label(is_int);
        let int = self.unbox_int(v);
        let conv = self.b.convert(int, ValTy::Real);
        self.b.store_register(res, conv);
        self.b.bind_label(done);

        res
    }

    fn box_int(&mut self, pos: InstrId, v: B::VReg) -> B::VReg {
        self.gc_safepoint(pos, Some(1), true);
        let b = match self.b.ty_of(v) {
            ValTy::Int => &NativeBuiltins::NEW_INT,
            ValTy::Real => &NativeBuiltins::NEW_INT_FROM_REAL,
            ValTy::Ptr => panic!("box_int on a boxed value"),
        };
        self.b.call_native(b, &[v]).unwrap()
    }

    fn box_real(&mut self, pos: InstrId, v: B::VReg) -> B::VReg {
        self.gc_safepoint(pos, Some(1), true);
        let b = match self.b.ty_of(v) {
            ValTy::Real => &NativeBuiltins::NEW_REAL,
            ValTy::Int => &NativeBuiltins::NEW_REAL_FROM_INT,
            ValTy::Ptr => panic!("box_real on a boxed value"),
        };
        self.b.call_native(b, &[v]).unwrap()
    }

    fn box_lgl(&mut self, pos: InstrId, v: B::VReg) -> B::VReg {
        self.gc_safepoint(pos, Some(1), true);
        let b = match self.b.ty_of(v) {
            ValTy::Int => &NativeBuiltins::NEW_LGL,
            ValTy::Real => &NativeBuiltins::NEW_LGL_FROM_REAL,
            ValTy::Ptr => panic!("box_lgl on a boxed value"),
        };
        self.b.call_native(b, &[v]).unwrap()
    }

    // ---- GC safepoints ----

    /// Spill every live boxed value into the reserved local slots before an
    /// allocation of `required` nodes (`None` makes the spill unconditional).
    /// `protect_args` additionally spills the consuming instruction's own
    /// arguments even if liveness does not keep them alive past it.
    fn gc_safepoint(&mut self, pos: InstrId, required: Option<u64>, protect_args: bool) {
        let ok = self.b.new_label();

        if let Some(required) = required {
            let use_cell = self.b.const_ptr(self.ctx.heap.nodes_in_use_addr());
            let in_use = self.b.load(use_cell, 0, ValTy::Ptr);
            let limit_cell = self.b.const_ptr(self.ctx.heap.node_limit_addr());
            let limit = self.b.load(limit_cell, 0, ValTy::Ptr);
            let req = self.b.const_ptr(required);
            let total = self.b.alu(AluOp::Add, ValTy::Ptr, in_use, req);
            let t = self.b.cmp(CmpMode::Lt, ValTy::Ptr, total, limit);
            self.b.branch_if(t, ok);
        }

        let mut entries: Vec<(InstrId, B::VReg)> =
            self.value_map.iter().map(|(&id, &r)| (id, r)).collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut slot = 0;
        for (id, reg) in entries {
            if id == pos || self.b.ty_of(reg) != ValTy::Ptr {
                continue;
            }
            let is_arg = protect_args && self.code[pos].any_arg(|a| a == Value::Instr(id));
            if is_arg || self.liveness.live_after(self.code, pos, id) {
                self.set_local(slot, reg);
                slot += 1;
            }
        }
        debug_assert!(slot <= self.num_locals);

        self.b.bind_label(ok);
    }

    // ---- constants ----

    fn singleton_value(&mut self, s: Singleton, needed: Representation) -> B::VReg {
        match (s, needed) {
            (Singleton::True, Representation::Integer) => return self.b.const_int(1),
            (Singleton::True, Representation::Real) => return self.b.const_real(1.0),
            (Singleton::False, Representation::Integer) => return self.b.const_int(0),
            (Singleton::False, Representation::Real) => return self.b.const_real(0.0),
            (Singleton::NaLogical, Representation::Integer) => {
                return self.b.const_int(NA_INTEGER)
            }
            (Singleton::NaLogical, Representation::Real) => {
                return self.b.const_real(runtime::na_real())
            }
            _ => {}
        }
        let single = &self.ctx.singletons;
        let addr = match s {
            Singleton::True => single.true_v.addr(),
            Singleton::False => single.false_v.addr(),
            Singleton::NaLogical => single.na_lgl.addr(),
            Singleton::Nil | Singleton::ElidedEnv => single.nil.addr(),
            Singleton::MissingArg => single.missing_arg.addr(),
            Singleton::UnboundValue => single.unbound_value.addr(),
            Singleton::GlobalEnv => single.global_env.addr(),
            Singleton::TombstoneClosure
            | Singleton::TombstoneFrameState
            | Singleton::TombstoneContext => {
                self.fail("tombstone in lowered code");
                0
            }
        };
        self.b.const_ptr(addr)
    }

    fn pool_constant(&mut self, idx: u32, needed: Representation) -> B::VReg {
        let c = self.ctx.pool.get(idx);
        match needed {
            Representation::Integer => {
                assert_eq!(c.length(), 1);
                match c.sexp_type() {
                    SexpType::Int | SexpType::Lgl => self.b.const_int(c.int_value()),
                    SexpType::Real => self.b.const_int(c.real_value() as i32),
                    _ => {
                        self.fail("unboxable constant");
                        self.b.const_int(0)
                    }
                }
            }
            Representation::Real => {
                assert_eq!(c.length(), 1);
                match c.sexp_type() {
                    SexpType::Int | SexpType::Lgl => self.b.const_real(c.int_value() as f64),
                    SexpType::Real => self.b.const_real(c.real_value()),
                    _ => {
                        self.fail("unboxable constant");
                        self.b.const_real(0.0)
                    }
                }
            }
            _ => {
                let base = self.pool_base.expect("pool base loaded at entry");
                let idx = self.b.const_int(idx as i32);
                self.b.load_elem_ptr(base, idx)
            }
        }
    }

    // ---- value loading ----

    fn load_val(&mut self, pos: InstrId, v: Value) -> B::VReg {
        self.load(pos, v, self.code.value_type(v), self.rep_of(v))
    }

    fn load_sxp(&mut self, pos: InstrId, v: Value) -> B::VReg {
        self.load(pos, v, self.code.value_type(v), Representation::Boxed)
    }

    fn load_same(&mut self, pos: InstrId, v: Value) -> B::VReg {
        self.load(
            pos,
            v,
            self.code.value_type(v),
            self.rep_of(Value::Instr(pos)),
        )
    }

    /// Materialize `v` in the `needed` representation, inserting unboxing,
    /// conversion or boxing as required.
    fn load(&mut self, pos: InstrId, v: Value, typ: PirType, needed: Representation) -> B::VReg {
        let needed_ty = self.rep_ty(needed);

        let mut res = match v {
            Value::Instr(id) => {
                if let Some(&r) = self.value_map.get(&id) {
                    r
                } else if let InstrData::LdConst { idx } = &self.code[id].data {
                    self.pool_constant(*idx, needed)
                } else {
                    self.fail("use of an unemitted value");
                    return self.b.const_ptr(0);
                }
            }
            Value::Singleton(s) => self.singleton_value(s, needed),
        };

        if self.b.ty_of(res) == ValTy::Ptr && needed_ty != ValTy::Ptr {
            let int_ish = (PirType::from(RType::Integer) | RType::Logical.into())
                .scalar()
                .not_object();
            let real_scalar = PirType::from(RType::Real).scalar().not_object();
            let num_scalar = (PirType::from(RType::Real)
                | RType::Integer.into()
                | RType::Logical.into())
            .scalar()
            .not_object();
            if typ.is_a(int_ish) {
                res = self.unbox_int(res);
            } else if typ.is_a(real_scalar) {
                res = self.unbox_real(res);
            } else if typ.is_a(num_scalar) {
                res = self.unbox_real_or_int(res);
            } else {
                self.fail("no unboxing for this type");
                return self.b.const_ptr(0);
            }
            // Fall through: more conversions might be needed after unboxing.
        }

        match (self.b.ty_of(res), needed_ty) {
            (ValTy::Int, ValTy::Real) => res = self.b.convert(res, ValTy::Real),
            (ValTy::Real, ValTy::Int) => res = self.b.convert(res, ValTy::Int),
            (ValTy::Int | ValTy::Real, ValTy::Ptr) => {
                if typ.is_a(RType::Integer.into()) {
                    res = self.box_int(pos, res);
                } else if typ.is_a(RType::Logical.into()) {
                    res = self.box_lgl(pos, res);
                } else if typ.is_a(NativeType::Test.into()) {
                    res = self.box_lgl(pos, res);
                } else if typ.is_a(RType::Real.into()) {
                    res = self.box_real(pos, res);
                } else {
                    self.fail("no boxing for this type");
                    return self.b.const_ptr(0);
                }
            }
            _ => {}
        }

        if self.b.ty_of(res) != needed_ty {
            self.fail("representation mismatch");
            return self.b.const_ptr(0);
        }
        res
    }

    fn set_val(&mut self, id: InstrId, mut val: B::VReg) {
        debug_assert!(!self.value_map.contains_key(&id));
        let rep = self.rep_of(Value::Instr(id));
        if self.b.ty_of(val) == ValTy::Ptr && rep == Representation::Integer {
            val = self.unbox_int(val);
        }
        if self.b.ty_of(val) == ValTy::Ptr && rep == Representation::Real {
            val = self.unbox_real_or_int(val);
        }
        if self.code[id].produces_value() && self.b.ty_of(val) != self.rep_ty(rep) {
            panic!(
                "lowered {} as {:?}, but its representation is {:?}",
                self.code[id].data.name(),
                self.b.ty_of(val),
                rep,
            );
        }
        self.value_map.insert(id, val);
    }

    // ---- promises ----

    fn depromise(&mut self, v: B::VReg) -> B::VReg {
        if self.b.ty_of(v) != ValTy::Ptr {
            return v;
        }
        let ok = self.b.new_label();
        let res = self.b.new_register(ValTy::Ptr);
        self.b.store_register(res, v);

        let tt = self.cmp_sexptype(v, SexpType::Prom);
        self.b.branch_if_not(tt, ok);
        let val = self.b.load(v, PR_VALUE_OFS as i64, ValTy::Ptr);
        self.b.store_register(res, val);
        self.b.bind_label(ok);
        res
    }

    fn force_emit(&mut self, pos: InstrId, v: B::VReg) -> B::VReg {
        let ok = self.b.new_label();
        let res = self.b.new_register(ValTy::Ptr);
        self.b.store_register(res, v);

        let tt = self.cmp_sexptype(v, SexpType::Prom);
        self.b.branch_if_not(tt, ok);

        let val = self.b.load(v, PR_VALUE_OFS as i64, ValTy::Ptr);
        self.b.store_register(res, val);
        let unbound = self.b.const_ptr(self.ctx.singletons.unbound_value.addr());
        let tv = self.b.cmp(CmpMode::Eq, ValTy::Ptr, val, unbound);
        self.b.branch_if_not(tv, ok);

        self.gc_safepoint(pos, None, false);
        let evaled = self
            .b
            .call_native(&NativeBuiltins::FORCE_PROMISE, &[v])
            .unwrap();
        self.b.store_register(res, evaled);

        self.b.bind_label(ok);
        res
    }

    // ---- call frames ----

    fn with_call_frame(
        &mut self,
        pos: InstrId,
        args: &[Value],
        emit_call: impl FnOnce(&mut Self) -> B::VReg,
    ) -> B::VReg {
        self.gc_safepoint(pos, None, false);
        let nargs = args.len();
        self.inc_stack(nargs, false);
        let mut cells = Vec::with_capacity(nargs);
        for &arg in args {
            cells.push(self.load_sxp(pos, arg));
        }
        self.stack_cells(&cells);
        let res = emit_call(self);
        self.dec_stack(nargs);
        res
    }

    fn call_args(&self, id: InstrId) -> Vec<Value> {
        let mut args = Vec::new();
        self.code[id].each_call_arg(|v| args.push(v));
        args
    }

    // ---- arithmetic ----

    fn compile_binop(&mut self, id: InstrId, op: AluOp, kind: BinopKind) {
        let rep = self.rep_of(Value::Instr(id));
        let lhs = self.code[id].arg(0).value;
        let rhs = self.code[id].arg(1).value;

        if rep == Representation::Boxed {
            let a = self.load_sxp(id, lhs);
            let b = self.load_sxp(id, rhs);
            self.gc_safepoint(id, None, true);
            let res = if self.code[id].has_env() {
                let env = {
                    let e = self.code[id].env().unwrap();
                    self.load_sxp(id, e)
                };
                let src = self.b.const_int(self.code[id].src_idx as i32);
                let k = self.b.const_int(kind as i32);
                self.b
                    .call_native(&NativeBuiltins::BINOP_ENV, &[a, b, env, src, k])
                    .unwrap()
            } else {
                let k = self.b.const_int(kind as i32);
                self.b
                    .call_native(&NativeBuiltins::BINOP, &[a, b, k])
                    .unwrap()
            };
            self.set_val(id, res);
            return;
        }

        let ty = self.rep_ty(rep);
        let a = self.load(id, lhs, self.code.value_type(lhs), rep);
        let b = self.load(id, rhs, self.code.value_type(rhs), rep);

        if rep == Representation::Integer {
            let done = self.b.new_label();
            let is_na = self.b.new_label();
            let res = self.b.new_register(ValTy::Int);

            let na = self.b.const_int(NA_INTEGER);
            let a_is_na = self.b.cmp(CmpMode::Eq, ValTy::Int, a, na);
            self.b.branch_if(a_is_na, is_na);
            let b_is_na = self.b.cmp(CmpMode::Eq, ValTy::Int, b, na);
            self.b.branch_if(b_is_na, is_na);

            let r = self.b.alu(op, ty, a, b);
            self.b.store_register(res, r);
            self.b.jump(done);

            self.b.bind_label(is_na);
            let na = self.b.const_int(NA_INTEGER);
            self.b.store_register(res, na);

            self.b.bind_label(done);
            self.set_val(id, res);
        } else {
            let r = self.b.alu(op, ty, a, b);
            self.set_val(id, r);
        }
    }

    fn compile_relop(&mut self, id: InstrId, insn: RelopInsn, kind: BinopKind) {
        let rep = self.rep_of(Value::Instr(id));
        let lhs = self.code[id].arg(0).value;
        let rhs = self.code[id].arg(1).value;
        let lhs_rep = self.rep_of(lhs);
        let rhs_rep = self.rep_of(rhs);

        if lhs_rep == Representation::Boxed || rhs_rep == Representation::Boxed {
            let a = self.load_sxp(id, lhs);
            let b = self.load_sxp(id, rhs);
            self.gc_safepoint(id, None, true);
            if self.code[id].has_env() {
                self.fail("relop with dispatch environment");
                return;
            }
            let k = self.b.const_int(kind as i32);
            let res = self
                .b
                .call_native(&NativeBuiltins::BINOP, &[a, b, k])
                .unwrap();
            if rep == Representation::Integer {
                let unboxed = self.unbox_int(res);
                self.set_val(id, unboxed);
            } else {
                self.set_val(id, res);
            }
            return;
        }

        let done = self.b.new_label();
        let is_na = self.b.new_label();
        let res = self.b.new_register(ValTy::Int);

        let mut a = self.load(id, lhs, self.code.value_type(lhs), lhs_rep);
        let mut b = self.load(id, rhs, self.code.value_type(rhs), rhs_rep);

        self.check_na(a, lhs_rep, is_na);
        self.check_na(b, rhs_rep, is_na);

        // Mixed operand representations compare as reals.
        let cmp_ty = if lhs_rep == rhs_rep {
            self.rep_ty(lhs_rep)
        } else {
            if self.b.ty_of(a) == ValTy::Int {
                a = self.b.convert(a, ValTy::Real);
            }
            if self.b.ty_of(b) == ValTy::Int {
                b = self.b.convert(b, ValTy::Real);
            }
            ValTy::Real
        };

        let r = match insn {
            RelopInsn::Cmp(mode) => self.b.cmp(mode, cmp_ty, a, b),
            RelopInsn::And => self.b.alu(AluOp::And, ValTy::Int, a, b),
            RelopInsn::Or => self.b.alu(AluOp::Or, ValTy::Int, a, b),
        };
        self.b.store_register(res, r);
        self.b.jump(done);

        self.b.bind_label(is_na);
        let na = self.b.const_int(NA_INTEGER);
        self.b.store_register(res, na);

        self.b.bind_label(done);

        if rep == Representation::Boxed {
            let boxed = self.box_lgl(id, res);
            self.set_val(id, boxed);
        } else {
            self.set_val(id, res);
        }
    }

    fn check_na(&mut self, v: B::VReg, rep: Representation, is_na: B::Label) {
        match rep {
            Representation::Integer => {
                let na = self.b.const_int(NA_INTEGER);
                let t = self.b.cmp(CmpMode::Eq, ValTy::Int, v, na);
                self.b.branch_if(t, is_na);
            }
            Representation::Real => {
                let t = self.b.cmp(CmpMode::Ne, ValTy::Real, v, v);
                self.b.branch_if(t, is_na);
            }
            _ => panic!("NA check on a boxed value"),
        }
    }

    // ---- phis ----

    /// Store this block's contributions into the phi registers of its
    /// successors; emitted just before the block transfers control.
    fn emit_phi_stores(&mut self, bb: BasicBlockId) {
        let pos = *self.code.blocks[bb].instrs.last().unwrap();
        let mut stores: Vec<(B::VReg, Value, Representation)> = Vec::new();
        for succ in self.code.blocks[bb].successors() {
            for &sid in &self.code.blocks[succ].instrs {
                if let InstrData::Phi { inputs } = &self.code[sid].data {
                    for (k, &in_bb) in inputs.iter().enumerate() {
                        if in_bb == bb {
                            stores.push((
                                self.phi_regs[&sid],
                                self.code[sid].args[k].value,
                                self.rep_of(Value::Instr(sid)),
                            ));
                        }
                    }
                }
            }
        }
        for (reg, val, rep) in stores {
            let v = self.load(pos, val, self.code.value_type(val), rep);
            self.b.store_register(reg, v);
        }
    }

    // ---- main loop ----

    fn run(mut self) -> Option<B> {
        // Function prologue: cache the pool base, remember the stack base for
        // local slots, and reserve one slot per simultaneously live value.
        let pool_cell = self.b.const_ptr(self.ctx.pool.base_addr());
        self.pool_base = Some(self.b.load(pool_cell, 0, ValTy::Ptr));
        self.basepointer = Some(self.nodestack_ptr());
        self.inc_stack(self.num_locals, true);

        let order = visitor::lowering_order(self.code);
        for &bb in &order {
            let label = self.b.new_label();
            self.block_labels.insert(bb, label);
        }

        // Phi registers are allocated up front in the phi's representation.
        let phis: Vec<(InstrId, Representation)> = {
            let mut phis = Vec::new();
            self.code.each_instr(|id, instr| {
                if matches!(instr.data, InstrData::Phi { .. }) {
                    phis.push((id, self.rep_of(Value::Instr(id))));
                }
            });
            phis
        };
        for (id, rep) in phis {
            let ty = self.rep_ty(rep);
            let reg = self.b.new_register(ty);
            self.phi_regs.insert(id, reg);
        }

        // One local cache slot per (environment, name) pair observed across
        // the function, for environments this code creates itself.
        let code = self.code;
        for (_, instr) in code.instrs.iter() {
            let name = match &instr.data {
                InstrData::LdVar { name } => name.clone(),
                InstrData::StVar { name, .. } => name.clone(),
                _ => continue,
            };
            if let Some(env) = instr.env() {
                let is_mkenv = env
                    .as_instr()
                    .is_some_and(|e| matches!(self.code[e].data, InstrData::MkEnv { .. }));
                if is_mkenv {
                    let next = self.bindings_cache.len() as u32 * 8;
                    self.bindings_cache.entry((env, name)).or_insert(next);
                }
            }
        }
        if !self.bindings_cache.is_empty() {
            let total = self.bindings_cache.len() as u32 * 8;
            self.cache_base = Some(self.b.alloca(total));
        }

        for &bb in &order {
            self.b.bind_label(self.block_labels[&bb]);
            let instrs = self.code.blocks[bb].instrs.clone();
            for &id in &instrs {
                if !self.success {
                    return None;
                }
                self.emit_instr(bb, id);
                if self.success
                    && self.rep_of(Value::Instr(id)) == Representation::Boxed
                    && self.needs_ensure_named.contains(&id)
                {
                    if let Some(&reg) = self.value_map.get(&id) {
                        self.ensure_named(reg);
                    }
                }
            }
            if !self.success {
                return None;
            }
            if self.code.blocks[bb].is_jmp() {
                self.emit_phi_stores(bb);
                let next = self.code.blocks[bb].next.expand().unwrap();
                self.b.jump(self.block_labels[&next]);
            }
        }

        self.success.then_some(self.b)
    }

    fn emit_instr(&mut self, bb: BasicBlockId, id: InstrId) {
        use InstrData::*;
        let code = self.code;
        let instr = &code[id];
        match &instr.data {
            Nop => {}
            // Constants are materialized at their uses.
            LdConst { .. } => {}

            PirCopy => {
                let v = self.load_same(id, instr.args[0].value);
                self.set_val(id, v);
            }

            LdArg { index } => {
                let ofs = (*index as usize * STACK_CELL_SIZE + STACK_CELL_VALUE_OFS) as i64;
                let args = self.b.param(PARAM_ARGS);
                let v = self.b.load(args, ofs, ValTy::Ptr);
                self.set_val(id, v);
            }

            LdFunctionEnv => {
                let env = self.b.param(PARAM_ENV);
                self.set_val(id, env);
            }

            LdVar { name } => {
                let env = instr.env().unwrap();
                let name = name.clone();
                let res = self.emit_ldvar(id, &name, env);
                self.check_missing(res);
                self.check_unbound(res);
                self.set_val(id, res);
            }

            StVar { is_st_arg, name } => {
                if *is_st_arg {
                    self.fail("StArg");
                    return;
                }
                let name = name.clone();
                self.emit_stvar(id, &name);
            }

            LdFun { name } => {
                let name = name.clone();
                self.gc_safepoint(id, None, false);
                let sym = self.ctx.intern(&name);
                let sym = self.b.const_ptr(sym.addr());
                let env = {
                    let e = instr.env().unwrap();
                    self.load_sxp(id, e)
                };
                let res = self
                    .b
                    .call_native(&NativeBuiltins::LDFUN, &[sym, env])
                    .unwrap();
                self.check_missing(res);
                self.check_unbound(res);
                self.set_val(id, res);
                self.set_visible(1);
            }

            MkArg { prom, .. } => {
                let Some(&prom_idx) = self.prom_map.get(prom) else {
                    self.fail("promise without an index");
                    return;
                };
                self.gc_safepoint(id, Some(1), true);
                let code_p = self.b.param(PARAM_CODE);
                let idx = self.b.const_int(prom_idx as i32);
                let env = {
                    let e = instr.env().unwrap();
                    self.load_sxp(id, e)
                };
                let eager = {
                    let e = instr.args[0].value;
                    self.load_sxp(id, e)
                };
                let res = self
                    .b
                    .call_native(&NativeBuiltins::CREATE_PROMISE, &[code_p, idx, env, eager])
                    .unwrap();
                self.set_val(id, res);
            }

            MkEnv { stub, context, .. } => {
                if *stub {
                    self.fail("stub MkEnv");
                    return;
                }
                let context = *context;
                self.emit_mkenv(id, context);
            }

            Force { .. } => {
                let input = instr.args[0].value;
                // A reflection-free eager promise is its eager value.
                let eager = input.as_instr().and_then(|mid| match &self.code[mid].data {
                    MkArg {
                        no_reflection: true,
                        ..
                    } => {
                        let eager = self.code[mid].args[0].value;
                        (eager != Value::Singleton(Singleton::UnboundValue)).then_some(eager)
                    }
                    _ => None,
                });
                if let Some(eager) = eager {
                    let v = self.load_same(id, eager);
                    self.set_val(id, v);
                    return;
                }
                let arg = self.load_sxp(id, input);
                let res = if !instr.effects.contains(Effect::Force) {
                    self.depromise(arg)
                } else {
                    self.force_emit(id, arg)
                };
                self.set_val(id, res);
            }

            ChkMissing => {
                let arg = instr.args[0].value;
                if self.rep_of(arg) == Representation::Boxed {
                    let v = self.load_sxp(id, arg);
                    self.check_missing(v);
                }
                let v = self.load_same(id, arg);
                self.set_val(id, v);
            }

            CastType { .. } => {
                let arg = instr.args[0].value;
                // An unchecked cast: load the input at the asserted type.
                let typ = instr.typ;
                let rep = self.rep_of(Value::Instr(id));
                let v = self.load(id, arg, typ, rep);
                self.set_val(id, v);
            }

            AsLogical => self.emit_as_logical(id),
            AsTest => self.emit_as_test(id),
            IsType { test } => {
                let test = *test;
                self.emit_is_type(id, test);
            }

            IsObject => {
                if self.rep_of(Value::Instr(id)) != Representation::Integer {
                    self.fail("boxed IsObject result");
                    return;
                }
                let arg = instr.args[0].value;
                if self.rep_of(arg) == Representation::Boxed {
                    let a = self.load_sxp(id, arg);
                    let res = self.is_obj(a);
                    self.set_val(id, res);
                } else {
                    let zero = self.b.const_int(0);
                    self.set_val(id, zero);
                }
            }

            Identical => {
                let (x, y) = (instr.args[0].value, instr.args[1].value);
                let (rx, ry) = (self.rep_of(x), self.rep_of(y));
                let res = if rx == ry && rx != Representation::Boxed {
                    let a = self.load_val(id, x);
                    let b = self.load_val(id, y);
                    self.b.cmp(CmpMode::Eq, self.rep_ty(rx), a, b)
                } else {
                    let a = self.load_sxp(id, x);
                    let a = self.depromise(a);
                    let b = self.load_sxp(id, y);
                    let b = self.depromise(b);
                    self.b.cmp(CmpMode::Eq, ValTy::Ptr, a, b)
                };
                self.set_val(id, res);
            }

            Eq => self.compile_relop(id, RelopInsn::Cmp(CmpMode::Eq), BinopKind::Eq),
            Neq => self.compile_relop(id, RelopInsn::Cmp(CmpMode::Ne), BinopKind::Ne),
            Lt => self.compile_relop(id, RelopInsn::Cmp(CmpMode::Lt), BinopKind::Lt),
            Lte => self.compile_relop(id, RelopInsn::Cmp(CmpMode::Le), BinopKind::Le),
            Gt => self.compile_relop(id, RelopInsn::Cmp(CmpMode::Gt), BinopKind::Gt),
            Gte => self.compile_relop(id, RelopInsn::Cmp(CmpMode::Ge), BinopKind::Ge),
            LAnd => self.compile_relop(id, RelopInsn::And, BinopKind::LAnd),
            LOr => self.compile_relop(id, RelopInsn::Or, BinopKind::LOr),

            Add => self.compile_binop(id, AluOp::Add, BinopKind::Add),
            Sub => self.compile_binop(id, AluOp::Sub, BinopKind::Sub),
            Mul => self.compile_binop(id, AluOp::Mul, BinopKind::Mul),
            Div => self.compile_binop(id, AluOp::Div, BinopKind::Div),

            Branch => {
                let cond = {
                    let v = instr.args[0].value;
                    self.load(id, v, self.code.value_type(v), Representation::Integer)
                };
                self.emit_phi_stores(bb);
                let block = &self.code.blocks[bb];
                let t = self.block_labels[&block.true_branch().unwrap()];
                let f = self.block_labels[&block.false_branch().unwrap()];
                self.b.branch_if(cond, t);
                self.b.jump(f);
            }

            Checkpoint => {
                // The deopt side is only entered through an Assume.
                self.emit_phi_stores(bb);
                let next = self.code.blocks[bb].next.expand().unwrap();
                self.b.jump(self.block_labels[&next]);
            }

            Assume { assume_true } => {
                let assume_true = *assume_true;
                let test = {
                    let v = instr.args[0].value;
                    self.load(id, v, self.code.value_type(v), Representation::Integer)
                };
                let Some(cp) = instr.args[1].value.as_instr() else {
                    self.fail("assume without checkpoint");
                    return;
                };
                let cp_bb = self.code[cp].bb;
                let Some(deopt_bb) = self.code.blocks[cp_bb].deopt_branch() else {
                    self.fail("checkpoint without deopt branch");
                    return;
                };
                let target = self.block_labels[&deopt_bb];
                if assume_true {
                    self.b.branch_if_not(test, target);
                } else {
                    self.b.branch_if(test, target);
                }
            }

            Phi { .. } => {
                let reg = self.phi_regs[&id];
                self.set_val(id, reg);
            }

            Return => {
                let res = {
                    let v = instr.args[0].value;
                    self.load_sxp(id, v)
                };
                self.dec_stack(self.num_locals);
                self.b.ret(res);
            }

            ScheduledDeopt { frames } => {
                // PIR frames go left-to-right; the runtime wants
                // top-of-stack order.
                let meta = DeoptMetadata {
                    frames: frames
                        .iter()
                        .rev()
                        .map(|f| DeoptFrame {
                            code: f.code,
                            pc: f.pc,
                            stack_size: f.stack_size,
                            in_promise: f.in_promise,
                        })
                        .collect(),
                };
                let meta = self.ctx.add_deopt_metadata(meta) as u64;
                let args: Vec<Value> = instr.args.iter().map(|a| a.value).collect();
                let res = self.with_call_frame(id, &args, |l| {
                    let code_p = l.b.param(PARAM_CODE);
                    let closure = l.b.param(PARAM_CLOSURE);
                    let m = l.b.const_ptr(meta);
                    let args_p = l.b.param(PARAM_ARGS);
                    l.b.call_native(&NativeBuiltins::DEOPT, &[code_p, closure, m, args_p])
                        .unwrap()
                });
                self.b.ret(res);
            }

            CallSafeBuiltin { builtin } => {
                let builtin = *builtin;
                let args = self.call_args(id);
                let src_idx = instr.src_idx;
                let blt = self.ctx.builtin_value(builtin.0).addr();
                let nil = self.ctx.singletons.nil.addr();
                let res = self.with_call_frame(id, &args, |l| {
                    let code_p = l.b.param(PARAM_CODE);
                    let src = l.b.const_int(src_idx as i32);
                    let blt = l.b.const_ptr(blt);
                    // Safe builtins never observe their environment.
                    let env = l.b.const_ptr(nil);
                    let n = l.b.const_int(args.len() as i32);
                    let ctx_p = l.b.param(PARAM_CTX);
                    l.b.call_native(
                        &NativeBuiltins::CALL_BUILTIN,
                        &[code_p, src, blt, env, n, ctx_p],
                    )
                    .unwrap()
                });
                self.set_val(id, res);
            }

            CallBuiltin { builtin } => {
                let builtin = *builtin;
                let args = self.call_args(id);
                let src_idx = instr.src_idx;
                let blt = self.ctx.builtin_value(builtin.0).addr();
                let env = {
                    let e = instr.env().unwrap();
                    self.load_sxp(id, e)
                };
                let res = self.with_call_frame(id, &args, |l| {
                    let code_p = l.b.param(PARAM_CODE);
                    let src = l.b.const_int(src_idx as i32);
                    let blt = l.b.const_ptr(blt);
                    let n = l.b.const_int(args.len() as i32);
                    let ctx_p = l.b.param(PARAM_CTX);
                    l.b.call_native(
                        &NativeBuiltins::CALL_BUILTIN,
                        &[code_p, src, blt, env, n, ctx_p],
                    )
                    .unwrap()
                });
                self.set_val(id, res);
            }

            Call => {
                let args = self.call_args(id);
                let src_idx = instr.src_idx;
                let cls = {
                    let c = instr.args[1].value;
                    self.load_sxp(id, c)
                };
                let env = {
                    let e = instr.env().unwrap();
                    self.load_sxp(id, e)
                };
                let res = self.with_call_frame(id, &args, |l| {
                    let code_p = l.b.param(PARAM_CODE);
                    let src = l.b.const_int(src_idx as i32);
                    let n = l.b.const_int(args.len() as i32);
                    let ctx_p = l.b.param(PARAM_CTX);
                    l.b.call_native(&NativeBuiltins::CALL, &[code_p, src, cls, env, n, ctx_p])
                        .unwrap()
                });
                self.set_val(id, res);
            }

            Invisible => self.set_visible(0),
            Visible => self.set_visible(1),

            Unreachable => {
                // Permitted to be reached only through dead control flow;
                // emits nothing.
            }

            _ => self.fail(instr.data.name()),
        }
    }

    fn emit_ldvar(&mut self, id: InstrId, name: &Sym, env: Value) -> B::VReg {
        let sym = self.ctx.intern(name);
        let sym_c = self.b.const_ptr(sym.addr());

        if let Some(&offset) = self.bindings_cache.get(&(env, name.clone())) {
            let base = self.cache_base.unwrap();
            let res = self.b.new_register(ValTy::Ptr);
            let done = self.b.new_label();
            let miss = self.b.new_label();

            let cache = self.b.load(base, offset as i64, ValTy::Ptr);
            let one = self.b.const_ptr(1);
            let empty = self.b.cmp(CmpMode::Le, ValTy::Ptr, cache, one);
            self.b.branch_if(empty, miss);
            let val = self.b.load(cache, CAR_OFS as i64, ValTy::Ptr);
            let unbound = self.b.const_ptr(self.ctx.singletons.unbound_value.addr());
            let t = self.b.cmp(CmpMode::Eq, ValTy::Ptr, val, unbound);
            self.b.branch_if(t, miss);
            self.b.store_register(res, val);
            self.b.jump(done);

            self.b.bind_label(miss);
            let ofs = self.b.const_ptr(offset as u64);
            let slot = self.b.alu(AluOp::Add, ValTy::Ptr, base, ofs);
            let env_v = self.load_sxp(id, env);
            let r = self
                .b
                .call_native(&NativeBuiltins::LDVAR_CACHE_MISS, &[sym_c, env_v, slot])
                .unwrap();
            self.b.store_register(res, r);

            self.b.bind_label(done);
            res
        } else {
            let env_v = self.load_sxp(id, env);
            self.b
                .call_native(&NativeBuiltins::LDVAR, &[sym_c, env_v])
                .unwrap()
        }
    }

    fn emit_stvar(&mut self, id: InstrId, name: &Sym) {
        let env = self.code[id].env().unwrap();
        let sym = self.ctx.intern(name);
        let sym_c = self.b.const_ptr(sym.addr());
        let val = {
            let v = self.code[id].args[0].value;
            self.load_sxp(id, v)
        };

        if let Some(&offset) = self.bindings_cache.get(&(env, name.clone())) {
            let base = self.cache_base.unwrap();
            let done = self.b.new_label();
            let miss = self.b.new_label();

            let cache = self.b.load(base, offset as i64, ValTy::Ptr);
            let one = self.b.const_ptr(1);
            let empty = self.b.cmp(CmpMode::Le, ValTy::Ptr, cache, one);
            self.b.branch_if(empty, miss);
            let cur = self.b.load(cache, CAR_OFS as i64, ValTy::Ptr);
            let unbound = self.b.const_ptr(self.ctx.singletons.unbound_value.addr());
            let t = self.b.cmp(CmpMode::Eq, ValTy::Ptr, cur, unbound);
            self.b.branch_if(t, miss);

            // The cache-miss builtin owns the write barrier; the fast path
            // writes the cell directly.
            self.b.store(cache, CAR_OFS as i64, val, ValTy::Ptr);
            self.b.jump(done);

            self.b.bind_label(miss);
            let env_v = self.load_sxp(id, env);
            self.b
                .call_native(&NativeBuiltins::STVAR, &[sym_c, val, env_v]);

            self.b.bind_label(done);
        } else {
            let env_v = self.load_sxp(id, env);
            self.b
                .call_native(&NativeBuiltins::STVAR, &[sym_c, val, env_v]);
        }
    }

    fn emit_mkenv(&mut self, id: InstrId, context: i32) {
        let InstrData::MkEnv { names, missing, .. } = &self.code[id].data else {
            unreachable!()
        };
        let names = names.clone();
        let missing = missing.clone();
        let nargs = names.len();

        self.gc_safepoint(id, Some(nargs as u64 + 1), true);

        let mut arglist = self.b.const_ptr(self.ctx.singletons.nil.addr());
        for i in (0..nargs).rev() {
            let sym = self.ctx.intern(&names[i]);
            let name_c = self.b.const_ptr(sym.addr());
            arglist = if missing[i] {
                self.b
                    .call_native(&NativeBuiltins::CONS_NR_TAGGED_MISSING, &[name_c, arglist])
                    .unwrap()
            } else {
                let v = {
                    let val = self.code[id].args[i].value;
                    self.load_sxp(id, val)
                };
                self.b
                    .call_native(&NativeBuiltins::CONS_NR_TAGGED, &[v, name_c, arglist])
                    .unwrap()
            };
        }

        let parent = {
            let e = self.code[id].env().unwrap();
            self.load_sxp(id, e)
        };
        let ctx_c = self.b.const_int(context);
        let res = self
            .b
            .call_native(
                &NativeBuiltins::CREATE_ENVIRONMENT,
                &[parent, arglist, ctx_c],
            )
            .unwrap();
        self.set_val(id, res);

        // A new environment invalidates its binding cache slots.
        let slots: Vec<u32> = self
            .bindings_cache
            .iter()
            .filter(|((env, _), _)| *env == Value::Instr(id))
            .map(|(_, &ofs)| ofs)
            .collect();
        if !slots.is_empty() {
            let base = self.cache_base.unwrap();
            let zero = self.b.const_ptr(0);
            for ofs in slots {
                self.b.store(base, ofs as i64, zero, ValTy::Ptr);
            }
        }
    }

    fn emit_as_logical(&mut self, id: InstrId) {
        let arg = self.code[id].args[0].value;
        let r1 = self.rep_of(arg);
        debug_assert_eq!(self.rep_of(Value::Instr(id)), Representation::Integer);

        match r1 {
            Representation::Boxed => {
                let a = self.load_sxp(id, arg);
                let res = self
                    .b
                    .call_native(&NativeBuiltins::AS_LOGICAL, &[a])
                    .unwrap();
                self.set_val(id, res);
            }
            Representation::Real => {
                let narg = self.load(id, arg, self.code.value_type(arg), Representation::Real);
                let res = self.b.new_register(ValTy::Int);
                let conv = self.b.convert(narg, ValTy::Int);
                self.b.store_register(res, conv);

                let no_na = self.b.new_label();
                let not_na = self.b.cmp(CmpMode::Eq, ValTy::Real, narg, narg);
                self.b.branch_if(not_na, no_na);
                let na = self.b.const_int(NA_INTEGER);
                self.b.store_register(res, na);
                self.b.bind_label(no_na);

                self.set_val(id, res);
            }
            _ => {
                let v = self.load(id, arg, self.code.value_type(arg), Representation::Integer);
                self.set_val(id, v);
            }
        }
    }

    fn emit_as_test(&mut self, id: InstrId) {
        debug_assert_eq!(self.rep_of(Value::Instr(id)), Representation::Integer);

        let mut arg = self.code[id].args[0].value;
        // Look through an AsLogical feeding the test.
        if let Some(aid) = arg.as_instr() {
            if matches!(self.code[aid].data, InstrData::AsLogical) {
                arg = self.code[aid].args[0].value;
            }
        }

        if self.rep_of(arg) == Representation::Boxed {
            let a = self.load_sxp(id, arg);
            let res = self.b.call_native(&NativeBuiltins::AS_TEST, &[a]).unwrap();
            self.set_val(id, res);
            return;
        }

        let not_na = self.b.new_label();
        if self.rep_of(arg) == Representation::Real {
            let narg = self.load(id, arg, self.code.value_type(arg), Representation::Real);
            let is_not_na = self.b.cmp(CmpMode::Eq, ValTy::Real, narg, narg);
            let conv = self.b.convert(narg, ValTy::Int);
            self.set_val(id, conv);
            self.b.branch_if(is_not_na, not_na);
        } else {
            let narg = self.load(id, arg, self.code.value_type(arg), Representation::Integer);
            let na = self.b.const_int(NA_INTEGER);
            let is_not_na = self.b.cmp(CmpMode::Ne, ValTy::Int, narg, na);
            self.set_val(id, narg);
            self.b.branch_if(is_not_na, not_na);
        }
        self.call_error();
        self.b.bind_label(not_na);
    }

    fn emit_is_type(&mut self, id: InstrId, test: PirType) {
        if self.rep_of(Value::Instr(id)) != Representation::Integer {
            self.fail("boxed IsType result");
            return;
        }
        let arg = self.code[id].args[0].value;
        if self.rep_of(arg) != Representation::Boxed {
            // An unboxed value trivially satisfies its own scalar type.
            let one = self.b.const_int(1);
            self.set_val(id, one);
            return;
        }

        let a = self.load_sxp(id, arg);
        let mut res = if test.is_a(RType::Integer.into()) {
            self.cmp_sexptype(a, SexpType::Int)
        } else if test.is_a(RType::Real.into()) {
            self.cmp_sexptype(a, SexpType::Real)
        } else if test.is_a(RType::Logical.into()) {
            self.cmp_sexptype(a, SexpType::Lgl)
        } else {
            self.fail("IsType for this type");
            return;
        };
        if test.is_scalar() {
            let len = self.b.call_native(&NativeBuiltins::LENGTH, &[a]).unwrap();
            let one = self.b.const_int(1);
            let is_scalar = self.b.cmp(CmpMode::Eq, ValTy::Int, len, one);
            res = self.b.alu(AluOp::And, ValTy::Int, res, is_scalar);
        }
        let zero = self.b.const_int(0);
        let res = self.b.cmp(CmpMode::Ne, ValTy::Int, res, zero);
        self.set_val(id, res);
    }
}
