//! Builder API for a `Code` unit.

use crate::{
    code::{BasicBlockId, Code, PromiseId},
    effects::Effect,
    instr::{
        AssumptionContext, CastKind, ClosureHandle, DeoptReason, FrameInfo, InstrArg, InstrData,
        Instruction, RBuiltinId, Sym, TypecheckKind,
    },
    typ::{NativeType, PirType, RType},
    value::{Singleton, Value},
};
use smallvec::{smallvec, SmallVec};

pub struct CodeBuilder {
    code: Code,
    current_block: BasicBlockId,
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBuilder {
    pub fn new() -> Self {
        let code = Code::new();
        let current_block = code.entry;
        CodeBuilder {
            code,
            current_block,
        }
    }

    pub fn code_mut(&mut self) -> &mut Code {
        &mut self.code
    }

    pub fn create_block(&mut self) -> BasicBlockId {
        self.code.create_block()
    }

    pub fn switch_to_block(&mut self, block: BasicBlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> BasicBlockId {
        self.current_block
    }

    /// End the current block with an implicit jump.
    pub fn fall_through(&mut self, target: BasicBlockId) {
        self.code.blocks[self.current_block].next = target.into();
    }

    pub fn finish(self) -> Code {
        self.code
    }

    fn push(&mut self, data: InstrData, args: SmallVec<[InstrArg; 4]>, typ: PirType, src_idx: u32) -> Value {
        let mut instr = Instruction::new(data, args, typ, src_idx);
        instr.bb = self.current_block;
        let id = self.code.instrs.push(instr);
        self.code.blocks[self.current_block].instrs.push(id);
        // Refine type and effects from the argument types known now.
        let (t, e) = {
            let i = &self.code.instrs[id];
            let get = |v: Value| v.typ(&self.code);
            (
                i.infer_type(&self.code, &get),
                i.infer_effects(&self.code, &get),
            )
        };
        self.code.instrs[id].typ = t;
        self.code.instrs[id].effects = e;
        Value::Instr(id)
    }

    // ---- loads and stores ----

    pub fn ld_const(&mut self, idx: u32, typ: PirType) -> Value {
        self.push(InstrData::LdConst { idx }, smallvec![], typ, 0)
    }

    pub fn ld_var(&mut self, name: impl Into<Sym>, env: Value) -> Value {
        self.push(
            InstrData::LdVar { name: name.into() },
            smallvec![InstrArg::new(env, RType::Env.into())],
            PirType::any(),
            0,
        )
    }

    pub fn ld_var_super(&mut self, name: impl Into<Sym>, env: Value) -> Value {
        self.push(
            InstrData::LdVarSuper { name: name.into() },
            smallvec![InstrArg::new(env, RType::Env.into())],
            PirType::any(),
            0,
        )
    }

    pub fn ld_fun(&mut self, name: impl Into<Sym>, env: Value) -> Value {
        self.push(
            InstrData::LdFun { name: name.into() },
            smallvec![
                InstrArg::new(
                    Value::Singleton(Singleton::TombstoneClosure),
                    PirType::any()
                ),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::closure(),
            0,
        )
    }

    /// The statically assumed type of the argument is supplied by the caller;
    /// without assumptions it is `PirType::any()`.
    pub fn ld_arg(&mut self, index: u32, typ: PirType) -> Value {
        self.push(InstrData::LdArg { index }, smallvec![], typ, 0)
    }

    pub fn ld_function_env(&mut self) -> Value {
        self.push(InstrData::LdFunctionEnv, smallvec![], RType::Env.into(), 0)
    }

    pub fn ld_dots(&mut self, env: Value) -> Value {
        self.push(
            InstrData::LdDots,
            smallvec![InstrArg::new(env, RType::Env.into())],
            PirType::dots_arg(),
            0,
        )
    }

    pub fn st_var(&mut self, name: impl Into<Sym>, val: Value, env: Value) -> Value {
        self.push(
            InstrData::StVar {
                name: name.into(),
                is_st_arg: false,
            },
            smallvec![
                InstrArg::new(val, PirType::val()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::voyd(),
            0,
        )
    }

    /// A `StVar` with the argument-store flag set.
    pub fn st_arg(&mut self, name: impl Into<Sym>, val: Value, env: Value) -> Value {
        self.push(
            InstrData::StVar {
                name: name.into(),
                is_st_arg: true,
            },
            smallvec![
                InstrArg::new(val, PirType::any()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::voyd(),
            0,
        )
    }

    pub fn st_var_super(&mut self, name: impl Into<Sym>, val: Value, env: Value) -> Value {
        self.push(
            InstrData::StVarSuper { name: name.into() },
            smallvec![
                InstrArg::new(val, PirType::val()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::voyd(),
            0,
        )
    }

    pub fn missing(&mut self, name: impl Into<Sym>, env: Value) -> Value {
        self.push(
            InstrData::Missing { name: name.into() },
            smallvec![InstrArg::new(env, RType::Env.into())],
            PirType::simple_scalar_logical(),
            0,
        )
    }

    // ---- environments ----

    pub fn mk_env(
        &mut self,
        parent: Value,
        locals: &[(Sym, Value, bool)],
        context: i32,
    ) -> Value {
        let mut args: SmallVec<[InstrArg; 4]> = SmallVec::new();
        let mut names = Vec::with_capacity(locals.len());
        let mut missing = Vec::with_capacity(locals.len());
        for (name, val, miss) in locals {
            names.push(name.clone());
            missing.push(*miss);
            args.push(InstrArg::new(*val, PirType::any()));
        }
        args.push(InstrArg::new(parent, RType::Env.into()));
        self.push(
            InstrData::MkEnv {
                names,
                missing,
                stub: false,
                context,
            },
            args,
            RType::Env.into(),
            0,
        )
    }

    pub fn materialize_env(&mut self, env: Value) -> Value {
        self.push(
            InstrData::MaterializeEnv,
            smallvec![InstrArg::new(env, RType::Env.into())],
            RType::Env.into(),
            0,
        )
    }

    pub fn is_env_stub(&mut self, env: Value) -> Value {
        self.push(
            InstrData::IsEnvStub,
            smallvec![InstrArg::new(env, RType::Env.into())],
            PirType::test(),
            0,
        )
    }

    // ---- promises ----

    pub fn mk_arg(&mut self, prom: PromiseId, eager: Value, env: Value, src_idx: u32) -> Value {
        self.push(
            InstrData::MkArg {
                prom,
                no_reflection: false,
            },
            smallvec![
                InstrArg::new(eager, PirType::any()),
                InstrArg::new(env, RType::Env.into()),
            ],
            RType::Prom.into(),
            src_idx,
        )
    }

    pub fn update_promise(&mut self, prom: Value, val: Value) -> Value {
        self.push(
            InstrData::UpdatePromise,
            smallvec![
                InstrArg::new(prom, RType::Prom.into()),
                InstrArg::new(val, PirType::val()),
            ],
            PirType::voyd(),
            0,
        )
    }

    pub fn force(&mut self, input: Value, frame_state: Value, env: Value, src_idx: u32) -> Value {
        let typ = input.typ(&self.code).forced();
        let v = self.push(
            InstrData::Force { strict: false },
            smallvec![
                InstrArg::new(input, PirType::any()),
                InstrArg::new(frame_state, NativeType::FrameState.into()),
                InstrArg::new(env, RType::Env.into()),
            ],
            typ,
            src_idx,
        );
        let id = v.as_instr().unwrap();
        // A reflection-free promise does not need its environment, and the
        // effect set shrinks once the input type is known.
        let reflection_free = matches!(
            input.as_instr().map(|mk| &self.code.instrs[mk].data),
            Some(InstrData::MkArg {
                no_reflection: true,
                ..
            })
        );
        if reflection_free {
            self.code.instrs[id].elide_env();
            self.code.instrs[id].effects.reset(Effect::Reflection);
        }
        let inferred = {
            let i = &self.code.instrs[id];
            i.infer_effects(&self.code, &|v| v.typ(&self.code))
        };
        self.code.instrs[id].effects = inferred;
        v
    }

    pub fn chk_missing(&mut self, input: Value, src_idx: u32) -> Value {
        // ChkMissing on the missing value itself errors; keeping the input
        // type then avoids a void result confusing consumers in dead code.
        let typ = if input.is_singleton(Singleton::MissingArg) {
            input.typ(&self.code)
        } else {
            input.typ(&self.code).not_missing()
        };
        self.push(
            InstrData::ChkMissing,
            smallvec![InstrArg::new(input, PirType::any())],
            typ,
            src_idx,
        )
    }

    pub fn chk_closure(&mut self, input: Value) -> Value {
        self.push(
            InstrData::ChkClosure,
            smallvec![InstrArg::new(input, PirType::val())],
            PirType::closure(),
            0,
        )
    }

    // ---- closures ----

    pub fn mk_cls(&mut self, formals: Value, body: Value, src: Value, lexical_env: Value) -> Value {
        self.push(
            InstrData::MkCls,
            smallvec![
                InstrArg::new(formals, PirType::list()),
                InstrArg::new(body, RType::Code.into()),
                InstrArg::new(src, PirType::any()),
                InstrArg::new(lexical_env, RType::Env.into()),
            ],
            PirType::closure(),
            0,
        )
    }

    pub fn mk_fun_cls(&mut self, cls: ClosureHandle, lexical_env: Value) -> Value {
        self.push(
            InstrData::MkFunCls { cls },
            smallvec![InstrArg::new(lexical_env, RType::Env.into())],
            PirType::closure(),
            0,
        )
    }

    // ---- arithmetic and relational ----

    fn binop(&mut self, data: InstrData, lhs: Value, rhs: Value, env: Value, src_idx: u32) -> Value {
        self.push(
            data,
            smallvec![
                InstrArg::new(lhs, PirType::val()),
                InstrArg::new(rhs, PirType::val()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::val_or_lazy(),
            src_idx,
        )
    }

    pub fn add(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Add, l, r, env, src)
    }

    pub fn sub(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Sub, l, r, env, src)
    }

    pub fn mul(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Mul, l, r, env, src)
    }

    pub fn div(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Div, l, r, env, src)
    }

    pub fn idiv(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::IDiv, l, r, env, src)
    }

    pub fn mod_(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Mod, l, r, env, src)
    }

    pub fn pow(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Pow, l, r, env, src)
    }

    pub fn lt(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Lt, l, r, env, src)
    }

    pub fn lte(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Lte, l, r, env, src)
    }

    pub fn gt(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Gt, l, r, env, src)
    }

    pub fn gte(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Gte, l, r, env, src)
    }

    pub fn eq(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Eq, l, r, env, src)
    }

    pub fn neq(&mut self, l: Value, r: Value, env: Value, src: u32) -> Value {
        self.binop(InstrData::Neq, l, r, env, src)
    }

    pub fn land(&mut self, l: Value, r: Value) -> Value {
        self.push(
            InstrData::LAnd,
            smallvec![
                InstrArg::new(l, PirType::val()),
                InstrArg::new(r, PirType::val()),
            ],
            PirType::simple_scalar_logical(),
            0,
        )
    }

    pub fn lor(&mut self, l: Value, r: Value) -> Value {
        self.push(
            InstrData::LOr,
            smallvec![
                InstrArg::new(l, PirType::val()),
                InstrArg::new(r, PirType::val()),
            ],
            PirType::simple_scalar_logical(),
            0,
        )
    }

    fn unop(&mut self, data: InstrData, v: Value, env: Value, src_idx: u32) -> Value {
        self.push(
            data,
            smallvec![
                InstrArg::new(v, PirType::val()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::val_or_lazy(),
            src_idx,
        )
    }

    pub fn not(&mut self, v: Value, env: Value, src: u32) -> Value {
        self.unop(InstrData::Not, v, env, src)
    }

    pub fn plus(&mut self, v: Value, env: Value, src: u32) -> Value {
        self.unop(InstrData::Plus, v, env, src)
    }

    pub fn minus(&mut self, v: Value, env: Value, src: u32) -> Value {
        self.unop(InstrData::Minus, v, env, src)
    }

    // ---- indexing ----

    pub fn extract1_1d(&mut self, vec: Value, idx: Value, env: Value, src: u32) -> Value {
        self.push(
            InstrData::Extract1_1D,
            smallvec![
                InstrArg::new(vec, PirType::val()),
                InstrArg::new(idx, PirType::any()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::val_or_lazy(),
            src,
        )
    }

    pub fn extract2_1d(&mut self, vec: Value, idx: Value, env: Value, src: u32) -> Value {
        self.push(
            InstrData::Extract2_1D,
            smallvec![
                InstrArg::new(vec, PirType::val()),
                InstrArg::new(idx, PirType::any()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::val_or_lazy(),
            src,
        )
    }

    pub fn extract1_2d(&mut self, vec: Value, i1: Value, i2: Value, env: Value, src: u32) -> Value {
        self.push(
            InstrData::Extract1_2D,
            smallvec![
                InstrArg::new(vec, PirType::val()),
                InstrArg::new(i1, PirType::any()),
                InstrArg::new(i2, PirType::any()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::val_or_lazy(),
            src,
        )
    }

    pub fn extract2_2d(&mut self, vec: Value, i1: Value, i2: Value, env: Value, src: u32) -> Value {
        self.push(
            InstrData::Extract2_2D,
            smallvec![
                InstrArg::new(vec, PirType::val()),
                InstrArg::new(i1, PirType::any()),
                InstrArg::new(i2, PirType::any()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::val_or_lazy(),
            src,
        )
    }

    pub fn extract1_3d(
        &mut self,
        vec: Value,
        i1: Value,
        i2: Value,
        i3: Value,
        env: Value,
        src: u32,
    ) -> Value {
        self.push(
            InstrData::Extract1_3D,
            smallvec![
                InstrArg::new(vec, PirType::val()),
                InstrArg::new(i1, PirType::any()),
                InstrArg::new(i2, PirType::any()),
                InstrArg::new(i3, PirType::any()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::val_or_lazy(),
            src,
        )
    }

    fn subassign(
        &mut self,
        data: InstrData,
        val: Value,
        vec: Value,
        idxs: &[Value],
        env: Value,
        src: u32,
    ) -> Value {
        let mut args: SmallVec<[InstrArg; 4]> = smallvec![
            InstrArg::new(val, PirType::val()),
            InstrArg::new(vec, PirType::val()),
        ];
        for &i in idxs {
            args.push(InstrArg::new(i, PirType::val()));
        }
        args.push(InstrArg::new(env, RType::Env.into()));
        self.push(data, args, PirType::val_or_lazy(), src)
    }

    pub fn subassign1_1d(&mut self, val: Value, vec: Value, idx: Value, env: Value, src: u32) -> Value {
        self.subassign(InstrData::Subassign1_1D, val, vec, &[idx], env, src)
    }

    pub fn subassign2_1d(&mut self, val: Value, vec: Value, idx: Value, env: Value, src: u32) -> Value {
        self.subassign(InstrData::Subassign2_1D, val, vec, &[idx], env, src)
    }

    pub fn subassign1_2d(
        &mut self,
        val: Value,
        mtx: Value,
        i1: Value,
        i2: Value,
        env: Value,
        src: u32,
    ) -> Value {
        self.subassign(InstrData::Subassign1_2D, val, mtx, &[i1, i2], env, src)
    }

    pub fn subassign2_2d(
        &mut self,
        val: Value,
        mtx: Value,
        i1: Value,
        i2: Value,
        env: Value,
        src: u32,
    ) -> Value {
        self.subassign(InstrData::Subassign2_2D, val, mtx, &[i1, i2], env, src)
    }

    pub fn subassign1_3d(
        &mut self,
        val: Value,
        mtx: Value,
        i1: Value,
        i2: Value,
        i3: Value,
        env: Value,
        src: u32,
    ) -> Value {
        self.subassign(InstrData::Subassign1_3D, val, mtx, &[i1, i2, i3], env, src)
    }

    // ---- type tests and casts ----

    pub fn is_type(&mut self, test: PirType, v: Value) -> Value {
        self.push(
            InstrData::IsType { test },
            smallvec![InstrArg::new(v, PirType::any())],
            PirType::test(),
            0,
        )
    }

    pub fn is(&mut self, check: TypecheckKind, v: Value) -> Value {
        self.push(
            InstrData::Is { check },
            smallvec![InstrArg::new(v, PirType::val())],
            PirType::simple_scalar_logical(),
            0,
        )
    }

    pub fn is_object(&mut self, v: Value) -> Value {
        self.push(
            InstrData::IsObject,
            smallvec![InstrArg::new(v, PirType::val())],
            PirType::test(),
            0,
        )
    }

    pub fn as_logical(&mut self, v: Value, src: u32) -> Value {
        self.push(
            InstrData::AsLogical,
            smallvec![InstrArg::new(v, PirType::val())],
            PirType::simple_scalar_logical(),
            src,
        )
    }

    pub fn as_test(&mut self, v: Value) -> Value {
        self.push(
            InstrData::AsTest,
            smallvec![InstrArg::new(v, PirType::any())],
            PirType::test(),
            0,
        )
    }

    pub fn check_true_false(&mut self, v: Value) -> Value {
        self.push(
            InstrData::CheckTrueFalse,
            smallvec![InstrArg::new(v, PirType::val())],
            PirType::simple_scalar_logical().not_na_or_nan(),
            0,
        )
    }

    pub fn cast_type(&mut self, kind: CastKind, from: PirType, to: PirType, v: Value) -> Value {
        self.push(
            InstrData::CastType { kind },
            smallvec![InstrArg::new(v, from)],
            to,
            0,
        )
    }

    pub fn identical(&mut self, a: Value, b: Value, t: PirType) -> Value {
        self.push(
            InstrData::Identical,
            smallvec![InstrArg::new(a, t), InstrArg::new(b, t)],
            PirType::test(),
            0,
        )
    }

    // ---- calls ----

    pub fn call(
        &mut self,
        frame_state: Value,
        callee: Value,
        args: &[Value],
        env: Value,
        src: u32,
    ) -> Value {
        let argtype = PirType::from(RType::Prom)
            | RType::Missing.into()
            | RType::ExpandedDots.into()
            | PirType::val();
        let mut a: SmallVec<[InstrArg; 4]> = smallvec![
            InstrArg::new(frame_state, NativeType::FrameState.into()),
            InstrArg::new(callee, PirType::closure()),
        ];
        for &v in args {
            a.push(InstrArg::new(v, argtype));
        }
        a.push(InstrArg::new(env, RType::Env.into()));
        self.push(InstrData::Call, a, PirType::val(), src)
    }

    pub fn named_call(
        &mut self,
        names: Vec<Sym>,
        callee: Value,
        args: &[Value],
        env: Value,
        src: u32,
    ) -> Value {
        assert_eq!(names.len(), args.len());
        let mut a: SmallVec<[InstrArg; 4]> =
            smallvec![InstrArg::new(callee, PirType::closure())];
        for &v in args {
            a.push(InstrArg::new(v, PirType::any()));
        }
        a.push(InstrArg::new(env, RType::Env.into()));
        self.push(InstrData::NamedCall { names }, a, PirType::val(), src)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn static_call(
        &mut self,
        cls: ClosureHandle,
        given_context: AssumptionContext,
        frame_state: Value,
        runtime_closure: Value,
        args: &[Value],
        env: Value,
        src: u32,
    ) -> Value {
        let mut a: SmallVec<[InstrArg; 4]> = smallvec![
            InstrArg::new(frame_state, NativeType::FrameState.into()),
            InstrArg::new(runtime_closure, PirType::closure()),
        ];
        for &v in args {
            a.push(InstrArg::new(v, PirType::any()));
        }
        a.push(InstrArg::new(env, RType::Env.into()));
        self.push(
            InstrData::StaticCall { cls, given_context },
            a,
            PirType::val(),
            src,
        )
    }

    pub fn call_builtin(&mut self, builtin: RBuiltinId, args: &[Value], env: Value, src: u32) -> Value {
        let mut a: SmallVec<[InstrArg; 4]> = SmallVec::new();
        for &v in args {
            a.push(InstrArg::new(v, PirType::val()));
        }
        a.push(InstrArg::new(env, RType::Env.into()));
        self.push(InstrData::CallBuiltin { builtin }, a, PirType::val(), src)
    }

    pub fn call_safe_builtin(&mut self, builtin: RBuiltinId, args: &[Value], src: u32) -> Value {
        let mut a: SmallVec<[InstrArg; 4]> = SmallVec::new();
        for &v in args {
            a.push(InstrArg::new(v, PirType::val()));
        }
        self.push(InstrData::CallSafeBuiltin { builtin }, a, PirType::val(), src)
    }

    // ---- control ----

    pub fn branch(&mut self, test: Value, if_true: BasicBlockId, if_false: BasicBlockId) -> Value {
        let v = self.push(
            InstrData::Branch,
            smallvec![InstrArg::new(test, PirType::test())],
            PirType::voyd(),
            0,
        );
        let block = &mut self.code.blocks[self.current_block];
        block.branch = if_true.into();
        block.next = if_false.into();
        v
    }

    pub fn ret(&mut self, v: Value) -> Value {
        self.push(
            InstrData::Return,
            smallvec![InstrArg::new(v, PirType::any())],
            PirType::voyd(),
            0,
        )
    }

    pub fn non_local_return(&mut self, v: Value, env: Value) -> Value {
        self.push(
            InstrData::NonLocalReturn,
            smallvec![
                InstrArg::new(v, PirType::val()),
                InstrArg::new(env, RType::Env.into()),
            ],
            PirType::voyd(),
            0,
        )
    }

    pub fn unreachable(&mut self) -> Value {
        self.push(InstrData::Unreachable, smallvec![], PirType::voyd(), 0)
    }

    pub fn phi(&mut self, inputs: &[(BasicBlockId, Value)]) -> Value {
        let mut blocks: SmallVec<[BasicBlockId; 2]> = SmallVec::new();
        let mut args: SmallVec<[InstrArg; 4]> = SmallVec::new();
        for &(bb, v) in inputs {
            debug_assert!(!blocks.contains(&bb), "duplicate phi input block");
            blocks.push(bb);
            let t = v.typ(&self.code);
            let declared = if t.is_rtype() {
                if t.maybe_promise_wrapped() {
                    PirType::any()
                } else {
                    PirType::val()
                }
            } else {
                t
            };
            args.push(InstrArg::new(v, declared));
        }
        let v = self.push(
            InstrData::Phi { inputs: blocks },
            args,
            PirType::any(),
            0,
        );
        // Refine to the merge of the inputs.
        let id = v.as_instr().unwrap();
        let merged = {
            let i = &self.code.instrs[id];
            i.merged_input_type(&|v| v.typ(&self.code))
        };
        self.code.instrs[id].typ = merged;
        v
    }

    pub fn pir_copy(&mut self, v: Value, src: u32) -> Value {
        let t = v.typ(&self.code);
        self.push(
            InstrData::PirCopy,
            smallvec![InstrArg::new(v, t)],
            t,
            src,
        )
    }

    pub fn nop(&mut self) -> Value {
        self.push(InstrData::Nop, smallvec![], PirType::voyd(), 0)
    }

    pub fn visible(&mut self) -> Value {
        self.push(InstrData::Visible, smallvec![], PirType::voyd(), 0)
    }

    pub fn invisible(&mut self) -> Value {
        self.push(InstrData::Invisible, smallvec![], PirType::voyd(), 0)
    }

    // ---- speculation ----

    /// Ends the current block. `next` is the straight-line side; `deopt` the
    /// side that abandons the optimized code.
    pub fn checkpoint(&mut self, next: BasicBlockId, deopt: BasicBlockId) -> Value {
        let v = self.push(
            InstrData::Checkpoint,
            smallvec![],
            NativeType::Checkpoint.into(),
            0,
        );
        let block = &mut self.code.blocks[self.current_block];
        block.next = next.into();
        block.branch = deopt.into();
        v
    }

    pub fn assume(&mut self, test: Value, checkpoint: Value) -> Value {
        self.push(
            InstrData::Assume { assume_true: true },
            smallvec![
                InstrArg::new(test, PirType::test()),
                InstrArg::new(checkpoint, NativeType::Checkpoint.into()),
            ],
            PirType::voyd(),
            0,
        )
    }

    pub fn assume_not(&mut self, test: Value, checkpoint: Value) -> Value {
        self.push(
            InstrData::Assume { assume_true: false },
            smallvec![
                InstrArg::new(test, PirType::test()),
                InstrArg::new(checkpoint, NativeType::Checkpoint.into()),
            ],
            PirType::voyd(),
            0,
        )
    }

    pub fn frame_state(
        &mut self,
        code: u32,
        pc: u32,
        stack: &[Value],
        in_promise: bool,
        env: Value,
    ) -> Value {
        let mut args: SmallVec<[InstrArg; 4]> = SmallVec::new();
        for &v in stack {
            args.push(InstrArg::new(v, PirType::any()));
        }
        args.push(InstrArg::new(env, RType::Env.into()));
        self.push(
            InstrData::FrameState {
                pc,
                code,
                stack_size: stack.len() as u32,
                in_promise,
                inlined: false,
            },
            args,
            NativeType::FrameState.into(),
            0,
        )
    }

    pub fn deopt(&mut self, frame_state: Value) -> Value {
        self.push(
            InstrData::Deopt,
            smallvec![InstrArg::new(frame_state, NativeType::FrameState.into())],
            PirType::voyd(),
            0,
        )
    }

    /// Frames are given in argument order (left to right), matching `args`.
    pub fn scheduled_deopt(&mut self, frames: Vec<FrameInfo>, args: &[Value]) -> Value {
        let mut a: SmallVec<[InstrArg; 4]> = SmallVec::new();
        for &v in args {
            a.push(InstrArg::new(v, PirType::any()));
        }
        self.push(
            InstrData::ScheduledDeopt { frames },
            a,
            PirType::voyd(),
            0,
        )
    }

    pub fn record_deopt_reason(&mut self, reason: DeoptReason, v: Value) -> Value {
        let t = v.typ(&self.code);
        self.push(
            InstrData::RecordDeoptReason { reason },
            smallvec![InstrArg::new(v, t)],
            PirType::voyd(),
            0,
        )
    }

    // ---- contexts ----

    pub fn push_context(&mut self, args: &[Value], ast: Value, op: Value, sysparent: Value) -> Value {
        let mut a: SmallVec<[InstrArg; 4]> = SmallVec::new();
        for &v in args {
            a.push(InstrArg::new(v, PirType::any()));
        }
        a.push(InstrArg::new(ast, PirType::any()));
        a.push(InstrArg::new(op, PirType::closure()));
        a.push(InstrArg::new(sysparent, RType::Env.into()));
        self.push(InstrData::PushContext, a, NativeType::Context.into(), 0)
    }

    pub fn pop_context(&mut self, result: Value, push: Value) -> Value {
        self.push(
            InstrData::PopContext,
            smallvec![
                InstrArg::new(result, PirType::any()),
                InstrArg::new(push, NativeType::Context.into()),
            ],
            PirType::any(),
            0,
        )
    }
}
