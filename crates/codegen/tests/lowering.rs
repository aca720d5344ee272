//! End-to-end tests: build PIR units by hand, lower them through the
//! baseline backend, and run the result against the runtime.

use rho_codegen::try_compile;
use rho_codegen::CompiledCode;
use rho_pir as pir;
use rho_runtime as runtime;

use hashbrown::{HashMap, HashSet};
use pir::{
    instr::CastKind, validation, Code, CodeBuilder, InstrData, PirType, RType, Singleton, Value,
};
use runtime::{Ctx, Error, Sexp, SexpType, NA_INTEGER};
use std::cell::Cell;
use std::rc::Rc;

fn new_ctx() -> Box<Ctx> {
    tracing_subscriber::fmt::try_init().ok();
    Ctx::new(1 << 40, 4096)
}

fn scalar_int() -> PirType {
    PirType::from(RType::Integer).scalar().not_object()
}

fn scalar_lgl() -> PirType {
    PirType::from(RType::Logical).scalar().not_object()
}

fn compile(ctx: &mut Ctx, code: &Code) -> CompiledCode {
    validation::validate(code).unwrap_or_else(|e| panic!("invalid test IR: {}", e.message()));
    try_compile(code, ctx, &HashMap::new(), &HashSet::new()).expect("lowering failed")
}

fn global(ctx: &Ctx) -> Sexp {
    ctx.singletons.global_env
}

#[test]
fn identity_on_unboxed_int() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::any());
    b.ret(x);
    let code = b.finish();

    let f = compile(&mut ctx, &code);
    // No allocation is required, so no builtin (and no safepoint spill
    // consumer) is emitted at all.
    assert!(f.native_calls().is_empty());

    let v = ctx.heap.new_int(42);
    let env = global(&ctx);
    let res = f.call(&mut ctx, &[v], env, Sexp::null()).unwrap();
    assert_eq!(res, v);
    assert_eq!(res.int_value(), 42);
}

#[test]
fn integer_addition_with_na() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, scalar_int());
    let y = b.ld_arg(1, scalar_int());
    let sum = b.add(x, y, Value::Singleton(Singleton::ElidedEnv), 0);
    b.ret(sum);
    let code = b.finish();

    let f = compile(&mut ctx, &code);
    // Both operands are known integers: the addition is native, only the
    // result gets boxed.
    assert!(!f.native_calls().contains(&"binop"));
    assert!(f.native_calls().contains(&"newInt"));

    let env = global(&ctx);
    let (a, bb) = (ctx.heap.new_int(3), ctx.heap.new_int(4));
    let res = f.call(&mut ctx, &[a, bb], env, Sexp::null()).unwrap();
    assert_eq!(res.sexp_type(), SexpType::Int);
    assert_eq!(res.int_value(), 7);

    let (a, bb) = (ctx.heap.new_int(3), ctx.heap.new_int(NA_INTEGER));
    let res = f.call(&mut ctx, &[a, bb], env, Sexp::null()).unwrap();
    assert_eq!(res.int_value(), NA_INTEGER);
}

#[test]
fn relop_fast_path() {
    let mut ctx = new_ctx();

    let ten = ctx.heap.new_int(10);
    let ten = ctx.pool.insert(ten);
    let one = ctx.heap.new_int(1);
    let one = ctx.pool.insert(one);
    let zero = ctx.heap.new_int(0);
    let zero = ctx.pool.insert(zero);

    let mut b = CodeBuilder::new();
    let bb_true = b.create_block();
    let bb_false = b.create_block();

    let x = b.ld_arg(0, scalar_int());
    let c10 = b.ld_const(ten, scalar_int().not_na_or_nan());
    let lt = b.lt(x, c10, Value::Singleton(Singleton::ElidedEnv), 0);
    let test = b.cast_type(CastKind::Upcast, scalar_lgl(), PirType::test(), lt);
    b.branch(test, bb_true, bb_false);

    b.switch_to_block(bb_true);
    let c1 = b.ld_const(one, scalar_int().not_na_or_nan());
    b.ret(c1);

    b.switch_to_block(bb_false);
    let c0 = b.ld_const(zero, scalar_int().not_na_or_nan());
    b.ret(c0);

    let code = b.finish();
    let f = compile(&mut ctx, &code);
    assert!(!f.native_calls().contains(&"binop"));

    let env = global(&ctx);
    let five = ctx.heap.new_int(5);
    assert_eq!(
        f.call(&mut ctx, &[five], env, Sexp::null()).unwrap().int_value(),
        1
    );
    let twenty = ctx.heap.new_int(20);
    assert_eq!(
        f.call(&mut ctx, &[twenty], env, Sexp::null()).unwrap().int_value(),
        0
    );
    // NA flows through the NA branch of the relop lowering and yields the
    // value of that branch rather than crashing.
    let na = ctx.heap.new_int(NA_INTEGER);
    let res = f.call(&mut ctx, &[na], env, Sexp::null()).unwrap();
    assert_eq!(res.int_value(), 1);
}

#[test]
fn ldvar_uses_the_binding_cache() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::any());
    let env = b.mk_env(
        Value::Singleton(Singleton::GlobalEnv),
        &[("x".into(), x, false)],
        1,
    );
    let v = b.ld_var("x", env);
    b.ret(v);
    let code = b.finish();

    let f = compile(&mut ctx, &code);
    let calls = f.native_calls();
    assert!(calls.contains(&"createEnvironment"));
    assert!(calls.contains(&"consNrTagged"));
    // The load goes through the inline cache, not the generic lookup.
    assert!(calls.contains(&"ldvarCacheMiss"));
    assert!(!calls.contains(&"ldvar"));

    let env = global(&ctx);
    let seven = ctx.heap.new_int(7);
    // First call populates the cache, the second takes the hit path; both
    // observable results agree.
    let r1 = f.call(&mut ctx, &[seven], env, Sexp::null()).unwrap();
    let r2 = f.call(&mut ctx, &[seven], env, Sexp::null()).unwrap();
    assert_eq!(r1, seven);
    assert_eq!(r2, seven);
}

#[test]
fn assume_jumps_to_the_deopt_branch() {
    let mut ctx = new_ctx();

    let zero = ctx.heap.new_int(0);
    let zero = ctx.pool.insert(zero);
    let hundred = ctx.heap.new_int(100);
    let hundred = ctx.pool.insert(hundred);

    let mut b = CodeBuilder::new();
    let bb_ok = b.create_block();
    let bb_deopt = b.create_block();

    let x = b.ld_arg(0, scalar_int());
    let cp = b.checkpoint(bb_ok, bb_deopt);

    b.switch_to_block(bb_ok);
    let c0 = b.ld_const(zero, scalar_int().not_na_or_nan());
    let eq = b.eq(x, c0, Value::Singleton(Singleton::ElidedEnv), 0);
    let test = b.cast_type(CastKind::Upcast, scalar_lgl(), PirType::test(), eq);
    b.assume(test, cp);
    let c100 = b.ld_const(hundred, scalar_int().not_na_or_nan());
    b.ret(c100);

    b.switch_to_block(bb_deopt);
    b.scheduled_deopt(
        vec![pir::instr::FrameInfo {
            code: 0,
            pc: 7,
            stack_size: 1,
            in_promise: false,
        }],
        &[x],
    );

    let code = b.finish();
    let f = compile(&mut ctx, &code);

    let seen_pc = Rc::new(Cell::new(None));
    let seen_arg = Rc::new(Cell::new(None));
    {
        let seen_pc = seen_pc.clone();
        let seen_arg = seen_arg.clone();
        ctx.deopt_handler = Some(Box::new(move |cx, event| {
            seen_pc.set(Some(event.meta.frames[0].pc));
            seen_arg.set(Some(event.args[0]));
            cx.heap.new_int(-1)
        }));
    }

    let env = global(&ctx);
    let ok = ctx.heap.new_int(0);
    let res = f.call(&mut ctx, &[ok], env, Sexp::null()).unwrap();
    assert_eq!(res.int_value(), 100);
    assert_eq!(seen_pc.get(), None);

    // Argument != 0: the assumption fails and control returns to the
    // interpreter with the recorded frame state.
    let bad = ctx.heap.new_int(5);
    let res = f.call(&mut ctx, &[bad], env, Sexp::null()).unwrap();
    assert_eq!(res.int_value(), -1);
    assert_eq!(seen_pc.get(), Some(7));
    assert_eq!(seen_arg.get().unwrap().int_value(), 5);
}

#[test]
fn force_of_eager_reflection_free_promise_is_elided() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let prom = b.code_mut().promises.push(Code::new());
    let eager = b.ld_arg(0, PirType::any());
    let arg = b.mk_arg(prom, eager, Value::Singleton(Singleton::GlobalEnv), 0);
    let mk = arg.as_instr().unwrap();
    if let InstrData::MkArg { no_reflection, .. } = &mut b.code_mut().instrs[mk].data {
        *no_reflection = true;
    }
    let fs = Value::Singleton(Singleton::TombstoneFrameState);
    let forced = b.force(arg, fs, Value::Singleton(Singleton::GlobalEnv), 0);
    b.ret(forced);
    let code = b.finish();

    // The force lost its reflection effect at construction.
    let fid = forced.as_instr().unwrap();
    assert!(!code[fid].effects.contains(pir::Effect::Reflection));

    let mut prom_map = HashMap::new();
    prom_map.insert(prom, 0u32);
    validation::validate(&code).unwrap();
    let f = try_compile(&code, &mut ctx, &prom_map, &HashSet::new()).expect("lowering failed");

    // The promise is still created, but never forced: the eager value is
    // used directly.
    assert!(f.native_calls().contains(&"createPromise"));
    assert!(!f.native_calls().contains(&"forcePromise"));

    let env = global(&ctx);
    let v = ctx.heap.new_int(42);
    let res = f.call(&mut ctx, &[v], env, Sexp::null()).unwrap();
    assert_eq!(res, v);
}

#[test]
fn force_of_lazy_promise_calls_the_evaluator() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let prom = b.code_mut().promises.push(Code::new());
    let arg = b.mk_arg(
        prom,
        Value::Singleton(Singleton::UnboundValue),
        Value::Singleton(Singleton::GlobalEnv),
        0,
    );
    let fs = Value::Singleton(Singleton::TombstoneFrameState);
    let forced = b.force(arg, fs, Value::Singleton(Singleton::GlobalEnv), 0);
    b.ret(forced);
    let code = b.finish();

    let mut prom_map = HashMap::new();
    prom_map.insert(prom, 3u32);
    validation::validate(&code).unwrap();
    let f = try_compile(&code, &mut ctx, &prom_map, &HashSet::new()).expect("lowering failed");
    assert!(f.native_calls().contains(&"forcePromise"));

    let forced_idx = Rc::new(Cell::new(None));
    {
        let forced_idx = forced_idx.clone();
        ctx.promise_eval = Some(Box::new(move |cx, _code, idx, _env| {
            forced_idx.set(Some(idx));
            cx.heap.new_int(9)
        }));
    }

    let env = global(&ctx);
    let res = f.call(&mut ctx, &[], env, Sexp::null()).unwrap();
    assert_eq!(res.int_value(), 9);
    assert_eq!(forced_idx.get(), Some(3));
}

#[test]
fn phi_registers_merge_branch_values() {
    let mut ctx = new_ctx();

    let one = ctx.heap.new_int(1);
    let one = ctx.pool.insert(one);
    let two = ctx.heap.new_int(2);
    let two = ctx.pool.insert(two);

    let mut b = CodeBuilder::new();
    let bb_then = b.create_block();
    let bb_else = b.create_block();
    let bb_join = b.create_block();

    let x = b.ld_arg(0, scalar_int().not_na_or_nan());
    let c0 = {
        let zero = ctx.heap.new_int(0);
        let zero = ctx.pool.insert(zero);
        b.ld_const(zero, scalar_int().not_na_or_nan())
    };
    let gt = b.gt(x, c0, Value::Singleton(Singleton::ElidedEnv), 0);
    let test = b.cast_type(CastKind::Upcast, scalar_lgl(), PirType::test(), gt);
    b.branch(test, bb_then, bb_else);

    b.switch_to_block(bb_then);
    let a = b.ld_const(one, scalar_int().not_na_or_nan());
    let a = b.pir_copy(a, 0);
    b.fall_through(bb_join);

    b.switch_to_block(bb_else);
    let c = b.ld_const(two, scalar_int().not_na_or_nan());
    let c = b.pir_copy(c, 0);
    b.fall_through(bb_join);

    b.switch_to_block(bb_join);
    let phi = b.phi(&[(bb_then, a), (bb_else, c)]);
    b.ret(phi);

    let code = b.finish();
    let f = compile(&mut ctx, &code);

    let env = global(&ctx);
    let pos = ctx.heap.new_int(5);
    assert_eq!(
        f.call(&mut ctx, &[pos], env, Sexp::null()).unwrap().int_value(),
        1
    );
    let neg = ctx.heap.new_int(-5);
    assert_eq!(
        f.call(&mut ctx, &[neg], env, Sexp::null()).unwrap().int_value(),
        2
    );
}

#[test]
fn safepoints_keep_boxed_values_alive_across_gc() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::any());
    let y = b.ld_arg(1, PirType::any());
    // Boxed additions go through the builtin; x stays live across the first
    // call and must survive the collection it triggers.
    let s1 = b.add(x, y, Value::Singleton(Singleton::ElidedEnv), 0);
    let s2 = b.add(s1, x, Value::Singleton(Singleton::ElidedEnv), 0);
    b.ret(s2);
    let code = b.finish();

    let f = compile(&mut ctx, &code);
    assert!(f.native_calls().contains(&"binop"));

    let env = global(&ctx);
    let a = ctx.heap.new_int(7);
    let bb = ctx.heap.new_int(8);
    // Force a collection inside every allocating builtin from here on.
    ctx.heap.node_limit.set(ctx.heap.nodes_in_use.get());
    let res = f.call(&mut ctx, &[a, bb], env, Sexp::null()).unwrap();
    assert_eq!(res.int_value(), 22);
    ctx.heap.node_limit.set(1 << 40);
}

#[test]
fn na_round_trips_through_unbox_and_rebox() {
    let mut ctx = new_ctx();

    // Logical: the NA sentinel survives unboxing to an integer register and
    // reboxing to a logical.
    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::from(RType::Logical).scalar().not_object());
    b.ret(x);
    let code = b.finish();
    let f = compile(&mut ctx, &code);
    assert!(f.native_calls().contains(&"newLgl"));

    let env = global(&ctx);
    let na = ctx.singletons.na_lgl;
    let res = f.call(&mut ctx, &[na], env, Sexp::null()).unwrap();
    assert_eq!(res.sexp_type(), SexpType::Lgl);
    assert_eq!(res.int_value(), NA_INTEGER);
    let t = ctx.singletons.true_v;
    let res = f.call(&mut ctx, &[t], env, Sexp::null()).unwrap();
    assert_eq!(res.int_value(), 1);

    // Real: NA is a NaN and round-trips through the self-inequality test.
    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::from(RType::Real).scalar().not_object());
    b.ret(x);
    let code = b.finish();
    let f = compile(&mut ctx, &code);
    assert!(f.native_calls().contains(&"newReal"));

    let na = ctx.heap.new_real(runtime::na_real());
    let res = f.call(&mut ctx, &[na], env, Sexp::null()).unwrap();
    assert_eq!(res.sexp_type(), SexpType::Real);
    assert!(res.real_value().is_nan());
}

#[test]
fn visibility_stores_to_the_host_flag() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::any());
    b.invisible();
    b.ret(x);
    let code = b.finish();
    let f = compile(&mut ctx, &code);

    ctx.visible.set(1);
    let env = global(&ctx);
    let v = ctx.heap.new_int(1);
    f.call(&mut ctx, &[v], env, Sexp::null()).unwrap();
    assert_eq!(ctx.visible.get(), 0);
}

#[test]
fn as_test_errors_on_na() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let bb_true = b.create_block();
    let bb_false = b.create_block();
    let x = b.ld_arg(0, PirType::simple_scalar_logical());
    let t = b.as_test(x);
    b.branch(t, bb_true, bb_false);
    b.switch_to_block(bb_true);
    let one = ctx.heap.new_int(1);
    let one = ctx.pool.insert(one);
    let c1 = b.ld_const(one, scalar_int().not_na_or_nan());
    b.ret(c1);
    b.switch_to_block(bb_false);
    let zero = ctx.heap.new_int(0);
    let zero = ctx.pool.insert(zero);
    let c0 = b.ld_const(zero, scalar_int().not_na_or_nan());
    b.ret(c0);
    let code = b.finish();
    let f = compile(&mut ctx, &code);

    let env = global(&ctx);
    let t = ctx.singletons.true_v;
    assert_eq!(
        f.call(&mut ctx, &[t], env, Sexp::null()).unwrap().int_value(),
        1
    );
    let na = ctx.singletons.na_lgl;
    assert!(matches!(f.call(&mut ctx, &[na], env, Sexp::null()), Err(Error::Other(_))));
}

#[test]
fn unsupported_constructs_fall_back() {
    let mut ctx = new_ctx();

    // StArg is not lowered natively.
    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::any());
    let env = b.ld_function_env();
    b.st_arg("x", x, env);
    b.ret(x);
    let code = b.finish();
    assert!(try_compile(&code, &mut ctx, &HashMap::new(), &HashSet::new()).is_none());

    // Neither is a stub environment.
    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::any());
    let env = b.mk_env(
        Value::Singleton(Singleton::GlobalEnv),
        &[("x".into(), x, false)],
        1,
    );
    if let Some(id) = env.as_instr() {
        if let InstrData::MkEnv { stub, .. } = &mut b.code_mut().instrs[id].data {
            *stub = true;
        }
    }
    b.ret(x);
    let code = b.finish();
    assert!(try_compile(&code, &mut ctx, &HashMap::new(), &HashSet::new()).is_none());

    // A named call always goes back to the interpreter.
    let mut b = CodeBuilder::new();
    let f_ = b.ld_fun("f", Value::Singleton(Singleton::GlobalEnv));
    let x = b.ld_arg(0, PirType::any());
    let res = b.named_call(
        vec!["a".into()],
        f_,
        &[x],
        Value::Singleton(Singleton::GlobalEnv),
        0,
    );
    b.ret(res);
    let code = b.finish();
    assert!(try_compile(&code, &mut ctx, &HashMap::new(), &HashSet::new()).is_none());
}

#[test]
fn stvar_writes_through_the_cache() {
    let mut ctx = new_ctx();

    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::any());
    let y = b.ld_arg(1, PirType::val());
    let env = b.mk_env(
        Value::Singleton(Singleton::GlobalEnv),
        &[("x".into(), x, false)],
        1,
    );
    b.st_var("x", y, env);
    let v = b.ld_var("x", env);
    b.ret(v);
    let code = b.finish();

    let f = compile(&mut ctx, &code);
    assert!(f.native_calls().contains(&"stvar"));

    let env = global(&ctx);
    let a = ctx.heap.new_int(1);
    let bb = ctx.heap.new_int(2);
    let res = f.call(&mut ctx, &[a, bb], env, Sexp::null()).unwrap();
    assert_eq!(res, bb);
}
