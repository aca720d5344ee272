//! Host-glue round trip: attach a dispatch table, fill the optimized slot,
//! and call closures through the runtime hook.

use rho_host::{body, compile, disassemble, eval, mark_optimize, pir_compile, run_tests, startup};
use rho_host::PirBuild;
use rho_pir as pir;
use rho_runtime as runtime;

use pir::{CodeBuilder, PirType, Singleton, Value};
use runtime::{Ctx, Sexp};

fn new_ctx() -> Box<Ctx> {
    tracing_subscriber::fmt::try_init().ok();
    let mut ctx = Ctx::new(1 << 40, 4096);
    startup(&mut ctx);
    ctx
}

fn new_closure(ctx: &mut Ctx) -> Sexp {
    let formals = ctx.singletons.nil;
    let env = ctx.singletons.global_env;
    ctx.heap.new_closure(formals, 0, env)
}

#[test]
fn compile_then_optimize_then_eval() {
    let mut ctx = new_ctx();
    let f = new_closure(&mut ctx);

    let f = compile(&mut ctx, f).unwrap();
    // Idempotent on already-compiled closures.
    let same = compile(&mut ctx, f).unwrap();
    assert_eq!(same, f);
    assert!(body(f).is_ok());

    mark_optimize(f).unwrap();

    let five = ctx.heap.new_int(5);
    let five = ctx.pool.insert(five);
    let f = pir_compile(&mut ctx, f, false, |_cx| {
        let mut b = CodeBuilder::new();
        let c = b.ld_const(
            five,
            PirType::from(pir::RType::Integer).scalar().not_object(),
        );
        b.ret(c);
        PirBuild::new(b.finish())
    })
    .unwrap();

    // A second round trip is a no-op once the optimized slot is filled.
    let f = pir_compile(&mut ctx, f, false, |_cx| unreachable!()).unwrap();

    let env = ctx.singletons.global_env;
    let res = eval(&mut ctx, f, env).unwrap();
    assert_eq!(res.int_value(), 5);

    disassemble(&ctx, f, true).unwrap();
}

#[test]
fn closure_calls_dispatch_through_the_table() {
    let mut ctx = new_ctx();

    // Callee: the identity function on its first argument.
    let callee = new_closure(&mut ctx);
    let callee = compile(&mut ctx, callee).unwrap();
    let callee = pir_compile(&mut ctx, callee, false, |_cx| {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, PirType::any());
        b.ret(x);
        PirBuild::new(b.finish())
    })
    .unwrap();

    // Caller: a dynamic call to its first argument, passing its second.
    let caller = new_closure(&mut ctx);
    let caller = compile(&mut ctx, caller).unwrap();
    let caller = pir_compile(&mut ctx, caller, false, |_cx| {
        let mut b = CodeBuilder::new();
        let cls = b.ld_arg(0, PirType::closure());
        let x = b.ld_arg(1, PirType::any());
        let fs = Value::Singleton(Singleton::TombstoneFrameState);
        let res = b.call(fs, cls, &[x], Value::Singleton(Singleton::GlobalEnv), 0);
        b.ret(res);
        PirBuild::new(b.finish())
    })
    .unwrap();

    let table = unsafe { rho_host::api::table_of(caller) }.unwrap();
    let version = table.at(1).expect("optimized slot filled");
    let rho_host::VersionBody::Native(code) = &version.body else {
        panic!("expected a native version");
    };

    let env = ctx.singletons.global_env;
    let v = ctx.heap.new_int(42);
    let res = code.call(&mut ctx, &[callee, v], env, caller).unwrap();
    assert_eq!(res, v);
}

#[test]
fn self_test_suite_runs() {
    let mut ctx = new_ctx();
    run_tests(&mut ctx).unwrap();
}
