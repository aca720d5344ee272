//! Compile, disassemble and eval entry points.

use crate::dispatch::{DispatchTable, FunctionVersion, VersionBody};
use codegen::try_compile;
use hashbrown::{HashMap, HashSet};
use pir::{Code, InstrId, PromiseId};
use runtime::{Ctx, Error, Sexp, SexpType};

/// Input to an optimized compilation: the PIR unit plus its side tables.
pub struct PirBuild {
    pub code: Code,
    pub prom_map: HashMap<PromiseId, u32>,
    pub needs_ensure_named: HashSet<InstrId>,
}

impl PirBuild {
    pub fn new(code: Code) -> Self {
        PirBuild {
            code,
            prom_map: HashMap::new(),
            needs_ensure_named: HashSet::new(),
        }
    }
}

/// The dispatch table attached to a compiled closure's body. Tables live for
/// the process lifetime, like everything else reachable from a closure.
///
/// # Safety
/// `closure` must be a live closure value.
pub unsafe fn table_of<'a>(closure: Sexp) -> Option<&'a mut DispatchTable> {
    if closure.sexp_type() != SexpType::Clo {
        return None;
    }
    let body = closure.clo_body();
    if body == 0 {
        return None;
    }
    Some(unsafe { &mut *(body as *mut DispatchTable) })
}

/// Compile a closure to bytecode, attaching a dispatch table to its body.
/// Idempotent on already-compiled closures.
pub fn compile(_ctx: &mut Ctx, what: Sexp) -> Result<Sexp, Error> {
    if what.sexp_type() != SexpType::Clo {
        return Err(Error::Other("not a closure".into()));
    }
    if what.clo_body() != 0 {
        return Ok(what);
    }
    let mut table = Box::new(DispatchTable::new());
    table.insert(0, FunctionVersion::baseline(0));
    what.set_clo_body(Box::into_raw(table) as u64);
    Ok(what)
}

/// Print every available version of a compiled closure.
pub fn disassemble(_ctx: &Ctx, what: Sexp, verbose: bool) -> Result<(), Error> {
    let table = unsafe { table_of(what) }.ok_or_else(|| Error::Other("not compiled".into()))?;
    println!("* closure {:#x} (vtable {:#x})", what.addr(), what.clo_body());
    for slot in 0..table.capacity() {
        let Some(version) = table.at(slot) else {
            continue;
        };
        println!(
            "= vtable slot <{slot}> (invoked {}) =",
            version.invocation_count
        );
        match &version.body {
            VersionBody::Baseline { bytecode } => println!("  bytecode body #{bytecode}"),
            VersionBody::Native(code) => {
                println!("  native body, {} instructions", code.len());
                if verbose {
                    for name in code.native_calls() {
                        println!("    call {name}");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Tag the first dispatch-table version for optimization.
pub fn mark_optimize(what: Sexp) -> Result<(), Error> {
    if what.sexp_type() != SexpType::Clo {
        return Ok(());
    }
    let Some(table) = (unsafe { table_of(what) }) else {
        return Ok(());
    };
    if let Some(first) = table.first_mut() {
        first.mark_opt = true;
    }
    Ok(())
}

/// Run the optimizing round trip for a compiled closure: the front-end
/// supplies the PIR unit through `build`, and a successful lowering fills the
/// second dispatch-table slot. On failure the closure stays callable through
/// its unoptimized body.
pub fn pir_compile(
    ctx: &mut Ctx,
    what: Sexp,
    verbose: bool,
    build: impl FnOnce(&mut Ctx) -> PirBuild,
) -> Result<Sexp, Error> {
    let table = unsafe { table_of(what) }.ok_or_else(|| Error::Other("not a compiled closure".into()))?;
    assert_eq!(
        table.capacity(),
        DispatchTable::CAPACITY,
        "only two-slot dispatch tables are supported"
    );
    if table.available(1) {
        return Ok(what);
    }

    let built = build(ctx);
    if verbose {
        tracing::info!(
            instrs = built.code.instrs.len(),
            blocks = built.code.blocks.len(),
            "lowering pir unit"
        );
    }

    match try_compile(&built.code, ctx, &built.prom_map, &built.needs_ensure_named) {
        Some(compiled) => {
            table.insert(
                1,
                FunctionVersion::native(pir::instr::AssumptionContext::empty(), compiled),
            );
        }
        None => {
            eprintln!("Compilation failed");
        }
    }
    Ok(what)
}

/// Evaluate a compiled closure through its best available version.
pub fn eval(ctx: &mut Ctx, what: Sexp, env: Sexp) -> Result<Sexp, Error> {
    let table =
        unsafe { table_of(what) }.ok_or_else(|| Error::Other("not compiled code".into()))?;
    let version = table
        .dispatch(pir::instr::AssumptionContext::empty())
        .ok_or_else(|| Error::Other("empty dispatch table".into()))?;
    match &version.body {
        VersionBody::Native(code) => code.call(ctx, &[], env, what),
        VersionBody::Baseline { .. } => Err(Error::Other(
            "bytecode evaluation is handled by the external interpreter".into(),
        )),
    }
}

/// The code container attached to a closure.
pub fn body(what: Sexp) -> Result<u64, Error> {
    if what.sexp_type() != SexpType::Clo || what.clo_body() == 0 {
        return Err(Error::Other("not a valid compiled function".into()));
    }
    Ok(what.clo_body())
}

/// Register the compile callback and the (currently unused) optimizer hook
/// with the host runtime: closure calls from compiled code dispatch through
/// the callee's table.
pub fn startup(ctx: &mut Ctx) {
    ctx.call_hook = Some(dispatch_call);
    ctx.optimize_hook = Some(dummy_opt);
}

// Currently unused.
fn dummy_opt(opt: Sexp) -> Sexp {
    opt
}

fn dispatch_call(cx: &mut Ctx, cls: Sexp, args: &[Sexp], env: Sexp) -> Sexp {
    let Some(table) = (unsafe { table_of(cls) }) else {
        runtime::raise(Error::NotAFunction);
    };
    let Some(version) = table.dispatch(pir::instr::AssumptionContext::empty()) else {
        runtime::raise(Error::NotAFunction);
    };
    match &version.body {
        VersionBody::Native(code) => match code.call(cx, args, env, cls) {
            Ok(v) => v,
            Err(e) => runtime::raise(e),
        },
        VersionBody::Baseline { .. } => runtime::raise(Error::Other(
            "bytecode evaluation is handled by the external interpreter".into(),
        )),
    }
}

/// The built-in compiler self-test: compile and run a trivial unit.
pub fn run_tests(ctx: &mut Ctx) -> Result<(), Error> {
    use pir::{CodeBuilder, PirType, RType};

    let mut b = CodeBuilder::new();
    let x = b.ld_arg(0, PirType::from(RType::Integer).scalar().not_object());
    b.ret(x);
    let build = PirBuild::new(b.finish());

    let compiled = try_compile(
        &build.code,
        ctx,
        &build.prom_map,
        &build.needs_ensure_named,
    )
    .ok_or_else(|| Error::Other("self-test compilation failed".into()))?;

    let forty_two = ctx.heap.new_int(42);
    let env = ctx.singletons.global_env;
    let res = compiled.call(ctx, &[forty_two], env, Sexp::null())?;
    if res != forty_two {
        return Err(Error::Other("self-test returned a different value".into()));
    }
    Ok(())
}
