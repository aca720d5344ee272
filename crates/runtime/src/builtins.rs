//! Native builtin entry points.
//!
//! These are the functions compiled code calls. Arguments and results travel
//! as raw 64-bit words: boxed values as addresses, integers in the low 32
//! bits, reals as bit patterns. The current [`Ctx`] is found through the
//! scoped install done by [`Ctx::enter`].
//!
//! `error` never returns; it unwinds to the compiled-code call boundary.
//! `stvar` and `ldvar_cache_miss` own the binding-cell bookkeeping (and any
//! write barrier); the lowerer never emits one itself.

use crate::{
    ctx::{Ctx, DeoptEvent, DeoptMetadata},
    error::{Error, Unwind},
    stack::{StackCell, STACK_CELL_SIZE},
    value::{na_real, Sexp, SexpType, NA_INTEGER, NA_LOGICAL},
};

pub type BuiltinFn = fn(&[u64]) -> u64;

pub fn raise(e: Error) -> ! {
    std::panic::panic_any(Unwind(e))
}

fn sexp(a: u64) -> Sexp {
    Sexp::from_addr(a)
}

fn ctx<'a>() -> &'a mut Ctx {
    unsafe { Ctx::current() }
}

/// Collect before an allocation when the heap is over its limit. The
/// emitted safepoint has already spilled live compiled-code values into
/// node-stack slots, which the collection scans as roots; `protect` keeps
/// this builtin's own boxed arguments alive.
fn maybe_gc(cx: &mut Ctx, protect: &[Sexp]) {
    if cx.heap.over_limit() {
        cx.collect_garbage(protect);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum BinopKind {
    Add = 0,
    Sub,
    Mul,
    Div,
    Idiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LAnd,
    LOr,
}

impl BinopKind {
    pub fn from_i32(v: i32) -> BinopKind {
        match v {
            0 => BinopKind::Add,
            1 => BinopKind::Sub,
            2 => BinopKind::Mul,
            3 => BinopKind::Div,
            4 => BinopKind::Idiv,
            5 => BinopKind::Mod,
            6 => BinopKind::Pow,
            7 => BinopKind::Eq,
            8 => BinopKind::Ne,
            9 => BinopKind::Lt,
            10 => BinopKind::Le,
            11 => BinopKind::Gt,
            12 => BinopKind::Ge,
            13 => BinopKind::LAnd,
            14 => BinopKind::LOr,
            _ => raise(Error::Other(format!("unknown binop kind {v}"))),
        }
    }

    fn is_arith(self) -> bool {
        matches!(
            self,
            BinopKind::Add
                | BinopKind::Sub
                | BinopKind::Mul
                | BinopKind::Div
                | BinopKind::Idiv
                | BinopKind::Mod
                | BinopKind::Pow
        )
    }
}

/// A scalar numeric operand; `None` encodes NA.
#[derive(Copy, Clone)]
enum Num {
    Int(i32),
    Real(f64),
}

fn num_of(s: Sexp) -> Option<Num> {
    match s.sexp_type() {
        SexpType::Lgl | SexpType::Int => {
            let v = s.int_value();
            if v == NA_INTEGER {
                None
            } else {
                Some(Num::Int(v))
            }
        }
        SexpType::Real => {
            let v = s.real_value();
            if v.is_nan() {
                None
            } else {
                Some(Num::Real(v))
            }
        }
        _ => raise(Error::Other(
            "non-numeric argument to binary operator".into(),
        )),
    }
}

fn binop_impl(a: Sexp, b: Sexp, kind: BinopKind) -> Sexp {
    let cx = ctx();
    maybe_gc(cx, &[a, b]);

    if matches!(kind, BinopKind::LAnd | BinopKind::LOr) {
        return logical_binop(cx, a, b, kind);
    }

    let (x, y) = (num_of(a), num_of(b));

    if kind.is_arith() {
        let both_int = matches!(
            (a.sexp_type(), b.sexp_type()),
            (SexpType::Lgl | SexpType::Int, SexpType::Lgl | SexpType::Int)
        );
        let int_result =
            both_int && !matches!(kind, BinopKind::Div | BinopKind::Pow);
        let (x, y) = match (x, y) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return if int_result {
                    cx.heap.new_int(NA_INTEGER)
                } else {
                    cx.heap.new_real(na_real())
                };
            }
        };
        if int_result {
            let (xi, yi) = match (x, y) {
                (Num::Int(xi), Num::Int(yi)) => (xi, yi),
                _ => unreachable!(),
            };
            let res = match kind {
                BinopKind::Add => xi.checked_add(yi),
                BinopKind::Sub => xi.checked_sub(yi),
                BinopKind::Mul => xi.checked_mul(yi),
                BinopKind::Idiv => {
                    (yi != 0).then(|| (xi as f64 / yi as f64).floor() as i32)
                }
                // The result follows the sign of the divisor.
                BinopKind::Mod => {
                    (yi != 0).then(|| xi - (xi as f64 / yi as f64).floor() as i32 * yi)
                }
                _ => unreachable!(),
            };
            return cx.heap.new_int(res.unwrap_or(NA_INTEGER));
        }
        let xf = match x {
            Num::Int(v) => v as f64,
            Num::Real(v) => v,
        };
        let yf = match y {
            Num::Int(v) => v as f64,
            Num::Real(v) => v,
        };
        let res = match kind {
            BinopKind::Add => xf + yf,
            BinopKind::Sub => xf - yf,
            BinopKind::Mul => xf * yf,
            BinopKind::Div => xf / yf,
            BinopKind::Idiv => (xf / yf).floor(),
            BinopKind::Mod => xf - (xf / yf).floor() * yf,
            BinopKind::Pow => xf.powf(yf),
            _ => unreachable!(),
        };
        return cx.heap.new_real(res);
    }

    // Relational operators yield a logical.
    let (x, y) = match (x, y) {
        (Some(x), Some(y)) => (x, y),
        _ => return cx.heap.new_lgl(NA_LOGICAL),
    };
    let (xf, yf) = (
        match x {
            Num::Int(v) => v as f64,
            Num::Real(v) => v,
        },
        match y {
            Num::Int(v) => v as f64,
            Num::Real(v) => v,
        },
    );
    let res = match kind {
        BinopKind::Eq => xf == yf,
        BinopKind::Ne => xf != yf,
        BinopKind::Lt => xf < yf,
        BinopKind::Le => xf <= yf,
        BinopKind::Gt => xf > yf,
        BinopKind::Ge => xf >= yf,
        _ => unreachable!(),
    };
    cx.heap.new_lgl(res as i32)
}

fn logical_binop(cx: &mut Ctx, a: Sexp, b: Sexp, kind: BinopKind) -> Sexp {
    let to_lgl = |s: Sexp| -> Option<bool> {
        match num_of(s) {
            None => None,
            Some(Num::Int(v)) => Some(v != 0),
            Some(Num::Real(v)) => Some(v != 0.0),
        }
    };
    let (x, y) = (to_lgl(a), to_lgl(b));
    let res = match kind {
        BinopKind::LAnd => match (x, y) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinopKind::LOr => match (x, y) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!(),
    };
    cx.heap.new_lgl(res.map_or(NA_LOGICAL, |b| b as i32))
}

/// `binop(lhs, rhs, kind) -> sexp`
pub fn bi_binop(args: &[u64]) -> u64 {
    let kind = BinopKind::from_i32(args[2] as i32);
    binop_impl(sexp(args[0]), sexp(args[1]), kind).addr()
}

/// `binop_env(lhs, rhs, env, src_idx, kind) -> sexp`; the environment is for
/// object dispatch, which the native runtime does not do.
pub fn bi_binop_env(args: &[u64]) -> u64 {
    let (a, b) = (sexp(args[0]), sexp(args[1]));
    if a.is_object() || b.is_object() {
        raise(Error::Other(
            "object dispatch is not available in native code".into(),
        ));
    }
    let kind = BinopKind::from_i32(args[4] as i32);
    binop_impl(a, b, kind).addr()
}

/// `ldvar(sym, env) -> sexp`; yields the unbound sentinel when not found so
/// the emitted check can raise.
pub fn bi_ldvar(args: &[u64]) -> u64 {
    let cx = ctx();
    let (sym, env) = (sexp(args[0]), sexp(args[1]));
    match cx.lookup_binding(env, sym) {
        Some(cell) => cell.car().addr(),
        None => cx.singletons.unbound_value.addr(),
    }
}

/// `ldvar_cache_miss(sym, env, cache_cell*) -> sexp`; populates the cache
/// slot with the binding cell when the binding lives in `env` itself.
pub fn bi_ldvar_cache_miss(args: &[u64]) -> u64 {
    let cx = ctx();
    let (sym, env) = (sexp(args[0]), sexp(args[1]));
    let cache_cell = args[2] as *mut u64;
    if let Some(cell) = cx.local_binding(env, sym) {
        unsafe { *cache_cell = cell.addr() };
        return cell.car().addr();
    }
    match cx.lookup_binding(env.env_parent(), sym) {
        Some(cell) => cell.car().addr(),
        None => cx.singletons.unbound_value.addr(),
    }
}

/// `stvar(sym, val, env)`; owns binding creation and the write barrier.
pub fn bi_stvar(args: &[u64]) -> u64 {
    let cx = ctx();
    let (sym, val, env) = (sexp(args[0]), sexp(args[1]), sexp(args[2]));
    cx.define_binding(env, sym, val);
    0
}

/// `ldfun(sym, env) -> sexp`; skips non-function bindings, forcing promises
/// on the way like the source language requires.
pub fn bi_ldfun(args: &[u64]) -> u64 {
    let cx = ctx();
    let (sym, mut env) = (sexp(args[0]), sexp(args[1]));
    while !env.is_null() {
        if let Some(cell) = cx.local_binding(env, sym) {
            let mut v = cell.car();
            if v.sexp_type() == SexpType::Prom {
                v = sexp(bi_force_promise(&[v.addr()]));
            }
            if matches!(v.sexp_type(), SexpType::Clo | SexpType::Builtin) {
                return v.addr();
            }
        }
        env = env.env_parent();
    }
    cx.singletons.unbound_value.addr()
}

fn frame_args(cx: &Ctx, nargs: usize) -> Vec<Sexp> {
    let top = cx.stack.top.get();
    let base = top - (nargs * STACK_CELL_SIZE) as u64;
    (0..nargs)
        .map(|i| {
            let cell = (base + (i * STACK_CELL_SIZE) as u64) as *const StackCell;
            Sexp::from_addr(unsafe { (*cell).value })
        })
        .collect()
}

/// `call(code, src_idx, callee, env, nargs, ctx) -> sexp`; the arguments sit
/// in the call frame the caller pushed on the node stack.
pub fn bi_call(args: &[u64]) -> u64 {
    let cx = ctx();
    let callee = sexp(args[2]);
    let env = sexp(args[3]);
    let nargs = args[4] as usize;
    let call_args = frame_args(cx, nargs);

    match callee.sexp_type() {
        SexpType::Builtin => {
            let id = callee.builtin_id() as u32;
            let fun = cx.builtin(id).fun;
            match fun(cx, &call_args) {
                Ok(v) => v.addr(),
                Err(e) => raise(e),
            }
        }
        SexpType::Clo => {
            let Some(hook) = cx.call_hook else {
                raise(Error::Other("no closure call hook installed".into()));
            };
            hook(cx, callee, &call_args, env).addr()
        }
        _ => raise(Error::NotAFunction),
    }
}

/// `call_builtin(code, src_idx, builtin, env, nargs, ctx) -> sexp`
pub fn bi_call_builtin(args: &[u64]) -> u64 {
    let cx = ctx();
    let builtin = sexp(args[2]);
    let nargs = args[4] as usize;
    let call_args = frame_args(cx, nargs);
    let id = builtin.builtin_id() as u32;
    let fun = cx.builtin(id).fun;
    match fun(cx, &call_args) {
        Ok(v) => v.addr(),
        Err(e) => raise(e),
    }
}

/// `force_promise(prom) -> sexp`
pub fn bi_force_promise(args: &[u64]) -> u64 {
    let cx = ctx();
    let prom = sexp(args[0]);
    let value = prom.prom_value();
    if value != cx.singletons.unbound_value {
        return value.addr();
    }
    let mut eval = cx
        .promise_eval
        .take()
        .unwrap_or_else(|| raise(Error::Other("no promise evaluator installed".into())));
    let v = eval(
        cx,
        prom.prom_code(),
        prom.prom_idx() as u32,
        prom.prom_env(),
    );
    cx.promise_eval = Some(eval);
    prom.set_prom_value(v);
    v.addr()
}

/// `create_promise(code, prom_idx, env, eager) -> sexp`
pub fn bi_create_promise(args: &[u64]) -> u64 {
    let cx = ctx();
    maybe_gc(cx, &[sexp(args[2]), sexp(args[3])]);
    cx.heap
        .new_promise(args[0], args[1], sexp(args[2]), sexp(args[3]))
        .addr()
}

/// `create_environment(parent, arglist, context) -> sexp`
pub fn bi_create_environment(args: &[u64]) -> u64 {
    let cx = ctx();
    maybe_gc(cx, &[sexp(args[0]), sexp(args[1])]);
    cx.heap.new_env(sexp(args[1]), sexp(args[0])).addr()
}

/// `cons_nr_tagged(val, name, rest) -> sexp`
pub fn bi_cons_nr_tagged(args: &[u64]) -> u64 {
    let cx = ctx();
    maybe_gc(cx, &[sexp(args[0]), sexp(args[1]), sexp(args[2])]);
    cx.heap
        .cons(sexp(args[0]), sexp(args[2]), sexp(args[1]))
        .addr()
}

/// `cons_nr_tagged_missing(name, rest) -> sexp`
pub fn bi_cons_nr_tagged_missing(args: &[u64]) -> u64 {
    let cx = ctx();
    maybe_gc(cx, &[sexp(args[0]), sexp(args[1])]);
    let missing = cx.singletons.missing_arg;
    cx.heap.cons(missing, sexp(args[1]), sexp(args[0])).addr()
}

pub fn bi_new_int(args: &[u64]) -> u64 {
    let cx = ctx();
    maybe_gc(cx, &[]);
    cx.heap.new_int(args[0] as i32).addr()
}

pub fn bi_new_real(args: &[u64]) -> u64 {
    let cx = ctx();
    maybe_gc(cx, &[]);
    cx.heap.new_real(f64::from_bits(args[0])).addr()
}

pub fn bi_new_lgl(args: &[u64]) -> u64 {
    let cx = ctx();
    maybe_gc(cx, &[]);
    cx.heap.new_lgl(args[0] as i32).addr()
}

pub fn bi_new_int_from_real(args: &[u64]) -> u64 {
    let v = f64::from_bits(args[0]);
    let i = if v.is_nan() { NA_INTEGER } else { v as i32 };
    let cx = ctx();
    maybe_gc(cx, &[]);
    cx.heap.new_int(i).addr()
}

pub fn bi_new_real_from_int(args: &[u64]) -> u64 {
    let v = args[0] as i32;
    let r = if v == NA_INTEGER { na_real() } else { v as f64 };
    let cx = ctx();
    maybe_gc(cx, &[]);
    cx.heap.new_real(r).addr()
}

pub fn bi_new_lgl_from_real(args: &[u64]) -> u64 {
    let v = f64::from_bits(args[0]);
    let l = if v.is_nan() { NA_LOGICAL } else { (v != 0.0) as i32 };
    let cx = ctx();
    maybe_gc(cx, &[]);
    cx.heap.new_lgl(l).addr()
}

/// `as_logical(v) -> sexp`
pub fn bi_as_logical(args: &[u64]) -> u64 {
    let cx = ctx();
    let v = sexp(args[0]);
    let l = match v.sexp_type() {
        SexpType::Lgl => v.lgl_value(),
        SexpType::Int => {
            let i = v.int_value();
            if i == NA_INTEGER {
                NA_LOGICAL
            } else {
                (i != 0) as i32
            }
        }
        SexpType::Real => {
            let r = v.real_value();
            if r.is_nan() {
                NA_LOGICAL
            } else {
                (r != 0.0) as i32
            }
        }
        _ => raise(Error::Other("argument is not interpretable as logical".into())),
    };
    cx.heap.new_lgl(l).addr()
}

/// `as_test(v) -> i1`; errors on NA.
pub fn bi_as_test(args: &[u64]) -> u64 {
    let v = sexp(args[0]);
    match v.sexp_type() {
        SexpType::Lgl | SexpType::Int => {
            let i = v.int_value();
            if i == NA_INTEGER {
                raise(Error::NaWhereTestNeeded);
            }
            (i != 0) as u64
        }
        SexpType::Real => {
            let r = v.real_value();
            if r.is_nan() {
                raise(Error::NaWhereTestNeeded);
            }
            (r != 0.0) as u64
        }
        _ => raise(Error::Other("argument is not interpretable as logical".into())),
    }
}

/// `length(v) -> int`
pub fn bi_length(args: &[u64]) -> u64 {
    let v = sexp(args[0]);
    let len = match v.sexp_type() {
        SexpType::Nil => 0,
        SexpType::Lgl | SexpType::Int | SexpType::Real => v.length(),
        _ => 1,
    };
    len as u64
}

/// `error()`; never returns.
pub fn bi_error(_args: &[u64]) -> u64 {
    raise(Error::Other("invalid operation in compiled code".into()))
}

/// `deopt(code, closure, metadata, args) -> sexp`; reconstructs the frames
/// and hands control to the installed handler.
pub fn bi_deopt(args: &[u64]) -> u64 {
    let cx = ctx();
    let meta = unsafe { &*(args[2] as *const DeoptMetadata) };
    let nargs: usize = meta.frames.iter().map(|f| f.stack_size as usize).sum();
    let deopt_args = frame_args(cx, nargs);
    let event = DeoptEvent {
        meta,
        args: deopt_args,
    };
    let mut handler = cx
        .deopt_handler
        .take()
        .unwrap_or_else(|| raise(Error::DeoptWithoutHandler));
    let res = handler(cx, &event);
    cx.deopt_handler = Some(handler);
    res.addr()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ctx<R>(f: impl FnOnce(&mut Ctx) -> R) -> R {
        let mut cx = Ctx::new(1 << 40, 256);
        cx.enter(f)
    }

    #[test]
    fn binop_na_and_widening() {
        with_ctx(|cx| {
            let a = cx.heap.new_int(3);
            let b = cx.heap.new_int(4);
            let r = sexp(bi_binop(&[a.addr(), b.addr(), BinopKind::Add as u64]));
            assert_eq!(r.sexp_type(), SexpType::Int);
            assert_eq!(r.int_value(), 7);

            let na = cx.heap.new_int(NA_INTEGER);
            let r = sexp(bi_binop(&[a.addr(), na.addr(), BinopKind::Add as u64]));
            assert_eq!(r.int_value(), NA_INTEGER);

            // Division always widens to real.
            let r = sexp(bi_binop(&[a.addr(), b.addr(), BinopKind::Div as u64]));
            assert_eq!(r.sexp_type(), SexpType::Real);
            assert_eq!(r.real_value(), 0.75);

            // Overflow becomes NA, like INT_MAX + 1.
            let big = cx.heap.new_int(i32::MAX);
            let one = cx.heap.new_int(1);
            let r = sexp(bi_binop(&[big.addr(), one.addr(), BinopKind::Add as u64]));
            assert_eq!(r.int_value(), NA_INTEGER);
        });
    }

    #[test]
    fn modulo_follows_the_divisor_sign() {
        with_ctx(|cx| {
            let a = cx.heap.new_int(-7);
            let b = cx.heap.new_int(3);
            let r = sexp(bi_binop(&[a.addr(), b.addr(), BinopKind::Mod as u64]));
            assert_eq!(r.int_value(), 2);
        });
    }

    #[test]
    fn environment_lookup_walks_parents() {
        with_ctx(|cx| {
            let global = cx.singletons.global_env;
            let sym = cx.intern("x");
            let seven = cx.heap.new_int(7);
            cx.define_binding(global, sym, seven);

            let nil = cx.singletons.nil;
            let child = cx.heap.new_env(nil, global);

            let r = sexp(bi_ldvar(&[sym.addr(), child.addr()]));
            assert_eq!(r, seven);

            // The cache is only populated for the local frame.
            let mut cell: u64 = 0;
            let r = sexp(bi_ldvar_cache_miss(&[
                sym.addr(),
                child.addr(),
                &mut cell as *mut u64 as u64,
            ]));
            assert_eq!(r, seven);
            assert_eq!(cell, 0);

            let eight = cx.heap.new_int(8);
            bi_stvar(&[sym.addr(), eight.addr(), child.addr()]);
            let r = sexp(bi_ldvar_cache_miss(&[
                sym.addr(),
                child.addr(),
                &mut cell as *mut u64 as u64,
            ]));
            assert_eq!(r, eight);
            assert_ne!(cell, 0);
            assert_eq!(sexp(cell).car(), eight);
        });
    }

    #[test]
    fn gc_keeps_rooted_values() {
        with_ctx(|cx| {
            let keep = cx.heap.new_int(1);
            cx.stack.push(keep);
            for i in 0..100 {
                cx.heap.new_int(i);
            }
            let before = cx.heap.nodes_in_use.get();
            cx.collect_garbage(&[]);
            assert!(cx.heap.nodes_in_use.get() < before);
            assert_eq!(keep.int_value(), 1);
            cx.stack.pop(1);
        });
    }
}
