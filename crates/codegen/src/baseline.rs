//! The baseline backend: records a linear native IR and executes it directly
//! against the runtime. It stands in for a machine-code emitter behind the
//! same [`CodeBuilder`] facade.

use crate::{
    backend::{AluOp, CmpMode, CodeBuilder, ValTy},
    builtins::NativeBuiltin,
};
use cranelift_entity::{EntityRef, PrimaryMap};
use runtime::{BuiltinFn, Ctx, Error, Sexp, Unwind, STACK_CELL_SIZE};
use smallvec::SmallVec;

pir::entity_ref! {
    pub struct Vreg;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Clone, Debug)]
enum Nir {
    ConstI { dst: Vreg, v: i32 },
    ConstR { dst: Vreg, v: f64 },
    ConstP { dst: Vreg, v: u64 },
    Move { dst: Vreg, src: Vreg },
    Alu { op: AluOp, ty: ValTy, dst: Vreg, a: Vreg, b: Vreg },
    Cmp { mode: CmpMode, ty: ValTy, dst: Vreg, a: Vreg, b: Vreg },
    Convert { dst: Vreg, src: Vreg, to: ValTy },
    Load { dst: Vreg, base: Vreg, ofs: i64, ty: ValTy },
    Store { base: Vreg, ofs: i64, src: Vreg, ty: ValTy },
    LoadElemPtr { dst: Vreg, base: Vreg, idx: Vreg },
    Memset { base: Vreg, byte: u8, len: Vreg },
    FrameAddr { dst: Vreg, ofs: u32 },
    CallNative {
        dst: Option<Vreg>,
        fun: BuiltinFn,
        name: &'static str,
        args: SmallVec<[Vreg; 6]>,
    },
    Jump { target: u32 },
    BranchIf { cond: Vreg, target: u32 },
    BranchIfNot { cond: Vreg, target: u32 },
    Ret { src: Vreg },
}

const UNBOUND_LABEL: u32 = u32::MAX;

pub struct NativeBuilder {
    instrs: Vec<Nir>,
    label_pos: Vec<u32>,
    vregs: PrimaryMap<Vreg, ValTy>,
    frame_size: u32,
    params: [Vreg; 6],
}

impl Default for NativeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBuilder {
    pub fn new() -> Self {
        let mut vregs = PrimaryMap::new();
        let params = std::array::from_fn(|_| vregs.push(ValTy::Ptr));
        NativeBuilder {
            instrs: Vec::new(),
            label_pos: Vec::new(),
            vregs,
            frame_size: 0,
            params,
        }
    }

    fn def(&mut self, ty: ValTy) -> Vreg {
        self.vregs.push(ty)
    }

    pub fn finish(self) -> CompiledCode {
        debug_assert!(
            self.label_pos.iter().all(|&p| p != UNBOUND_LABEL),
            "unbound label"
        );
        CompiledCode {
            instrs: self.instrs,
            label_pos: self.label_pos,
            n_vregs: self.vregs.len(),
            frame_size: self.frame_size,
            params: self.params,
        }
    }
}

impl CodeBuilder for NativeBuilder {
    type VReg = Vreg;
    type Label = Label;

    fn param(&self, i: usize) -> Vreg {
        self.params[i]
    }

    fn ty_of(&self, v: Vreg) -> ValTy {
        self.vregs[v]
    }

    fn new_label(&mut self) -> Label {
        self.label_pos.push(UNBOUND_LABEL);
        Label(self.label_pos.len() as u32 - 1)
    }

    fn bind_label(&mut self, label: Label) {
        debug_assert_eq!(self.label_pos[label.0 as usize], UNBOUND_LABEL);
        self.label_pos[label.0 as usize] = self.instrs.len() as u32;
    }

    fn new_register(&mut self, ty: ValTy) -> Vreg {
        self.def(ty)
    }

    fn store_register(&mut self, dst: Vreg, src: Vreg) {
        debug_assert_eq!(self.vregs[dst], self.vregs[src]);
        self.instrs.push(Nir::Move { dst, src });
    }

    fn const_int(&mut self, v: i32) -> Vreg {
        let dst = self.def(ValTy::Int);
        self.instrs.push(Nir::ConstI { dst, v });
        dst
    }

    fn const_real(&mut self, v: f64) -> Vreg {
        let dst = self.def(ValTy::Real);
        self.instrs.push(Nir::ConstR { dst, v });
        dst
    }

    fn const_ptr(&mut self, addr: u64) -> Vreg {
        let dst = self.def(ValTy::Ptr);
        self.instrs.push(Nir::ConstP { dst, v: addr });
        dst
    }

    fn alu(&mut self, op: AluOp, ty: ValTy, a: Vreg, b: Vreg) -> Vreg {
        let dst = self.def(ty);
        self.instrs.push(Nir::Alu { op, ty, dst, a, b });
        dst
    }

    fn cmp(&mut self, mode: CmpMode, ty: ValTy, a: Vreg, b: Vreg) -> Vreg {
        let dst = self.def(ValTy::Int);
        self.instrs.push(Nir::Cmp { mode, ty, dst, a, b });
        dst
    }

    fn convert(&mut self, v: Vreg, to: ValTy) -> Vreg {
        let dst = self.def(to);
        self.instrs.push(Nir::Convert { dst, src: v, to });
        dst
    }

    fn load(&mut self, base: Vreg, ofs: i64, ty: ValTy) -> Vreg {
        let dst = self.def(ty);
        self.instrs.push(Nir::Load { dst, base, ofs, ty });
        dst
    }

    fn store(&mut self, base: Vreg, ofs: i64, v: Vreg, ty: ValTy) {
        self.instrs.push(Nir::Store {
            base,
            ofs,
            src: v,
            ty,
        });
    }

    fn load_elem_ptr(&mut self, base: Vreg, idx: Vreg) -> Vreg {
        let dst = self.def(ValTy::Ptr);
        self.instrs.push(Nir::LoadElemPtr { dst, base, idx });
        dst
    }

    fn memset(&mut self, base: Vreg, byte: u8, len: Vreg) {
        self.instrs.push(Nir::Memset { base, byte, len });
    }

    fn alloca(&mut self, bytes: u32) -> Vreg {
        let ofs = self.frame_size;
        self.frame_size += bytes.div_ceil(16) * 16;
        let dst = self.def(ValTy::Ptr);
        self.instrs.push(Nir::FrameAddr { dst, ofs });
        dst
    }

    fn call_native(&mut self, builtin: &NativeBuiltin, args: &[Vreg]) -> Option<Vreg> {
        assert_eq!(args.len(), builtin.arity as usize, "{}", builtin.name);
        for (arg, ty) in args.iter().zip(builtin.signature.params) {
            debug_assert_eq!(self.vregs[*arg], *ty, "{}", builtin.name);
        }
        let dst = builtin.signature.ret.map(|ty| self.def(ty));
        self.instrs.push(Nir::CallNative {
            dst,
            fun: builtin.fun,
            name: builtin.name,
            args: SmallVec::from_slice(args),
        });
        dst
    }

    fn branch_if(&mut self, cond: Vreg, label: Label) {
        self.instrs.push(Nir::BranchIf {
            cond,
            target: label.0,
        });
    }

    fn branch_if_not(&mut self, cond: Vreg, label: Label) {
        self.instrs.push(Nir::BranchIfNot {
            cond,
            target: label.0,
        });
    }

    fn jump(&mut self, label: Label) {
        self.instrs.push(Nir::Jump { target: label.0 });
    }

    fn ret(&mut self, v: Vreg) {
        self.instrs.push(Nir::Ret { src: v });
    }
}

/// An executable function: the recorded native IR plus its register file and
/// frame layout.
#[derive(Debug)]
pub struct CompiledCode {
    instrs: Vec<Nir>,
    label_pos: Vec<u32>,
    n_vregs: usize,
    frame_size: u32,
    params: [Vreg; 6],
}

impl CompiledCode {
    /// Names of the native calls the function contains, in emission order.
    /// Used by tests to observe which paths the lowering chose.
    pub fn native_calls(&self) -> Vec<&'static str> {
        self.instrs
            .iter()
            .filter_map(|i| match i {
                Nir::CallNative { name, .. } => Some(*name),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Run the function. The arguments are rooted in node-stack cells for
    /// the duration of the call, matching the caller-owned argument frame of
    /// the native calling convention.
    pub fn call(
        &self,
        ctx: &mut Ctx,
        args: &[Sexp],
        env: Sexp,
        closure: Sexp,
    ) -> Result<Sexp, Error> {
        self.call_raw(ctx, args, env, closure, 0, 0)
    }

    pub fn call_raw(
        &self,
        ctx: &mut Ctx,
        args: &[Sexp],
        env: Sexp,
        closure: Sexp,
        code: u64,
        caller_code: u64,
    ) -> Result<Sexp, Error> {
        ctx.enter(|cx| {
            let saved_top = cx.stack.top.get();
            for &a in args {
                cx.stack.push(a);
            }
            let args_base = cx.stack.top.get() - (args.len() * STACK_CELL_SIZE) as u64;

            let ctx_ptr: *mut Ctx = cx;
            let params = [
                code,
                ctx_ptr as u64,
                args_base,
                env.addr(),
                closure.addr(),
                caller_code,
            ];

            let res =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.exec(params)));

            // The callee restores the stack on the regular path; after an
            // unwind we do it here.
            cx.stack.top.set(saved_top);

            match res {
                Ok(v) => Ok(Sexp::from_addr(v)),
                Err(payload) => match payload.downcast::<Unwind>() {
                    Ok(u) => Err(u.0),
                    Err(payload) => std::panic::resume_unwind(payload),
                },
            }
        })
    }

    fn exec(&self, param_values: [u64; 6]) -> u64 {
        let mut regs = vec![0u64; self.n_vregs];
        for (i, &v) in param_values.iter().enumerate() {
            regs[self.params[i].index()] = v;
        }
        // 16-byte aligned local scratch, zeroed on entry.
        let mut frame = vec![0u128; (self.frame_size as usize).div_ceil(16)];
        let frame_base = frame.as_mut_ptr() as u64;

        let mut ip = 0usize;
        loop {
            let instr = &self.instrs[ip];
            ip += 1;
            match instr {
                Nir::ConstI { dst, v } => regs[dst.index()] = *v as u32 as u64,
                Nir::ConstR { dst, v } => regs[dst.index()] = v.to_bits(),
                Nir::ConstP { dst, v } => regs[dst.index()] = *v,
                Nir::Move { dst, src } => {
                    let v = regs[src.index()];
                    regs[dst.index()] = v;
                }
                Nir::Alu { op, ty, dst, a, b } => {
                    let (a, b) = (regs[a.index()], regs[b.index()]);
                    regs[dst.index()] = alu(*op, *ty, a, b);
                }
                Nir::Cmp { mode, ty, dst, a, b } => {
                    let (a, b) = (regs[a.index()], regs[b.index()]);
                    regs[dst.index()] = cmp(*mode, *ty, a, b) as u64;
                }
                Nir::Convert { dst, src, to } => {
                    let v = regs[src.index()];
                    regs[dst.index()] = match to {
                        ValTy::Real => ((v as i32) as f64).to_bits(),
                        ValTy::Int => (f64::from_bits(v) as i32) as u32 as u64,
                        ValTy::Ptr => v,
                    };
                }
                Nir::Load { dst, base, ofs, ty } => {
                    let addr = regs[base.index()].wrapping_add_signed(*ofs);
                    regs[dst.index()] = unsafe {
                        match ty {
                            ValTy::Int => (*(addr as *const i32)) as u32 as u64,
                            ValTy::Real | ValTy::Ptr => *(addr as *const u64),
                        }
                    };
                }
                Nir::Store { base, ofs, src, ty } => {
                    let addr = regs[base.index()].wrapping_add_signed(*ofs);
                    let v = regs[src.index()];
                    unsafe {
                        match ty {
                            ValTy::Int => *(addr as *mut i32) = v as i32,
                            ValTy::Real | ValTy::Ptr => *(addr as *mut u64) = v,
                        }
                    }
                }
                Nir::LoadElemPtr { dst, base, idx } => {
                    let addr = regs[base.index()] + (regs[idx.index()] as u32 as u64) * 8;
                    regs[dst.index()] = unsafe { *(addr as *const u64) };
                }
                Nir::Memset { base, byte, len } => {
                    let addr = regs[base.index()];
                    let len = regs[len.index()] as usize;
                    unsafe { std::ptr::write_bytes(addr as *mut u8, *byte, len) };
                }
                Nir::FrameAddr { dst, ofs } => {
                    regs[dst.index()] = frame_base + *ofs as u64;
                }
                Nir::CallNative { dst, fun, args, .. } => {
                    let vals: SmallVec<[u64; 6]> = args.iter().map(|a| regs[a.index()]).collect();
                    let res = fun(&vals);
                    if let Some(dst) = dst {
                        regs[dst.index()] = res;
                    }
                }
                Nir::Jump { target } => ip = self.label_pos[*target as usize] as usize,
                Nir::BranchIf { cond, target } => {
                    if regs[cond.index()] as i32 != 0 {
                        ip = self.label_pos[*target as usize] as usize;
                    }
                }
                Nir::BranchIfNot { cond, target } => {
                    if regs[cond.index()] as i32 == 0 {
                        ip = self.label_pos[*target as usize] as usize;
                    }
                }
                Nir::Ret { src } => return regs[src.index()],
            }
        }
    }
}

fn alu(op: AluOp, ty: ValTy, a: u64, b: u64) -> u64 {
    match ty {
        ValTy::Int => {
            let (x, y) = (a as i32, b as i32);
            let v = match op {
                AluOp::Add => x.wrapping_add(y),
                AluOp::Sub => x.wrapping_sub(y),
                AluOp::Mul => x.wrapping_mul(y),
                AluOp::Div => x.wrapping_div(y),
                AluOp::And => x & y,
                AluOp::Or => x | y,
            };
            v as u32 as u64
        }
        ValTy::Real => {
            let (x, y) = (f64::from_bits(a), f64::from_bits(b));
            let v = match op {
                AluOp::Add => x + y,
                AluOp::Sub => x - y,
                AluOp::Mul => x * y,
                AluOp::Div => x / y,
                AluOp::And | AluOp::Or => panic!("bitwise op on reals"),
            };
            v.to_bits()
        }
        ValTy::Ptr => match op {
            AluOp::Add => a.wrapping_add(b),
            AluOp::Sub => a.wrapping_sub(b),
            AluOp::Mul => a.wrapping_mul(b),
            AluOp::Div => a / b,
            AluOp::And => a & b,
            AluOp::Or => a | b,
        },
    }
}

fn cmp(mode: CmpMode, ty: ValTy, a: u64, b: u64) -> bool {
    match ty {
        ValTy::Int => {
            let (x, y) = (a as i32, b as i32);
            match mode {
                CmpMode::Eq => x == y,
                CmpMode::Ne => x != y,
                CmpMode::Lt => x < y,
                CmpMode::Le => x <= y,
                CmpMode::Gt => x > y,
                CmpMode::Ge => x >= y,
            }
        }
        ValTy::Real => {
            let (x, y) = (f64::from_bits(a), f64::from_bits(b));
            match mode {
                CmpMode::Eq => x == y,
                CmpMode::Ne => x != y,
                CmpMode::Lt => x < y,
                CmpMode::Le => x <= y,
                CmpMode::Gt => x > y,
                CmpMode::Ge => x >= y,
            }
        }
        ValTy::Ptr => match mode {
            CmpMode::Eq => a == b,
            CmpMode::Ne => a != b,
            CmpMode::Lt => a < b,
            CmpMode::Le => a <= b,
            CmpMode::Gt => a > b,
            CmpMode::Ge => a >= b,
        },
    }
}
