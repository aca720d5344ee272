//! The code-generator facade the lowerer emits against.

use crate::builtins::NativeBuiltin;

/// Storage type of a virtual register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValTy {
    /// 32-bit signed integer.
    Int,
    /// 64-bit float.
    Real,
    /// 64-bit pointer-sized word.
    Ptr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
}

/// Comparisons yield an `Int` holding 0 or 1. `Ptr` comparisons are
/// unsigned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpMode {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Signature of a native call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: &'static [ValTy],
    pub ret: Option<ValTy>,
}

impl Signature {
    pub const fn new(params: &'static [ValTy], ret: Option<ValTy>) -> Self {
        Signature { params, ret }
    }
}

/// Builder for one native function.
///
/// Every function has the fixed six-parameter signature
/// `(code, ctx, args, env, closure, caller_code) -> sexp`; `param(i)` yields
/// the corresponding pointer-typed register.
///
/// The builder must not reorder emitted operations: instruction side effects
/// retire in emission order.
pub trait CodeBuilder {
    type VReg: Copy + PartialEq + std::fmt::Debug;
    type Label: Copy;

    fn param(&self, i: usize) -> Self::VReg;
    fn ty_of(&self, v: Self::VReg) -> ValTy;

    fn new_label(&mut self) -> Self::Label;
    fn bind_label(&mut self, label: Self::Label);

    /// A mutable register, for phis and merge points.
    fn new_register(&mut self, ty: ValTy) -> Self::VReg;
    fn store_register(&mut self, dst: Self::VReg, src: Self::VReg);

    fn const_int(&mut self, v: i32) -> Self::VReg;
    fn const_real(&mut self, v: f64) -> Self::VReg;
    fn const_ptr(&mut self, addr: u64) -> Self::VReg;

    fn alu(&mut self, op: AluOp, ty: ValTy, a: Self::VReg, b: Self::VReg) -> Self::VReg;
    fn cmp(&mut self, mode: CmpMode, ty: ValTy, a: Self::VReg, b: Self::VReg) -> Self::VReg;
    /// Convert between `Int` and `Real`. No NA handling; callers have made
    /// the value NA-safe by explicit compare.
    fn convert(&mut self, v: Self::VReg, to: ValTy) -> Self::VReg;

    /// Load at a statically known offset from a base pointer.
    fn load(&mut self, base: Self::VReg, ofs: i64, ty: ValTy) -> Self::VReg;
    fn store(&mut self, base: Self::VReg, ofs: i64, v: Self::VReg, ty: ValTy);
    /// Load the pointer-sized element `idx` of the array at `base`.
    fn load_elem_ptr(&mut self, base: Self::VReg, idx: Self::VReg) -> Self::VReg;
    fn memset(&mut self, base: Self::VReg, byte: u8, len: Self::VReg);

    /// Reserve `bytes` of zero-initialized function-local scratch memory and
    /// yield its base address.
    fn alloca(&mut self, bytes: u32) -> Self::VReg;

    fn call_native(&mut self, builtin: &NativeBuiltin, args: &[Self::VReg]) -> Option<Self::VReg>;

    fn branch_if(&mut self, cond: Self::VReg, label: Self::Label);
    fn branch_if_not(&mut self, cond: Self::VReg, label: Self::Label);
    fn jump(&mut self, label: Self::Label);
    fn ret(&mut self, v: Self::VReg);
}
