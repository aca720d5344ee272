//! Boxed host values.
//!
//! Every value is a heap node starting with a one-word tagged header. The
//! lowerer hardcodes the offsets published here: the header word for type
//! tests, the payload offset for unboxing scalars, the car of a binding cell
//! for the variable cache, and the value slot of a promise for forcing.

use std::mem;

/// Pointer to a heap node. The wrapped pointer must point to a live node
/// allocated by the [`crate::Heap`] (or be null).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Sexp(*mut u8);

unsafe impl Send for Sexp {}
unsafe impl Sync for Sexp {}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SexpType {
    Nil = 0,
    Sym = 1,
    List = 2,
    Clo = 3,
    Env = 4,
    Prom = 5,
    Builtin = 8,
    Lgl = 10,
    Int = 13,
    Real = 14,
}

impl SexpType {
    pub fn from_bits(bits: u64) -> SexpType {
        match bits {
            0 => SexpType::Nil,
            1 => SexpType::Sym,
            2 => SexpType::List,
            3 => SexpType::Clo,
            4 => SexpType::Env,
            5 => SexpType::Prom,
            8 => SexpType::Builtin,
            10 => SexpType::Lgl,
            13 => SexpType::Int,
            14 => SexpType::Real,
            _ => panic!("corrupt node header: type bits {bits}"),
        }
    }
}

#[repr(C)]
pub struct SxpHeader {
    pub info: u64,
    pub attrib: Sexp,
}

/// Header of the vector-shaped nodes; scalar payloads follow immediately.
#[repr(C)]
pub struct VecSxp {
    pub hdr: SxpHeader,
    pub length: i64,
}

#[repr(C)]
pub struct ConsSxp {
    pub hdr: SxpHeader,
    pub car: Sexp,
    pub cdr: Sexp,
    pub tag: Sexp,
}

#[repr(C)]
pub struct EnvSxp {
    pub hdr: SxpHeader,
    pub bindings: Sexp,
    pub parent: Sexp,
}

#[repr(C)]
pub struct PromSxp {
    pub hdr: SxpHeader,
    pub value: Sexp,
    pub code: u64,
    pub prom_idx: u64,
    pub env: Sexp,
}

#[repr(C)]
pub struct CloSxp {
    pub hdr: SxpHeader,
    pub formals: Sexp,
    /// Opaque pointer to the dispatch table attached by the host glue.
    pub body: u64,
    pub env: Sexp,
}

#[repr(C)]
pub struct SymSxp {
    pub hdr: SxpHeader,
    /// Index into the context's interned name table.
    pub name: u64,
}

#[repr(C)]
pub struct BuiltinSxp {
    pub hdr: SxpHeader,
    pub id: u64,
}

pub const SXPINFO_OFS: usize = 0;
pub const STD_VEC_DATA_OFS: usize = mem::size_of::<VecSxp>();
pub const CAR_OFS: usize = mem::offset_of!(ConsSxp, car);
pub const PR_VALUE_OFS: usize = mem::offset_of!(PromSxp, value);

pub const TYPE_MASK: u64 = 0x1f;
pub const OBJECT_BIT: u64 = 1 << 5;
const MARK_BIT: u64 = 1 << 6;
/// lsb of the named count.
pub const NAMED_BIT: u64 = 1 << 32;

pub const NA_INTEGER: i32 = i32::MIN;
pub const NA_LOGICAL: i32 = i32::MIN;

/// The NA real: a quiet NaN. It round-trips through the `x != x` test like
/// any other NaN.
pub fn na_real() -> f64 {
    f64::from_bits(0x7ff0_0000_0000_07a2)
}

impl Sexp {
    pub fn null() -> Sexp {
        Sexp(std::ptr::null_mut())
    }

    /// # Safety
    /// `p` must be null or point to a live heap node.
    pub unsafe fn from_raw(p: *mut u8) -> Sexp {
        Sexp(p)
    }

    pub fn from_addr(a: u64) -> Sexp {
        Sexp(a as *mut u8)
    }

    pub fn as_ptr(self) -> *mut u8 {
        self.0
    }

    pub fn addr(self) -> u64 {
        self.0 as u64
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    fn header(self) -> *mut SxpHeader {
        debug_assert!(!self.0.is_null());
        self.0 as *mut SxpHeader
    }

    pub fn info(self) -> u64 {
        unsafe { (*self.header()).info }
    }

    pub fn set_info(self, info: u64) {
        unsafe { (*self.header()).info = info }
    }

    pub fn sexp_type(self) -> SexpType {
        SexpType::from_bits(self.info() & TYPE_MASK)
    }

    pub fn is_object(self) -> bool {
        self.info() & OBJECT_BIT != 0
    }

    pub fn set_object(self, obj: bool) {
        let info = self.info();
        self.set_info(if obj { info | OBJECT_BIT } else { info & !OBJECT_BIT });
    }

    pub fn is_marked(self) -> bool {
        self.info() & MARK_BIT != 0
    }

    pub fn set_marked(self, m: bool) {
        let info = self.info();
        self.set_info(if m { info | MARK_BIT } else { info & !MARK_BIT });
    }

    pub fn is_named(self) -> bool {
        self.info() & NAMED_BIT != 0
    }

    pub fn attrib(self) -> Sexp {
        unsafe { (*self.header()).attrib }
    }

    // ---- vectors ----

    pub fn length(self) -> i64 {
        debug_assert!(matches!(
            self.sexp_type(),
            SexpType::Lgl | SexpType::Int | SexpType::Real
        ));
        unsafe { (*(self.0 as *const VecSxp)).length }
    }

    fn payload(self) -> *mut u8 {
        unsafe { self.0.add(STD_VEC_DATA_OFS) }
    }

    pub fn int_value(self) -> i32 {
        debug_assert!(matches!(self.sexp_type(), SexpType::Int | SexpType::Lgl));
        unsafe { *(self.payload() as *const i32) }
    }

    pub fn set_int_value(self, v: i32) {
        unsafe { *(self.payload() as *mut i32) = v }
    }

    pub fn real_value(self) -> f64 {
        debug_assert_eq!(self.sexp_type(), SexpType::Real);
        unsafe { *(self.payload() as *const f64) }
    }

    pub fn set_real_value(self, v: f64) {
        unsafe { *(self.payload() as *mut f64) = v }
    }

    pub fn lgl_value(self) -> i32 {
        self.int_value()
    }

    // ---- cons cells ----

    pub fn car(self) -> Sexp {
        unsafe { (*(self.0 as *const ConsSxp)).car }
    }

    pub fn set_car(self, v: Sexp) {
        unsafe { (*(self.0 as *mut ConsSxp)).car = v }
    }

    pub fn cdr(self) -> Sexp {
        unsafe { (*(self.0 as *const ConsSxp)).cdr }
    }

    pub fn set_cdr(self, v: Sexp) {
        unsafe { (*(self.0 as *mut ConsSxp)).cdr = v }
    }

    pub fn tag(self) -> Sexp {
        unsafe { (*(self.0 as *const ConsSxp)).tag }
    }

    pub fn set_tag(self, v: Sexp) {
        unsafe { (*(self.0 as *mut ConsSxp)).tag = v }
    }

    // ---- environments ----

    pub fn env_bindings(self) -> Sexp {
        debug_assert_eq!(self.sexp_type(), SexpType::Env);
        unsafe { (*(self.0 as *const EnvSxp)).bindings }
    }

    pub fn set_env_bindings(self, v: Sexp) {
        unsafe { (*(self.0 as *mut EnvSxp)).bindings = v }
    }

    pub fn env_parent(self) -> Sexp {
        debug_assert_eq!(self.sexp_type(), SexpType::Env);
        unsafe { (*(self.0 as *const EnvSxp)).parent }
    }

    // ---- promises ----

    pub fn prom_value(self) -> Sexp {
        debug_assert_eq!(self.sexp_type(), SexpType::Prom);
        unsafe { (*(self.0 as *const PromSxp)).value }
    }

    pub fn set_prom_value(self, v: Sexp) {
        unsafe { (*(self.0 as *mut PromSxp)).value = v }
    }

    pub fn prom_code(self) -> u64 {
        unsafe { (*(self.0 as *const PromSxp)).code }
    }

    pub fn prom_idx(self) -> u64 {
        unsafe { (*(self.0 as *const PromSxp)).prom_idx }
    }

    pub fn prom_env(self) -> Sexp {
        unsafe { (*(self.0 as *const PromSxp)).env }
    }

    // ---- closures ----

    pub fn clo_formals(self) -> Sexp {
        debug_assert_eq!(self.sexp_type(), SexpType::Clo);
        unsafe { (*(self.0 as *const CloSxp)).formals }
    }

    pub fn clo_body(self) -> u64 {
        unsafe { (*(self.0 as *const CloSxp)).body }
    }

    pub fn set_clo_body(self, body: u64) {
        unsafe { (*(self.0 as *mut CloSxp)).body = body }
    }

    pub fn clo_env(self) -> Sexp {
        unsafe { (*(self.0 as *const CloSxp)).env }
    }

    // ---- symbols ----

    pub fn sym_name_index(self) -> usize {
        debug_assert_eq!(self.sexp_type(), SexpType::Sym);
        unsafe { (*(self.0 as *const SymSxp)).name as usize }
    }

    // ---- builtins ----

    pub fn builtin_id(self) -> u64 {
        debug_assert_eq!(self.sexp_type(), SexpType::Builtin);
        unsafe { (*(self.0 as *const BuiltinSxp)).id }
    }
}
