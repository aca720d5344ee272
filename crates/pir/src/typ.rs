//! The value type lattice.
//!
//! A `PirType` describes the set of runtime values an SSA value may take:
//! a set of host base tags, a disjoint set of native tags (values that only
//! exist inside compiled code, like the i1 `test` type), and "maybe" flag
//! bits for scalarness, attributes, objectness, NA/NaN and promise wrapping.
//! All flags are positive ("the value may be ..."), so union and intersection
//! are plain bitwise operations and `is_a` is bitwise subset.

use std::fmt;

/// Host value tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RType {
    Nil = 0,
    Logical,
    Integer,
    Real,
    Cplx,
    Str,
    /// Pairlist cells.
    List,
    Closure,
    Env,
    Prom,
    Code,
    Dots,
    ExpandedDots,
    Missing,
    Raw,
    S4,
    Expr,
    Sym,
    Chr,
    Other,
}

/// Tags for values that never exist on the host heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NativeType {
    /// An i1 condition.
    Test = 0,
    FrameState,
    Context,
    Checkpoint,
    /// The empty result of effect-only instructions.
    Void,
}

const NUM_RTYPES: u32 = 20;

// Flag bits. Positive "maybe" facts, so that union is bitwise-or.
const NOT_SCALAR: u8 = 1 << 0;
const MAYBE_OBJECT: u8 = 1 << 1;
const MAYBE_ATTRIB: u8 = 1 << 2;
const MAYBE_NAN: u8 = 1 << 3;
const MAYBE_PROMISE_WRAPPED: u8 = 1 << 4;

const VEC_FLAGS: u8 = NOT_SCALAR | MAYBE_OBJECT | MAYBE_ATTRIB | MAYBE_NAN;

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct PirType {
    r: u32,
    native: u8,
    flags: u8,
}

impl From<RType> for PirType {
    fn from(t: RType) -> Self {
        PirType {
            r: 1 << t as u32,
            native: 0,
            flags: VEC_FLAGS,
        }
    }
}

impl From<NativeType> for PirType {
    fn from(t: NativeType) -> Self {
        PirType {
            r: 0,
            native: 1 << t as u8,
            flags: 0,
        }
    }
}

impl PirType {
    pub const fn bottom() -> Self {
        PirType {
            r: 0,
            native: 0,
            flags: 0,
        }
    }

    pub fn voyd() -> Self {
        NativeType::Void.into()
    }

    pub fn test() -> Self {
        NativeType::Test.into()
    }

    /// Any forced, non-missing host value.
    pub fn val() -> Self {
        let all = (1u32 << NUM_RTYPES) - 1;
        PirType {
            r: all & !(1 << RType::Prom as u32) & !(1 << RType::Missing as u32),
            native: 0,
            flags: VEC_FLAGS,
        }
    }

    /// `val`, possibly still wrapped in a promise.
    pub fn val_or_lazy() -> Self {
        let mut t = Self::val();
        t.flags |= MAYBE_PROMISE_WRAPPED;
        t
    }

    /// Anything an instruction argument can be: a value, a promise or
    /// promise-wrapped value, or the missing marker.
    pub fn any() -> Self {
        let all = (1u32 << NUM_RTYPES) - 1;
        PirType {
            r: all,
            native: 0,
            flags: VEC_FLAGS | MAYBE_PROMISE_WRAPPED,
        }
    }

    pub fn num() -> Self {
        PirType::from(RType::Logical)
            | RType::Integer.into()
            | RType::Real.into()
            | RType::Cplx.into()
    }

    pub fn int_real() -> Self {
        PirType::from(RType::Integer) | RType::Real.into()
    }

    /// Atomic vectors, the inputs relational operators accept without
    /// dispatch.
    pub fn atom_or_simple_vec() -> Self {
        PirType::from(RType::Logical)
            | RType::Integer.into()
            | RType::Real.into()
            | RType::Cplx.into()
            | RType::Str.into()
            | RType::Nil.into()
    }

    pub fn simple_scalar_logical() -> Self {
        PirType::from(RType::Logical)
            .scalar()
            .not_object()
            .no_attribs()
    }

    pub fn closure() -> Self {
        RType::Closure.into()
    }

    pub fn env() -> Self {
        RType::Env.into()
    }

    pub fn dots_arg() -> Self {
        PirType::from(RType::Dots) | RType::Missing.into()
    }

    pub fn list() -> Self {
        PirType::from(RType::List) | RType::Nil.into()
    }

    // ---- set algebra ----

    #[must_use]
    pub fn or(self, other: PirType) -> Self {
        debug_assert!(
            !(self.is_rtype() && other.is_native() || self.is_native() && other.is_rtype()),
            "host and native types do not mix"
        );
        PirType {
            r: self.r | other.r,
            native: self.native | other.native,
            flags: self.flags | other.flags,
        }
    }

    #[must_use]
    pub fn and(self, other: PirType) -> Self {
        PirType {
            r: self.r & other.r,
            native: self.native & other.native,
            flags: self.flags & other.flags,
        }
    }

    /// Subset test: every value of `self` is a value of `other`.
    pub fn is_a(self, other: PirType) -> bool {
        self.r & !other.r == 0 && self.native & !other.native == 0 && self.flags & !other.flags == 0
    }

    pub fn is_void(self) -> bool {
        self.r == 0 && self.native == 0 || self == Self::voyd()
    }

    pub fn is_rtype(self) -> bool {
        self.r != 0 && self.native == 0
    }

    pub fn is_native(self) -> bool {
        self.native != 0
    }

    /// Numeric-widening supremum along logical < integer < real < complex.
    /// Non-numeric inputs fall back to a plain union.
    #[must_use]
    pub fn merge_with_conversion(self, other: PirType) -> Self {
        let both = self.or(other);
        if !both.is_a(Self::num()) {
            return both;
        }
        const CHAIN: [RType; 4] = [RType::Cplx, RType::Real, RType::Integer, RType::Logical];
        for t in CHAIN {
            if both.maybe(t) {
                return PirType {
                    r: 1 << t as u32,
                    native: 0,
                    flags: both.flags,
                };
            }
        }
        both
    }

    // ---- modifiers ----

    #[must_use]
    pub fn scalar(mut self) -> Self {
        self.flags &= !NOT_SCALAR;
        self
    }

    #[must_use]
    pub fn or_not_scalar(mut self) -> Self {
        self.flags |= NOT_SCALAR;
        self
    }

    #[must_use]
    pub fn not_object(mut self) -> Self {
        self.flags &= !MAYBE_OBJECT;
        self
    }

    #[must_use]
    pub fn no_attribs(mut self) -> Self {
        self.flags &= !(MAYBE_ATTRIB | MAYBE_OBJECT);
        self
    }

    #[must_use]
    pub fn not_na_or_nan(mut self) -> Self {
        self.flags &= !MAYBE_NAN;
        self
    }

    #[must_use]
    pub fn or_na_or_nan(mut self) -> Self {
        self.flags |= MAYBE_NAN;
        self
    }

    #[must_use]
    pub fn not_missing(mut self) -> Self {
        self.r &= !(1 << RType::Missing as u32);
        self
    }

    #[must_use]
    pub fn or_promise_wrapped(mut self) -> Self {
        self.flags |= MAYBE_PROMISE_WRAPPED;
        self
    }

    /// The type after forcing: the promise wrapper is gone, and an actual
    /// promise has become some value.
    #[must_use]
    pub fn forced(mut self) -> Self {
        self.flags &= !MAYBE_PROMISE_WRAPPED;
        if self.maybe(RType::Prom) {
            self = self.not_t(RType::Prom) | PirType::val();
        }
        self
    }

    #[must_use]
    pub fn or_t(mut self, t: RType) -> Self {
        self.r |= 1 << t as u32;
        self
    }

    #[must_use]
    pub fn not_t(mut self, t: RType) -> Self {
        self.r &= !(1 << t as u32);
        self
    }

    // ---- predicates ----

    pub fn maybe(self, t: RType) -> bool {
        self.r & (1 << t as u32) != 0
    }

    pub fn maybe_native(self, t: NativeType) -> bool {
        self.native & (1 << t as u8) != 0
    }

    pub fn maybe_obj(self) -> bool {
        self.flags & MAYBE_OBJECT != 0
    }

    pub fn maybe_has_attribs(self) -> bool {
        self.flags & MAYBE_ATTRIB != 0
    }

    pub fn maybe_lazy(self) -> bool {
        self.flags & MAYBE_PROMISE_WRAPPED != 0 || self.maybe(RType::Prom)
    }

    pub fn maybe_promise_wrapped(self) -> bool {
        self.flags & MAYBE_PROMISE_WRAPPED != 0
    }

    pub fn maybe_na_or_nan(self) -> bool {
        self.flags & MAYBE_NAN != 0
    }

    pub fn maybe_missing(self) -> bool {
        self.maybe(RType::Missing)
    }

    pub fn is_scalar(self) -> bool {
        self.is_rtype() && self.flags & NOT_SCALAR == 0
    }

    // ---- indexing inference ----

    /// Result type of extracting a single element (`x[[i]]`): the element
    /// type, scalar, attributes dropped.
    #[must_use]
    pub fn extract_type(self, idx: PirType) -> Self {
        let _ = idx;
        if !self.is_rtype() {
            return self;
        }
        self.scalar().no_attribs()
    }

    /// Result type of subsetting (`x[i]`): the base type survives, and the
    /// result is scalar only when the index is.
    #[must_use]
    pub fn subset_type(self, idx: PirType) -> Self {
        if !self.is_rtype() {
            return self;
        }
        if idx.is_scalar() {
            self.scalar()
        } else {
            self.or_not_scalar()
        }
    }
}

impl std::ops::BitOr for PirType {
    type Output = PirType;
    fn bitor(self, rhs: PirType) -> PirType {
        self.or(rhs)
    }
}

impl std::ops::BitAnd for PirType {
    type Output = PirType;
    fn bitand(self, rhs: PirType) -> PirType {
        self.and(rhs)
    }
}

impl fmt::Debug for PirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for PirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RNAMES: [&str; NUM_RTYPES as usize] = [
            "nil", "lgl", "int", "real", "cplx", "str", "list", "cls", "env", "prom", "code",
            "dots", "dots*", "miss", "raw", "s4", "expr", "sym", "chr", "other",
        ];
        const NNAMES: [&str; 5] = ["t", "fs", "ctx", "cp", "void"];

        if self.r == 0 && self.native == 0 {
            return write!(f, "bot");
        }

        let mut first = true;
        for (i, name) in RNAMES.iter().enumerate() {
            if self.r & (1 << i) != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        for (i, name) in NNAMES.iter().enumerate() {
            if self.native & (1 << i) != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if self.is_rtype() {
            if self.flags & NOT_SCALAR == 0 {
                write!(f, "'")?;
            }
            if self.flags & MAYBE_PROMISE_WRAPPED != 0 {
                write!(f, "^")?;
            }
            if self.flags & MAYBE_NAN == 0 {
                write!(f, "#")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_intersection_laws() {
        let a = PirType::from(RType::Integer).scalar().not_object();
        let b = PirType::from(RType::Real);
        let c = PirType::from(RType::Logical).scalar();

        assert!(a.is_a(a | b));
        assert!(b.is_a(a | b));
        assert!((a & b).is_a(a));
        assert!((a & b).is_a(b));
        assert!(a.is_a(a));

        assert_eq!(a | b, b | a);
        assert_eq!(a & b, b & a);
        assert_eq!((a | b) | c, a | (b | c));
        assert_eq!((a & b) & c, a & (b & c));
    }

    #[test]
    fn forced_strips_laziness() {
        let t = PirType::val_or_lazy();
        assert!(t.maybe_lazy());
        assert!(!t.forced().maybe_lazy());

        let p = PirType::from(RType::Prom);
        assert!(p.maybe_lazy());
        assert!(!p.forced().maybe_lazy());
    }

    #[test]
    fn scalar_int_subtypes_val() {
        let t = PirType::from(RType::Integer).scalar().not_object();
        assert!(t.is_a(PirType::val()));
        assert!(t.is_a(PirType::any()));
        assert!(!PirType::any().is_a(PirType::val()));
    }

    #[test]
    fn merge_with_conversion_widens() {
        let lgl = PirType::from(RType::Logical).scalar();
        let int = PirType::from(RType::Integer).scalar();
        let real = PirType::from(RType::Real).scalar();

        assert!(lgl.merge_with_conversion(int).maybe(RType::Integer));
        assert!(!lgl.merge_with_conversion(int).maybe(RType::Logical));
        assert!(int.merge_with_conversion(real).maybe(RType::Real));
        assert!(!int.merge_with_conversion(real).maybe(RType::Integer));

        // Non-numeric falls back to plain union.
        let s = PirType::from(RType::Str);
        let m = int.merge_with_conversion(s);
        assert!(m.maybe(RType::Integer) && m.maybe(RType::Str));
    }

    #[test]
    fn native_and_host_are_disjoint() {
        let t = PirType::test();
        assert!(t.is_native());
        assert!(!t.is_rtype());
        assert!(!t.is_a(PirType::val()));
        assert!(!PirType::from(RType::Integer).is_a(t));
    }

    #[test]
    fn not_missing_clears_the_tag() {
        let t = PirType::any();
        assert!(t.maybe_missing());
        assert!(!t.not_missing().maybe_missing());
    }

    #[test]
    fn subset_and_extract() {
        let v = PirType::from(RType::Real);
        let scalar_idx = PirType::from(RType::Integer).scalar();
        assert!(v.extract_type(scalar_idx).is_scalar());
        assert!(!v.extract_type(scalar_idx).maybe_has_attribs());
        assert!(v.subset_type(scalar_idx).is_scalar());
        assert!(!v.subset_type(v).is_scalar());
    }
}
