//! Native storage choice for SSA values.

use pir::{NativeType, PirType, RType};

/// Totally ordered: a merge takes the larger representation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Representation {
    #[default]
    Bottom,
    /// Unboxed 32-bit integer; also carries logicals and i1 tests.
    Integer,
    /// Unboxed f64.
    Real,
    /// A pointer to a boxed value.
    Boxed,
}

impl Representation {
    pub fn merge(&mut self, other: Representation) -> bool {
        if *self < other {
            *self = other;
            true
        } else {
            false
        }
    }

    /// The minimum representation admitting every value of `t`. Combined
    /// lattice types like `integer|real` stay boxed, since the union cannot
    /// be reboxed unambiguously.
    pub fn of_type(t: PirType) -> Representation {
        if t.is_void() {
            return Representation::Bottom;
        }
        if t.is_a(NativeType::Test.into()) {
            return Representation::Integer;
        }
        if t.is_a(PirType::from(RType::Logical).scalar().not_object()) {
            return Representation::Integer;
        }
        if t.is_a(PirType::from(RType::Integer).scalar().not_object()) {
            return Representation::Integer;
        }
        if t.is_a(PirType::from(RType::Real).scalar().not_object()) {
            return Representation::Real;
        }
        Representation::Boxed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_types_unbox() {
        assert_eq!(
            Representation::of_type(PirType::test()),
            Representation::Integer
        );
        assert_eq!(
            Representation::of_type(PirType::from(RType::Integer).scalar().not_object()),
            Representation::Integer
        );
        assert_eq!(
            Representation::of_type(PirType::from(RType::Logical).scalar().not_object()),
            Representation::Integer
        );
        assert_eq!(
            Representation::of_type(PirType::from(RType::Real).scalar().not_object()),
            Representation::Real
        );
    }

    #[test]
    fn unions_and_vectors_stay_boxed() {
        let int_or_real = (PirType::from(RType::Integer) | RType::Real.into())
            .scalar()
            .not_object();
        assert_eq!(Representation::of_type(int_or_real), Representation::Boxed);
        assert_eq!(
            Representation::of_type(PirType::from(RType::Integer).not_object()),
            Representation::Boxed
        );
        assert_eq!(
            Representation::of_type(PirType::from(RType::Integer).scalar()),
            Representation::Boxed
        );
        assert_eq!(Representation::of_type(PirType::any()), Representation::Boxed);
    }

    #[test]
    fn merge_is_max() {
        let mut r = Representation::Bottom;
        assert!(r.merge(Representation::Integer));
        assert!(r.merge(Representation::Boxed));
        assert!(!r.merge(Representation::Real));
        assert_eq!(r, Representation::Boxed);
    }
}
