//! Instruction side-effect sets.

use std::fmt;

/// Effect that can be produced by an instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Effect {
    /// Changes the host visibility flag.
    Visibility = 0,
    /// Might produce a warning.
    Warn,
    /// Might produce an error.
    Error,
    /// Might force promises.
    Force,
    /// Might use reflection.
    Reflection,
    /// Might leak some of its arguments.
    LeakArg,
    ChangesContexts,
    ReadsEnv,
    WritesEnv,
    LeaksEnv,
    TriggerDeopt,
    /// Might execute more host code.
    ExecuteCode,
    UpdatesMetadata,
    /// Set on speculatively optimized instructions so they are never hoisted
    /// over their assumption.
    DependsOnAssume,
    /// Modifies an input, e.g. update-promise.
    MutatesArgument,
}

const NUM_EFFECTS: u16 = 15;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Effects(u16);

impl Effects {
    pub const fn none() -> Self {
        Effects(0)
    }

    pub const fn any() -> Self {
        Effects((1 << NUM_EFFECTS) - 1)
    }

    pub const fn of(e: Effect) -> Self {
        Effects(1 << e as u16)
    }

    /// `Error | Warn | Visibility | DependsOnAssume`: the effects an
    /// arithmetic or relational instruction retains once its inputs are known
    /// not to be objects.
    pub const fn error_warn_visible() -> Self {
        Effects(
            1 << Effect::Error as u16
                | 1 << Effect::Warn as u16
                | 1 << Effect::Visibility as u16
                | 1 << Effect::DependsOnAssume as u16,
        )
    }

    pub fn contains(self, e: Effect) -> bool {
        self.0 & (1 << e as u16) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn with(self, e: Effect) -> Self {
        Effects(self.0 | 1 << e as u16)
    }

    #[must_use]
    pub fn without(self, e: Effect) -> Self {
        Effects(self.0 & !(1 << e as u16))
    }

    pub fn insert(&mut self, e: Effect) {
        *self = self.with(e);
    }

    pub fn reset(&mut self, e: Effect) {
        *self = self.without(e);
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_subset_of(self, other: Effects) -> bool {
        self.0 & !other.0 == 0
    }

    /// Effects that are observable behavior on their own. The dropped ones
    /// only constrain ordering; an unused instruction carrying nothing else
    /// can be removed.
    #[must_use]
    pub fn observable(self) -> Self {
        self.without(Effect::LeakArg)
            .without(Effect::ReadsEnv)
            .without(Effect::LeaksEnv)
            .without(Effect::DependsOnAssume)
    }

    /// Observable effects minus the ones that are tolerable to get wrong.
    #[must_use]
    pub fn strong(self) -> Self {
        self.observable()
            .without(Effect::Visibility)
            .without(Effect::UpdatesMetadata)
    }

    /// Whether an optimized-code roll-back may not cross this instruction.
    /// Error exits the function, so it never needs rolling back before.
    pub fn is_deopt_barrier(self) -> bool {
        !self
            .strong()
            .without(Effect::TriggerDeopt)
            .without(Effect::Error)
            .is_empty()
    }

    pub fn iter(self) -> impl Iterator<Item = Effect> {
        (0..NUM_EFFECTS).filter_map(move |i| {
            if self.0 & (1 << i) != 0 {
                // Safety: i is in range of the closed enum.
                Some(unsafe { std::mem::transmute::<u8, Effect>(i as u8) })
            } else {
                None
            }
        })
    }
}

impl std::ops::BitOr for Effects {
    type Output = Effects;
    fn bitor(self, rhs: Effects) -> Effects {
        Effects(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<Effect> for Effects {
    type Output = Effects;
    fn bitor(self, rhs: Effect) -> Effects {
        self.with(rhs)
    }
}

impl std::ops::BitAnd for Effects {
    type Output = Effects;
    fn bitand(self, rhs: Effects) -> Effects {
        Effects(self.0 & rhs.0)
    }
}

impl From<Effect> for Effects {
    fn from(e: Effect) -> Effects {
        Effects::of(e)
    }
}

impl fmt::Debug for Effects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for e in self.iter() {
            set.entry(&e);
        }
        set.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_sets() {
        let e = Effects::any();
        let obs = e.observable();
        assert!(!obs.contains(Effect::LeakArg));
        assert!(!obs.contains(Effect::ReadsEnv));
        assert!(!obs.contains(Effect::LeaksEnv));
        assert!(!obs.contains(Effect::DependsOnAssume));
        assert!(obs.contains(Effect::Error));

        let strong = e.strong();
        assert!(!strong.contains(Effect::Visibility));
        assert!(!strong.contains(Effect::UpdatesMetadata));
        assert!(strong.contains(Effect::WritesEnv));
    }

    #[test]
    fn deopt_barrier() {
        assert!(!Effects::of(Effect::TriggerDeopt).is_deopt_barrier());
        assert!(!Effects::of(Effect::Error).is_deopt_barrier());
        assert!(!Effects::of(Effect::Visibility).is_deopt_barrier());
        assert!(Effects::of(Effect::WritesEnv).is_deopt_barrier());
        assert!(Effects::any().is_deopt_barrier());
    }

    #[test]
    fn subset() {
        let a = Effects::of(Effect::Error) | Effect::Warn;
        assert!(a.is_subset_of(Effects::any()));
        assert!(Effects::none().is_subset_of(a));
        assert!(!Effects::any().is_subset_of(a));
    }
}
