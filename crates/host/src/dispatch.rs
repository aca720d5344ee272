//! Per-closure tables of compiled versions, keyed by assumption contexts.

use codegen::CompiledCode;
use pir::instr::AssumptionContext;

pub enum VersionBody {
    /// Handle of the bytecode body; evaluated by the external interpreter.
    Baseline { bytecode: u32 },
    Native(CompiledCode),
}

pub struct FunctionVersion {
    pub context: AssumptionContext,
    pub body: VersionBody,
    pub mark_opt: bool,
    pub invocation_count: u32,
}

impl FunctionVersion {
    pub fn baseline(bytecode: u32) -> Self {
        FunctionVersion {
            context: AssumptionContext::empty(),
            body: VersionBody::Baseline { bytecode },
            mark_opt: false,
            invocation_count: 0,
        }
    }

    pub fn native(context: AssumptionContext, code: CompiledCode) -> Self {
        FunctionVersion {
            context,
            body: VersionBody::Native(code),
            mark_opt: false,
            invocation_count: 0,
        }
    }
}

/// A fixed two-slot table: the baseline version first, one optimized
/// version after it.
pub struct DispatchTable {
    slots: Vec<Option<FunctionVersion>>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    pub const CAPACITY: usize = 2;

    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(Self::CAPACITY);
        slots.resize_with(Self::CAPACITY, || None);
        DispatchTable { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.is_some())
    }

    pub fn at(&self, slot: usize) -> Option<&FunctionVersion> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn at_mut(&mut self, slot: usize) -> Option<&mut FunctionVersion> {
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn first(&self) -> Option<&FunctionVersion> {
        self.at(0)
    }

    pub fn first_mut(&mut self) -> Option<&mut FunctionVersion> {
        self.at_mut(0)
    }

    pub fn insert(&mut self, slot: usize, version: FunctionVersion) {
        self.slots[slot] = Some(version);
    }

    /// The most specialized version whose assumption context is satisfied.
    /// Later slots hold more specialized versions.
    pub fn dispatch(&self, available: AssumptionContext) -> Option<&FunctionVersion> {
        self.slots
            .iter()
            .rev()
            .flatten()
            .find(|v| v.context.is_subset_of(available))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_prefers_specialized_versions() {
        let mut t = DispatchTable::new();
        t.insert(0, FunctionVersion::baseline(0));
        assert!(t.available(0));
        assert!(!t.available(1));

        let specialized = AssumptionContext::CORRECT_ARG_COUNT | AssumptionContext::EAGER_ARGS;
        t.insert(
            1,
            FunctionVersion {
                context: specialized,
                body: VersionBody::Baseline { bytecode: 1 },
                mark_opt: false,
                invocation_count: 0,
            },
        );

        // Without the assumptions only the baseline fits.
        let v = t.dispatch(AssumptionContext::empty()).unwrap();
        assert!(matches!(v.body, VersionBody::Baseline { bytecode: 0 }));

        // With them, the specialized version wins.
        let v = t.dispatch(specialized | AssumptionContext::NO_EXPLICITLY_MISSING);
        assert!(matches!(
            v.unwrap().body,
            VersionBody::Baseline { bytecode: 1 }
        ));
    }
}
