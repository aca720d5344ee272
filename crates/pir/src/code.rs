//! Code units: the ownership domain of a single compilation.

use crate::{
    analysis::cfg::DominanceGraph,
    instr::Instruction,
    typ::PirType,
    value::Value,
};
use cranelift_entity::{packed_option::PackedOption, PrimaryMap};

crate::entity_ref! {
    /// ID of an instruction owned by a `Code`.
    pub struct InstrId;
}

crate::entity_ref_16bit! {
    pub struct BasicBlockId;
}

crate::entity_ref_16bit! {
    /// ID of a promise body owned by a `Code`.
    pub struct PromiseId;
}

/// A basic block: an ordered run of instructions plus up to two successors.
///
/// `next` is the fall-through successor (and the false side of a `Branch`);
/// `branch` is the taken side of a `Branch` and the deopt side of a
/// `Checkpoint`. Exit blocks leave both empty.
#[derive(Debug, Clone, Default)]
pub struct BasicBlockData {
    pub instrs: Vec<InstrId>,
    pub next: PackedOption<BasicBlockId>,
    pub branch: PackedOption<BasicBlockId>,
}

impl BasicBlockData {
    pub fn successors(&self) -> impl Iterator<Item = BasicBlockId> + '_ {
        self.next.expand().into_iter().chain(self.branch.expand())
    }

    pub fn num_successors(&self) -> usize {
        self.next.is_some() as usize + self.branch.is_some() as usize
    }

    pub fn true_branch(&self) -> Option<BasicBlockId> {
        self.branch.expand()
    }

    pub fn false_branch(&self) -> Option<BasicBlockId> {
        self.next.expand()
    }

    pub fn deopt_branch(&self) -> Option<BasicBlockId> {
        self.branch.expand()
    }

    /// A block that neither branches nor exits just falls through.
    pub fn is_jmp(&self) -> bool {
        self.next.is_some() && self.branch.is_none()
    }
}

/// A single compilation unit. Owns its blocks, its instructions and the
/// bodies of the promises it creates; everything is freed as one unit, so
/// cyclic references between instructions (phis, loops) need no extra
/// machinery.
#[derive(Debug, Clone, Default)]
pub struct Code {
    pub entry: BasicBlockId,
    pub blocks: PrimaryMap<BasicBlockId, BasicBlockData>,
    pub instrs: PrimaryMap<InstrId, Instruction>,
    pub promises: PrimaryMap<PromiseId, Code>,
}

impl Code {
    pub fn new() -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BasicBlockData::default());
        Code {
            entry,
            blocks,
            instrs: PrimaryMap::new(),
            promises: PrimaryMap::new(),
        }
    }

    pub fn try_instr(&self, id: InstrId) -> Option<&Instruction> {
        self.instrs.get(id)
    }

    pub fn value_type(&self, v: Value) -> PirType {
        v.typ(self)
    }

    pub fn create_block(&mut self) -> BasicBlockId {
        self.blocks.push(BasicBlockData::default())
    }

    pub fn visit_block_successors(&self, block: BasicBlockId, mut visit: impl FnMut(BasicBlockId)) {
        for s in self.blocks[block].successors() {
            visit(s);
        }
    }

    pub fn visit_block_predecessors(
        &self,
        block: BasicBlockId,
        mut visit: impl FnMut(BasicBlockId),
    ) {
        for (b, data) in self.blocks.iter() {
            if data.successors().any(|s| s == block) {
                visit(b);
            }
        }
    }

    /// Visit every instruction, in block order.
    pub fn each_instr(&self, mut visit: impl FnMut(InstrId, &Instruction)) {
        for (_, block) in self.blocks.iter() {
            for &id in &block.instrs {
                visit(id, &self.instrs[id]);
            }
        }
    }

    /// Rewrite every use of `old` with `new` across the whole unit.
    pub fn replace_uses_with(&mut self, old: Value, new: Value) {
        for (_, instr) in self.instrs.iter_mut() {
            for arg in &mut instr.args {
                if arg.value == old {
                    arg.value = new;
                }
            }
        }
    }

    /// Rewrite uses of `old` with `new`, restricted to one block.
    pub fn replace_uses_in(&mut self, old: Value, new: Value, block: BasicBlockId) {
        let ids: Vec<InstrId> = self.blocks[block].instrs.clone();
        for id in ids {
            for arg in &mut self.instrs[id].args {
                if arg.value == old {
                    arg.value = new;
                }
            }
        }
    }

    /// Rewrite uses of `old` with `new` in all blocks dominated by the block
    /// defining `new`. The dominance graph is required for this to be a safe
    /// SSA rewrite.
    pub fn replace_dominated_uses(&mut self, old: Value, new: InstrId, dom: &DominanceGraph) {
        let def_block = self.instrs[new].bb;
        let mut patches = Vec::new();
        for (id, instr) in self.instrs.iter() {
            if id == new {
                continue;
            }
            if dom.dominates(def_block, instr.bb) {
                for (i, arg) in instr.args.iter().enumerate() {
                    if arg.value == old {
                        patches.push((id, i));
                    }
                }
            }
        }
        for (id, i) in patches {
            self.instrs[id].args[i].value = Value::Instr(new);
        }
    }

    /// The single instruction using `v`, if there is exactly one use.
    pub fn single_use(&self, v: Value) -> Option<InstrId> {
        let mut found = None;
        for (id, instr) in self.instrs.iter() {
            for arg in &instr.args {
                if arg.value == v {
                    if found.is_some() && found != Some(id) {
                        return None;
                    }
                    found = Some(id);
                }
            }
        }
        found
    }
}

impl std::ops::Index<InstrId> for Code {
    type Output = Instruction;
    fn index(&self, id: InstrId) -> &Instruction {
        &self.instrs[id]
    }
}

impl std::ops::Index<BasicBlockId> for Code {
    type Output = BasicBlockData;
    fn index(&self, id: BasicBlockId) -> &BasicBlockData {
        &self.blocks[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CodeBuilder;
    use crate::typ::RType;
    use crate::value::Singleton;

    #[test]
    fn replace_uses() {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, PirType::from(RType::Integer).scalar().not_object());
        let y = b.ld_arg(1, PirType::from(RType::Integer).scalar().not_object());
        let add = b.add(x, y, Value::Singleton(Singleton::ElidedEnv), 0);
        b.ret(add);
        let mut code = b.finish();

        code.replace_uses_with(x, y);
        let id = add.as_instr().unwrap();
        assert_eq!(code[id].args[0].value, y);
        assert_eq!(code[id].args[1].value, y);
    }

    #[test]
    fn single_use() {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, PirType::from(RType::Integer).scalar().not_object());
        let copy = b.pir_copy(x, 0);
        let ret = b.ret(copy);
        let code = b.finish();

        assert_eq!(code.single_use(copy), ret.as_instr());
    }
}
