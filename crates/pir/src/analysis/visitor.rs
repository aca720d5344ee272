//! Traversal orders over the blocks of a `Code`.

use crate::{
    analysis::cfg::Cfg,
    code::{BasicBlockId, Code, InstrId},
    instr::Instruction,
};
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashSet;

/// Forward order: reverse post-order from the entry block.
pub fn forward_order(code: &Code) -> Vec<BasicBlockId> {
    Cfg::new(code).rpo().to_vec()
}

/// Lowering order: a block is not visited until every block on an acyclic
/// path from the entry to it has been visited. This guarantees that all
/// non-back-edge predecessors of a join (and thus the definitions feeding its
/// phis) are emitted before the join's body.
pub fn lowering_order(code: &Code) -> Vec<BasicBlockId> {
    let acyclic_ancestors = compute_acyclic_ancestors(code);

    let mut order = Vec::with_capacity(code.blocks.len());
    let mut stack = vec![code.entry];
    let mut visited = FxHashSet::<BasicBlockId>::default();
    while let Some(current) = stack.pop() {
        if visited.contains(&current) {
            continue;
        }
        order.push(current);
        visited.insert(current);

        code.visit_block_successors(current, |suc| {
            if !visited.contains(&suc)
                && acyclic_ancestors[suc]
                    .iter()
                    .all(|anc| visited.contains(anc))
            {
                stack.push(suc);
            }
        });
    }
    order
}

/// For each block, the set of blocks appearing on any acyclic path from the
/// entry to it (exclusive).
fn compute_acyclic_ancestors(
    code: &Code,
) -> SecondaryMap<BasicBlockId, FxHashSet<BasicBlockId>> {
    let mut acyclic_ancestors: SecondaryMap<BasicBlockId, FxHashSet<BasicBlockId>> =
        Default::default();

    let mut stack = vec![(code.entry, FxHashSet::<BasicBlockId>::default())];
    while let Some((current_block, mut current_path)) = stack.pop() {
        for &ancestor in &current_path {
            acyclic_ancestors[current_block].insert(ancestor);
        }
        current_path.insert(current_block);
        code.visit_block_successors(current_block, |suc| {
            if !current_path.contains(&suc) {
                stack.push((suc, current_path.clone()));
            }
        });
    }

    acyclic_ancestors
}

/// Visit every instruction, in forward block order.
pub fn run_instrs(code: &Code, mut visit: impl FnMut(InstrId, &Instruction)) {
    for block in forward_order(code) {
        for &id in &code.blocks[block].instrs {
            visit(id, &code[id]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CodeBuilder;
    use crate::typ::PirType;
    use crate::value::{Singleton, Value};

    #[test]
    fn joins_come_after_all_forward_preds() {
        let mut b = CodeBuilder::new();
        let then = b.create_block();
        let otherwise = b.create_block();
        let join = b.create_block();

        let t = b.ld_arg(0, PirType::test());
        b.branch(t, then, otherwise);
        b.switch_to_block(then);
        b.nop();
        b.fall_through(join);
        b.switch_to_block(otherwise);
        b.nop();
        b.fall_through(join);
        b.switch_to_block(join);
        b.ret(Value::Singleton(Singleton::Nil));
        let code = b.finish();

        let order = lowering_order(&code);
        let pos = |bb| order.iter().position(|&b| b == bb).unwrap();
        assert_eq!(order[0], code.entry);
        assert!(pos(join) > pos(then));
        assert!(pos(join) > pos(otherwise));
        assert_eq!(order.len(), 4);
    }
}
