//! Control-flow graph and dominance.

use crate::code::{BasicBlockId, Code};
use cranelift_entity::{packed_option::PackedOption, EntitySet, SecondaryMap};
use smallvec::SmallVec;

/// Predecessors, successors and a reverse post-order over the reachable
/// blocks of a `Code`.
pub struct Cfg {
    preds: SecondaryMap<BasicBlockId, SmallVec<[BasicBlockId; 2]>>,
    rpo: Vec<BasicBlockId>,
    rpo_index: SecondaryMap<BasicBlockId, u32>,
}

const UNREACHED: u32 = u32::MAX;

impl Cfg {
    pub fn new(code: &Code) -> Self {
        let mut preds: SecondaryMap<BasicBlockId, SmallVec<[BasicBlockId; 2]>> =
            SecondaryMap::new();
        for (b, data) in code.blocks.iter() {
            for s in data.successors() {
                preds[s].push(b);
            }
        }

        // Iterative DFS post-order, reversed.
        let mut post = Vec::with_capacity(code.blocks.len());
        let mut visited = EntitySet::<BasicBlockId>::new();
        let mut stack: Vec<(BasicBlockId, SmallVec<[BasicBlockId; 2]>, usize)> = Vec::new();
        visited.insert(code.entry);
        stack.push((code.entry, code.blocks[code.entry].successors().collect(), 0));
        loop {
            let Some(frame) = stack.last_mut() else { break };
            if frame.2 < frame.1.len() {
                let s = frame.1[frame.2];
                frame.2 += 1;
                if !visited.contains(s) {
                    visited.insert(s);
                    let succs = code.blocks[s].successors().collect();
                    stack.push((s, succs, 0));
                }
            } else {
                let b = frame.0;
                stack.pop();
                post.push(b);
            }
        }
        post.reverse();

        let mut rpo_index = SecondaryMap::with_default(UNREACHED);
        for (i, &b) in post.iter().enumerate() {
            rpo_index[b] = i as u32;
        }

        Cfg {
            preds,
            rpo: post,
            rpo_index,
        }
    }

    pub fn preds(&self, block: BasicBlockId) -> &[BasicBlockId] {
        &self.preds[block]
    }

    /// Reverse post-order; the entry block comes first.
    pub fn rpo(&self) -> &[BasicBlockId] {
        &self.rpo
    }

    pub fn is_reachable(&self, block: BasicBlockId) -> bool {
        self.rpo_index[block] != UNREACHED
    }

    pub fn rpo_index(&self, block: BasicBlockId) -> u32 {
        self.rpo_index[block]
    }
}

/// Immediate-dominator tree, the minimum required for safe use-replacement.
pub struct DominanceGraph {
    idom: SecondaryMap<BasicBlockId, PackedOption<BasicBlockId>>,
    rpo_index: SecondaryMap<BasicBlockId, u32>,
}

impl DominanceGraph {
    /// Iterative dataflow over the reverse post-order.
    pub fn new(code: &Code, cfg: &Cfg) -> Self {
        let mut idom: SecondaryMap<BasicBlockId, PackedOption<BasicBlockId>> = SecondaryMap::new();
        idom[code.entry] = code.entry.into();

        let intersect = |idom: &SecondaryMap<BasicBlockId, PackedOption<BasicBlockId>>,
                         mut a: BasicBlockId,
                         mut b: BasicBlockId| {
            while a != b {
                while cfg.rpo_index(a) > cfg.rpo_index(b) {
                    a = idom[a].expand().unwrap();
                }
                while cfg.rpo_index(b) > cfg.rpo_index(a) {
                    b = idom[b].expand().unwrap();
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &b in cfg.rpo().iter().skip(1) {
                let mut new_idom: Option<BasicBlockId> = None;
                for &p in cfg.preds(b) {
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, cur, p),
                    });
                }
                if let Some(ni) = new_idom {
                    if idom[b].expand() != Some(ni) {
                        idom[b] = ni.into();
                        changed = true;
                    }
                }
            }
        }

        DominanceGraph {
            idom,
            rpo_index: {
                let mut m = SecondaryMap::with_default(UNREACHED);
                for &b in cfg.rpo() {
                    m[b] = cfg.rpo_index(b);
                }
                m
            },
        }
    }

    pub fn immediate_dominator(&self, block: BasicBlockId) -> Option<BasicBlockId> {
        let idom = self.idom[block].expand()?;
        if idom == block {
            None
        } else {
            Some(idom)
        }
    }

    /// Whether `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BasicBlockId, b: BasicBlockId) -> bool {
        if self.rpo_index[a] == UNREACHED || self.rpo_index[b] == UNREACHED {
            return false;
        }
        let mut b = b;
        while self.rpo_index[b] > self.rpo_index[a] {
            match self.immediate_dominator(b) {
                Some(i) => b = i,
                None => return false,
            }
        }
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CodeBuilder;
    use crate::typ::PirType;
    use crate::value::{Singleton, Value};

    /// entry -> (then | otherwise) -> join
    fn diamond() -> (Code, [BasicBlockId; 4]) {
        let mut b = CodeBuilder::new();
        let entry = b.current_block();
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

        (b.finish(), [entry, then, otherwise, join])
    }

    #[test]
    fn preds_and_rpo() {
        let (code, [entry, then, otherwise, join]) = diamond();
        let cfg = Cfg::new(&code);

        assert_eq!(cfg.preds(entry), &[]);
        assert_eq!(cfg.preds(join).len(), 2);
        assert_eq!(cfg.rpo()[0], entry);
        assert!(cfg.rpo_index(join) > cfg.rpo_index(then));
        assert!(cfg.rpo_index(join) > cfg.rpo_index(otherwise));
    }

    #[test]
    fn dominators() {
        let (code, [entry, then, otherwise, join]) = diamond();
        let cfg = Cfg::new(&code);
        let dom = DominanceGraph::new(&code, &cfg);

        assert!(dom.dominates(entry, join));
        assert!(dom.dominates(entry, then));
        assert!(!dom.dominates(then, join));
        assert!(!dom.dominates(otherwise, join));
        assert!(dom.dominates(join, join));
        assert_eq!(dom.immediate_dominator(join), Some(entry));
        assert_eq!(dom.immediate_dominator(entry), None);
    }
}
