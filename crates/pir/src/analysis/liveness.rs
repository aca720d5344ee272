//! Liveness of SSA values, per basic block and per program point.
//!
//! Phi uses are attributed to the end of the contributing predecessor, not to
//! the phi's own block, so a value flowing into a phi is live out of the
//! predecessor only.

use crate::{
    analysis::cfg::Cfg,
    code::{BasicBlockId, Code, InstrId},
    instr::InstrData,
};
use bit_set::BitSet;
use cranelift_entity::{EntityRef, SecondaryMap};

pub struct LivenessIntervals {
    live_in: SecondaryMap<BasicBlockId, BitSet>,
    live_out: SecondaryMap<BasicBlockId, BitSet>,
    /// Upper bound on the number of simultaneously live values; the lowerer
    /// reserves this many local stack slots for GC safepoints.
    pub max_live: usize,
}

impl LivenessIntervals {
    pub fn new(code: &Code, cfg: &Cfg) -> Self {
        let mut live_in: SecondaryMap<BasicBlockId, BitSet> = SecondaryMap::new();
        let mut live_out: SecondaryMap<BasicBlockId, BitSet> = SecondaryMap::new();

        // Backward dataflow to a fixpoint. Post-order (reversed RPO) converges
        // quickly on reducible graphs.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in cfg.rpo().iter().rev() {
                let mut out = BitSet::new();
                for succ in code.blocks[block].successors() {
                    out.union_with(&live_in[succ]);
                    for &id in &code.blocks[succ].instrs {
                        if let InstrData::Phi { inputs } = &code[id].data {
                            for (k, &in_block) in inputs.iter().enumerate() {
                                if in_block == block {
                                    if let Some(d) = code[id].args[k].value.as_instr() {
                                        out.insert(d.index());
                                    }
                                }
                            }
                        }
                    }
                }

                let mut live = out.clone();
                Self::transfer(code, block, &mut live, |_| {});

                if live != live_in[block] || out != live_out[block] {
                    live_in[block] = live;
                    live_out[block] = out;
                    changed = true;
                }
            }
        }

        // One more pass to measure the maximum number of simultaneously live
        // values at any program point.
        let mut max_live = 0;
        for &block in cfg.rpo() {
            let mut live = live_out[block].clone();
            max_live = max_live.max(live.len());
            Self::transfer(code, block, &mut live, |l| {
                max_live = max_live.max(l.len());
            });
        }

        LivenessIntervals {
            live_in,
            live_out,
            max_live,
        }
    }

    /// Walk a block backwards applying kill/gen, invoking `observe` with the
    /// live set before each instruction.
    fn transfer(
        code: &Code,
        block: BasicBlockId,
        live: &mut BitSet,
        mut observe: impl FnMut(&BitSet),
    ) {
        for &id in code.blocks[block].instrs.iter().rev() {
            let instr = &code[id];
            live.remove(id.index());
            if !matches!(instr.data, InstrData::Phi { .. }) {
                for arg in &instr.args {
                    if let Some(d) = arg.value.as_instr() {
                        live.insert(d.index());
                    }
                }
            }
            observe(live);
        }
    }

    pub fn live_in(&self, block: BasicBlockId) -> &BitSet {
        &self.live_in[block]
    }

    pub fn live_out(&self, block: BasicBlockId) -> &BitSet {
        &self.live_out[block]
    }

    /// Whether `v` is still live immediately after `pos` executes.
    pub fn live_after(&self, code: &Code, pos: InstrId, v: InstrId) -> bool {
        let block = code[pos].bb;
        let mut live = self.live_out[block].clone();
        for &id in code.blocks[block].instrs.iter().rev() {
            if id == pos {
                return live.contains(v.index());
            }
            let instr = &code[id];
            live.remove(id.index());
            if !matches!(instr.data, InstrData::Phi { .. }) {
                for arg in &instr.args {
                    if let Some(d) = arg.value.as_instr() {
                        live.insert(d.index());
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CodeBuilder;
    use crate::typ::{PirType, RType};
    use crate::value::{Singleton, Value};

    fn scalar_int() -> PirType {
        PirType::from(RType::Integer).scalar().not_object()
    }

    #[test]
    fn straight_line() {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, scalar_int());
        let y = b.ld_arg(1, scalar_int());
        let add = b.add(x, y, Value::Singleton(Singleton::ElidedEnv), 0);
        let mul = b.mul(add, add, Value::Singleton(Singleton::ElidedEnv), 0);
        b.ret(mul);
        let code = b.finish();

        let cfg = Cfg::new(&code);
        let live = LivenessIntervals::new(&code, &cfg);

        let xi = x.as_instr().unwrap();
        let yi = y.as_instr().unwrap();
        let addi = add.as_instr().unwrap();
        let muli = mul.as_instr().unwrap();

        // x dies at the add, add dies at the mul.
        assert!(live.live_after(&code, yi, xi));
        assert!(!live.live_after(&code, addi, xi));
        assert!(live.live_after(&code, addi, addi));
        assert!(!live.live_after(&code, muli, addi));
        assert!(live.max_live >= 2);
    }

    #[test]
    fn phi_inputs_live_out_of_preds_only() {
        let mut b = CodeBuilder::new();
        let then = b.create_block();
        let otherwise = b.create_block();
        let join = b.create_block();

        let t = b.ld_arg(0, PirType::test());
        b.branch(t, then, otherwise);

        b.switch_to_block(then);
        let a = b.ld_const(0, scalar_int());
        b.fall_through(join);

        b.switch_to_block(otherwise);
        let c = b.ld_const(1, scalar_int());
        b.fall_through(join);

        b.switch_to_block(join);
        let phi = b.phi(&[(then, a), (otherwise, c)]);
        b.ret(phi);
        let code = b.finish();

        let cfg = Cfg::new(&code);
        let live = LivenessIntervals::new(&code, &cfg);

        let ai = a.as_instr().unwrap();
        let ci = c.as_instr().unwrap();
        assert!(live.live_out(then).contains(ai.index()));
        assert!(!live.live_out(then).contains(ci.index()));
        assert!(live.live_out(otherwise).contains(ci.index()));
        // Phi inputs are not live into the join block.
        assert!(!live.live_in(join).contains(ai.index()));
        assert!(!live.live_in(join).contains(ci.index()));
    }
}
