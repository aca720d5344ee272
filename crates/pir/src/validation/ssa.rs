//! SSA well-formedness: one definition per value, every use dominated by its
//! definition, and phi inputs agreeing with the predecessors.

use crate::{
    analysis::cfg::{Cfg, DominanceGraph},
    code::{Code, InstrId},
    instr::InstrData,
    validation::ValidationError,
};
use cranelift_entity::SecondaryMap;

pub fn verify_ssa(code: &Code) -> Result<(), ValidationError> {
    let cfg = Cfg::new(code);
    let dom = DominanceGraph::new(code, &cfg);

    // Arena ownership already guarantees a value has one defining
    // instruction; what can go wrong is an instruction scheduled in several
    // blocks, or not at all.
    let mut seen: SecondaryMap<InstrId, u32> = SecondaryMap::new();
    for (_, data) in code.blocks.iter() {
        for &id in &data.instrs {
            seen[id] += 1;
            if seen[id] > 1 {
                return Err(ValidationError::new(format!(
                    "instruction {id:?} is scheduled more than once"
                )));
            }
        }
    }

    let pos_in_block: SecondaryMap<InstrId, u32> = {
        let mut m = SecondaryMap::new();
        for (_, data) in code.blocks.iter() {
            for (i, &id) in data.instrs.iter().enumerate() {
                m[id] = i as u32;
            }
        }
        m
    };

    for (block, data) in code.blocks.iter() {
        if !cfg.is_reachable(block) {
            continue;
        }
        for &id in &data.instrs {
            let instr = &code[id];
            if let InstrData::Phi { inputs } = &instr.data {
                if inputs.len() != instr.args.len() {
                    return Err(ValidationError::new("phi inputs and arguments diverge"));
                }
                let mut preds: Vec<_> = cfg.preds(block).to_vec();
                preds.sort_unstable();
                preds.dedup();
                let mut ins: Vec<_> = inputs.to_vec();
                ins.sort_unstable();
                ins.dedup();
                if ins != preds {
                    return Err(ValidationError::new(format!(
                        "phi {id:?} must have exactly one input per predecessor"
                    )));
                }
                // A phi input must be available at the end of its
                // predecessor.
                for (k, &in_block) in inputs.iter().enumerate() {
                    if let Some(d) = instr.args[k].value.as_instr() {
                        if seen[d] == 0 {
                            return Err(ValidationError::new(format!(
                                "phi {id:?} uses unscheduled value {d:?}"
                            )));
                        }
                        if !dom.dominates(code[d].bb, in_block) {
                            return Err(ValidationError::new(format!(
                                "phi input {d:?} does not dominate predecessor {in_block:?}"
                            )));
                        }
                    }
                }
            } else {
                for arg in &instr.args {
                    let Some(d) = arg.value.as_instr() else {
                        continue;
                    };
                    if seen[d] == 0 {
                        return Err(ValidationError::new(format!(
                            "{id:?} uses unscheduled value {d:?}"
                        )));
                    }
                    let def_block = code[d].bb;
                    let ok = if def_block == block {
                        pos_in_block[d] < pos_in_block[id]
                    } else {
                        dom.dominates(def_block, block)
                    };
                    if !ok {
                        return Err(ValidationError::new(format!(
                            "use of {d:?} in {id:?} is not dominated by its definition"
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CodeBuilder;
    use crate::typ::{PirType, RType};

    #[test]
    fn accepts_diamond_with_phi() {
        let mut b = CodeBuilder::new();
        let then = b.create_block();
        let otherwise = b.create_block();
        let join = b.create_block();

        let t = b.ld_arg(0, PirType::test());
        b.branch(t, then, otherwise);
        b.switch_to_block(then);
        let a = b.ld_const(0, PirType::from(RType::Integer).scalar().not_object());
        b.fall_through(join);
        b.switch_to_block(otherwise);
        let c = b.ld_const(1, PirType::from(RType::Integer).scalar().not_object());
        b.fall_through(join);
        b.switch_to_block(join);
        let phi = b.phi(&[(then, a), (otherwise, c)]);
        b.ret(phi);

        assert!(verify_ssa(&b.finish()).is_ok());
    }

    #[test]
    fn rejects_use_not_dominated_by_def() {
        let mut b = CodeBuilder::new();
        let then = b.create_block();
        let otherwise = b.create_block();

        let t = b.ld_arg(0, PirType::test());
        b.branch(t, then, otherwise);
        b.switch_to_block(then);
        let a = b.ld_const(0, PirType::from(RType::Integer).scalar().not_object());
        b.ret(a);
        b.switch_to_block(otherwise);
        // Uses a value defined only on the other branch.
        b.ret(a);

        assert!(verify_ssa(&b.finish()).is_err());
    }

    #[test]
    fn rejects_phi_with_missing_predecessor() {
        let mut b = CodeBuilder::new();
        let then = b.create_block();
        let otherwise = b.create_block();
        let join = b.create_block();

        let t = b.ld_arg(0, PirType::test());
        b.branch(t, then, otherwise);
        b.switch_to_block(then);
        let a = b.ld_const(0, PirType::from(RType::Integer).scalar().not_object());
        b.fall_through(join);
        b.switch_to_block(otherwise);
        b.nop();
        b.fall_through(join);
        b.switch_to_block(join);
        // Only one input, two predecessors.
        let phi = b.phi(&[(then, a)]);
        b.ret(phi);

        assert!(verify_ssa(&b.finish()).is_err());
    }
}
