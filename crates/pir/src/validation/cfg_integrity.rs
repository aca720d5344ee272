//! Structural checks on blocks and terminators.

use crate::{
    analysis::cfg::Cfg,
    code::Code,
    instr::Controlflow,
    validation::ValidationError,
};

/// Verifies that terminators only appear as the last instruction of a block,
/// and that the successor slots agree with the terminator kind.
pub fn verify_cfg_integrity(code: &Code) -> Result<(), ValidationError> {
    let cfg = Cfg::new(code);

    for (block, data) in code.blocks.iter() {
        if !cfg.is_reachable(block) {
            continue;
        }
        if data.instrs.is_empty() {
            return Err(ValidationError::new("basic block cannot be empty"));
        }
        for &id in &data.instrs[..data.instrs.len() - 1] {
            if code[id].data.is_terminator() {
                return Err(ValidationError::new(
                    "terminators can only appear as the last instruction in a basic block",
                ));
            }
        }
        for &id in &data.instrs {
            if code[id].bb != block {
                return Err(ValidationError::new(
                    "instruction block backlink does not match its block",
                ));
            }
        }

        let last = *data.instrs.last().unwrap();
        match code[last].data.controlflow() {
            Controlflow::Branch => {
                if data.next.is_none() || data.branch.is_none() {
                    return Err(ValidationError::new(
                        "branching terminator requires both successors",
                    ));
                }
            }
            Controlflow::Exit => {
                if data.num_successors() != 0 {
                    return Err(ValidationError::new("exit block cannot have successors"));
                }
            }
            Controlflow::None => {
                if !data.is_jmp() {
                    return Err(ValidationError::new(
                        "a block without a terminator must fall through to exactly one successor",
                    ));
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
    use crate::value::{Singleton, Value};

    #[test]
    fn accepts_well_formed() {
        let mut b = CodeBuilder::new();
        b.ret(Value::Singleton(Singleton::Nil));
        assert!(verify_cfg_integrity(&b.finish()).is_ok());
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut b = CodeBuilder::new();
        b.nop();
        assert!(verify_cfg_integrity(&b.finish()).is_err());
    }

    #[test]
    fn rejects_trailing_instructions() {
        let mut b = CodeBuilder::new();
        b.ret(Value::Singleton(Singleton::Nil));
        b.nop();
        assert!(verify_cfg_integrity(&b.finish()).is_err());
    }
}
