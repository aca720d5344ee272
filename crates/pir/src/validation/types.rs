//! Check argument values against their declared slot types.

use crate::{code::Code, validation::ValidationError};

pub fn verify_arg_types(code: &Code) -> Result<(), ValidationError> {
    for (id, instr) in code.instrs.iter() {
        for (i, arg) in instr.args.iter().enumerate() {
            let t = code.value_type(arg.value);
            if !t.is_a(arg.typ) {
                return Err(ValidationError::new(format!(
                    "argument {i} of {} ({id:?}) has type {t} which is not a {}",
                    instr.data.name(),
                    arg.typ,
                )));
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
    use crate::value::{Singleton, Value};

    #[test]
    fn accepts_subtyped_args() {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, PirType::from(RType::Integer).scalar().not_object());
        let y = b.ld_arg(1, PirType::from(RType::Real).scalar().not_object());
        let add = b.add(x, y, Value::Singleton(Singleton::ElidedEnv), 0);
        b.ret(add);
        assert!(verify_arg_types(&b.finish()).is_ok());
    }

    #[test]
    fn rejects_non_env_in_env_slot() {
        let mut b = CodeBuilder::new();
        let x = b.ld_arg(0, PirType::from(RType::Integer).scalar().not_object());
        let y = b.ld_arg(1, PirType::from(RType::Integer).scalar().not_object());
        // The environment slot of a binop declares an env type.
        let add = b.add(x, y, x, 0);
        b.ret(add);
        assert!(verify_arg_types(&b.finish()).is_err());
    }
}
