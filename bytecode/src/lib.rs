mod builder;
mod debug;
mod decoder;
mod instruction;
mod op;
mod program;

pub use builder::{BytecodeBuilder, Label};
pub use debug::{DebugEntry, DebugTable, DebugTableBuilder, DebugTableError, Location};
pub use decoder::{BytecodeDecoder, DecodeError, decode_at};
pub use instruction::{BinaryOp, Instruction};
pub use op::Op;
pub use program::{Program, ProgramBuilder, ProgramError};

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .map(|r| r.expect("decode error").1)
            .collect()
    }

    #[test]
    fn decodes_every_emitter() {
        let mut b = BytecodeBuilder::new();
        b.nop();
        b.push_nil();
        b.push_int(-42);
        b.push_float(1.5);
        b.push_string(3);
        b.push_closure_at(0);
        b.push_table();
        b.dup();
        b.pop();
        b.table_put();
        b.table_get();
        b.global_load(1);
        b.global_store(2);
        b.local_load(4);
        b.local_store(5);
        b.call(2);
        b.ret0();
        b.ret1();
        b.jump_back(0);
        b.binary(BinaryOp::Lte);
        b.neg();
        b.not();
        b.done();

        assert_eq!(
            decode_all(&b.into_bytes()),
            vec![
                Instruction::Nop,
                Instruction::PushNil,
                Instruction::PushInt { value: -42 },
                Instruction::PushFloat { value: 1.5 },
                Instruction::PushString { string: 3 },
                Instruction::PushClosure { addr: 0 },
                Instruction::PushTable,
                Instruction::Dup,
                Instruction::Pop,
                Instruction::TablePut,
                Instruction::TableGet,
                Instruction::GlobalLoad { name: 1 },
                Instruction::GlobalStore { name: 2 },
                Instruction::LocalLoad { idx: 4 },
                Instruction::LocalStore { idx: 5 },
                Instruction::Call { argc: 2 },
                Instruction::Ret0,
                Instruction::Ret1,
                Instruction::Jump { addr: 0 },
                Instruction::Binary(BinaryOp::Lte),
                Instruction::Neg,
                Instruction::Not,
                Instruction::Done,
            ]
        );
    }

    #[test]
    fn forward_label() {
        let mut b = BytecodeBuilder::new();
        b.push_int(0);
        let label = b.jump_if_zero();
        b.push_int(1);
        b.bind(label);
        b.done();

        assert_eq!(
            decode_all(&b.into_bytes()),
            vec![
                Instruction::PushInt { value: 0 },
                Instruction::JumpIfZero { addr: 15 },
                Instruction::PushInt { value: 1 },
                Instruction::Done,
            ]
        );
    }

    #[test]
    fn instruction_sizes_match_encoding() {
        let mut b = BytecodeBuilder::new();
        b.push_float(2.0);
        assert_eq!(
            b.as_bytes().len(),
            Instruction::PushFloat { value: 2.0 }.size()
        );
        b.call(1);
        assert_eq!(b.as_bytes().len(), 9 + 2);
    }

    #[test]
    fn truncated_operand_is_reported() {
        assert_eq!(
            decode_at(&[Op::PushInt as u8, 1, 2], 0),
            Err(DecodeError::Truncated {
                offset: 0,
                op: Op::PushInt
            })
        );
    }

    #[test]
    fn decoder_stops_after_error() {
        let bytes = [Op::Nop as u8, 0xFF, Op::Nop as u8];
        let results: Vec<_> = BytecodeDecoder::new(&bytes).collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn display_instructions() {
        assert_eq!(Instruction::PushInt { value: 7 }.to_string(), "PushInt 7");
        assert_eq!(Instruction::Call { argc: 2 }.to_string(), "Call 2");
        assert_eq!(Instruction::Jump { addr: 12 }.to_string(), "Jump @12");
        assert_eq!(Instruction::Binary(BinaryOp::Add).to_string(), "Add");
        assert_eq!(Instruction::Ret1.to_string(), "Ret1");
    }
}
