//! Source-aware disassembler for [`Bytecode`] images.

use core::fmt::Write;

use crate::isa::{Bytecode, Opcode, Operand, NO_LINE};

/// Column at which the source annotation starts.
const ANNOTATION_COLUMN: usize = 24;

/// Renders `code` one instruction per line, annotated with the source line
/// each instruction was lowered from. The text of a source line is echoed
/// once, the first time it appears.
pub fn disassemble(code: &Bytecode, source: &str) -> String {
    let source_lines: Vec<&str> = source.lines().collect();
    let mut out = String::new();
    let mut last_echoed: i64 = NO_LINE;

    out.push_str("--- bytecode ---\n");
    for instruction in code.instructions() {
        let Ok(instruction) = instruction else {
            out.push_str("???\n");
            break;
        };
        let mut text = format!("{:04} {}", instruction.offset, instruction.opcode);
        match (instruction.opcode, instruction.operand) {
            (Opcode::Print, Operand::Byte(count)) => {
                let _ = write!(text, " args {count}");
            }
            (Opcode::Biz | Opcode::Bnz, Operand::Quarter(displacement)) => {
                // Branches are shown with their resolved absolute target.
                let target = i64::from(instruction.offset) + 3 + i64::from(displacement);
                let _ = write!(text, " {target}");
            }
            (_, Operand::Quarter(value)) => {
                let _ = write!(text, " {value}");
            }
            (_, Operand::Word(value)) => {
                let _ = write!(text, " {value}");
            }
            _ => {}
        }

        let line = code.line_at(instruction.offset);
        if line != NO_LINE {
            while text.len() < ANNOTATION_COLUMN {
                text.push(' ');
            }
            let _ = write!(text, "{line:<3}");
            if line > last_echoed {
                if let Some(source_line) = source_lines.get(line as usize - 1) {
                    let _ = write!(text, " {}", source_line.trim());
                }
            }
            last_echoed = line;
        }
        out.push_str(&text);
        out.push('\n');
    }
    out.push_str("--- bytecode end ---\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Quarter;

    fn opcode_by_mnemonic(name: &str) -> Option<Opcode> {
        (0..=u8::MAX)
            .filter_map(Opcode::from_byte)
            .find(|op| op.mnemonic() == name)
    }

    /// Re-encodes disassembly text back into an image. Only the opcode and
    /// operand columns are interpreted; annotations are ignored.
    fn reassemble(text: &str) -> Bytecode {
        let mut code = Bytecode::new();
        for line in text.lines() {
            if line.starts_with("---") {
                continue;
            }
            let mut fields = line.split_whitespace();
            let _offset = fields.next().expect("offset column");
            let mnemonic = fields.next().expect("opcode column");
            let opcode = opcode_by_mnemonic(mnemonic).expect("known mnemonic");
            let imm_at = code.emit_op(opcode, NO_LINE).unwrap();
            match opcode {
                Opcode::Print => {
                    let _args = fields.next();
                    let count: u8 = fields.next().unwrap().parse().unwrap();
                    code.emit_byte(count).unwrap();
                }
                Opcode::Biz | Opcode::Bnz => {
                    let target: i64 = fields.next().unwrap().parse().unwrap();
                    let displacement = target - i64::from(imm_at) - 2;
                    code.emit_quarter(displacement as Quarter).unwrap();
                }
                Opcode::Pushn | Opcode::Popn | Opcode::Ldbp | Opcode::Stbp => {
                    let value: Quarter = fields.next().unwrap().parse().unwrap();
                    code.emit_quarter(value).unwrap();
                }
                Opcode::Li | Opcode::Lda | Opcode::Sta => {
                    let value: i64 = fields.next().unwrap().parse().unwrap();
                    code.emit_word(value).unwrap();
                }
                _ => {}
            }
        }
        code
    }

    fn compile_source(source: &str) -> Bytecode {
        let mut ast = crate::parser::parse(source).unwrap();
        let analysis = crate::check::analyze(&mut ast).unwrap();
        crate::compile::compile_program(&analysis.types, &analysis.symbols, &ast).unwrap()
    }

    #[test]
    fn disassembly_reassembles_byte_for_byte() {
        let source = "var total: int\n\
                      func add(a: int, b: int): int begin return a + b end\n\
                      func main() begin\n\
                      var i: int\n\
                      i := 0\n\
                      while i < 3 do begin\n\
                      if i = 1 then total := total + add(i, 10) else total := total + 1\n\
                      i := i + 1\n\
                      end\n\
                      print total, i\n\
                      end";
        let code = compile_source(source);
        let text = disassemble(&code, source);
        assert_eq!(reassemble(&text).code(), code.code());
    }

    #[test]
    fn annotations_echo_each_source_line_once() {
        let source = "func main() begin\nprint 1 + 2\nend";
        let code = compile_source(source);
        let text = disassemble(&code, source);
        assert!(text.starts_with("--- bytecode ---\n"));
        assert!(text.ends_with("--- bytecode end ---\n"));
        let echoes = text
            .lines()
            .filter(|line| line.contains("print 1 + 2"))
            .count();
        assert_eq!(echoes, 1);
    }
}
