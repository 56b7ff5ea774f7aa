//! Structural properties of emitted images, checked by decoding the
//! instruction stream.

use metac::{
    isa::{Instruction, Operand},
    Opcode,
};

const SOURCE: &str = "var total: int\n\
                      var values: int[4]\n\
                      func weigh(n: int, factor: int): int begin\n\
                      if n < 0 then return 0 - n * factor\n\
                      return n * factor\n\
                      end\n\
                      func main() begin\n\
                      var i: int\n\
                      i := 0\n\
                      while i < 4 do begin\n\
                      values[i] := weigh(i - 2, 3)\n\
                      total := total + values[i]\n\
                      i := i + 1\n\
                      end\n\
                      print total\n\
                      end";

fn decode(source: &str) -> (metac::Bytecode, Vec<Instruction>) {
    let image = metac::compile(source).expect("program compiles");
    let instructions = image
        .instructions()
        .map(|i| i.expect("image decodes cleanly"))
        .collect();
    (image, instructions)
}

#[test]
fn whole_image_decodes_without_gaps() {
    let (image, instructions) = decode(SOURCE);
    let mut expected = 0u32;
    for instruction in &instructions {
        assert_eq!(instruction.offset, expected);
        let imm = match instruction.operand {
            Operand::None => 0,
            Operand::Byte(_) => 1,
            Operand::Quarter(_) => 2,
            Operand::Word(_) => 8,
        };
        expected = instruction.offset + 1 + imm;
    }
    assert_eq!(expected, image.offset());
}

#[test]
fn every_function_body_ends_in_a_control_leaf() {
    let (_, instructions) = decode(SOURCE);
    // A FUNCPRO marks a function entry; the instruction just before it is
    // the previous function's leaf. The first entry follows the globals
    // reservation.
    let mut previous: Option<&Instruction> = None;
    let mut entries = 0;
    for instruction in &instructions {
        if instruction.opcode == Opcode::Funcpro {
            entries += 1;
            let before = previous.expect("entry cannot start the image");
            if entries == 1 {
                assert_eq!(before.opcode, Opcode::Pushn);
            } else {
                assert!(
                    matches!(before.opcode, Opcode::Ret | Opcode::Exit | Opcode::Jmp),
                    "instruction before a function entry was {:?}",
                    before.opcode
                );
            }
        }
        previous = Some(instruction);
    }
    assert_eq!(entries, 2);
    let last = instructions.last().unwrap();
    assert!(matches!(last.opcode, Opcode::Ret | Opcode::Exit));
}

#[test]
fn call_targets_point_at_function_prologues() {
    let (_, instructions) = decode(SOURCE);
    let entries: Vec<u32> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::Funcpro)
        .map(|i| i.offset)
        .collect();
    let mut calls = 0;
    for (at, instruction) in instructions.iter().enumerate() {
        if instruction.opcode != Opcode::Call {
            continue;
        }
        calls += 1;
        let Instruction {
            opcode: Opcode::Li,
            operand: Operand::Word(target),
            ..
        } = instructions[at - 1]
        else {
            panic!("CALL must be preceded by LI <entry>");
        };
        assert!(
            entries.contains(&(target as u32)),
            "call target {target} is not a function entry"
        );
    }
    assert!(calls > 0);
}

#[test]
fn line_table_refers_to_real_source_lines() {
    let (image, instructions) = decode(SOURCE);
    let line_count = SOURCE.lines().count() as i64;
    for instruction in &instructions {
        let line = image.line_at(instruction.offset);
        assert!(
            line == -1 || (1..=line_count).contains(&line),
            "line {line} out of range at offset {}",
            instruction.offset
        );
    }
}

#[test]
fn block_reservations_and_releases_mirror_each_other() {
    let (_, instructions) = decode(SOURCE);
    // Skipping the globals reservation, PUSHN/POPN immediates must nest
    // like parentheses with matching sizes. Call-site PUSHN (return slot)
    // pairs with the POPN releasing the argument words plus the value
    // consumed by the caller, so only block pairs are considered: those
    // carry equal immediates.
    let mut stack: Vec<i16> = Vec::new();
    for instruction in instructions.iter().skip(1) {
        match (instruction.opcode, instruction.operand) {
            (Opcode::Pushn, Operand::Quarter(slots)) => stack.push(slots),
            (Opcode::Popn, Operand::Quarter(slots)) => {
                let open = stack.pop().expect("POPN without a PUSHN");
                // Block frames release exactly what they reserved; call
                // frames release the argument footprint instead.
                assert!(open == slots || open <= 1);
            }
            _ => {}
        }
    }
}

#[test]
fn branch_displacements_stay_inside_the_image() {
    let (image, instructions) = decode(SOURCE);
    for instruction in &instructions {
        if let (Opcode::Biz | Opcode::Bnz, Operand::Quarter(displacement)) =
            (instruction.opcode, instruction.operand)
        {
            let target = i64::from(instruction.offset) + 3 + i64::from(displacement);
            assert!(
                (0..=i64::from(image.offset())).contains(&target),
                "branch at {} escapes the image",
                instruction.offset
            );
        }
    }
}
