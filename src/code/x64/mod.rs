use std::mem;

/// Opcode for `jmp rel32`
const JMP_REL: u8 = 0xe9;

/// Length of a `jmp rel32` instruction
pub const JMP_REL_LEN: usize = 5;

#[repr(packed)]
#[allow(dead_code)]
/// Struct helper for generating an absolute jump
struct JmpAbs {
    /// Absolute jmp instruction (jmp [rip + 0])
    jmp: [u8; 6],
    /// Absolute address to jump to
    target: [u8; 8],
}

/// Length of an absolute jump
pub const JMP_ABS_LEN: usize = mem::size_of::<JmpAbs>();

/// Generates an absolute jump to a specified address and returns bytecode
pub fn jmp_abs(target: usize) -> [u8; JMP_ABS_LEN] {
    let jmp = JmpAbs {
        jmp: [0xff, 0x25, 0x00, 0x00, 0x00, 0x00],
        target: (target as u64).to_le_bytes(),
    };
    // Safety: `JmpAbs` is packed and made only of byte arrays
    unsafe { mem::transmute(jmp) }
}

/// Generates a relative jump from `from` to `to`, or `None` if the distance does not fit in 32 bits
pub fn jmp_rel(from: usize, to: usize) -> Option<[u8; JMP_REL_LEN]> {
    let next = (from as i64).wrapping_add(JMP_REL_LEN as i64);
    let offset = i32::try_from((to as i64).wrapping_sub(next)).ok()?;
    let mut code = [JMP_REL, 0, 0, 0, 0];
    code[1..].copy_from_slice(&offset.to_le_bytes());
    Some(code)
}

/// Generates the shortest jump from `from` to `to`
pub fn jmp(from: usize, to: usize) -> Vec<u8> {
    match jmp_rel(from, to) {
        Some(code) => code.to_vec(),
        None => jmp_abs(to).to_vec(),
    }
}
