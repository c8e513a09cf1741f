/// Base encoding of `b imm26`
const B: u32 = 0x1400_0000;
/// `ldr x16, #8`
const LDR_X16_LITERAL: u32 = 0x5800_0050;
/// `br x16`
const BR_X16: u32 = 0xd61f_0200;

/// Reach of `b` in either direction (128 MiB)
const B_RANGE: i64 = 1 << 27;

/// Length of a `b` instruction
pub const B_LEN: usize = 4;
/// Length of an absolute branch
pub const BR_ABS_LEN: usize = 16;

/// Generates `b` from `from` to `to`, or `None` if the distance is out of range or unaligned
pub fn b(from: usize, to: usize) -> Option<[u8; B_LEN]> {
    let offset = (to as i64).wrapping_sub(from as i64);
    if offset % 4 != 0 || !(-B_RANGE..B_RANGE).contains(&offset) {
        return None;
    }
    let imm26 = ((offset >> 2) as u32) & 0x03ff_ffff;
    Some((B | imm26).to_le_bytes())
}

/// Generates an absolute branch through x16, which the AAPCS64 reserves for veneers
pub fn br_abs(target: usize) -> [u8; BR_ABS_LEN] {
    let mut code = [0u8; BR_ABS_LEN];
    code[..4].copy_from_slice(&LDR_X16_LITERAL.to_le_bytes());
    code[4..8].copy_from_slice(&BR_X16.to_le_bytes());
    code[8..].copy_from_slice(&(target as u64).to_le_bytes());
    code
}

/// Generates the shortest branch from `from` to `to`
pub fn branch(from: usize, to: usize) -> Vec<u8> {
    match b(from, to) {
        Some(code) => code.to_vec(),
        None => br_abs(to).to_vec(),
    }
}
