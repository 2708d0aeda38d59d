//! Test fixtures.

/// Deterministic pseudo-random bytes.
#[allow(dead_code)]
pub fn test_file_data(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}
