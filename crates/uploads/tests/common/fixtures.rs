//! Test fixtures for generating test data.

use bytes::Bytes;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Split `data` into `chunk_size` pieces, the last one possibly shorter.
#[allow(dead_code)]
pub fn split_chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}

/// Every ordering of `0..n` (Heap's algorithm).
#[allow(dead_code)]
pub fn permutations(n: usize) -> Vec<Vec<u64>> {
    fn heap(k: usize, items: &mut Vec<u64>, out: &mut Vec<Vec<u64>>) {
        if k <= 1 {
            out.push(items.clone());
            return;
        }
        heap(k - 1, items, out);
        for i in 0..k - 1 {
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
            heap(k - 1, items, out);
        }
    }

    let mut items: Vec<u64> = (0..n as u64).collect();
    let mut out = Vec::new();
    heap(n, &mut items, &mut out);
    out
}
