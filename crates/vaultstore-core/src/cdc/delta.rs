//! Delta encoding over chunk sets: express a target stream as copies from a base
//! stream plus literal inserts.

use super::{chunk, Chunk, ChunkerConfig};

/// One instruction in a delta's instruction sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Copy `length` bytes from the base stream starting at `base_offset`.
    Copy {
        /// Offset into the base stream.
        base_offset: u64,
        /// Number of bytes to copy.
        length: u64,
    },
    /// Insert `length` literal bytes carried alongside the instruction stream.
    Insert {
        /// Number of bytes to insert.
        length: u64,
    },
}

/// The result of diffing a base stream against a target stream.
#[derive(Debug, Clone)]
pub struct Delta {
    /// Ordered instructions that reconstruct the target from the base.
    pub instructions: Vec<Instruction>,
    /// Concatenated literal bytes for every `Insert` instruction, in order.
    pub insert_data: Vec<u8>,
    /// Fraction of target bytes satisfied by `Copy` instructions.
    pub savings_ratio: f64,
}

/// Computes a delta that reconstructs `target` from `base`, using FastCDC chunking
/// with `config` to find reusable regions.
#[must_use]
pub fn compute(base: &[u8], target: &[u8], config: &ChunkerConfig) -> Delta {
    let base_chunks = chunk(base, config);
    let base_index: std::collections::HashMap<&str, &Chunk> =
        base_chunks.iter().map(|c| (c.hash.as_str(), c)).collect();

    let target_chunks = chunk(target, config);

    let mut instructions = Vec::new();
    let mut insert_data = Vec::new();
    let mut copied_bytes: u64 = 0;

    // Merge adjacent Insert instructions so runs of non-matching chunks become one
    // instruction rather than one per chunk.
    let mut pending_insert: Vec<u8> = Vec::new();

    for tc in &target_chunks {
        let slice = &target[tc.offset as usize..(tc.offset + tc.size) as usize];
        if let Some(base_chunk) = base_index.get(tc.hash.as_str()) {
            if !pending_insert.is_empty() {
                instructions.push(Instruction::Insert {
                    length: pending_insert.len() as u64,
                });
                insert_data.append(&mut pending_insert);
            }
            instructions.push(Instruction::Copy {
                base_offset: base_chunk.offset,
                length: base_chunk.size,
            });
            copied_bytes += tc.size;
        } else {
            pending_insert.extend_from_slice(slice);
        }
    }
    if !pending_insert.is_empty() {
        instructions.push(Instruction::Insert {
            length: pending_insert.len() as u64,
        });
        insert_data.append(&mut pending_insert);
    }

    let savings_ratio = if target.is_empty() {
        0.0
    } else {
        copied_bytes as f64 / target.len() as f64
    };

    Delta {
        instructions,
        insert_data,
        savings_ratio,
    }
}

/// Reconstructs the target stream from `base` and a previously computed instruction
/// sequence plus its literal insert data.
#[must_use]
pub fn apply(base: &[u8], instructions: &[Instruction], insert_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut insert_cursor = 0usize;
    for instr in instructions {
        match *instr {
            Instruction::Copy { base_offset, length } => {
                let start = base_offset as usize;
                let end = start + length as usize;
                out.extend_from_slice(&base[start..end]);
            }
            Instruction::Insert { length } => {
                let end = insert_cursor + length as usize;
                out.extend_from_slice(&insert_data[insert_cursor..end]);
                insert_cursor = end;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_round_trip_identical_streams() {
        let mut data = Vec::new();
        for i in 0..100_000u32 {
            data.extend_from_slice(&i.to_le_bytes());
        }
        let config = ChunkerConfig::default();
        let delta = compute(&data, &data, &config);
        let rebuilt = apply(&data, &delta.instructions, &delta.insert_data);
        assert_eq!(rebuilt, data);
        assert!(delta.savings_ratio > 0.9);
    }

    #[test]
    fn test_should_round_trip_after_appended_tail() {
        let mut base = Vec::new();
        for i in 0..50_000u32 {
            base.extend_from_slice(&i.to_le_bytes());
        }
        let mut target = base.clone();
        target.extend_from_slice(b"brand new trailing content that did not exist before");

        let config = ChunkerConfig::default();
        let delta = compute(&base, &target, &config);
        let rebuilt = apply(&base, &delta.instructions, &delta.insert_data);
        assert_eq!(rebuilt, target);
    }

    #[test]
    fn test_should_round_trip_completely_disjoint_streams() {
        let base = vec![1u8; 10_000];
        let target = vec![2u8; 10_000];
        let config = ChunkerConfig::default();
        let delta = compute(&base, &target, &config);
        let rebuilt = apply(&base, &delta.instructions, &delta.insert_data);
        assert_eq!(rebuilt, target);
        assert_eq!(delta.savings_ratio, 0.0);
    }
}
