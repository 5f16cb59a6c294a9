//! Bolero fuzzer for byte-ring operations.
//!
//! Properties tested:
//! - Writes never exceed free space; reads never exceed queued bytes
//! - FIFO ordering is preserved byte-for-byte against a queue oracle
//! - available_read + available_write == capacity always
//! - Free-running cursors never diverge past the capacity
//! - Wrap-around works correctly

use bolero::check;
use ringline_fuzz::byte_ring_model::{execute_and_verify, RingOp, MAX_CAPACITY, MIN_CAPACITY};

fn main() {
    check!()
        .with_type::<(u8, Vec<(u8, Vec<u8>, u16)>)>()
        .for_each(|(capacity_byte, ops_data)| {
            // Map capacity to a valid power of 2
            let capacity = {
                let c = (*capacity_byte as u32 % (MAX_CAPACITY - MIN_CAPACITY + 1)) + MIN_CAPACITY;
                c.next_power_of_two().min(MAX_CAPACITY)
            };

            // Convert ops_data to RingOps
            let ops: Vec<RingOp> = ops_data
                .iter()
                .map(|(kind, bytes, count)| match kind % 4 {
                    0 => RingOp::Write(bytes.clone()),
                    1 => RingOp::Read(*count),
                    2 => RingOp::Peek(*count),
                    _ => RingOp::Advance(*count),
                })
                .collect();

            // Run and verify - panics are caught by bolero
            if let Err(e) = execute_and_verify(capacity, &ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}

#[cfg(test)]
mod tests {
    #![allow(unused_imports)]
    use ringline_fuzz::byte_ring_model::{execute_and_verify, RingOp};

    #[test]
    fn fuzz_ring_basic() {
        // Quick sanity test with hardcoded sequences
        let ops = vec![
            RingOp::Write(vec![1, 2, 3]),
            RingOp::Peek(3),
            RingOp::Read(2),
            RingOp::Write(vec![4, 5, 6, 7]),
            RingOp::Read(16),
            RingOp::Read(1),
        ];
        execute_and_verify(16, &ops).unwrap();
    }

    #[test]
    fn fuzz_ring_full_cycle() {
        // Fill and drain multiple times
        let mut ops = Vec::new();
        for round in 0..5u8 {
            ops.push(RingOp::Write(vec![round; 8]));
            ops.push(RingOp::Read(8));
        }
        execute_and_verify(8, &ops).unwrap();
    }

    #[test]
    fn fuzz_ring_oversized_ops() {
        // Everything larger than the ring truncates instead of failing
        let ops = vec![
            RingOp::Write(vec![0x55; 1000]),
            RingOp::Peek(1000),
            RingOp::Advance(1000),
            RingOp::Read(1000),
        ];
        execute_and_verify(8, &ops).unwrap();
    }
}
