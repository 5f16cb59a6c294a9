//! Bolero fuzzer for the transfer-framing protocol.
//!
//! Properties tested (the transport's core guarantees):
//! - Conservation: every byte written is eventually delivered
//! - Order preservation: delivery order equals write order, across any
//!   mix of staged writes, explicit flushes, and large transfers

use bolero::check;
use ringline_fuzz::stream_model::{execute_and_verify, StreamOp};

fn main() {
    check!()
        .with_type::<Vec<(u8, u16, u8)>>()
        .for_each(|ops_data| {
            let ops: Vec<StreamOp> = ops_data
                .iter()
                .map(|(kind, len, val)| match kind % 8 {
                    0 => StreamOp::WriteLarge(*len, *val),
                    1 => StreamOp::Flush,
                    2 => StreamOp::Consume,
                    _ => StreamOp::Write(*len, *val),
                })
                .collect();

            if let Err(e) = execute_and_verify(&ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}

#[cfg(test)]
mod tests {
    #![allow(unused_imports)]
    use ringline_fuzz::stream_model::{execute_and_verify, StreamOp};

    #[test]
    fn fuzz_stream_mixed_traffic() {
        let ops = vec![
            StreamOp::Write(40, 0x01),
            StreamOp::Write(40, 0x02),
            StreamOp::Consume,
            StreamOp::WriteLarge(500, 0x03),
            StreamOp::Flush,
            StreamOp::Write(1, 0x04),
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn fuzz_stream_pathological_sizes() {
        let mut ops = Vec::new();
        for i in 0..32u16 {
            ops.push(StreamOp::Write(i * 7 + 1, i as u8));
            if i % 5 == 0 {
                ops.push(StreamOp::WriteLarge(i * 31, (i * 3) as u8));
            }
        }
        execute_and_verify(&ops).unwrap();
    }
}
