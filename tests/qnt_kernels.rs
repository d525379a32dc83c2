//! Execution tests for the qnt (row requantization) kernels.

mod common;

use common::{generate, qnt_reference, Lcg};
use metagen::sim::{Machine, SimError};
use metagen::{KernelShape, QntShape};

struct QntParams {
    multiplicative_offset: i32,
    rounding_offset: i32,
    shift: i32,
}

fn run_qnt(
    rows: &[Vec<i32>],
    offsets: &[i32],
    aligned: bool,
    params: &QntParams,
) -> Result<(Vec<Vec<u8>>, Machine), SimError> {
    let count = rows[0].len();
    let kernel = generate(KernelShape::Qnt(QntShape {
        rows: rows.len(),
        leftover: count % 8,
        aligned,
    }));
    let mut machine = Machine::new();

    let stride = (count.next_multiple_of(2) + 2) * 4;
    let source = machine
        .memory
        .alloc(stride * (rows.len() - 1) + count * 4);
    for (i, row) in rows.iter().enumerate() {
        let bytes: Vec<u8> = row.iter().flat_map(|v| v.to_le_bytes()).collect();
        machine.memory.write(source + (i * stride) as u32, &bytes)?;
    }

    let destination_stride = if aligned {
        count.next_multiple_of(8) + 8
    } else {
        count + 5
    };
    let destination_len = destination_stride * (rows.len() - 1) + count;
    let destination = if aligned {
        machine.memory.alloc(destination_len)
    } else {
        machine.memory.alloc_with_offset(destination_len, 1)
    };
    let offsets_address = machine.memory.alloc_i32s(offsets);

    machine.set_param("source", source);
    machine.set_param("count", count as u32);
    machine.set_param("stride", stride as u32);
    machine.set_param("offsets", offsets_address);
    machine.set_param("destination", destination);
    machine.set_param("destination_stride", destination_stride as u32);
    machine.set_param_i32("multiplicative_offset", params.multiplicative_offset);
    machine.set_param_i32("rounding_offset", params.rounding_offset);
    machine.set_param_i32("shift", params.shift);
    machine.run(&kernel)?;

    let output = (0..rows.len())
        .map(|i| {
            machine
                .memory
                .read(destination + (i * destination_stride) as u32, count)
                .map(<[u8]>::to_vec)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((output, machine))
}

fn expected(rows: &[Vec<i32>], offsets: &[i32], params: &QntParams) -> Vec<Vec<u8>> {
    rows.iter()
        .zip(offsets)
        .map(|(row, offset)| {
            row.iter()
                .map(|x| {
                    qnt_reference(
                        *x,
                        *offset,
                        params.multiplicative_offset,
                        params.rounding_offset,
                        params.shift,
                    )
                })
                .collect()
        })
        .collect()
}

#[test]
fn test_identity_parameters() {
    common::init_logging();
    let rows = vec![(0..16).map(|i| i * 10).collect::<Vec<i32>>()];
    let params = QntParams {
        multiplicative_offset: 1,
        rounding_offset: 0,
        shift: 0,
    };
    let (output, machine) = run_qnt(&rows, &[0], true, &params).unwrap();
    let expected: Vec<u8> = (0..16)
        .map(|i| (i * 10).min(255) as u8)
        .collect();
    assert_eq!(output, vec![expected]);
    assert_eq!(machine.param("count"), Some(0));
}

#[test]
fn test_negative_shift_rounds_down() {
    common::init_logging();
    let rows = vec![vec![-9, -8, 7, 8, 9, 100, 1000, 5000]];
    let params = QntParams {
        multiplicative_offset: 3,
        rounding_offset: 2,
        shift: -2,
    };
    let (output, _) = run_qnt(&rows, &[1], false, &params).unwrap();
    assert_eq!(output, expected(&rows, &[1], &params));
    // (-9 + 1) * 3 + 2 = -22, >> 2 = -6, saturates to 0
    assert_eq!(output[0][0], 0);
    // (8 + 1) * 3 + 2 = 29, >> 2 = 7
    assert_eq!(output[0][3], 7);
}

#[test]
fn test_random_rows_match_reference() {
    common::init_logging();
    let mut rng = Lcg::new(99);
    for row_count in 1..=3 {
        for leftover in 0..8 {
            for aligned in [false, true] {
                let count = 16 + leftover;
                let rows: Vec<Vec<i32>> = (0..row_count)
                    .map(|_| (0..count).map(|_| rng.below(20_000) as i32 - 10_000).collect())
                    .collect();
                let offsets: Vec<i32> = (0..row_count)
                    .map(|_| rng.below(200) as i32 - 100)
                    .collect();
                let params = QntParams {
                    multiplicative_offset: rng.below(64) as i32 + 1,
                    rounding_offset: 1 << 5,
                    shift: -6,
                };

                let (output, machine) = run_qnt(&rows, &offsets, aligned, &params)
                    .unwrap_or_else(|e| panic!("rows {row_count} count {count}: {e}"));
                assert_eq!(
                    output,
                    expected(&rows, &offsets, &params),
                    "rows {row_count} count {count} aligned {aligned}"
                );
                assert_eq!(machine.param("count"), Some(0));
            }
        }
    }
}
