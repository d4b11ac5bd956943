// zkdm/zkdm-circuit/src/gadgets/computation.rs

use halo2_base::{
    gates::{flex_gate::GateChip, GateInstructions},
    AssignedValue, Context,
    QuantumCell::Existing,
};
use halo2curves_axiom::bn256::Fr;

use crate::ComputationKind;

/// Constrains the computation output. Operands must already be validated
/// against the column count.
pub fn evaluate(
    ctx: &mut Context<Fr>,
    gate: &GateChip<Fr>,
    kind: ComputationKind,
    operands: &[usize],
    columns: &[Vec<AssignedValue<Fr>>],
) -> AssignedValue<Fr> {
    match kind {
        ComputationKind::Sum => gate.sum(ctx, columns[operands[0]].iter().copied()),
        ComputationKind::SumOfSquares => {
            let column = &columns[operands[0]];
            gate.inner_product(
                ctx,
                column.iter().copied(),
                column.iter().map(|v| Existing(*v)),
            )
        }
        ComputationKind::DotProduct => {
            let (a, b) = (&columns[operands[0]], &columns[operands[1]]);
            gate.inner_product(ctx, a.iter().copied(), b.iter().map(|v| Existing(*v)))
        }
    }
}

pub fn evaluate_native(kind: ComputationKind, operands: &[usize], columns: &[Vec<Fr>]) -> Fr {
    match kind {
        ComputationKind::Sum => columns[operands[0]]
            .iter()
            .fold(Fr::zero(), |acc, v| acc + v),
        ComputationKind::SumOfSquares => columns[operands[0]]
            .iter()
            .fold(Fr::zero(), |acc, v| acc + v * v),
        ComputationKind::DotProduct => columns[operands[0]]
            .iter()
            .zip(&columns[operands[1]])
            .fold(Fr::zero(), |acc, (a, b)| acc + a * b),
    }
}
