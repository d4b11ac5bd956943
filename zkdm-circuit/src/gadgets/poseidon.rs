// zkdm/zkdm-circuit/src/gadgets/poseidon.rs

//! Column hashing shared by the circuit and by native commitment generation.
//!
//! A column of `n` field elements is absorbed in blocks of [`COLUMN_BLOCK`]
//! values, chaining a running accumulator that starts at `n`:
//!
//! ```text
//! acc_0     = n
//! acc_{i+1} = Poseidon(acc_i, x_{4i}, x_{4i+1}, x_{4i+2}, x_{4i+3})
//! ```
//!
//! The last block is zero padded and an empty column absorbs one all-zero
//! block. Native digests run the same chip in witness-generation mode, so a
//! commitment digest and the corresponding proof instance always agree.

use halo2_base::{
    gates::{
        circuit::{builder::BaseCircuitBuilder, CircuitBuilderStage},
        flex_gate::GateChip,
    },
    poseidon::hasher::{spec::OptimizedPoseidonSpec, PoseidonHasher},
    AssignedValue, Context,
};
use halo2curves_axiom::bn256::Fr;

pub const POSEIDON_T: usize = 6;
pub const POSEIDON_RATE: usize = 5;
pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;
/// Column values absorbed per permutation; the remaining rate slot carries the accumulator.
pub const COLUMN_BLOCK: usize = POSEIDON_RATE - 1;
const NATIVE_BATCH_BLOCKS: usize = 256;

pub type PoseidonSpec = OptimizedPoseidonSpec<Fr, POSEIDON_T, POSEIDON_RATE>;
pub type ColumnHasher = PoseidonHasher<Fr, POSEIDON_T, POSEIDON_RATE>;

pub fn poseidon_spec() -> PoseidonSpec {
    OptimizedPoseidonSpec::new::<POSEIDON_FULL_ROUNDS, POSEIDON_PARTIAL_ROUNDS, 0>()
}

/// Constrains and returns the digest of an assigned column.
///
/// `hasher` must have been initialised in `ctx`.
pub fn hash_column(
    ctx: &mut Context<Fr>,
    gate: &GateChip<Fr>,
    hasher: &ColumnHasher,
    values: &[AssignedValue<Fr>],
) -> AssignedValue<Fr> {
    let acc = ctx.load_constant(Fr::from(values.len() as u64));
    if values.is_empty() {
        let zero = ctx.load_constant(Fr::zero());
        return absorb(ctx, gate, hasher, acc, &[zero]);
    }
    absorb(ctx, gate, hasher, acc, values)
}

fn absorb(
    ctx: &mut Context<Fr>,
    gate: &GateChip<Fr>,
    hasher: &ColumnHasher,
    mut acc: AssignedValue<Fr>,
    values: &[AssignedValue<Fr>],
) -> AssignedValue<Fr> {
    for chunk in values.chunks(COLUMN_BLOCK) {
        let mut block = Vec::with_capacity(POSEIDON_RATE);
        block.push(acc);
        block.extend_from_slice(chunk);
        while block.len() < POSEIDON_RATE {
            block.push(ctx.load_constant(Fr::zero()));
        }
        acc = hasher.hash_fix_len_array(ctx, gate, &block);
    }
    acc
}

/// Computes the column digest outside of any circuit.
///
/// Work is split into batches so that witness memory stays bounded for long
/// columns; the accumulator carries over between batches.
pub fn native_column_digest(spec: &PoseidonSpec, values: &[Fr]) -> Fr {
    let gate = GateChip::<Fr>::default();
    let mut acc = Fr::from(values.len() as u64);
    let padded = [Fr::zero()];
    let values = if values.is_empty() { &padded[..] } else { values };

    for batch in values.chunks(COLUMN_BLOCK * NATIVE_BATCH_BLOCKS) {
        let mut builder = BaseCircuitBuilder::<Fr>::from_stage(CircuitBuilderStage::Prover);
        let ctx = builder.main(0);
        let mut hasher = ColumnHasher::new(spec.clone());
        hasher.initialize_consts(ctx, &gate);

        let acc_cell = ctx.load_witness(acc);
        let cells: Vec<AssignedValue<Fr>> = batch.iter().map(|v| ctx.load_witness(*v)).collect();
        acc = *absorb(ctx, &gate, &hasher, acc_cell, &cells).value();
    }
    acc
}
