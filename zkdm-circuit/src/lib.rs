// zkdm/zkdm-circuit/src/lib.rs

pub mod gadgets;

use std::{fmt, str::FromStr};

use halo2_base::{
    gates::{
        circuit::builder::BaseCircuitBuilder,
        circuit::{BaseCircuitParams, BaseConfig, CircuitBuilderStage},
        GateChip,
    },
    AssignedValue,
};
use halo2_proofs_axiom::{
    circuit::{Layouter, SimpleFloorPlanner},
    plonk::{Circuit, ConstraintSystem, Error},
};
use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gadgets::poseidon::{
    native_column_digest, poseidon_spec, ColumnHasher, PoseidonSpec, COLUMN_BLOCK,
    POSEIDON_FULL_ROUNDS, POSEIDON_PARTIAL_ROUNDS, POSEIDON_RATE, POSEIDON_T,
};

const MIN_K: u32 = 12;
pub const MAX_K: u32 = 24;
const NUM_INSTANCE_COLUMNS: usize = 1;
const DEFAULT_ADVICE_PER_PHASE: usize = 6;
const DEFAULT_FIXED_COLUMNS: usize = 1;
/// Upper bound on the advice cells one absorbed block costs, including the
/// padding permutation that a rate-aligned input triggers.
const CELLS_PER_BLOCK: usize = 12_000;
const CELLS_PER_VALUE: usize = 8;
const CELLS_OVERHEAD: usize = 2_000;
const UNUSABLE_ROWS: usize = 64;

/// Declared tabular shape of a dataset: every column holds `rows` values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataShape {
    pub rows: usize,
    pub columns: usize,
}

impl DataShape {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self { rows, columns }
    }
}

impl fmt::Display for DataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.columns)
    }
}

/// Column computations the reference circuit can prove.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationKind {
    /// Sum of one column.
    #[default]
    Sum,
    /// Sum of the squares of one column.
    SumOfSquares,
    /// Inner product of two columns.
    DotProduct,
}

impl ComputationKind {
    /// Number of operand columns the computation reads.
    pub fn arity(self) -> usize {
        match self {
            ComputationKind::Sum | ComputationKind::SumOfSquares => 1,
            ComputationKind::DotProduct => 2,
        }
    }

    /// Polynomial degree of the output in the inputs. The output of a proof
    /// over values encoded at scale `s` is encoded at scale `s * degree`.
    pub fn degree(self) -> u32 {
        match self {
            ComputationKind::Sum => 1,
            ComputationKind::SumOfSquares | ComputationKind::DotProduct => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComputationKind::Sum => "sum",
            ComputationKind::SumOfSquares => "sum_of_squares",
            ComputationKind::DotProduct => "dot_product",
        }
    }
}

impl fmt::Display for ComputationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputationKind {
    type Err = CircuitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sum" => Ok(ComputationKind::Sum),
            "sum_of_squares" => Ok(ComputationKind::SumOfSquares),
            "dot_product" => Ok(ComputationKind::DotProduct),
            other => Err(CircuitError::UnknownComputation(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitError {
    /// The shape has no rows or no columns.
    #[error("dataset shape {0} is empty")]
    EmptyShape(DataShape),

    /// The computation was given the wrong number of operand columns.
    #[error("{kind} expects {expected} operand column(s), got {actual}")]
    OperandCount {
        kind: ComputationKind,
        expected: usize,
        actual: usize,
    },

    /// An operand refers to a column outside the shape.
    #[error("operand column {index} is out of range for {columns} column(s)")]
    OperandOutOfRange { index: usize, columns: usize },

    /// Witness columns do not match the declared shape.
    #[error("expected {expected} column(s), got {actual}")]
    ColumnCount { expected: usize, actual: usize },

    /// A witness column has the wrong number of values.
    #[error("column {index} has {actual} value(s), expected {expected}")]
    ColumnLength {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// The shape needs more rows than the largest supported circuit.
    #[error("dataset shape {shape} needs a circuit larger than 2^{max_k} rows")]
    TooLarge { shape: DataShape, max_k: u32 },

    #[error("unknown computation '{0}'")]
    UnknownComputation(String),
}

/// Everything that determines the circuit layout: the verifying key is a
/// function of these parameters and the reference string alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputationCircuitParams {
    pub shape: DataShape,
    pub kind: ComputationKind,
    pub operands: Vec<usize>,
    pub base: BaseCircuitParams,
}

impl Default for ComputationCircuitParams {
    fn default() -> Self {
        Self {
            shape: DataShape::new(1, 1),
            kind: ComputationKind::Sum,
            operands: vec![0],
            base: base_params(MIN_K),
        }
    }
}

impl ComputationCircuitParams {
    pub fn new(
        shape: DataShape,
        kind: ComputationKind,
        operands: Vec<usize>,
    ) -> Result<Self, CircuitError> {
        let k = estimate_k(shape)?;
        let params = Self {
            shape,
            kind,
            operands,
            base: base_params(k),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn k(&self) -> u32 {
        self.base.k as u32
    }

    /// Number of public instance values: one digest per column plus the output.
    pub fn instance_len(&self) -> usize {
        self.shape.columns + 1
    }

    pub fn validate(&self) -> Result<(), CircuitError> {
        if self.shape.rows == 0 || self.shape.columns == 0 {
            return Err(CircuitError::EmptyShape(self.shape));
        }
        if self.operands.len() != self.kind.arity() {
            return Err(CircuitError::OperandCount {
                kind: self.kind,
                expected: self.kind.arity(),
                actual: self.operands.len(),
            });
        }
        if let Some(&index) = self.operands.iter().find(|&&idx| idx >= self.shape.columns) {
            return Err(CircuitError::OperandOutOfRange {
                index,
                columns: self.shape.columns,
            });
        }
        Ok(())
    }

    /// Checks that witness columns match the declared shape.
    pub fn check_columns(&self, columns: &[Vec<Fr>]) -> Result<(), CircuitError> {
        if columns.len() != self.shape.columns {
            return Err(CircuitError::ColumnCount {
                expected: self.shape.columns,
                actual: columns.len(),
            });
        }
        for (index, column) in columns.iter().enumerate() {
            if column.len() != self.shape.rows {
                return Err(CircuitError::ColumnLength {
                    index,
                    expected: self.shape.rows,
                    actual: column.len(),
                });
            }
        }
        Ok(())
    }
}

/// Smallest `k` whose usable rows hold every column hash plus the computation.
pub fn estimate_k(shape: DataShape) -> Result<u32, CircuitError> {
    if shape.rows == 0 || shape.columns == 0 {
        return Err(CircuitError::EmptyShape(shape));
    }
    let blocks = shape.rows.div_ceil(COLUMN_BLOCK).max(1);
    let cells = shape
        .columns
        .saturating_mul(blocks)
        .saturating_mul(CELLS_PER_BLOCK)
        .saturating_add(
            shape
                .rows
                .saturating_mul(shape.columns)
                .saturating_mul(CELLS_PER_VALUE),
        )
        .saturating_add(CELLS_OVERHEAD);
    let rows = cells.div_ceil(DEFAULT_ADVICE_PER_PHASE) + UNUSABLE_ROWS;
    let k = (usize::BITS - (rows - 1).leading_zeros()).max(MIN_K);
    if k > MAX_K {
        return Err(CircuitError::TooLarge {
            shape,
            max_k: MAX_K,
        });
    }
    Ok(k)
}

fn base_params(k: u32) -> BaseCircuitParams {
    BaseCircuitParams {
        k: k as usize,
        num_advice_per_phase: vec![DEFAULT_ADVICE_PER_PHASE],
        num_fixed: DEFAULT_FIXED_COLUMNS,
        num_lookup_advice_per_phase: vec![],
        lookup_bits: None,
        num_instance_columns: NUM_INSTANCE_COLUMNS,
    }
}

/// Proves that a computation over committed columns produced a given output.
///
/// Public instances (single column): the Poseidon digest of every dataset
/// column in order, followed by the computation output.
#[derive(Clone, Debug, Default)]
pub struct ComputationCircuit {
    columns: Option<Vec<Vec<Fr>>>,
    params: ComputationCircuitParams,
}

impl ComputationCircuit {
    pub fn new(
        params: ComputationCircuitParams,
        columns: Vec<Vec<Fr>>,
    ) -> Result<Self, CircuitError> {
        params.validate()?;
        params.check_columns(&columns)?;
        Ok(Self {
            columns: Some(columns),
            params,
        })
    }

    /// Witness-free circuit used for key generation.
    pub fn keygen(params: ComputationCircuitParams) -> Self {
        Self {
            columns: None,
            params,
        }
    }

    pub fn circuit_params(&self) -> &ComputationCircuitParams {
        &self.params
    }
}

/// Native evaluation of the public instances for `columns`.
pub fn public_instances(
    params: &ComputationCircuitParams,
    spec: &PoseidonSpec,
    columns: &[Vec<Fr>],
) -> Result<Vec<Vec<Fr>>, CircuitError> {
    params.validate()?;
    params.check_columns(columns)?;
    let mut values: Vec<Fr> = columns
        .iter()
        .map(|column| native_column_digest(spec, column))
        .collect();
    values.push(gadgets::computation::evaluate_native(
        params.kind,
        &params.operands,
        columns,
    ));
    Ok(vec![values])
}

impl Circuit<Fr> for ComputationCircuit {
    type Config = BaseConfig<Fr>;
    type FloorPlanner = SimpleFloorPlanner;
    type Params = ComputationCircuitParams;

    fn params(&self) -> Self::Params {
        self.params.clone()
    }

    fn without_witnesses(&self) -> Self {
        Self::keygen(self.params.clone())
    }

    fn configure_with_params(
        meta: &mut ConstraintSystem<Fr>,
        params: Self::Params,
    ) -> Self::Config {
        BaseConfig::configure(meta, params.base)
    }

    fn configure(_: &mut ConstraintSystem<Fr>) -> Self::Config {
        unreachable!("ComputationCircuit must be configured with explicit parameters")
    }

    fn synthesize(&self, config: Self::Config, layouter: impl Layouter<Fr>) -> Result<(), Error> {
        let stage = if self.columns.is_some() {
            CircuitBuilderStage::Mock
        } else {
            CircuitBuilderStage::Keygen
        };

        let placeholder;
        let columns = match &self.columns {
            Some(columns) => columns.as_slice(),
            None => {
                placeholder = vec![vec![Fr::zero(); self.params.shape.rows]; self.params.shape.columns];
                placeholder.as_slice()
            }
        };

        let mut builder = BaseCircuitBuilder::<Fr>::from_stage(stage)
            .use_params(self.params.base.clone())
            .use_instance_columns(NUM_INSTANCE_COLUMNS);

        build_constraints(&mut builder, &self.params, columns);
        <BaseCircuitBuilder<Fr> as Circuit<Fr>>::synthesize(&builder, config, layouter)
    }
}

fn build_constraints(
    builder: &mut BaseCircuitBuilder<Fr>,
    params: &ComputationCircuitParams,
    columns: &[Vec<Fr>],
) {
    let gate = GateChip::<Fr>::default();
    let ctx = builder.main(0);

    let mut hasher = ColumnHasher::new(poseidon_spec());
    hasher.initialize_consts(ctx, &gate);

    let assigned: Vec<Vec<AssignedValue<Fr>>> = columns
        .iter()
        .map(|column| column.iter().map(|value| ctx.load_witness(*value)).collect())
        .collect();

    let digests: Vec<AssignedValue<Fr>> = assigned
        .iter()
        .map(|column| gadgets::poseidon::hash_column(ctx, &gate, &hasher, column))
        .collect();

    let output =
        gadgets::computation::evaluate(ctx, &gate, params.kind, &params.operands, &assigned);

    let instances = &mut builder.assigned_instances[0];
    instances.extend(digests);
    instances.push(output);
}
