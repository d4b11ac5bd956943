//! Process-wide proof engine: fixed-point encoding and column hashing.
//!
//! The engine owns the Poseidon round constants and MDS matrices, which are
//! expensive to derive, so it is built once per process through
//! [`ensure_ready`]. Callers that only hold a reference obtained from
//! [`engine`] get [`EngineError::NotReady`] until that has happened.

use halo2curves_axiom::{bn256::Fr, ff::PrimeField};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::debug;
use zkdm_circuit::{native_column_digest, poseidon_spec, PoseidonSpec};

use crate::{fr_from_hex, fr_to_hex};

/// Largest magnitude accepted after scaling; keeps the integer exact in `i128`.
const MAX_SCALED_MAGNITUDE: f64 = 1.7e38;

static ENGINE: EngineSlot = EngineSlot::new();

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine was used before `ensure_ready` completed.
    #[error("proof engine is not initialised")]
    NotReady,

    /// A value cannot be represented as a field element at this scale.
    #[error("cannot encode {value} at scale {scale}: {reason}")]
    Encode {
        value: f64,
        scale: u32,
        reason: &'static str,
    },

    /// Canonical sequence bytes were not a JSON array of field elements.
    #[error("malformed field element sequence: {0}")]
    Sequence(String),

    #[error("proof engine self-test failed: {0}")]
    SelfTest(&'static str),
}

/// Guarded, lazily initialised engine slot.
pub struct EngineSlot {
    cell: OnceCell<ProofEngine>,
}

impl EngineSlot {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Initialises the engine on first call. Subsequent calls, including
    /// concurrent ones, return the same instance.
    pub fn ensure_ready(&self) -> Result<&ProofEngine, EngineError> {
        self.cell.get_or_try_init(ProofEngine::initialize)
    }

    pub fn get(&self) -> Result<&ProofEngine, EngineError> {
        self.cell.get().ok_or(EngineError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl Default for EngineSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialises the process-global engine. Idempotent.
pub fn ensure_ready() -> Result<&'static ProofEngine, EngineError> {
    ENGINE.ensure_ready()
}

/// Returns the process-global engine if it has been initialised.
pub fn engine() -> Result<&'static ProofEngine, EngineError> {
    ENGINE.get()
}

pub struct ProofEngine {
    spec: PoseidonSpec,
}

impl ProofEngine {
    fn initialize() -> Result<Self, EngineError> {
        let engine = Self {
            spec: poseidon_spec(),
        };
        engine.self_test()?;
        debug!("proof engine initialised");
        Ok(engine)
    }

    fn self_test(&self) -> Result<(), EngineError> {
        if encode_scaled(-1.5, 1)? != -Fr::from(3u64) || encode_scaled(0.25, 3)? != Fr::from(2u64)
        {
            return Err(EngineError::SelfTest("fixed-point encoding"));
        }
        let one = self.hash(&[Fr::one()]);
        if one != self.hash(&[Fr::one()]) || one == self.hash(&[]) {
            return Err(EngineError::SelfTest("column digest"));
        }
        Ok(())
    }

    pub fn spec(&self) -> &PoseidonSpec {
        &self.spec
    }

    pub fn encode_scaled(&self, value: f64, scale: u32) -> Result<Fr, EngineError> {
        encode_scaled(value, scale)
    }

    /// Digest of an ordered sequence of field elements.
    pub fn hash(&self, elements: &[Fr]) -> Fr {
        native_column_digest(&self.spec, elements)
    }

    /// Digest of a canonical sequence produced by [`canonical_sequence`].
    pub fn hash_sequence(&self, canonical: &[u8]) -> Result<Fr, EngineError> {
        let encoded: Vec<String> = serde_json::from_slice(canonical)
            .map_err(|err| EngineError::Sequence(err.to_string()))?;
        let elements = encoded
            .iter()
            .map(|hex| fr_from_hex(hex).map_err(|err| EngineError::Sequence(err.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.hash(&elements))
    }
}

/// Encodes `value` as the nearest integer to `value * 2^scale`, rounding half
/// away from zero; negative integers map to their field negation.
pub fn encode_scaled(value: f64, scale: u32) -> Result<Fr, EngineError> {
    let err = |reason| EngineError::Encode {
        value,
        scale,
        reason,
    };
    if !value.is_finite() {
        return Err(err("value is not finite"));
    }
    let exponent = i32::try_from(scale).map_err(|_| err("scale out of range"))?;
    let scaled = (value * 2f64.powi(exponent)).round();
    if !scaled.is_finite() || scaled.abs() > MAX_SCALED_MAGNITUDE {
        return Err(err("scaled value exceeds the fixed-point range"));
    }
    let magnitude = Fr::from_u128(scaled.abs() as u128);
    Ok(if scaled < 0.0 { -magnitude } else { magnitude })
}

/// Reads a field element as a signed integer, if it lies in `i128` range on
/// either side of zero.
pub fn fr_to_i128(value: &Fr) -> Option<i128> {
    fn small(value: &Fr) -> Option<u128> {
        let repr = value.to_repr();
        let bytes = repr.as_ref();
        if bytes[16..].iter().any(|&b| b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&bytes[..16]);
        let magnitude = u128::from_le_bytes(low);
        (magnitude <= i128::MAX as u128).then_some(magnitude)
    }

    if let Some(positive) = small(value) {
        return Some(positive as i128);
    }
    small(&-*value).map(|negative| -(negative as i128))
}

/// Inverse of [`encode_scaled`] up to rounding.
pub fn decode_scaled(value: &Fr, scale: u32) -> Option<f64> {
    let exponent = i32::try_from(scale).ok()?;
    fr_to_i128(value).map(|q| q as f64 / 2f64.powi(exponent))
}

/// Canonical byte form of an encoded sequence: a JSON array of little-endian
/// hex field elements, in order.
pub fn canonical_sequence(elements: &[Fr]) -> Vec<u8> {
    let encoded: Vec<String> = elements.iter().map(fr_to_hex).collect();
    serde_json::to_vec(&encoded).unwrap_or_default()
}
