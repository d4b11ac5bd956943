//! Verification key resolution.
//!
//! A verification key is a function of the computation text, the data shape,
//! the precalibration witness and the circuit settings. Resolution is
//! delegated either to a remote derivation service or, when none is
//! configured, to local key generation from the reference string the
//! settings name.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use halo2_proofs_axiom::{
    plonk::keygen_vk,
    poly::{commitment::Params, kzg::commitment::ParamsKZG},
};
use halo2curves_axiom::bn256::Bn256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zkdm_circuit::ComputationCircuit;
use zkdm_common::{
    computation_digest, deserialize_params, sanitize_computation, serialize_params,
    serialize_verifying_key, AgreedComputation, CircuitSettings, DataShape, PrecalWitness,
};

use crate::error::KeyDerivationError;

/// The four inputs a verification key is derived from, plus the built-in
/// computation the request agreed to. Keys are only derived for settings
/// whose circuit proves exactly that computation.
#[derive(Clone, Debug)]
pub struct KeyDerivationRequest {
    pub shape: DataShape,
    pub computation: String,
    pub agreed: AgreedComputation,
    pub precal_witness: Vec<u8>,
    pub settings: Vec<u8>,
}

#[async_trait]
pub trait VerificationKeyResolver: Send + Sync {
    /// Returns the serialized verifying key.
    async fn resolve(&self, request: &KeyDerivationRequest) -> Result<Vec<u8>, KeyDerivationError>;
}

#[derive(Serialize)]
struct RemoteRequest {
    data_shape: String,
    computation: String,
    precal_witness: String,
    settings: String,
}

#[derive(Deserialize)]
struct RemoteResponse {
    vk: String,
}

/// Client for an HTTP key-derivation service.
///
/// Posts `{data_shape, computation, precal_witness, settings}` with every
/// field JSON-encoded as a string and expects `{"vk": "<base64>"}` back.
pub struct RemoteKeyResolver {
    client: reqwest::Client,
    url: String,
}

impl RemoteKeyResolver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeyDerivationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| KeyDerivationError::Service(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn utf8_field(bytes: &[u8], label: &str) -> Result<String, KeyDerivationError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| KeyDerivationError::InvalidInput(format!("{label} is not valid UTF-8")))
}

#[async_trait]
impl VerificationKeyResolver for RemoteKeyResolver {
    async fn resolve(&self, request: &KeyDerivationRequest) -> Result<Vec<u8>, KeyDerivationError> {
        let settings = CircuitSettings::from_bytes(&request.settings)
            .map_err(|err| KeyDerivationError::InvalidInput(format!("{err:#}")))?;
        check_agreed_function(&settings, &request.agreed)?;

        let body = RemoteRequest {
            data_shape: serde_json::to_string(&request.shape)
                .map_err(|err| KeyDerivationError::InvalidInput(err.to_string()))?,
            computation: sanitize_computation(&request.computation),
            precal_witness: utf8_field(&request.precal_witness, "precal witness")?,
            settings: utf8_field(&request.settings, "settings")?,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| KeyDerivationError::Service(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "key derivation service rejected request");
            return Err(KeyDerivationError::Service(format!(
                "service returned {status}: {text}"
            )));
        }

        let payload: RemoteResponse = response
            .json()
            .await
            .map_err(|err| KeyDerivationError::Service(format!("malformed response: {err}")))?;
        let vk = BASE64
            .decode(payload.vk.trim())
            .map_err(|err| KeyDerivationError::Service(format!("vk is not base64: {err}")))?;
        if vk.is_empty() {
            return Err(KeyDerivationError::Service("service returned an empty key".into()));
        }
        debug!(bytes = vk.len(), "resolved verification key remotely");
        Ok(vk)
    }
}

/// Where reference strings come from.
#[async_trait]
pub trait SrsSource: Send + Sync {
    async fn load(&self, srs_id: &str) -> Result<Vec<u8>, KeyDerivationError>;
}

/// Fixed in-memory set of reference strings.
#[derive(Clone, Default)]
pub struct StaticSrs {
    entries: HashMap<String, Arc<Vec<u8>>>,
}

impl StaticSrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, srs_id: impl Into<String>, params: &ParamsKZG<Bn256>) -> anyhow::Result<Self> {
        self.entries
            .insert(srs_id.into(), Arc::new(serialize_params(params)?));
        Ok(self)
    }

    pub fn with_bytes(mut self, srs_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.entries.insert(srs_id.into(), Arc::new(bytes));
        self
    }
}

#[async_trait]
impl SrsSource for StaticSrs {
    async fn load(&self, srs_id: &str) -> Result<Vec<u8>, KeyDerivationError> {
        self.entries
            .get(srs_id)
            .map(|bytes| bytes.as_ref().clone())
            .ok_or_else(|| KeyDerivationError::ReferenceString {
                srs_id: srs_id.to_string(),
                message: "not found".into(),
            })
    }
}

/// Derives verifying keys in-process by running key generation for the
/// circuit the settings describe.
pub struct LocalKeyResolver<S> {
    srs: S,
    params_cache: Mutex<HashMap<String, Arc<ParamsKZG<Bn256>>>>,
}

impl<S: SrsSource> LocalKeyResolver<S> {
    pub fn new(srs: S) -> Self {
        Self {
            srs,
            params_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn params(&self, srs_id: &str) -> Result<Arc<ParamsKZG<Bn256>>, KeyDerivationError> {
        if let Some(params) = self
            .params_cache
            .lock()
            .expect("params cache poisoned")
            .get(srs_id)
        {
            return Ok(Arc::clone(params));
        }
        let bytes = self.srs.load(srs_id).await?;
        let params = deserialize_params(&bytes).map_err(|err| KeyDerivationError::ReferenceString {
            srs_id: srs_id.to_string(),
            message: format!("{err:#}"),
        })?;
        let params = Arc::new(params);
        self.params_cache
            .lock()
            .expect("params cache poisoned")
            .insert(srs_id.to_string(), Arc::clone(&params));
        Ok(params)
    }
}

/// Fails unless the settings' circuit proves `agreed`: same kind, same
/// operand columns in the same order.
pub fn check_agreed_function(
    settings: &CircuitSettings,
    agreed: &AgreedComputation,
) -> Result<(), KeyDerivationError> {
    let proven = settings
        .computation()
        .map_err(|err| KeyDerivationError::InvalidInput(format!("{err:#}")))?;
    if &proven != agreed {
        return Err(KeyDerivationError::FunctionMismatch {
            agreed: agreed.clone(),
            proven,
        });
    }
    Ok(())
}

/// Checks the derivation inputs against each other and returns the parsed settings.
pub fn check_derivation_inputs(
    request: &KeyDerivationRequest,
) -> Result<CircuitSettings, KeyDerivationError> {
    let settings = CircuitSettings::from_bytes(&request.settings)
        .map_err(|err| KeyDerivationError::InvalidInput(format!("{err:#}")))?;
    if computation_digest(&request.computation) != settings.computation_digest {
        return Err(KeyDerivationError::ComputationMismatch);
    }
    check_agreed_function(&settings, &request.agreed)?;

    let witness = PrecalWitness::from_bytes(&request.precal_witness)
        .map_err(|err| KeyDerivationError::InvalidInput(format!("{err:#}")))?;
    let expected = settings.shape();
    if request.shape != expected {
        return Err(KeyDerivationError::ShapeMismatch {
            expected,
            found: request.shape.to_string(),
        });
    }
    match witness.shape() {
        Some(shape) if shape == expected => Ok(settings),
        Some(shape) => Err(KeyDerivationError::ShapeMismatch {
            expected,
            found: shape.to_string(),
        }),
        None => Err(KeyDerivationError::ShapeMismatch {
            expected,
            found: "ragged witness".into(),
        }),
    }
}

#[async_trait]
impl<S: SrsSource> VerificationKeyResolver for LocalKeyResolver<S> {
    async fn resolve(&self, request: &KeyDerivationRequest) -> Result<Vec<u8>, KeyDerivationError> {
        let settings = check_derivation_inputs(request)?;
        let srs = self.params(&settings.srs_id).await?;

        let vk = tokio::task::spawn_blocking(move || {
            let k = settings.circuit.k();
            anyhow::ensure!(
                srs.k() >= k,
                "reference string supports k = {} but the circuit needs k = {}",
                srs.k(),
                k
            );
            let mut params = srs.as_ref().clone();
            if params.k() > k {
                params.downsize(k);
            }
            let circuit = ComputationCircuit::keygen(settings.circuit);
            let vk = keygen_vk(&params, &circuit)
                .map_err(|err| anyhow::anyhow!("{err:?}"))?;
            serialize_verifying_key(&vk)
        })
        .await
        .map_err(|err| KeyDerivationError::Keygen(err.to_string()))?
        .map_err(|err| KeyDerivationError::Keygen(format!("{err:#}")))?;

        info!(bytes = vk.len(), "derived verification key locally");
        Ok(vk)
    }
}
