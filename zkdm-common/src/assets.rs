// zkdm/zkdm-common/src/assets.rs

//! Bucket names and object paths shared by every asset-store backend.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PROOF_ASSETS_BUCKET: &str = "proof_assets";
pub const COMPUTATIONS_BUCKET: &str = "computations";
pub const DATA_COMMITMENT_FILE: &str = "data_commitment.json";
const SRS_DIR: &str = "srs";
const MAX_SRS_ID_LEN: usize = 64;

/// Files that make up a proof bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Proof,
    PrecalWitness,
    Settings,
}

impl AssetKind {
    pub const ALL: [AssetKind; 3] = [AssetKind::Proof, AssetKind::PrecalWitness, AssetKind::Settings];

    pub fn file_name(self) -> &'static str {
        match self {
            AssetKind::Proof => "model.pf",
            AssetKind::PrecalWitness => "precal_witness.json",
            AssetKind::Settings => "settings.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Proof => "proof",
            AssetKind::PrecalWitness => "precal_witness",
            AssetKind::Settings => "settings",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.file_name() == s)
            .ok_or_else(|| format!("unknown asset kind '{s}'"))
    }
}

pub fn commitment_path(dataset_id: &Uuid) -> String {
    format!("{dataset_id}/{DATA_COMMITMENT_FILE}")
}

pub fn bundle_dir(dataset_id: &Uuid, request_id: &Uuid) -> String {
    format!("{dataset_id}/{request_id}")
}

pub fn bundle_asset_path(dataset_id: &Uuid, request_id: &Uuid, kind: AssetKind) -> String {
    format!("{}/{}", bundle_dir(dataset_id, request_id), kind.file_name())
}

pub fn srs_path(srs_id: &str) -> String {
    format!("{SRS_DIR}/{srs_id}.srs")
}

pub fn notebook_path(request_id: &Uuid) -> String {
    format!("{request_id}.ipynb")
}

pub fn verifier_notebook_path(request_id: &Uuid) -> String {
    format!("{request_id}.verifier.ipynb")
}

/// Splits an object path into its parent prefix and file name.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// Object paths are relative, `/`-separated and free of empty or dot segments.
pub fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

pub fn is_valid_srs_id(srs_id: &str) -> bool {
    !srs_id.is_empty()
        && srs_id.len() <= MAX_SRS_ID_LEN
        && srs_id != "."
        && srs_id != ".."
        && srs_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_storage_layout() {
        let dataset = Uuid::nil();
        let request = Uuid::from_u128(1);
        assert_eq!(
            commitment_path(&dataset),
            "00000000-0000-0000-0000-000000000000/data_commitment.json"
        );
        assert_eq!(
            bundle_asset_path(&dataset, &request, AssetKind::Proof),
            "00000000-0000-0000-0000-000000000000/00000000-0000-0000-0000-000000000001/model.pf"
        );
        assert_eq!(srs_path("kzg-12"), "srs/kzg-12.srs");
        assert_eq!(
            notebook_path(&request),
            "00000000-0000-0000-0000-000000000001.ipynb"
        );
    }

    #[test]
    fn split_and_validate() {
        assert_eq!(split_path("a/b/c.json"), ("a/b", "c.json"));
        assert_eq!(split_path("c.json"), ("", "c.json"));
        assert!(is_valid_path("a/b.json"));
        assert!(!is_valid_path("a//b"));
        assert!(!is_valid_path("../b"));
        assert!(!is_valid_path(""));
        assert!(is_valid_srs_id("kzg_12.v1"));
        assert!(!is_valid_srs_id("../x"));
        assert!(!is_valid_srs_id(""));
    }

    #[test]
    fn asset_kind_parses_names_and_file_names() {
        assert_eq!("proof".parse::<AssetKind>().unwrap(), AssetKind::Proof);
        assert_eq!(
            "precal_witness.json".parse::<AssetKind>().unwrap(),
            AssetKind::PrecalWitness
        );
        assert!("model.vk".parse::<AssetKind>().is_err());
    }
}
