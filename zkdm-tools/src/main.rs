// zkdm/zkdm-tools/src/main.rs

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zkdm_circuit::estimate_k;
use zkdm_commitment::{commit_dataset, parse_dataset, DatasetFormat, ParsedDataset};
use zkdm_common::{
    assets::DATA_COMMITMENT_FILE, computation_digest, ensure_ready, sanitize_computation,
    serialize_params, supported_scales, AgreedComputation, AssetKind, CircuitSettings,
    ComputationKind, DataCommitment, ProofFile,
};
use zkdm_prover::{generate_srs, generate_srs_seeded, prove_computation, ComputationRequest};
use zkdm_verifier::{
    check_agreed_function, match_commitment, proven_output, verify, KeyDerivationRequest,
    LocalKeyResolver, RemoteKeyResolver, StaticSrs, VerificationKeyResolver,
};

const VK_FILENAME: &str = "model.vk";
const DEFAULT_BUNDLE_DIR: &str = "bundle";
const DEFAULT_VK_SERVICE_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(
    name = "zkdm-tools",
    about = "Owner and consumer commands for zero-knowledge data computations"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commit to every column of a dataset at every supported scale.
    Commit(CommitArgs),
    /// Generate a KZG reference string.
    GenSrs(GenSrsArgs),
    /// Run a computation over a local dataset and write the proof bundle.
    Prove(ProveArgs),
    /// Check a proof bundle against a commitment and the agreed code.
    Verify(VerifyArgs),
    /// Print the normalised computation text and its digest.
    Sanitize(SanitizeArgs),
}

#[derive(Args)]
struct DatasetArgs {
    /// CSV file with a header row, or a JSON object of column arrays.
    #[arg(long)]
    dataset: PathBuf,
    /// Overrides detection from the file extension.
    #[arg(long)]
    format: Option<DatasetFormat>,
}

impl DatasetArgs {
    fn load(&self) -> Result<ParsedDataset> {
        let bytes = read_file(&self.dataset)?;
        let name = self.dataset.file_name().and_then(|name| name.to_str());
        let format = self
            .format
            .unwrap_or_else(|| DatasetFormat::detect(name, &bytes));
        parse_dataset(&bytes, format)
            .with_context(|| format!("failed to parse {}", self.dataset.display()))
    }
}

#[derive(Args)]
struct CommitArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    /// Where to write the commitment; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct GenSrsArgs {
    /// log2 of the largest circuit the reference string supports.
    #[arg(long)]
    k: Option<u32>,
    /// Size the reference string for a dataset of this many rows.
    #[arg(long, conflicts_with = "k")]
    rows: Option<usize>,
    #[arg(long, requires = "rows")]
    columns: Option<usize>,
    /// Deterministic seed. Only for tests and demos.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct ProveArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    /// The request's code, unchanged.
    #[arg(long)]
    code_file: PathBuf,
    /// sum, sum-of-squares or dot-product.
    #[arg(long)]
    kind: ComputationKind,
    #[arg(long = "operand", required = true)]
    operands: Vec<String>,
    /// Columns bound into the proof; every dataset column when omitted.
    #[arg(long = "column")]
    columns: Vec<String>,
    #[arg(long)]
    srs: PathBuf,
    #[arg(long)]
    srs_id: String,
    #[arg(long, default_value_t = 7)]
    scale: u32,
    #[arg(long, default_value = DEFAULT_BUNDLE_DIR)]
    out: PathBuf,
}

#[derive(Args)]
struct VerifyArgs {
    /// Directory holding model.pf, precal_witness.json and settings.json.
    #[arg(long, default_value = DEFAULT_BUNDLE_DIR)]
    bundle: PathBuf,
    #[arg(long)]
    code_file: PathBuf,
    /// Computation the request agreed to; the bundle must prove exactly this.
    #[arg(long)]
    kind: ComputationKind,
    #[arg(long = "operand", required = true)]
    operands: Vec<String>,
    #[arg(long)]
    srs: PathBuf,
    /// Published dataset commitment; the binding check is skipped without it.
    #[arg(long)]
    commitment: Option<PathBuf>,
    /// Verifying key file; derived from the inputs when omitted.
    #[arg(long)]
    vk: Option<PathBuf>,
    /// Key derivation service to ask instead of deriving locally.
    #[arg(long, conflicts_with = "vk")]
    vk_service: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SanitizeArgs {
    #[arg(long)]
    code_file: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,zkdm_tools=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Commit(args) => commit(args),
        Commands::GenSrs(args) => gen_srs(args),
        Commands::Prove(args) => prove(args),
        Commands::Verify(args) => run_verify(args),
        Commands::Sanitize(args) => sanitize(args),
    }
}

fn commit(args: CommitArgs) -> Result<()> {
    ensure_ready().context("proof engine self-test failed")?;
    let dataset = args.dataset.load()?;
    let commitment = commit_dataset(&dataset, &supported_scales())?;
    let bytes = commitment.to_json_bytes()?;

    match args.out {
        Some(path) => {
            write_file(&path, &bytes)?;
            eprintln!(
                "Committed {} column(s) at {} scale(s) to {}",
                dataset.columns().len(),
                supported_scales().len(),
                path.display()
            );
        }
        None => println!("{}", String::from_utf8_lossy(&bytes)),
    }
    Ok(())
}

fn gen_srs(args: GenSrsArgs) -> Result<()> {
    let k = match (args.k, args.rows) {
        (Some(k), _) => k,
        (None, Some(rows)) => {
            let columns = args.columns.unwrap_or(1);
            estimate_k(zkdm_common::DataShape::new(rows, columns))?
        }
        (None, None) => bail!("pass --k or --rows"),
    };
    println!("Generating reference string (k={k})...");
    let params = match args.seed {
        Some(seed) => generate_srs_seeded(k, seed),
        None => generate_srs(k),
    };
    let bytes = serialize_params(&params)?;
    write_file(&args.out, &bytes)?;
    println!("Wrote {} bytes to {}", bytes.len(), args.out.display());
    Ok(())
}

fn prove(args: ProveArgs) -> Result<()> {
    let dataset = args.dataset.load()?;
    let code = read_text(&args.code_file)?;
    let srs = zkdm_common::deserialize_params(&read_file(&args.srs)?)
        .with_context(|| format!("failed to load {}", args.srs.display()))?;

    let request = ComputationRequest {
        code,
        kind: args.kind,
        operands: args.operands,
        scale: args.scale,
        input_columns: (!args.columns.is_empty()).then_some(args.columns),
    };
    let bundle = prove_computation(&srs, &args.srs_id, &dataset, &request)?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    for kind in AssetKind::ALL {
        write_file(&args.out.join(kind.file_name()), &bundle.file_bytes(kind)?)?;
    }
    write_file(&args.out.join(VK_FILENAME), &bundle.vk)?;

    println!(
        "Proved {} over {} at scale {}: output {}",
        request.kind,
        bundle.settings.shape(),
        request.scale,
        bundle.output
    );
    println!("Bundle written to {}", args.out.display());
    Ok(())
}

#[derive(Serialize)]
struct VerifySummary {
    /// Agreed computation, already checked against the settings.
    computation: String,
    proof_valid: bool,
    /// `None` when no commitment was supplied.
    commitment_matched: Option<bool>,
    mismatch: Option<String>,
    srs_id: String,
    scale: u32,
    proven_output: Option<f64>,
}

impl VerifySummary {
    fn verified(&self) -> bool {
        self.proof_valid && self.commitment_matched != Some(false)
    }
}

impl fmt::Display for VerifySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "computation: {}", self.computation)?;
        writeln!(f, "proof valid: {}", self.proof_valid)?;
        match self.commitment_matched {
            Some(matched) => writeln!(f, "commitment matched: {matched}")?,
            None => writeln!(f, "commitment matched: not checked")?,
        }
        if let Some(mismatch) = &self.mismatch {
            writeln!(f, "mismatch: {mismatch}")?;
        }
        writeln!(f, "srs_id: {}", self.srs_id)?;
        writeln!(f, "scale: {}", self.scale)?;
        match self.proven_output {
            Some(output) => writeln!(f, "proven output: {output}"),
            None => writeln!(f, "proven output: out of range"),
        }
    }
}

struct BundleFiles {
    proof: Vec<u8>,
    precal_witness: Vec<u8>,
    settings: Vec<u8>,
}

fn read_bundle(dir: &Path) -> Result<BundleFiles> {
    let missing: Vec<_> = AssetKind::ALL
        .into_iter()
        .filter(|kind| !dir.join(kind.file_name()).is_file())
        .map(AssetKind::file_name)
        .collect();
    if !missing.is_empty() {
        bail!(
            "bundle {} is incomplete, missing: {}",
            dir.display(),
            missing.join(", ")
        );
    }
    Ok(BundleFiles {
        proof: read_file(&dir.join(AssetKind::Proof.file_name()))?,
        precal_witness: read_file(&dir.join(AssetKind::PrecalWitness.file_name()))?,
        settings: read_file(&dir.join(AssetKind::Settings.file_name()))?,
    })
}

fn run_verify(args: VerifyArgs) -> Result<()> {
    let bundle = read_bundle(&args.bundle)?;
    let code = read_text(&args.code_file)?;
    let srs = read_file(&args.srs)?;
    let settings = CircuitSettings::from_bytes(&bundle.settings)?;
    let agreed = AgreedComputation::new(args.kind, args.operands.clone());
    agreed.validate().map_err(anyhow::Error::msg)?;
    check_agreed_function(&settings, &agreed)?;

    let vk = match &args.vk {
        Some(path) => read_file(path)?,
        None => {
            let resolver: Box<dyn VerificationKeyResolver> = match &args.vk_service {
                Some(url) => Box::new(RemoteKeyResolver::new(
                    url.clone(),
                    Duration::from_secs(DEFAULT_VK_SERVICE_TIMEOUT_SECS),
                )?),
                None => Box::new(LocalKeyResolver::new(
                    StaticSrs::new().with_bytes(settings.srs_id.clone(), srs.clone()),
                )),
            };
            let request = KeyDerivationRequest {
                shape: settings.shape(),
                computation: code,
                agreed: agreed.clone(),
                precal_witness: bundle.precal_witness.clone(),
                settings: bundle.settings.clone(),
            };
            tokio::runtime::Runtime::new()
                .context("failed to start runtime")?
                .block_on(resolver.resolve(&request))?
        }
    };

    let proof_valid = verify(&bundle.proof, &bundle.settings, &vk, &srs)?;
    let instances = ProofFile::from_bytes(&bundle.proof)?.instances_fr()?;

    let (commitment_matched, mismatch) = match &args.commitment {
        Some(path) => {
            let commitment = DataCommitment::from_json_bytes(&read_file(path)?)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            match match_commitment(&settings, &instances, &commitment) {
                Ok(()) => (Some(true), None),
                Err(err) => (Some(false), Some(err.to_string())),
            }
        }
        None => {
            tracing::warn!(
                "no {DATA_COMMITMENT_FILE} supplied; the proof is not checked against the dataset"
            );
            (None, None)
        }
    };

    let summary = VerifySummary {
        computation: agreed.to_string(),
        proof_valid,
        commitment_matched,
        mismatch,
        srs_id: settings.srs_id.clone(),
        scale: settings.run_args.input_scale,
        proven_output: proven_output(&settings, &instances),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{summary}");
    }
    if !summary.verified() {
        bail!("verification failed");
    }
    Ok(())
}

fn sanitize(args: SanitizeArgs) -> Result<()> {
    let code = read_text(&args.code_file)?;
    println!("{}", sanitize_computation(&code));
    eprintln!("digest: {}", computation_digest(&code));
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn prove_accepts_notebook_arguments() {
        let cli = Cli::try_parse_from([
            "zkdm-tools",
            "prove",
            "--dataset",
            "dataset.csv",
            "--code-file",
            "computation.py",
            "--kind",
            "sum-of-squares",
            "--operand",
            "x",
            "--srs",
            "kzg.srs",
            "--srs-id",
            "kzg",
            "--scale",
            "7",
            "--out",
            "bundle",
        ])
        .unwrap();
        match cli.command {
            Commands::Prove(args) => {
                assert_eq!(args.kind, ComputationKind::SumOfSquares);
                assert_eq!(args.operands, ["x"]);
                assert!(args.columns.is_empty());
                assert_eq!(args.scale, 7);
            }
            _ => panic!("expected prove"),
        }
    }

    #[test]
    fn prove_requires_an_operand() {
        assert!(Cli::try_parse_from([
            "zkdm-tools",
            "prove",
            "--dataset",
            "d.csv",
            "--code-file",
            "c.py",
            "--kind",
            "sum",
            "--srs",
            "s",
            "--srs-id",
            "s",
        ])
        .is_err());
    }

    #[test]
    fn verify_requires_the_agreed_computation() {
        let base = [
            "zkdm-tools",
            "verify",
            "--code-file",
            "computation.py",
            "--srs",
            "kzg.srs",
        ];
        assert!(Cli::try_parse_from(base).is_err());

        let cli = Cli::try_parse_from(
            base.into_iter()
                .chain(["--kind", "dot-product", "--operand", "x", "--operand", "y"]),
        )
        .unwrap();
        match cli.command {
            Commands::Verify(args) => {
                assert_eq!(args.kind, ComputationKind::DotProduct);
                assert_eq!(args.operands, ["x", "y"]);
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn incomplete_bundle_names_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.pf"), b"{}").unwrap();
        let err = read_bundle(dir.path()).err().unwrap().to_string();
        assert!(err.contains("precal_witness.json"));
        assert!(err.contains("settings.json"));
        assert!(!err.contains("model.pf"));
    }

    #[test]
    fn summary_without_commitment_follows_the_proof() {
        let mut summary = VerifySummary {
            computation: "sum(x)".into(),
            proof_valid: true,
            commitment_matched: None,
            mismatch: None,
            srs_id: "kzg".into(),
            scale: 7,
            proven_output: Some(6.0),
        };
        assert!(summary.verified());
        summary.commitment_matched = Some(false);
        assert!(!summary.verified());
        assert!(summary.to_string().contains("commitment matched: false"));
    }
}
