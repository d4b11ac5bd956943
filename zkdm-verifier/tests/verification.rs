use halo2curves_axiom::bn256::Fr;
use zkdm_common::{fr_to_hex, AssetKind, CircuitSettings, DataCommitment, ProofFile};
use zkdm_test_fixtures::{bundle_bytes, fixtures, INPUT_SCALE};
use zkdm_verifier::{match_commitment, proven_output, verify, CommitmentMismatch};

#[test]
fn matching_bundle_verifies() {
    let fx = fixtures();
    let bundle = fx.sum_bundle();
    let (proof, settings, _) = bundle_bytes(bundle);
    assert!(verify(&proof, &settings, &bundle.vk, fx.srs_bytes()).unwrap());
}

#[test]
fn key_for_another_computation_rejects() {
    let fx = fixtures();
    let (proof, settings, _) = bundle_bytes(fx.sum_bundle());
    let other_vk = &fx.squares_bundle().vk;
    assert!(!verify(&proof, &settings, other_vk, fx.srs_bytes()).unwrap());
}

#[test]
fn tampered_output_rejects() {
    let fx = fixtures();
    let bundle = fx.sum_bundle();
    let mut file = bundle.proof.clone();
    let last = file.instances[0].len() - 1;
    file.instances[0][last] = fr_to_hex(&Fr::from(999u64));
    let settings = bundle.file_bytes(AssetKind::Settings).unwrap();
    assert!(!verify(&file.to_bytes().unwrap(), &settings, &bundle.vk, fx.srs_bytes()).unwrap());
}

#[test]
fn undecodable_inputs_are_engine_errors() {
    let fx = fixtures();
    let bundle = fx.sum_bundle();
    let (proof, settings, _) = bundle_bytes(bundle);

    let err = verify(b"not json", &settings, &bundle.vk, fx.srs_bytes()).unwrap_err();
    assert_eq!(err.input, "proof");
    let err = verify(&proof, b"{}", &bundle.vk, fx.srs_bytes()).unwrap_err();
    assert_eq!(err.input, "settings");
    let err = verify(&proof, &settings, &[1, 2, 3], fx.srs_bytes()).unwrap_err();
    assert_eq!(err.input, "verifying key");
    let err = verify(&proof, &settings, &bundle.vk, b"garbage").unwrap_err();
    assert_eq!(err.input, "reference string");
}

#[test]
fn instance_count_must_match_settings() {
    let fx = fixtures();
    let bundle = fx.sum_bundle();
    let mut file = bundle.proof.clone();
    file.instances[0].pop();
    let settings = bundle.file_bytes(AssetKind::Settings).unwrap();
    let err = verify(&file.to_bytes().unwrap(), &settings, &bundle.vk, fx.srs_bytes()).unwrap_err();
    assert_eq!(err.input, "proof instances");
}

#[test]
fn proof_binds_to_the_published_commitment() {
    let fx = fixtures();
    let bundle = fx.sum_bundle();
    let instances = bundle.proof.instances_fr().unwrap();

    assert_eq!(match_commitment(&bundle.settings, &instances, fx.commitment()), Ok(()));
    assert_eq!(
        match_commitment(&bundle.settings, &instances, fx.mutated_commitment()),
        Err(CommitmentMismatch::DigestMismatch {
            column: "x".into(),
            scale: INPUT_SCALE,
        })
    );
    assert_eq!(proven_output(&bundle.settings, &instances), Some(6.0));
}

#[test]
fn proof_over_mutated_data_does_not_match_original_commitment() {
    let fx = fixtures();
    let bundle = fx.mutated_sum_bundle();
    let instances = bundle.proof.instances_fr().unwrap();
    assert!(match_commitment(&bundle.settings, &instances, fx.commitment()).is_err());
    assert_eq!(match_commitment(&bundle.settings, &instances, fx.mutated_commitment()), Ok(()));
    assert_eq!(proven_output(&bundle.settings, &instances), Some(6.5));

    // The mutated proof still verifies cryptographically; only the commitment binding fails.
    let (proof, settings, _) = bundle_bytes(bundle);
    assert!(verify(&proof, &settings, &bundle.vk, fx.srs_bytes()).unwrap());
}

#[test]
fn scale_selects_the_committed_digest() {
    let fx = fixtures();
    let bundle = fx.sum_bundle();
    let instances = bundle.proof.instances_fr().unwrap();
    let mut settings: CircuitSettings = bundle.settings.clone();
    settings.run_args.input_scale = INPUT_SCALE + 1;
    assert!(matches!(
        match_commitment(&settings, &instances, fx.commitment()),
        Err(CommitmentMismatch::DigestMismatch { scale, .. }) if scale == INPUT_SCALE + 1
    ));

    let mut partial = DataCommitment::new();
    partial.insert(INPUT_SCALE, "y", fx.commitment().digest(INPUT_SCALE, "y").unwrap());
    assert_eq!(
        match_commitment(&bundle.settings, &instances, &partial),
        Err(CommitmentMismatch::MissingDigest {
            column: "x".into(),
            scale: INPUT_SCALE,
        })
    );
}

#[test]
fn proof_file_round_trips_through_bytes() {
    let bundle = fixtures().sum_bundle();
    let bytes = bundle.file_bytes(AssetKind::Proof).unwrap();
    assert_eq!(ProofFile::from_bytes(&bytes).unwrap(), bundle.proof);
}
