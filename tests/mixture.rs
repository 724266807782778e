use nalgebra::*;
use std::f64::consts::PI;
use expfam::model::*;
use expfam::error::Error;

const EPS : f64 = 1E-6;

fn diag_model(mean : &[f64], precision : &[f64], count : f64) -> NormalDiagonalCovariance {
    NormalDiagonalCovariance::create(
        &DVector::from_column_slice(mean),
        &DVector::from_column_slice(precision),
        count,
        false
    ).unwrap()
}

fn two_component_mixture() -> Mixture<NormalDiagonalCovariance> {
    let left = diag_model(&[-2.0, 0.0], &[1.0, 1.0], 1.0);
    let right = diag_model(&[2.0, 1.0], &[1.0, 1.0], 1.0);
    Mixture::new(&DVector::from_element(2, 1.0), vec![left, right]).unwrap()
}

#[test]
fn diagonal_model_round_trip() {
    let model = diag_model(&[-1.5, 1.5], &[2.0, 0.5], 2.5);
    let mean = model.mean();
    let precision = model.precision();
    assert!((mean[0] + 1.5).abs() < EPS && (mean[1] - 1.5).abs() < EPS);
    assert!((precision[0] - 2.0).abs() < EPS && (precision[1] - 0.5).abs() < EPS);
    assert!((model.count() - 2.5).abs() < EPS);
    let cov = model.cov();
    assert!((cov[(0, 0)] - 0.5).abs() < EPS && (cov[(1, 1)] - 2.0).abs() < EPS);
    assert!(cov[(0, 1)].abs() < EPS);
}

#[test]
fn random_init_perturbs_only_the_posterior_mean() {
    let mean = DVector::from_element(4, 1.0);
    let precision = DVector::from_element(4, 2.0);
    let model = NormalDiagonalCovariance::create(&mean, &precision, 2.5, true).unwrap();
    assert!((model.mean() - &mean).amax() > 0.0);
    let prec = model.precision();
    for i in 0..4 {
        assert!((prec[i] - 2.0).abs() < EPS);
    }
    assert!((model.count() - 2.5).abs() < EPS);
}

#[test]
fn diagonal_sufficient_statistics_layout() {
    let model = diag_model(&[0.0, 0.0], &[1.0, 1.0], 1.0);
    let y = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    let t = model.sufficient_statistics(y.slice((0, 0), y.shape())).unwrap();
    assert_eq!(t.shape(), (2, 8));
    // Row layout: [x^2, x, 1, 1] over the two dimensions.
    let expected = [1.0, 4.0, 1.0, 2.0, 1.0, 1.0, 1.0, 1.0];
    for (j, e) in expected.iter().enumerate() {
        assert!((t[(0, j)] - e).abs() < EPS);
    }
    assert!((t[(1, 0)] - 9.0).abs() < EPS && (t[(1, 1)] - 16.0).abs() < EPS);
}

#[test]
fn model_exp_llh_matches_inner_product() {
    let model = diag_model(&[1.0, 1.0], &[2.0, 2.0], 2.5);
    let y = DMatrix::from_element(20, 2, 1.0);
    let t = model.sufficient_statistics(y.slice((0, 0), y.shape())).unwrap();
    let nparams = model.posterior().expected_sufficient_statistics();
    let (llh, acc) = model.exp_llh_with_stats(y.slice((0, 0), y.shape())).unwrap();
    for i in 0..20 {
        let manual = t.row(i).transpose().dot(nparams) - 0.5 * 2.0 * (2.0 * PI).ln();
        assert!((llh[i] - manual).abs() < EPS);
    }
    let sums = t.row_sum().transpose();
    assert!((acc - sums).amax() < EPS);
}

#[test]
fn full_covariance_round_trip() {
    let mean = DVector::from_column_slice(&[-1.5, 1.5]);
    let scale = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.0]);
    let model = NormalFullCovariance::create(&mean, &scale, 2.5, false).unwrap();
    assert!((model.mean() - &mean).amax() < EPS);
    assert!((model.scatter() - &scale).amax() < EPS);
    assert!((model.count() - 2.5).abs() < EPS);
}

#[test]
fn full_covariance_statistics_layout() {
    let model = NormalFullCovariance::create(
        &DVector::zeros(2),
        &DMatrix::identity(2, 2),
        1.0,
        false
    ).unwrap();
    let y = DMatrix::from_row_slice(1, 2, &[2.0, 3.0]);
    let t = model.sufficient_statistics(y.slice((0, 0), y.shape())).unwrap();
    assert_eq!(t.shape(), (1, 8));
    let expected = [4.0, 6.0, 6.0, 9.0, 2.0, 3.0, 1.0, 1.0];
    for (j, e) in expected.iter().enumerate() {
        assert!((t[(0, j)] - e).abs() < EPS);
    }
}

#[test]
fn responsibilities_sum_to_one() {
    let mixture = two_component_mixture();
    let y = DMatrix::from_row_slice(5, 2, &[
        -2.1, 0.2,
        2.2, 0.9,
        0.0, 0.0,
        -1.8, -0.3,
        2.5, 1.4
    ]);
    let resps = mixture.responsibilities(y.slice((0, 0), y.shape())).unwrap();
    assert_eq!(resps.shape(), (5, 2));
    for i in 0..5 {
        assert!((resps.row(i).sum() - 1.0).abs() < 1E-9);
        for j in 0..2 {
            assert!(resps[(i, j)] >= 0.0);
        }
    }
}

#[test]
fn observations_near_a_component_are_assigned_to_it() {
    let mixture = two_component_mixture();
    let y = DMatrix::from_row_slice(2, 2, &[-2.0, 0.0, 2.0, 1.0]);
    let resps = mixture.responsibilities(y.slice((0, 0), y.shape())).unwrap();
    assert!(resps[(0, 0)] > 0.9);
    assert!(resps[(1, 1)] > 0.9);
}

#[test]
fn observation_width_is_checked() {
    let mixture = two_component_mixture();
    let y = DMatrix::from_element(4, 3, 0.0);
    match mixture.exp_llh(y.slice((0, 0), y.shape())) {
        Err(Error::ShapeMismatch { .. }) => { },
        other => panic!("expected shape mismatch, got {:?}", other.map(|_| ()))
    }
}

#[test]
fn mixture_rejects_inconsistent_prior_counts() {
    let left = diag_model(&[0.0], &[1.0], 1.0);
    let right = diag_model(&[1.0], &[1.0], 1.0);
    match Mixture::new(&DVector::from_element(3, 1.0), vec![left, right]) {
        Err(Error::ShapeMismatch { .. }) => { },
        other => panic!("expected shape mismatch, got {:?}", other.map(|_| ()))
    }
}

#[test]
fn full_batch_update_with_unit_lrate_reaches_the_conjugate_posterior() {
    let mut mixture = two_component_mixture();
    let y = DMatrix::from_row_slice(4, 2, &[
        -2.0, 0.1,
        -1.9, 0.0,
        -2.1, -0.1,
        2.0, 1.0
    ]);
    let prior_eta = mixture.prior_weights().natural_params().clone();
    let comp_prior_eta = mixture.components()[0].prior().natural_params().clone();
    let (_, acc) = mixture.exp_llh_with_stats(y.slice((0, 0), y.shape())).unwrap();

    // With scale = 1 and lrate = 1 the step lands exactly on
    // eta_prior + accumulated statistics.
    mixture.natural_grad_update(&acc, 1.0, 1.0).unwrap();
    let expected_weights_eta = &prior_eta + &acc.weight_stats;
    assert!((mixture.posterior_weights().natural_params() - expected_weights_eta).amax() < EPS);
    let expected_comp_eta = &comp_prior_eta + acc.comp_stats.row(0).transpose();
    assert!((mixture.components()[0].posterior().natural_params() - expected_comp_eta).amax() < EPS);

    // Three of four observations sit on the first component.
    let weights = mixture.weights();
    assert!(weights[0] > weights[1]);

    // The cached parameter matrix must reflect the new posteriors: scoring
    // again has to agree with a freshly built mixture in the same state.
    let rebuilt = Mixture::new(
        &DVector::from_element(2, 1.0),
        mixture.components().to_vec()
    ).unwrap();
    let resps_updated = mixture.responsibilities(y.slice((0, 0), y.shape())).unwrap();
    let resps_stale_check = rebuilt.responsibilities(y.slice((0, 0), y.shape())).unwrap();
    // Weight posteriors differ between the two, but the component part of
    // the score matrix must match; compare through the component posteriors.
    assert!((mixture.components()[0].posterior().expected_sufficient_statistics()
        - rebuilt.components()[0].posterior().expected_sufficient_statistics()).amax() < EPS);
    assert_eq!(resps_updated.shape(), resps_stale_check.shape());
}

#[test]
fn single_model_update_with_unit_lrate_adds_the_statistics() {
    let mut model = diag_model(&[0.0], &[1.0], 1.0);
    let y = DMatrix::from_row_slice(3, 1, &[0.5, -0.5, 1.0]);
    let (_, acc) = model.exp_llh_with_stats(y.slice((0, 0), y.shape())).unwrap();
    let expected = model.prior().natural_params() + &acc;
    model.natural_grad_update(acc.rows(0, acc.nrows()), 1.0, 1.0).unwrap();
    assert!((model.posterior().natural_params() - expected).amax() < EPS);
}

#[test]
fn failed_update_leaves_every_posterior_untouched() {
    let mut mixture = two_component_mixture();
    // The first row is a benign step; the second drives the component's
    // pseudo-count far negative, outside the natural domain.
    let mut comp_stats = DMatrix::zeros(2, 8);
    for j in 0..8 {
        comp_stats[(0, j)] = 1.0;
        comp_stats[(1, j)] = -1E6;
    }
    let acc = AccStats {
        comp_stats,
        weight_stats : DVector::from_element(2, 1.0)
    };
    let comp_eta_before = mixture.components()[0].posterior().natural_params().clone();
    let weights_eta_before = mixture.posterior_weights().natural_params().clone();
    let y = DMatrix::from_row_slice(2, 2, &[-2.0, 0.0, 2.0, 1.0]);
    let resps_before = mixture.responsibilities(y.slice((0, 0), y.shape())).unwrap();

    assert!(mixture.natural_grad_update(&acc, 1.0, 1.0).is_err());

    // No posterior moved, and the cached parameter matrix still scores the
    // same responsibilities.
    assert_eq!(mixture.components()[0].posterior().natural_params(), &comp_eta_before);
    assert_eq!(mixture.posterior_weights().natural_params(), &weights_eta_before);
    let resps_after = mixture.responsibilities(y.slice((0, 0), y.shape())).unwrap();
    assert!((resps_after - resps_before).amax() < 1E-12);
}

#[test]
fn accumulated_mass_accounts_for_every_observation() {
    let mixture = two_component_mixture();
    let y = DMatrix::from_row_slice(4, 2, &[
        -2.0, 0.1,
        -1.9, 0.0,
        2.1, 1.1,
        2.0, 1.0
    ]);
    let (_, acc) = mixture.exp_llh_with_stats(y.slice((0, 0), y.shape())).unwrap();
    assert!((acc.weight_stats.sum() - 4.0).abs() < 1E-9);
    assert_eq!(acc.comp_stats.shape(), (2, 8));
}

#[test]
fn split_doubles_components_and_keeps_the_weight_simplex() {
    let mixture = two_component_mixture();
    let split = mixture.split().unwrap();
    assert_eq!(split.n_components(), 4);
    assert!((split.weights().sum() - 1.0).abs() < 1E-9);

    // Each duplicated natural parameter is half its parent's.
    let old_eta = mixture.posterior_weights().natural_params();
    let new_eta = split.posterior_weights().natural_params();
    for i in 0..2 {
        assert!((new_eta[2 * i] - 0.5 * old_eta[i]).abs() < EPS);
        assert!((new_eta[2 * i + 1] - 0.5 * old_eta[i]).abs() < EPS);
    }

    // Children are displaced symmetrically around the parent mean.
    let parent_mean = mixture.components()[0].mean();
    let left = split.components()[0].mean();
    let right = split.components()[1].mean();
    assert!((((&left + &right).unscale(2.0)) - parent_mean).amax() < EPS);
    assert!((left - right).amax() > 0.0);
}

#[test]
fn expected_natural_params_reuses_the_responsibility_machinery() {
    let mixture = two_component_mixture();
    let mean = DMatrix::from_row_slice(3, 2, &[
        -2.0, 0.0,
        2.0, 1.0,
        0.0, 0.5
    ]);
    let var = DMatrix::from_element(3, 2, 0.1);
    let (nparams, acc) = mixture.expected_natural_params(
        mean.slice((0, 0), mean.shape()),
        var.slice((0, 0), var.shape())
    ).unwrap();
    assert_eq!(nparams.shape(), (3, 8));
    assert!((acc.weight_stats.sum() - 3.0).abs() < 1E-9);

    // Each output row is a convex combination of the component rows, so it
    // must stay inside their coordinate-wise envelope.
    for j in 0..8 {
        let a = mixture.components()[0].posterior().expected_sufficient_statistics()[j];
        let b = mixture.components()[1].posterior().expected_sufficient_statistics()[j];
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        for i in 0..3 {
            assert!(nparams[(i, j)] >= lo - EPS && nparams[(i, j)] <= hi + EPS);
        }
    }
}

#[test]
fn kl_div_posterior_prior_starts_at_zero_and_grows_after_updates() {
    let mut mixture = two_component_mixture();
    assert!(mixture.kl_div_posterior_prior().unwrap().abs() < 1E-8);

    let y = DMatrix::from_row_slice(2, 2, &[-2.0, 0.0, 2.0, 1.0]);
    let (_, acc) = mixture.exp_llh_with_stats(y.slice((0, 0), y.shape())).unwrap();
    mixture.natural_grad_update(&acc, 1.0, 0.5).unwrap();
    assert!(mixture.kl_div_posterior_prior().unwrap() > 0.0);
}

#[test]
fn mixture_serde_round_trip() {
    let mixture = two_component_mixture();
    let mut buf : Vec<u8> = Vec::new();
    save(&mixture, &mut buf).unwrap();
    let restored : Mixture<NormalDiagonalCovariance> = load(&buf[..]).unwrap();

    let y = DMatrix::from_row_slice(2, 2, &[-2.0, 0.0, 2.0, 1.0]);
    let llh1 = mixture.exp_llh(y.slice((0, 0), y.shape())).unwrap();
    let llh2 = restored.exp_llh(y.slice((0, 0), y.shape())).unwrap();
    assert!((llh1 - llh2).amax() < 1E-12);
}

#[test]
fn mixture_file_round_trip() {
    let mixture = two_component_mixture();
    let path = std::env::temp_dir().join("expfam_mixture_round_trip.json");
    save_to_path(&mixture, &path).unwrap();
    let restored : Mixture<NormalDiagonalCovariance> = load_from_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let y = DMatrix::from_row_slice(2, 2, &[-2.0, 0.0, 2.0, 1.0]);
    let llh1 = mixture.exp_llh(y.slice((0, 0), y.shape())).unwrap();
    let llh2 = restored.exp_llh(y.slice((0, 0), y.shape())).unwrap();
    assert!((llh1 - llh2).amax() < 1E-12);
}
