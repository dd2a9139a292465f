//! Two coupled states, one disturbed through a single injection column.

use approx::assert_relative_eq;
use chance_core::prelude::*;
use chance_gp::GaussianProcess;
use chance_mpc::{ChanceBounds, Smpc, SolveRequest, margin_coefficient};
use chance_test_utils::{mimo_injection, mimo_plant, reference_gp};
use nalgebra::DMatrix;

fn gp_controller() -> Smpc<EulerPlant, GaussianProcess> {
    let plant = mimo_plant();
    let gp = reference_gp(plant.state_names()).unwrap();
    Smpc::new(plant, gp, mimo_injection()).unwrap()
}

fn add_tracking<D: DisturbanceModel>(smpc: &mut Smpc<EulerPlant, D>) {
    smpc.set_horizon(10).unwrap();
    smpc.stage_cost_mut()
        .unwrap()
        .add_states(["mu_px", "mu_py"], [1.0, 1.0], [10.0, 10.0])
        .unwrap();
    smpc.terminal_cost_mut()
        .unwrap()
        .add_states(["mu_px", "mu_py"], [1.0, 1.0], [10.0, 10.0])
        .unwrap();
}

fn request() -> SolveRequest {
    SolveRequest::at(&[15.0, 10.0])
        .cov_x0(DMatrix::zeros(2, 2))
        .k_gain(DMatrix::zeros(2, 2))
}

#[test]
fn simple_mimo_reaches_reference_within_bounds() {
    let mut smpc = gp_controller();
    add_tracking(&mut smpc);
    smpc.set_box_chance_constraints(&ChanceBounds::new().lower([0.0, 0.0], [1.0, 1.0]))
        .unwrap();
    smpc.setup(SetupOptions::with_mode(TighteningMode::Prs))
        .unwrap();
    let rec = smpc.optimize(&request()).unwrap();

    assert_eq!(rec.status, SolveStatus::Solved);
    for k in 1..=10 {
        assert!(rec.means[k][0] >= -1e-6);
        assert!(rec.means[k][1] >= -1e-6);
        assert_relative_eq!(rec.means[k][0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(rec.means[k][1], 1.0, epsilon = 1e-4);
    }
}

#[test]
fn coupling_spreads_uncertainty_to_undisturbed_state() {
    let mut smpc = gp_controller();
    add_tracking(&mut smpc);
    smpc.set_box_chance_constraints(&ChanceBounds::new().lower([0.0, 0.0], [1.0, 1.0]))
        .unwrap();
    smpc.setup(SetupOptions::default()).unwrap();
    let rec = smpc.optimize(&request()).unwrap();

    // Only px is disturbed, so py picks up variance one step later.
    assert!(rec.covariances[1][(0, 0)] > 0.0);
    assert_relative_eq!(rec.covariances[1][(1, 1)], 0.0, epsilon = 1e-12);
    assert!(rec.covariances[2][(0, 1)] > 0.0);
    assert!(rec.covariances[2][(1, 1)] > 0.0);
    for sigma in &rec.covariances {
        assert_relative_eq!(sigma, &sigma.transpose(), epsilon = 1e-12);
        assert!(sigma.clone().symmetric_eigen().eigenvalues.min() >= -1e-9);
    }
}

#[test]
fn per_state_probabilities_tighten_independently() {
    let noise = ConstantDisturbance::zero_mean(&[0.1]);
    let mut smpc = Smpc::new(mimo_plant(), noise, mimo_injection()).unwrap();
    add_tracking(&mut smpc);
    smpc.set_box_chance_constraints(&ChanceBounds::new().lower([0.0, 0.0], [0.9, 0.95]))
        .unwrap();
    smpc.setup(SetupOptions::with_mode(TighteningMode::Gaussian))
        .unwrap();
    let rec = smpc.optimize(&request()).unwrap();

    assert!(rec.status.is_success());
    let kx = margin_coefficient(TighteningMode::Gaussian, 0.9, 2).unwrap();
    let ky = margin_coefficient(TighteningMode::Gaussian, 0.95, 2).unwrap();
    for k in 1..=10 {
        let sigma = &rec.covariances[k];
        assert_relative_eq!(
            rec.lower_bounds[k][0],
            kx * sigma[(0, 0)].sqrt(),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            rec.lower_bounds[k][1],
            ky * sigma[(1, 1)].sqrt(),
            epsilon = 1e-9
        );
        assert!(rec.means[k][0] >= rec.lower_bounds[k][0] - 1e-5);
        assert!(rec.means[k][1] >= rec.lower_bounds[k][1] - 1e-5);
    }
    // py is undisturbed at the first step.
    assert_relative_eq!(rec.lower_bounds[1][1], 0.0);
    assert!(rec.lower_bounds[3][1] > 0.0);
}

#[test]
fn mimo_solves_are_repeatable() {
    let mut smpc = gp_controller();
    add_tracking(&mut smpc);
    smpc.set_box_chance_constraints(&ChanceBounds::new().lower([0.0, 0.0], [1.0, 1.0]))
        .unwrap();
    smpc.setup(SetupOptions::default()).unwrap();
    let first = smpc.optimize(&request()).unwrap().clone();
    let second = smpc.optimize(&request()).unwrap();
    for (a, b) in first.inputs.iter().zip(&second.inputs) {
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }
    for (a, b) in first.covariances.iter().zip(&second.covariances) {
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }
}

#[test]
fn wrong_gain_shape_is_rejected() {
    let mut smpc = gp_controller();
    add_tracking(&mut smpc);
    smpc.set_box_chance_constraints(&ChanceBounds::new().lower([0.0, 0.0], [0.9, 0.9]))
        .unwrap();
    smpc.setup(SetupOptions::default()).unwrap();
    let err = smpc
        .optimize(
            &SolveRequest::at(&[15.0, 10.0])
                .cov_x0(DMatrix::zeros(2, 2))
                .k_gain(DMatrix::zeros(1, 2)),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SmpcError::Value(ValueError::DimensionMismatch { .. })
    ));
}
