//! Sampled closed-loop realizations meet the declared probabilities.

use approx::assert_relative_eq;
use chance_core::prelude::*;
use chance_mpc::{ChanceBounds, ClosedLoop, Smpc, SolveRequest};
use chance_test_utils::{reference_gp, scalar_injection, scalar_plant, seeded_rng};
use nalgebra::{DMatrix, DVector};

const SAMPLES: usize = 4000;

/// Integrator pushed against `x ≥ 0` by a reference at -5.
fn pushed_integrator(mode: TighteningMode) -> Smpc<LinearPlant, ConstantDisturbance> {
    let plant = LinearPlant::new(DMatrix::identity(1, 1), DMatrix::identity(1, 1), 1.0)
        .with_names(&["x"], &["u"]);
    let noise = ConstantDisturbance::zero_mean(&[0.5]);
    let mut smpc = Smpc::new(plant, noise, DMatrix::identity(1, 1)).unwrap();
    smpc.set_horizon(6).unwrap();
    {
        let stage = smpc.stage_cost_mut().unwrap();
        stage.add_states("x", -5.0, 1.0).unwrap();
        stage.add_inputs("u", 0.0, 0.01).unwrap();
    }
    smpc.terminal_cost_mut()
        .unwrap()
        .add_states("x", -5.0, 1.0)
        .unwrap();
    smpc.set_box_chance_constraints(&ChanceBounds::new().lower(0.0, 0.9))
        .unwrap();
    smpc.setup(SetupOptions::with_mode(mode)).unwrap();
    smpc.optimize(
        &SolveRequest::at(&[3.0])
            .cov_x0(DMatrix::zeros(1, 1))
            .k_gain(DMatrix::from_element(1, 1, -0.5)),
    )
    .unwrap();
    smpc
}

#[test]
fn gaussian_tightening_is_satisfied_and_tight() {
    let smpc = pushed_integrator(TighteningMode::Gaussian);
    let report = smpc
        .empirical_satisfaction(SAMPLES, &mut seeded_rng(11))
        .unwrap();
    assert_eq!(report.samples, SAMPLES);
    assert!(report.all_satisfied(0.03), "rates: {:?}", report.rates);
    // Active bound on a linear-Gaussian loop: rates sit near p, not near 1.
    for k in 1..=6 {
        assert!(report.rates[0][k] < 0.95, "step {k}: {}", report.rates[0][k]);
    }
}

#[test]
fn chebyshev_is_more_conservative_than_gaussian() {
    let gaussian = pushed_integrator(TighteningMode::Gaussian)
        .empirical_satisfaction(SAMPLES, &mut seeded_rng(5))
        .unwrap();
    let chebyshev = pushed_integrator(TighteningMode::Chebyshev)
        .empirical_satisfaction(SAMPLES, &mut seeded_rng(5))
        .unwrap();
    assert!(chebyshev.all_satisfied(0.0));
    assert!(chebyshev.min_rate(0) > gaussian.min_rate(0));
}

#[test]
fn gaussian_below_one_half_relaxes_the_bound() {
    let plant = LinearPlant::new(DMatrix::identity(1, 1), DMatrix::identity(1, 1), 1.0)
        .with_names(&["x"], &["u"]);
    let noise = ConstantDisturbance::zero_mean(&[1.0]);
    let mut smpc = Smpc::new(plant, noise, DMatrix::identity(1, 1)).unwrap();
    smpc.set_horizon(4).unwrap();
    {
        let stage = smpc.stage_cost_mut().unwrap();
        stage.add_states("x", -5.0, 1.0).unwrap();
        stage.add_inputs("u", 0.0, 0.01).unwrap();
    }
    smpc.terminal_cost_mut()
        .unwrap()
        .add_states("x", -5.0, 1.0)
        .unwrap();
    smpc.set_box_chance_constraints(&ChanceBounds::new().lower(0.0, 0.3))
        .unwrap();
    smpc.setup(SetupOptions::with_mode(TighteningMode::Gaussian))
        .unwrap();
    let record = smpc
        .optimize(
            &SolveRequest::at(&[3.0])
                .cov_x0(DMatrix::zeros(1, 1))
                .k_gain(DMatrix::zeros(1, 1)),
        )
        .unwrap()
        .clone();

    // Σ_k = k, so the reported bound is Φ⁻¹(0.3)·√k and the mean sits on it.
    for k in 1..=4 {
        let bound = record.lower_bounds[k][0];
        assert_relative_eq!(bound, -0.524_400_5 * (k as f64).sqrt(), epsilon = 1e-4);
        assert_relative_eq!(record.means[k][0], bound, epsilon = 1e-5);
    }

    let report = smpc
        .empirical_satisfaction(SAMPLES, &mut seeded_rng(17))
        .unwrap();
    assert!(report.all_satisfied(0.03), "rates: {:?}", report.rates);
    for k in 1..=4 {
        assert!(report.rates[0][k] < 0.4, "step {k}: {}", report.rates[0][k]);
    }
}

#[test]
fn no_report_before_a_solution() {
    let plant = LinearPlant::new(DMatrix::identity(1, 1), DMatrix::identity(1, 1), 1.0);
    let smpc = Smpc::new(plant, ZeroDisturbance::new(1), DMatrix::identity(1, 1)).unwrap();
    assert!(smpc.empirical_satisfaction(10, &mut seeded_rng(0)).is_none());
}

#[test]
fn gp_closed_loop_respects_hard_bound() {
    let plant = scalar_plant();
    let gp = reference_gp(plant.state_names()).unwrap();
    let mut smpc = Smpc::new(plant, gp, scalar_injection()).unwrap();
    smpc.set_horizon(5).unwrap();
    smpc.stage_cost_mut()
        .unwrap()
        .add_states("mu_px", 1.0, 10.0)
        .unwrap();
    smpc.set_box_chance_constraints(&ChanceBounds::new().lower(10.0, 1.0))
        .unwrap();
    smpc.setup(SetupOptions::default()).unwrap();

    let mut rng = seeded_rng(21);
    let trajectory = ClosedLoop::new(&mut smpc)
        .with_covariance(DMatrix::zeros(1, 1))
        .with_gain(DMatrix::zeros(1, 1))
        .run(&DVector::from_element(1, 15.0), 6, &mut rng)
        .unwrap();

    assert_eq!(trajectory.len(), 6);
    // Each plan steers its one-step prediction onto the bound.
    for prediction in &trajectory.predictions {
        assert!(prediction[0] >= 10.0 - 1e-6);
    }
    assert!(trajectory.objectives.iter().all(|v| v.is_finite()));
}
