//! Reference plants and disturbance model.
//!
//! Both plants are explicit-Euler discretizations with `dt = 1`:
//!
//! ```text
//! scalar: ṗx = a
//! MIMO:   ṗx = ax,  ṗy = ay + px
//! ```
//!
//! The disturbance acts on `px` only and is a GP on `px` conditioned on six
//! samples of the arcsine curve (including a contradictory repeat at 0).

use std::f64::consts::PI;

use chance_core::plant::EulerPlant;
use chance_gp::{GaussianProcess, GpError, SquaredExponential, TrainingData};
use nalgebra::{DMatrix, DVector};

pub fn scalar_plant() -> EulerPlant {
    EulerPlant::new(&["px"], &["a"], 1.0, |_x, u| DVector::from_element(1, u[0])).with_jacobian(
        |_x, _u| (DMatrix::zeros(1, 1), DMatrix::identity(1, 1)),
    )
}

pub fn mimo_plant() -> EulerPlant {
    EulerPlant::new(&["px", "py"], &["ax", "ay"], 1.0, |x, u| {
        DVector::from_vec(vec![u[0], u[1] + x[0]])
    })
}

/// `G` for the scalar plant.
pub fn scalar_injection() -> DMatrix<f64> {
    DMatrix::identity(1, 1)
}

/// `G` for the MIMO plant: the disturbance enters `px` only.
pub fn mimo_injection() -> DMatrix<f64> {
    DMatrix::from_column_slice(2, 1, &[1.0, 0.0])
}

pub fn reference_training_data() -> TrainingData {
    TrainingData {
        inputs: DMatrix::from_row_slice(
            1,
            6,
            &[0.0, 0.5, 1.0 / 2.0_f64.sqrt(), 3.0_f64.sqrt() / 2.0, 1.0, 0.0],
        ),
        targets: DMatrix::from_row_slice(1, 6, &[0.0, PI / 6.0, PI / 4.0, PI / 3.0, PI / 2.0, PI]),
    }
}

/// Hyperparameters for the reference GP. The noise level absorbs the
/// repeated input at 0.
pub fn reference_kernel() -> SquaredExponential {
    SquaredExponential::isotropic(1, 0.5, 1.0, 0.01)
}

/// GP on `px` for a plant with the given state names.
pub fn reference_gp(state_names: &[String]) -> Result<GaussianProcess, GpError> {
    GaussianProcess::fit_named(
        reference_training_data(),
        reference_kernel(),
        &["px"],
        state_names,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chance_core::traits::{DisturbanceModel, PlantModel};

    #[test]
    fn mimo_plant_couples_states() {
        let plant = mimo_plant();
        let x = DVector::from_vec(vec![2.0, 1.0]);
        let u = DVector::from_vec(vec![0.5, -1.0]);
        let next = plant.transition(&x, &u);
        assert!((next[0] - 2.5).abs() < 1e-12);
        assert!((next[1] - 2.0).abs() < 1e-12);
        let (a, _) = plant.jacobians(&x, &u);
        assert!((a[(1, 0)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reference_gp_fits_both_plants() {
        let scalar = reference_gp(scalar_plant().state_names()).unwrap();
        let mimo = reference_gp(mimo_plant().state_names()).unwrap();
        let (_, v) = scalar.predict(&DVector::from_element(1, 15.0));
        assert!((v[0] - 1.01).abs() < 1e-9);
        let (_, v) = mimo.predict(&DVector::from_vec(vec![15.0, 10.0]));
        assert!(v[0] > 1.0);
    }
}
