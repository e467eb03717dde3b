use ndarray::Array2;
use nvr_core::GridSpec;
use nvr_infer::estimator::{fit_parabola, integral_moments, reduce};
use nvr_infer::{EstimatorMethod, PosteriorGrid, PriorKind};
use proptest::prelude::*;

const ALL_METHODS: [EstimatorMethod; 5] = [
    EstimatorMethod::Integral,
    EstimatorMethod::Parabola,
    EstimatorMethod::Mixed,
    EstimatorMethod::BoundaryWide,
    EstimatorMethod::MapThenIntegralCov,
];

fn grid(n: usize) -> PosteriorGrid {
    let bounds = GridSpec {
        gamma_plus_min: 1e3,
        gamma_plus_max: 101e3,
        n_plus: n,
        gamma_minus_min: 1e3,
        gamma_minus_max: 101e3,
        n_minus: n,
    };
    PosteriorGrid::new(&bounds, PriorKind::Flat).unwrap()
}

/// Loads `L` with a correlated Gaussian centred at `(cx, cy)`.
fn load_gaussian(grid: &mut PosteriorGrid, cx: f64, cy: f64, sx: f64, sy: f64, rho: f64) {
    let xs = grid.plus_axis().values().to_vec();
    let ys = grid.minus_axis().values().to_vec();
    let term = Array2::from_shape_fn((ys.len(), xs.len()), |(i, j)| {
        let u = (xs[j] - cx) / sx;
        let v = (ys[i] - cy) / sy;
        (u * u - 2.0 * rho * u * v + v * v) / (2.0 * (1.0 - rho * rho))
    });
    grid.add_log_likelihood(&term).unwrap();
}

#[test]
fn interior_gaussian_is_recovered_by_every_method() {
    let mut grid = grid(101);
    load_gaussian(&mut grid, 40_300.0, 61_700.0, 6e3, 4e3, 0.4);
    let posterior = grid.posterior().unwrap();
    for method in ALL_METHODS {
        let estimate = reduce(&grid, &posterior, method);
        assert!(!estimate.boundary_warning, "{method:?}");
        assert!(!estimate.hessian_fallback, "{method:?}");
        assert!((estimate.gamma_plus - 40_300.0).abs() < 600.0, "{method:?}");
        assert!((estimate.gamma_minus - 61_700.0).abs() < 600.0, "{method:?}");
        assert!((estimate.sigma_plus / 6e3 - 1.0).abs() < 0.03, "{method:?}");
        assert!((estimate.sigma_minus / 4e3 - 1.0).abs() < 0.03, "{method:?}");
        assert!((estimate.correlation() - 0.4).abs() < 0.03, "{method:?}");
    }
}

#[test]
fn narrow_posterior_uses_the_parabola_branch() {
    let mut grid = grid(51);
    let spacing = 2e3;
    load_gaussian(&mut grid, 50_400.0, 40_900.0, 0.2 * spacing, 0.3 * spacing, 0.0);
    let posterior = grid.posterior().unwrap();
    assert!((grid.integrate(&posterior) - 1.0).abs() < 1e-2);

    let estimate = reduce(&grid, &posterior, EstimatorMethod::Mixed);
    assert!(!estimate.boundary_warning);
    assert!(!estimate.hessian_fallback);
    assert!((estimate.sigma_plus / (0.2 * spacing) - 1.0).abs() < 0.01);
    assert!((estimate.sigma_minus / (0.3 * spacing) - 1.0).abs() < 0.01);
    assert!((estimate.gamma_plus - 50_400.0).abs() < 0.5 * spacing);
    assert!((estimate.gamma_minus - 40_900.0).abs() < 0.5 * spacing);
}

#[test]
fn corner_mode_shifts_the_stencil_inward() {
    let mut grid = grid(41);
    load_gaussian(&mut grid, 1e3, 1e3, 5e3, 5e3, 0.0);
    let q = grid.neg_log_posterior();
    let fit = fit_parabola(&grid, &q);
    assert_eq!(fit.map_index, (0, 0));
    assert_eq!(fit.eval_index, (1, 1));
    assert!(fit.covariance().is_some());
}

#[test]
fn boundary_fallback_never_shrinks_sigma() {
    let mut grid = grid(61);
    load_gaussian(&mut grid, -8e3, 70e3, 9e3, 7e3, -0.3);
    let posterior = grid.posterior().unwrap();
    let integral = integral_moments(&grid, &posterior, None);
    for method in ALL_METHODS {
        let estimate = reduce(&grid, &posterior, method);
        assert!(estimate.boundary_warning, "{method:?}");
        assert!(
            estimate.sigma_plus >= integral.var_plus.sqrt() * (1.0 - 1e-9),
            "{method:?}: {} < {}",
            estimate.sigma_plus,
            integral.var_plus.sqrt()
        );
        assert!(
            estimate.sigma_minus >= integral.var_minus.sqrt() * (1.0 - 1e-9),
            "{method:?}"
        );
    }
    let wide = reduce(&grid, &posterior, EstimatorMethod::BoundaryWide);
    assert_eq!(wide.sigma_plus, 50e3);
    assert_eq!(wide.cov, 0.0);
}

#[test]
fn rim_mode_is_never_narrower_than_its_edge_cell() {
    let mut grid = grid(21);
    let spacing = 5e3;
    load_gaussian(&mut grid, 1e3, 51e3, 300.0, 8e3, 0.0);
    let posterior = grid.posterior().unwrap();
    let integral = integral_moments(&grid, &posterior, None);
    assert!(integral.var_plus.sqrt() < 0.2 * spacing);

    let about_map = integral_moments(&grid, &posterior, Some(grid.rates_at(10, 0)));
    let mixed = reduce(&grid, &posterior, EstimatorMethod::Mixed);
    assert!(mixed.boundary_warning);
    assert!(mixed.sigma_plus >= spacing * (1.0 - 1e-9), "{mixed:?}");
    assert!((mixed.sigma_minus - about_map.var_minus.sqrt()).abs() < 1e-6);

    let parabola = reduce(&grid, &posterior, EstimatorMethod::Parabola);
    assert!(parabola.boundary_warning);
    assert!(parabola.sigma_plus >= spacing * (1.0 - 1e-9), "{parabola:?}");
    assert!(parabola.cov.abs() <= parabola.sigma_plus * parabola.sigma_minus);
}

#[test]
fn indefinite_hessian_falls_back_to_integration() {
    let mut grid = grid(21);
    let mut term = Array2::from_elem((21, 21), 50.0);
    let (i, j) = (10, 10);
    term[[i, j]] = 0.0;
    term[[i, j - 1]] = 1.0;
    term[[i, j + 1]] = 1.0;
    term[[i - 1, j]] = 1.0;
    term[[i + 1, j]] = 1.0;
    term[[i + 1, j + 1]] = 0.1;
    term[[i - 1, j - 1]] = 0.1;
    term[[i + 1, j - 1]] = 20.0;
    term[[i - 1, j + 1]] = 20.0;
    grid.add_log_likelihood(&term).unwrap();

    let q = grid.neg_log_posterior();
    let fit = fit_parabola(&grid, &q);
    assert!(fit.determinant() < 0.0);
    assert!(fit.covariance().is_none());

    let posterior = grid.posterior().unwrap();
    let around_map = integral_moments(&grid, &posterior, Some(fit.map));
    for method in [EstimatorMethod::Parabola, EstimatorMethod::Mixed] {
        let estimate = reduce(&grid, &posterior, method);
        assert!(estimate.hessian_fallback, "{method:?}");
        assert!(!estimate.boundary_warning, "{method:?}");
        assert!((estimate.sigma_plus - around_map.var_plus.sqrt()).abs() < 1e-6);
        assert_eq!(estimate.gamma_plus, fit.map.gamma_plus);
    }
}

proptest! {
    #[test]
    fn variances_are_non_negative_and_covariance_bounded(
        cx in -2e4f64..1.2e5,
        cy in -2e4f64..1.2e5,
        sx in 5e2f64..3e4,
        sy in 5e2f64..3e4,
        rho in -0.9f64..0.9,
    ) {
        let mut grid = grid(25);
        load_gaussian(&mut grid, cx, cy, sx, sy, rho);
        let posterior = grid.posterior().unwrap();
        for method in ALL_METHODS {
            let estimate = reduce(&grid, &posterior, method);
            prop_assert!(estimate.sigma_plus >= 0.0 && estimate.sigma_minus >= 0.0);
            prop_assert!(estimate.sigma_plus.is_finite() && estimate.sigma_minus.is_finite());
            prop_assert!(estimate.cov.abs() <= estimate.sigma_plus * estimate.sigma_minus * (1.0 + 1e-12));
        }
    }
}
