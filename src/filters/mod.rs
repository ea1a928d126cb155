//! Filter Bank: the capability set `{init, predict, update, accessors}`
//! shared by four concrete variants (decoupled/coupled x static/moving),
//! plus the single generic Kalman routine all of them delegate to.
//!
//! Per spec §9: state vectors differ in size across variants, so they
//! are modeled as separate concrete types sharing only this trait, not
//! one growable vector or a class hierarchy.

pub mod bank;
pub mod coupled;
pub mod decoupled;

use bitflags::bitflags;
use nalgebra::{DMatrix, DVector};

bitflags! {
    /// Per-axis validity mask on an observation (spec §3 invariant: the
    /// mask has exactly as many true bits as rows in `H`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AxisMask: u8 {
        const X = 0b001;
        const Y = 0b010;
        const Z = 0b100;
    }
}

impl AxisMask {
    pub const ALL: AxisMask = AxisMask::X.union(AxisMask::Y).union(AxisMask::Z);

    pub fn axes(self) -> impl Iterator<Item = usize> {
        (0..3).filter(move |&i| self.contains(AxisMask::from_bits_truncate(1 << i)))
    }

    pub fn dof(self) -> usize {
        self.bits().count_ones() as usize
    }
}

/// What a sensor observes, in terms of the filter's own substates. The
/// Assembler decides this per sensor type (spec §4.2); each filter
/// variant turns it into its own `H` given its own column layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservedQuantity {
    /// Relative/target position. `bias_observed=true` means the
    /// measurement model is `z = p + b` (target-GPS-derived sources);
    /// `false` means `z = p` (vision/IRLOCK/UWB never observe bias).
    Position { bias_observed: bool },
    /// Vehicle NED velocity — only meaningful against the coupled
    /// moving-augmented layout.
    VehicleVelocity,
}

/// Outcome of a single `update()` call, carrying the diagnostics spec §6
/// publishes per sensor.
#[derive(Clone, Debug)]
pub struct UpdateOutcome {
    pub innovation: DVector<f64>,
    pub innovation_variance: DVector<f64>,
    pub test_ratio: f64,
    pub dof: usize,
    pub fused: bool,
}

/// The per-variant capability set (spec §4.1/§9).
pub trait Filter {
    fn state_dim(&self) -> usize;

    fn init(&mut self, x0: DVector<f64>, p0: DMatrix<f64>);

    /// `u` is the drone acceleration in NED: length 1 for the decoupled
    /// per-axis variants (that axis's component), length 3 for the
    /// coupled variants. `dt` is clipped to `[0, 1]` s by the caller.
    fn predict(&mut self, dt: f64, u: &DVector<f64>);

    fn update(&mut self, z: &DVector<f64>, r: &DMatrix<f64>, h: &DMatrix<f64>, gate_threshold: f64, gate_reject: bool) -> UpdateOutcome;

    fn mean(&self) -> &DVector<f64>;
    fn covariance(&self) -> &DMatrix<f64>;
}

/// `P <- 1/2 (P + P^T)`, re-enforced after every assignment (spec §3).
pub fn symmetrize(p: &mut DMatrix<f64>) {
    let n = p.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (p[(i, j)] + p[(j, i)]);
            p[(i, j)] = avg;
            p[(j, i)] = avg;
        }
    }
}

/// `x <- F x + G u`, `P <- F P F^T + Q`, shared by every variant
/// regardless of state size.
pub fn kalman_predict(
    x: &mut DVector<f64>,
    p: &mut DMatrix<f64>,
    f: &DMatrix<f64>,
    g: &DMatrix<f64>,
    u: &DVector<f64>,
    q: &DMatrix<f64>,
) {
    *x = f * &*x + g * u;
    *p = f * &*p * f.transpose() + q;
    symmetrize(p);
}

/// `y = z - Hx`, `S = HPH^T + R`, `K = PH^T S^-1`, `x += Ky`,
/// `P <- (I - KH) P` symmetrized. The Mahalanobis gate
/// `y^T S^-1 y > gate_threshold` is always computed and reported;
/// rejection (skipping the state/covariance update) only happens when
/// `gate_reject` is set (spec §4.1: "rejection is advisory, not
/// required, but MUST be configurable and reported").
pub fn kalman_update(
    x: &mut DVector<f64>,
    p: &mut DMatrix<f64>,
    z: &DVector<f64>,
    r: &DMatrix<f64>,
    h: &DMatrix<f64>,
    gate_threshold: f64,
    gate_reject: bool,
) -> UpdateOutcome {
    let dof = z.len();
    let innovation = z - h * &*x;
    let s = h * &*p * h.transpose() + r;

    let s_inv = match s.clone().try_inverse() {
        Some(inv) => inv,
        None => {
            // Singular innovation covariance: report as maximally
            // inconsistent and skip the update rather than dividing
            // by a near-zero pivot.
            return UpdateOutcome {
                innovation,
                innovation_variance: s.diagonal(),
                test_ratio: f64::INFINITY,
                dof,
                fused: false,
            };
        }
    };

    let test_ratio = (innovation.transpose() * &s_inv * &innovation)[(0, 0)];
    let gated = test_ratio > gate_threshold;
    let fused = !(gated && gate_reject);

    if fused {
        let k = &*p * h.transpose() * &s_inv;
        *x += &k * &innovation;

        let identity = DMatrix::<f64>::identity(p.nrows(), p.nrows());
        let ikh = &identity - &k * h;
        *p = &ikh * &*p * ikh.transpose() + &k * r * k.transpose();
        symmetrize(p);
    }

    UpdateOutcome {
        innovation,
        innovation_variance: s.diagonal(),
        test_ratio,
        dof,
        fused,
    }
}

/// The `Var(p,v)` block of a continuous white-noise-acceleration kernel
/// (spec §4.1: `Δt⁵/20, Δt⁴/8, Δt³/3` for position/velocity), returned
/// as `(q_pp, q_pv, q_vv)`.
pub fn cwna_pv(dt: f64, sigma2: f64) -> (f64, f64, f64) {
    let q_pp = sigma2 * dt.powi(5) / 20.0;
    let q_pv = sigma2 * dt.powi(4) / 8.0;
    let q_vv = sigma2 * dt.powi(3) / 3.0;
    (q_pp, q_pv, q_vv)
}

/// Plain `Δt`-scaled random walk variance (bias, target-acceleration).
pub fn random_walk(dt: f64, sigma2: f64) -> f64 {
    sigma2 * dt
}

/// Clamp every entry of `b` (a bias sub-vector view) to `[-limit, limit]`,
/// projecting back onto the boundary rather than rejecting the update
/// (spec §3/§4.4).
pub fn clamp_bias(x: &mut DVector<f64>, bias_indices: &[usize], limit: f64) {
    for &i in bias_indices {
        x[i] = x[i].clamp(-limit, limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn is_symmetric(p: &DMatrix<f64>, eps: f64) -> bool {
        let n = p.nrows();
        (0..n).all(|i| (0..n).all(|j| (p[(i, j)] - p[(j, i)]).abs() < eps))
    }

    fn min_eigenvalue(p: &DMatrix<f64>) -> f64 {
        let eig = p.clone().symmetric_eigenvalues();
        eig.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn update_preserves_psd_and_symmetry() {
        let mut x = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        let mut p = DMatrix::<f64>::identity(3, 3) * 4.0;
        let h = DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 0.0]);
        let r = DMatrix::from_row_slice(1, 1, &[0.25]);
        let z = DVector::from_vec(vec![1.0]);

        let _ = kalman_update(&mut x, &mut p, &z, &r, &h, f64::INFINITY, true);

        assert!(is_symmetric(&p, 1e-9));
        assert!(min_eigenvalue(&p) > -1e-9);
    }

    #[test]
    fn gate_rejection_is_advisory_and_configurable() {
        let mut x = DVector::from_vec(vec![0.0]);
        let mut p = DMatrix::from_row_slice(1, 1, &[1.0]);
        let h = DMatrix::from_row_slice(1, 1, &[1.0]);
        let r = DMatrix::from_row_slice(1, 1, &[0.01]);
        let z = DVector::from_vec(vec![100.0]); // wild outlier

        let mut x_reject = x.clone();
        let mut p_reject = p.clone();
        let outcome = kalman_update(&mut x_reject, &mut p_reject, &z, &r, &h, 3.84, true);
        assert!(!outcome.fused);
        assert_relative_eq!(x_reject[0], 0.0);

        let outcome2 = kalman_update(&mut x, &mut p, &z, &r, &h, 3.84, false);
        assert!(outcome2.test_ratio > 3.84);
        assert!(outcome2.fused); // advisory only: state still updates
        assert!(x[0] > 50.0);
    }

    #[test]
    fn predict_is_linear_in_time_split() {
        let f = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
        let g = DMatrix::from_row_slice(2, 1, &[-0.005, -0.1]);
        let q = DMatrix::<f64>::zeros(2, 2);
        let u = DVector::from_vec(vec![1.0]);

        let mut x_once = DVector::from_vec(vec![0.0, 0.0]);
        let mut p_once = DMatrix::<f64>::zeros(2, 2);
        kalman_predict(&mut x_once, &mut p_once, &f, &g, &u, &q);

        // Split the same Δt=0.1 step implicitly represented by F/G above
        // into two Δt=0.05 half-steps using matching half-step F/G.
        let f_half = DMatrix::from_row_slice(2, 2, &[1.0, 0.05, 0.0, 1.0]);
        let g_half = DMatrix::from_row_slice(2, 1, &[-0.00125, -0.05]);
        let mut x_twice = DVector::from_vec(vec![0.0, 0.0]);
        let mut p_twice = DMatrix::<f64>::zeros(2, 2);
        kalman_predict(&mut x_twice, &mut p_twice, &f_half, &g_half, &u, &q);
        kalman_predict(&mut x_twice, &mut p_twice, &f_half, &g_half, &u, &q);

        assert_relative_eq!(x_once[0], x_twice[0], epsilon = 1e-5);
        assert_relative_eq!(x_once[1], x_twice[1], epsilon = 1e-5);
    }
}
