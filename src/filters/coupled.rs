//! Coupled filter variants: one filter whose state spans all three axes
//! jointly, carrying cross-axis covariance (spec §3 GLOSSARY: "Coupled
//! filter"). Column layout is fixed per variant so the Assembler can
//! build `H` without reaching into filter internals.

use nalgebra::{DMatrix, DVector, Vector3};

use super::{clamp_bias, cwna_pv, kalman_predict, kalman_update, random_walk, Filter, UpdateOutcome};

pub const STATIC_DIM: usize = 9;
/// Column ranges: position 0..3, relative velocity 3..6, bias 6..9.
pub const STATIC_POS: usize = 0;
pub const STATIC_VEL: usize = 3;
pub const STATIC_BIAS: usize = 6;

pub struct CoupledStaticFilter {
    x: DVector<f64>,
    p: DMatrix<f64>,
    acc_d_unc: f64,
    bias_unc: f64,
    bias_lim: f64,
}

impl CoupledStaticFilter {
    pub fn new(acc_d_unc: f64, bias_unc: f64, bias_lim: f64) -> Self {
        Self {
            x: DVector::zeros(STATIC_DIM),
            p: DMatrix::zeros(STATIC_DIM, STATIC_DIM),
            acc_d_unc,
            bias_unc,
            bias_lim,
        }
    }

    fn f_g(&self, dt: f64) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut f = DMatrix::identity(STATIC_DIM, STATIC_DIM);
        let mut g = DMatrix::zeros(STATIC_DIM, 3);
        for i in 0..3 {
            f[(STATIC_POS + i, STATIC_VEL + i)] = dt;
            g[(STATIC_POS + i, i)] = -0.5 * dt * dt;
            g[(STATIC_VEL + i, i)] = -dt;
        }
        (f, g)
    }

    fn q(&self, dt: f64) -> DMatrix<f64> {
        let mut q = DMatrix::zeros(STATIC_DIM, STATIC_DIM);
        let (q_pp, q_pv, q_vv) = cwna_pv(dt, self.acc_d_unc);
        for i in 0..3 {
            q[(STATIC_POS + i, STATIC_POS + i)] = q_pp;
            q[(STATIC_POS + i, STATIC_VEL + i)] = q_pv;
            q[(STATIC_VEL + i, STATIC_POS + i)] = q_pv;
            q[(STATIC_VEL + i, STATIC_VEL + i)] = q_vv;
            q[(STATIC_BIAS + i, STATIC_BIAS + i)] = random_walk(dt, self.bias_unc);
        }
        q
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x[STATIC_POS], self.x[STATIC_POS + 1], self.x[STATIC_POS + 2])
    }
    pub fn velocity(&self) -> Vector3<f64> {
        Vector3::new(self.x[STATIC_VEL], self.x[STATIC_VEL + 1], self.x[STATIC_VEL + 2])
    }
    pub fn bias(&self) -> Vector3<f64> {
        Vector3::new(self.x[STATIC_BIAS], self.x[STATIC_BIAS + 1], self.x[STATIC_BIAS + 2])
    }
}

impl Filter for CoupledStaticFilter {
    fn state_dim(&self) -> usize {
        STATIC_DIM
    }

    fn init(&mut self, x0: DVector<f64>, p0: DMatrix<f64>) {
        self.x = x0;
        self.p = p0;
    }

    fn predict(&mut self, dt: f64, u: &DVector<f64>) {
        let (f, g) = self.f_g(dt);
        let q = self.q(dt);
        kalman_predict(&mut self.x, &mut self.p, &f, &g, u, &q);
    }

    fn update(&mut self, z: &DVector<f64>, r: &DMatrix<f64>, h: &DMatrix<f64>, gate_threshold: f64, gate_reject: bool) -> UpdateOutcome {
        let outcome = kalman_update(&mut self.x, &mut self.p, z, r, h, gate_threshold, gate_reject);
        clamp_bias(&mut self.x, &[STATIC_BIAS, STATIC_BIAS + 1, STATIC_BIAS + 2], self.bias_lim);
        outcome
    }

    fn mean(&self) -> &DVector<f64> {
        &self.x
    }
    fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }
}

pub const AUG_DIM: usize = 15;
/// Column ranges: position 0..3, vehicle velocity 3..6, bias 6..9,
/// target acceleration 9..12, target velocity 12..15.
pub const AUG_POS: usize = 0;
pub const AUG_VU: usize = 3;
pub const AUG_BIAS: usize = 6;
pub const AUG_AT: usize = 9;
pub const AUG_VT: usize = 12;

/// Coupled moving-augmented filter. Dynamics (spec §4.1): `ṗ=vₜ−vᵤ,
/// v̇ᵤ=u, v̇ₜ=aₜ, ḃ=0, ȧₜ=0`.
pub struct CoupledMovingAugFilter {
    x: DVector<f64>,
    p: DMatrix<f64>,
    acc_d_unc: f64,
    acc_t_unc: f64,
    bias_unc: f64,
    bias_lim: f64,
}

impl CoupledMovingAugFilter {
    pub fn new(acc_d_unc: f64, acc_t_unc: f64, bias_unc: f64, bias_lim: f64) -> Self {
        Self {
            x: DVector::zeros(AUG_DIM),
            p: DMatrix::zeros(AUG_DIM, AUG_DIM),
            acc_d_unc,
            acc_t_unc,
            bias_unc,
            bias_lim,
        }
    }

    fn f_g(&self, dt: f64) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut f = DMatrix::identity(AUG_DIM, AUG_DIM);
        let mut g = DMatrix::zeros(AUG_DIM, 3);
        for i in 0..3 {
            // p_new = p - dt*vu + dt*vt + 0.5*dt^2*at  (+ control -0.5dt^2*u)
            f[(AUG_POS + i, AUG_VU + i)] = -dt;
            f[(AUG_POS + i, AUG_VT + i)] = dt;
            f[(AUG_POS + i, AUG_AT + i)] = 0.5 * dt * dt;
            // vu_new = vu (+ control dt*u)
            // vt_new = vt + dt*at
            f[(AUG_VT + i, AUG_AT + i)] = dt;

            g[(AUG_POS + i, i)] = -0.5 * dt * dt;
            g[(AUG_VU + i, i)] = dt;
        }
        (f, g)
    }

    fn q(&self, dt: f64) -> DMatrix<f64> {
        let mut q = DMatrix::zeros(AUG_DIM, AUG_DIM);
        // (p, vu) branch, scaled by vehicle-accel uncertainty, sign
        // matching ṗ's `-vᵤ` term.
        let (q_pp_d, q_pvu, q_vuvu) = cwna_pv(dt, self.acc_d_unc);
        // (p, vt) branch, scaled by target-accel uncertainty, sign
        // matching ṗ's `+vₜ` term.
        let (q_pp_t, q_pvt, q_vtvt) = cwna_pv(dt, self.acc_t_unc);

        for i in 0..3 {
            q[(AUG_POS + i, AUG_POS + i)] = q_pp_d + q_pp_t;
            q[(AUG_POS + i, AUG_VU + i)] = -q_pvu;
            q[(AUG_VU + i, AUG_POS + i)] = -q_pvu;
            q[(AUG_POS + i, AUG_VT + i)] = q_pvt;
            q[(AUG_VT + i, AUG_POS + i)] = q_pvt;
            q[(AUG_VU + i, AUG_VU + i)] = q_vuvu;
            q[(AUG_VT + i, AUG_VT + i)] = q_vtvt;
            q[(AUG_BIAS + i, AUG_BIAS + i)] = random_walk(dt, self.bias_unc);
            q[(AUG_AT + i, AUG_AT + i)] = random_walk(dt, self.acc_t_unc);
        }
        q
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x[AUG_POS], self.x[AUG_POS + 1], self.x[AUG_POS + 2])
    }
    pub fn vehicle_velocity(&self) -> Vector3<f64> {
        Vector3::new(self.x[AUG_VU], self.x[AUG_VU + 1], self.x[AUG_VU + 2])
    }
    pub fn target_velocity(&self) -> Vector3<f64> {
        Vector3::new(self.x[AUG_VT], self.x[AUG_VT + 1], self.x[AUG_VT + 2])
    }
    pub fn bias(&self) -> Vector3<f64> {
        Vector3::new(self.x[AUG_BIAS], self.x[AUG_BIAS + 1], self.x[AUG_BIAS + 2])
    }
    pub fn target_acceleration(&self) -> Vector3<f64> {
        Vector3::new(self.x[AUG_AT], self.x[AUG_AT + 1], self.x[AUG_AT + 2])
    }
    /// Relative velocity published to the caller: `vₜ − vᵤ`.
    pub fn relative_velocity(&self) -> Vector3<f64> {
        self.target_velocity() - self.vehicle_velocity()
    }
}

impl Filter for CoupledMovingAugFilter {
    fn state_dim(&self) -> usize {
        AUG_DIM
    }

    fn init(&mut self, x0: DVector<f64>, p0: DMatrix<f64>) {
        self.x = x0;
        self.p = p0;
    }

    fn predict(&mut self, dt: f64, u: &DVector<f64>) {
        let (f, g) = self.f_g(dt);
        let q = self.q(dt);
        kalman_predict(&mut self.x, &mut self.p, &f, &g, u, &q);
    }

    fn update(&mut self, z: &DVector<f64>, r: &DMatrix<f64>, h: &DMatrix<f64>, gate_threshold: f64, gate_reject: bool) -> UpdateOutcome {
        let outcome = kalman_update(&mut self.x, &mut self.p, z, r, h, gate_threshold, gate_reject);
        clamp_bias(&mut self.x, &[AUG_BIAS, AUG_BIAS + 1, AUG_BIAS + 2], self.bias_lim);
        outcome
    }

    fn mean(&self) -> &DVector<f64> {
        &self.x
    }
    fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }
}

/// Build the (rows x state_dim) `H` for a coupled-model position or
/// vehicle-velocity observation, given the active axis mask. Rows
/// follow the mask's axis order (x, y, z).
pub fn stacked_rows(
    state_dim: usize,
    mask_axes: impl Iterator<Item = usize>,
    quantity_col: usize,
    bias_observed: bool,
    bias_col: usize,
) -> DMatrix<f64> {
    let axes: Vec<usize> = mask_axes.collect();
    let mut h = DMatrix::zeros(axes.len(), state_dim);
    for (row, &axis) in axes.iter().enumerate() {
        h[(row, quantity_col + axis)] = 1.0;
        if bias_observed {
            h[(row, bias_col + axis)] = 1.0;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn static_coupled_converges_to_step_position() {
        let mut filt = CoupledStaticFilter::new(0.05, 0.001, 1.0);
        filt.init(DVector::zeros(STATIC_DIM), DMatrix::identity(STATIC_DIM, STATIC_DIM) * 9.0);

        let h = stacked_rows(STATIC_DIM, 0..3, STATIC_POS, false, STATIC_BIAS);
        let r = DMatrix::identity(3, 3) * 0.01;
        let u = DVector::from_vec(vec![0.0, 0.0, 0.0]);

        for _ in 0..200 {
            filt.predict(0.02, &u);
            let z = DVector::from_vec(vec![10.0, -2.0, -5.0]);
            filt.update(&z, &r, &h, 1e9, true);
        }

        let p = filt.position();
        assert_relative_eq!(p.x, 10.0, epsilon = 0.05);
        assert_relative_eq!(p.y, -2.0, epsilon = 0.05);
        assert_relative_eq!(p.z, -5.0, epsilon = 0.05);
    }

    #[test]
    fn moving_aug_tracks_constant_velocity_target() {
        let mut filt = CoupledMovingAugFilter::new(0.1, 0.1, 0.001, 2.0);
        filt.init(DVector::zeros(AUG_DIM), DMatrix::identity(AUG_DIM, AUG_DIM) * 9.0);

        let h = stacked_rows(AUG_DIM, 0..3, AUG_POS, false, AUG_BIAS);
        let r = DMatrix::identity(3, 3) * 0.01;
        let u = DVector::from_vec(vec![0.0, 0.0, 0.0]); // vehicle stationary

        let dt = 0.05;
        for i in 0..200 {
            filt.predict(dt, &u);
            let t = i as f64 * dt;
            let z = DVector::from_vec(vec![10.0 + 1.0 * t, 0.0, -5.0]);
            filt.update(&z, &r, &h, 1e9, true);
        }

        assert_relative_eq!(filt.target_velocity().x, 1.0, epsilon = 0.1);
    }
}
