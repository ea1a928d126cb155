//! Per-axis (decoupled) filter variants. Three independent instances of
//! these (one per x/y/z axis) make up a decoupled filter bank; they share
//! no cross-axis covariance (spec §3 GLOSSARY: "Decoupled filter").

use nalgebra::{DMatrix, DVector};

use super::{clamp_bias, cwna_pv, kalman_predict, kalman_update, random_walk, Filter, UpdateOutcome};

/// State layout: `[p, v, b]`. Dynamics: `ṗ=v, v̇=−u, ḃ=0` (spec §4.1,
/// "Decoupled static").
pub struct AxisStaticFilter {
    x: DVector<f64>,
    p: DMatrix<f64>,
    acc_d_unc: f64,
    bias_unc: f64,
    bias_lim: f64,
}

pub const STATIC_DIM: usize = 3;
const STATIC_POS: usize = 0;
const STATIC_VEL: usize = 1;
const STATIC_BIAS: usize = 2;

impl AxisStaticFilter {
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
        f[(STATIC_POS, STATIC_VEL)] = dt;
        let mut g = DMatrix::zeros(STATIC_DIM, 1);
        g[(STATIC_POS, 0)] = -0.5 * dt * dt;
        g[(STATIC_VEL, 0)] = -dt;
        (f, g)
    }

    fn q(&self, dt: f64) -> DMatrix<f64> {
        let mut q = DMatrix::zeros(STATIC_DIM, STATIC_DIM);
        let (q_pp, q_pv, q_vv) = cwna_pv(dt, self.acc_d_unc);
        q[(STATIC_POS, STATIC_POS)] = q_pp;
        q[(STATIC_POS, STATIC_VEL)] = q_pv;
        q[(STATIC_VEL, STATIC_POS)] = q_pv;
        q[(STATIC_VEL, STATIC_VEL)] = q_vv;
        q[(STATIC_BIAS, STATIC_BIAS)] = random_walk(dt, self.bias_unc);
        q
    }

    pub fn position(&self) -> f64 {
        self.x[STATIC_POS]
    }
    pub fn velocity(&self) -> f64 {
        self.x[STATIC_VEL]
    }
    pub fn bias(&self) -> f64 {
        self.x[STATIC_BIAS]
    }
}

impl Filter for AxisStaticFilter {
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
        clamp_bias(&mut self.x, &[STATIC_BIAS], self.bias_lim);
        outcome
    }

    fn mean(&self) -> &DVector<f64> {
        &self.x
    }

    fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }
}

/// State layout: `[p, v, b, aₜ]`. Dynamics: `ṗ=v, v̇=aₜ−u, ḃ=0, ȧₜ=0`
/// (spec §4.1, "Decoupled moving"). `Q`'s p/v block is driven by
/// `ACC_D_UNC` (the `u=aᵤ` term in `v̇` is live in every variant); `aₜ`'s
/// own random walk uses `ACC_T_UNC`.
pub struct AxisMovingFilter {
    x: DVector<f64>,
    p: DMatrix<f64>,
    acc_d_unc: f64,
    acc_t_unc: f64,
    bias_unc: f64,
    bias_lim: f64,
}

pub const MOVING_DIM: usize = 4;
const MOVING_POS: usize = 0;
const MOVING_VEL: usize = 1;
const MOVING_BIAS: usize = 2;
const MOVING_ACC: usize = 3;

impl AxisMovingFilter {
    pub fn new(acc_d_unc: f64, acc_t_unc: f64, bias_unc: f64, bias_lim: f64) -> Self {
        Self {
            x: DVector::zeros(MOVING_DIM),
            p: DMatrix::zeros(MOVING_DIM, MOVING_DIM),
            acc_d_unc,
            acc_t_unc,
            bias_unc,
            bias_lim,
        }
    }

    fn f_g(&self, dt: f64) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut f = DMatrix::identity(MOVING_DIM, MOVING_DIM);
        f[(MOVING_POS, MOVING_VEL)] = dt;
        f[(MOVING_POS, MOVING_ACC)] = 0.5 * dt * dt;
        f[(MOVING_VEL, MOVING_ACC)] = dt;
        let mut g = DMatrix::zeros(MOVING_DIM, 1);
        g[(MOVING_POS, 0)] = -0.5 * dt * dt;
        g[(MOVING_VEL, 0)] = -dt;
        (f, g)
    }

    fn q(&self, dt: f64) -> DMatrix<f64> {
        let mut q = DMatrix::zeros(MOVING_DIM, MOVING_DIM);
        let (q_pp, q_pv, q_vv) = cwna_pv(dt, self.acc_d_unc);
        q[(MOVING_POS, MOVING_POS)] = q_pp;
        q[(MOVING_POS, MOVING_VEL)] = q_pv;
        q[(MOVING_VEL, MOVING_POS)] = q_pv;
        q[(MOVING_VEL, MOVING_VEL)] = q_vv;
        q[(MOVING_BIAS, MOVING_BIAS)] = random_walk(dt, self.bias_unc);
        q[(MOVING_ACC, MOVING_ACC)] = random_walk(dt, self.acc_t_unc);
        q
    }

    pub fn position(&self) -> f64 {
        self.x[MOVING_POS]
    }
    pub fn velocity(&self) -> f64 {
        self.x[MOVING_VEL]
    }
    pub fn bias(&self) -> f64 {
        self.x[MOVING_BIAS]
    }
    pub fn target_acceleration(&self) -> f64 {
        self.x[MOVING_ACC]
    }
}

impl Filter for AxisMovingFilter {
    fn state_dim(&self) -> usize {
        MOVING_DIM
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
        clamp_bias(&mut self.x, &[MOVING_BIAS], self.bias_lim);
        outcome
    }

    fn mean(&self) -> &DVector<f64> {
        &self.x
    }

    fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }
}

/// Column layout helper used by the Assembler to build the (1 x
/// state_dim) position-observation row without reaching into filter
/// internals. Works for both the static and moving layouts since POS
/// and BIAS sit at the same indices (0 and 2) in both.
pub fn position_row(state_dim: usize, bias_observed: bool) -> DMatrix<f64> {
    let mut h = DMatrix::zeros(1, state_dim);
    h[(0, STATIC_POS)] = 1.0;
    if bias_observed {
        h[(0, STATIC_BIAS)] = 1.0;
    }
    h
}
