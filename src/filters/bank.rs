//! Dispatches between the four concrete filter variants based on
//! `TargetMode` x `TargetModel` (spec §4.3 "Filter selection"), and
//! builds each variant's own `H` for a given observation — the one
//! place that needs to know both the active variant's column layout
//! and the sensor's semantic `ObservedQuantity`.

use nalgebra::{DMatrix, DVector, Vector3};

use crate::config::{Config, TargetMode, TargetModel};
use crate::filters::coupled::{self, CoupledMovingAugFilter, CoupledStaticFilter};
use crate::filters::decoupled::{self, AxisMovingFilter, AxisStaticFilter};
use crate::filters::{AxisMask, Filter, ObservedQuantity, UpdateOutcome};

enum AxisBank {
    Static([AxisStaticFilter; 3]),
    Moving([AxisMovingFilter; 3]),
}

pub enum FilterBank {
    Decoupled(AxisBank),
    CoupledStatic(CoupledStaticFilter),
    CoupledMovingAug(CoupledMovingAugFilter),
}

impl FilterBank {
    pub fn new(mode: TargetMode, model: TargetModel, cfg: &Config) -> Self {
        match (model, mode) {
            (TargetModel::Decoupled, TargetMode::Static) => FilterBank::Decoupled(AxisBank::Static([
                AxisStaticFilter::new(cfg.acc_d_unc, cfg.bias_unc, cfg.bias_lim),
                AxisStaticFilter::new(cfg.acc_d_unc, cfg.bias_unc, cfg.bias_lim),
                AxisStaticFilter::new(cfg.acc_d_unc, cfg.bias_unc, cfg.bias_lim),
            ])),
            (TargetModel::Decoupled, TargetMode::Moving | TargetMode::MovingAug) => {
                FilterBank::Decoupled(AxisBank::Moving([
                    AxisMovingFilter::new(cfg.acc_d_unc, cfg.acc_t_unc, cfg.bias_unc, cfg.bias_lim),
                    AxisMovingFilter::new(cfg.acc_d_unc, cfg.acc_t_unc, cfg.bias_unc, cfg.bias_lim),
                    AxisMovingFilter::new(cfg.acc_d_unc, cfg.acc_t_unc, cfg.bias_unc, cfg.bias_lim),
                ]))
            }
            (TargetModel::Coupled, TargetMode::Static) => {
                FilterBank::CoupledStatic(CoupledStaticFilter::new(cfg.acc_d_unc, cfg.bias_unc, cfg.bias_lim))
            }
            (TargetModel::Coupled, TargetMode::Moving | TargetMode::MovingAug) => {
                FilterBank::CoupledMovingAug(CoupledMovingAugFilter::new(
                    cfg.acc_d_unc,
                    cfg.acc_t_unc,
                    cfg.bias_unc,
                    cfg.bias_lim,
                ))
            }
        }
    }

    pub fn state_dim(&self) -> usize {
        match self {
            FilterBank::Decoupled(AxisBank::Static(_)) => 3 * decoupled::STATIC_DIM,
            FilterBank::Decoupled(AxisBank::Moving(_)) => 3 * decoupled::MOVING_DIM,
            FilterBank::CoupledStatic(f) => f.state_dim(),
            FilterBank::CoupledMovingAug(f) => f.state_dim(),
        }
    }

    /// Initialize per spec §4.4. `p0_diag` gives `(pos, vel, bias,
    /// target_acc)` initial variances; `vel0`/`vu0` seed relative or
    /// vehicle velocity when known (zero otherwise); bias0 seeds the
    /// GPS-bias-plausible component on a target-GPS init.
    pub fn init(&mut self, p0: Vector3<f64>, vel0_or_vu0: Vector3<f64>, bias0: Vector3<f64>, init_unc: InitialUncertainty) {
        match self {
            FilterBank::Decoupled(AxisBank::Static(axes)) => {
                for (i, axis) in axes.iter_mut().enumerate() {
                    let x0 = DVector::from_vec(vec![p0[i], vel0_or_vu0[i], bias0[i]]);
                    let p0m = DMatrix::from_diagonal(&DVector::from_vec(vec![
                        init_unc.pos,
                        init_unc.vel,
                        init_unc.bias,
                    ]));
                    axis.init(x0, p0m);
                }
            }
            FilterBank::Decoupled(AxisBank::Moving(axes)) => {
                for (i, axis) in axes.iter_mut().enumerate() {
                    let x0 = DVector::from_vec(vec![p0[i], vel0_or_vu0[i], bias0[i], 0.0]);
                    let p0m = DMatrix::from_diagonal(&DVector::from_vec(vec![
                        init_unc.pos,
                        init_unc.vel,
                        init_unc.bias,
                        init_unc.acc,
                    ]));
                    axis.init(x0, p0m);
                }
            }
            FilterBank::CoupledStatic(f) => {
                let mut x0 = DVector::zeros(coupled::STATIC_DIM);
                let mut diag = DVector::zeros(coupled::STATIC_DIM);
                for i in 0..3 {
                    x0[coupled::STATIC_POS + i] = p0[i];
                    x0[coupled::STATIC_VEL + i] = vel0_or_vu0[i];
                    x0[coupled::STATIC_BIAS + i] = bias0[i];
                    diag[coupled::STATIC_POS + i] = init_unc.pos;
                    diag[coupled::STATIC_VEL + i] = init_unc.vel;
                    diag[coupled::STATIC_BIAS + i] = init_unc.bias;
                }
                f.init(x0, DMatrix::from_diagonal(&diag));
            }
            FilterBank::CoupledMovingAug(f) => {
                let mut x0 = DVector::zeros(coupled::AUG_DIM);
                let mut diag = DVector::zeros(coupled::AUG_DIM);
                for i in 0..3 {
                    x0[coupled::AUG_POS + i] = p0[i];
                    x0[coupled::AUG_VU + i] = vel0_or_vu0[i];
                    x0[coupled::AUG_BIAS + i] = bias0[i];
                    diag[coupled::AUG_POS + i] = init_unc.pos;
                    diag[coupled::AUG_VU + i] = init_unc.vel;
                    diag[coupled::AUG_BIAS + i] = init_unc.bias;
                    diag[coupled::AUG_AT + i] = init_unc.acc;
                    diag[coupled::AUG_VT + i] = init_unc.vel;
                }
                f.init(x0, DMatrix::from_diagonal(&diag));
            }
        }
    }

    /// `u` is vehicle NED acceleration. `dt` must already be clipped to
    /// `[0, 1]` s by the caller (spec §4.1).
    pub fn predict(&mut self, dt: f64, u: Vector3<f64>) {
        match self {
            FilterBank::Decoupled(AxisBank::Static(axes)) => {
                for (i, axis) in axes.iter_mut().enumerate() {
                    axis.predict(dt, &DVector::from_vec(vec![u[i]]));
                }
            }
            FilterBank::Decoupled(AxisBank::Moving(axes)) => {
                for (i, axis) in axes.iter_mut().enumerate() {
                    axis.predict(dt, &DVector::from_vec(vec![u[i]]));
                }
            }
            FilterBank::CoupledStatic(f) => f.predict(dt, &DVector::from_vec(vec![u.x, u.y, u.z])),
            FilterBank::CoupledMovingAug(f) => f.predict(dt, &DVector::from_vec(vec![u.x, u.y, u.z])),
        }
    }

    /// Apply one observation. Returns one `UpdateOutcome` per axis
    /// touched for decoupled banks, or a single one for coupled banks.
    pub fn update(
        &mut self,
        quantity: ObservedQuantity,
        mask: AxisMask,
        z: Vector3<f64>,
        r_diag: Vector3<f64>,
        gate_threshold_for_dof: impl Fn(usize) -> f64,
        gate_reject: bool,
    ) -> Vec<UpdateOutcome> {
        let ObservedQuantity::Position { bias_observed } = quantity else {
            // VehicleVelocity only ever targets the moving-augmented
            // coupled model; decoupled/static banks never receive it
            // (the Assembler never asks for it against them).
            return self.update_vehicle_velocity(mask, z, r_diag, gate_threshold_for_dof, gate_reject);
        };

        match self {
            FilterBank::Decoupled(bank) => {
                let axes: Vec<&mut dyn Filter> = match bank {
                    AxisBank::Static(a) => a.iter_mut().map(|f| f as &mut dyn Filter).collect(),
                    AxisBank::Moving(a) => a.iter_mut().map(|f| f as &mut dyn Filter).collect(),
                };
                let mut outcomes = Vec::new();
                for (i, filt) in axes.into_iter().enumerate() {
                    if !mask.contains(AxisMask::from_bits_truncate(1 << i)) {
                        continue;
                    }
                    let h = decoupled::position_row(filt.state_dim(), bias_observed);
                    let zi = DVector::from_vec(vec![z[i]]);
                    let ri = DMatrix::from_row_slice(1, 1, &[r_diag[i]]);
                    outcomes.push(filt.update(&zi, &ri, &h, gate_threshold_for_dof(1), gate_reject));
                }
                outcomes
            }
            FilterBank::CoupledStatic(f) => {
                let h = coupled::stacked_rows(f.state_dim(), mask.axes(), coupled::STATIC_POS, bias_observed, coupled::STATIC_BIAS);
                let (zs, rs) = stack(mask, z, r_diag);
                vec![f.update(&zs, &rs, &h, gate_threshold_for_dof(mask.dof()), gate_reject)]
            }
            FilterBank::CoupledMovingAug(f) => {
                let h = coupled::stacked_rows(f.state_dim(), mask.axes(), coupled::AUG_POS, bias_observed, coupled::AUG_BIAS);
                let (zs, rs) = stack(mask, z, r_diag);
                vec![f.update(&zs, &rs, &h, gate_threshold_for_dof(mask.dof()), gate_reject)]
            }
        }
    }

    fn update_vehicle_velocity(
        &mut self,
        mask: AxisMask,
        z: Vector3<f64>,
        r_diag: Vector3<f64>,
        gate_threshold_for_dof: impl Fn(usize) -> f64,
        gate_reject: bool,
    ) -> Vec<UpdateOutcome> {
        match self {
            FilterBank::CoupledMovingAug(f) => {
                let h = coupled::stacked_rows(f.state_dim(), mask.axes(), coupled::AUG_VU, false, coupled::AUG_BIAS);
                let (zs, rs) = stack(mask, z, r_diag);
                vec![f.update(&zs, &rs, &h, gate_threshold_for_dof(mask.dof()), gate_reject)]
            }
            // Vehicle-GPS-velocity only applies to moving-augmented
            // coupled models (spec §4.2); anything else is a no-op.
            _ => Vec::new(),
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        match self {
            FilterBank::Decoupled(AxisBank::Static(a)) => Vector3::new(a[0].position(), a[1].position(), a[2].position()),
            FilterBank::Decoupled(AxisBank::Moving(a)) => Vector3::new(a[0].position(), a[1].position(), a[2].position()),
            FilterBank::CoupledStatic(f) => f.position(),
            FilterBank::CoupledMovingAug(f) => f.position(),
        }
    }

    pub fn relative_velocity(&self) -> Vector3<f64> {
        match self {
            FilterBank::Decoupled(AxisBank::Static(a)) => Vector3::new(a[0].velocity(), a[1].velocity(), a[2].velocity()),
            FilterBank::Decoupled(AxisBank::Moving(a)) => Vector3::new(a[0].velocity(), a[1].velocity(), a[2].velocity()),
            FilterBank::CoupledStatic(f) => f.velocity(),
            FilterBank::CoupledMovingAug(f) => f.relative_velocity(),
        }
    }

    pub fn bias(&self) -> Vector3<f64> {
        match self {
            FilterBank::Decoupled(AxisBank::Static(a)) => Vector3::new(a[0].bias(), a[1].bias(), a[2].bias()),
            FilterBank::Decoupled(AxisBank::Moving(a)) => Vector3::new(a[0].bias(), a[1].bias(), a[2].bias()),
            FilterBank::CoupledStatic(f) => f.bias(),
            FilterBank::CoupledMovingAug(f) => f.bias(),
        }
    }

    pub fn target_acceleration(&self) -> Option<Vector3<f64>> {
        match self {
            FilterBank::Decoupled(AxisBank::Static(_)) => None,
            FilterBank::Decoupled(AxisBank::Moving(a)) => Some(Vector3::new(
                a[0].target_acceleration(),
                a[1].target_acceleration(),
                a[2].target_acceleration(),
            )),
            FilterBank::CoupledStatic(_) => None,
            FilterBank::CoupledMovingAug(f) => Some(f.target_acceleration()),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, FilterBank::Decoupled(AxisBank::Static(_)) | FilterBank::CoupledStatic(_))
    }

    pub fn position_variance(&self) -> Vector3<f64> {
        match self {
            FilterBank::Decoupled(AxisBank::Static(a)) => {
                Vector3::new(a[0].covariance()[(0, 0)], a[1].covariance()[(0, 0)], a[2].covariance()[(0, 0)])
            }
            FilterBank::Decoupled(AxisBank::Moving(a)) => {
                Vector3::new(a[0].covariance()[(0, 0)], a[1].covariance()[(0, 0)], a[2].covariance()[(0, 0)])
            }
            FilterBank::CoupledStatic(f) => diag3(f.covariance(), coupled::STATIC_POS),
            FilterBank::CoupledMovingAug(f) => diag3(f.covariance(), coupled::AUG_POS),
        }
    }

    pub fn velocity_variance(&self) -> Vector3<f64> {
        match self {
            FilterBank::Decoupled(AxisBank::Static(a)) => {
                Vector3::new(a[0].covariance()[(1, 1)], a[1].covariance()[(1, 1)], a[2].covariance()[(1, 1)])
            }
            FilterBank::Decoupled(AxisBank::Moving(a)) => {
                Vector3::new(a[0].covariance()[(1, 1)], a[1].covariance()[(1, 1)], a[2].covariance()[(1, 1)])
            }
            FilterBank::CoupledStatic(f) => diag3(f.covariance(), coupled::STATIC_VEL),
            // Published rel_vel = v_t - v_u (coupled::CoupledMovingAugFilter::relative_velocity),
            // so its variance is Var(v_t) + Var(v_u) - 2 Cov(v_t, v_u), not Var(v_t) alone.
            FilterBank::CoupledMovingAug(f) => diff_variance3(f.covariance(), coupled::AUG_VT, coupled::AUG_VU),
        }
    }

    pub fn covariance_diag(&self) -> DVector<f64> {
        match self {
            FilterBank::Decoupled(AxisBank::Static(a)) => {
                DVector::from_iterator(9, a.iter().flat_map(|f| (0..f.state_dim()).map(move |i| f.covariance()[(i, i)])))
            }
            FilterBank::Decoupled(AxisBank::Moving(a)) => {
                DVector::from_iterator(12, a.iter().flat_map(|f| (0..f.state_dim()).map(move |i| f.covariance()[(i, i)])))
            }
            FilterBank::CoupledStatic(f) => f.covariance().diagonal(),
            FilterBank::CoupledMovingAug(f) => f.covariance().diagonal(),
        }
    }

    pub fn has_numeric_fault(&self) -> bool {
        fn bad(f: &dyn Filter) -> bool {
            f.mean().iter().any(|v| !v.is_finite()) || f.covariance().iter().any(|v| !v.is_finite())
        }
        match self {
            FilterBank::Decoupled(AxisBank::Static(a)) => a.iter().any(|f| bad(f)),
            FilterBank::Decoupled(AxisBank::Moving(a)) => a.iter().any(|f| bad(f)),
            FilterBank::CoupledStatic(f) => bad(f),
            FilterBank::CoupledMovingAug(f) => bad(f),
        }
    }

    pub fn flat_state(&self) -> Vec<f64> {
        match self {
            FilterBank::Decoupled(AxisBank::Static(a)) => a.iter().flat_map(|f| f.mean().iter().copied()).collect(),
            FilterBank::Decoupled(AxisBank::Moving(a)) => a.iter().flat_map(|f| f.mean().iter().copied()).collect(),
            FilterBank::CoupledStatic(f) => f.mean().iter().copied().collect(),
            FilterBank::CoupledMovingAug(f) => f.mean().iter().copied().collect(),
        }
    }
}

fn diag3(p: &DMatrix<f64>, start: usize) -> Vector3<f64> {
    Vector3::new(p[(start, start)], p[(start + 1, start + 1)], p[(start + 2, start + 2)])
}

/// Per-axis `Var(a - b) = Var(a) + Var(b) - 2 Cov(a, b)` for two 3-wide
/// substate blocks starting at `a_start`/`b_start`.
fn diff_variance3(p: &DMatrix<f64>, a_start: usize, b_start: usize) -> Vector3<f64> {
    let component = |i: usize| {
        let var_a = p[(a_start + i, a_start + i)];
        let var_b = p[(b_start + i, b_start + i)];
        let cov_ab = p[(a_start + i, b_start + i)];
        var_a + var_b - 2.0 * cov_ab
    };
    Vector3::new(component(0), component(1), component(2))
}

fn stack(mask: AxisMask, z: Vector3<f64>, r_diag: Vector3<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let axes: Vec<usize> = mask.axes().collect();
    let zs = DVector::from_iterator(axes.len(), axes.iter().map(|&i| z[i]));
    let mut rs = DMatrix::zeros(axes.len(), axes.len());
    for (row, &i) in axes.iter().enumerate() {
        rs[(row, row)] = r_diag[i];
    }
    (zs, rs)
}

/// Initial covariance diagonal values (spec §4.4: `P₀ =
/// diag(POS_UNC_IN, VEL_UNC_IN, BIAS_UNC_IN, ACC_UNC_IN)`).
#[derive(Clone, Copy, Debug)]
pub struct InitialUncertainty {
    pub pos: f64,
    pub vel: f64,
    pub bias: f64,
    pub acc: f64,
}

impl InitialUncertainty {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            pos: cfg.pos_unc_in,
            vel: cfg.vel_unc_in,
            bias: cfg.bias_unc_in,
            acc: cfg.acc_unc_in,
        }
    }
}
