//! Estimator configuration — every parameter from spec §6, reloaded in
//! full whenever the caller observes a `parameter_update` tick and hands
//! in a new `Config` (the parameter-storage/reload machinery itself is
//! the scheduler's job, not the core's).

use bitflags::bitflags;

bitflags! {
    /// `AID_MASK`: which sensors the Orchestrator is permitted to use.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AidMask: u8 {
        const TARGET_GPS       = 0b0000_0001;
        const REL_GPS_VEL      = 0b0000_0010;
        const VISION           = 0b0000_0100;
        const IRLOCK           = 0b0000_1000;
        const UWB              = 0b0001_0000;
        const MISSION_LANDING  = 0b0010_0000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetMode {
    Static,
    Moving,
    MovingAug,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetModel {
    Decoupled,
    Coupled,
}

/// IRLOCK/UWB sensor mount rotation, mirroring the small fixed rotation
/// set a flight stack exposes for externally-mounted sensors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorRotation {
    None,
    Yaw90,
    Yaw180,
    Yaw270,
}

impl SensorRotation {
    pub fn rotate(self, v: nalgebra::Vector3<f64>) -> nalgebra::Vector3<f64> {
        match self {
            SensorRotation::None => v,
            SensorRotation::Yaw90 => nalgebra::Vector3::new(-v.y, v.x, v.z),
            SensorRotation::Yaw180 => nalgebra::Vector3::new(-v.x, -v.y, v.z),
            SensorRotation::Yaw270 => nalgebra::Vector3::new(v.y, -v.x, v.z),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    // ── Sensor / model selection ──
    pub aid_mask: AidMask,
    pub mode: TargetMode,
    pub model: TargetModel,

    // ── Timeouts (seconds) ──
    pub measurement_valid_timeout: f64,
    pub measurement_updated_timeout: f64,
    pub btout: f64,

    // ── Process noise (variance) ──
    pub acc_d_unc: f64,
    pub acc_t_unc: f64,
    pub bias_unc: f64,

    // ── Measurement noise ──
    pub meas_unc: f64,
    pub gps_p_noise: f64,
    pub gps_v_noise: f64,
    pub eva_noise: f64,
    pub evp_noise: f64,
    /// When true, EVP_NOISE*max(dist_bottom, 1) lower-bounds/replaces the
    /// vision message's own reported covariance.
    pub ev_noise_md: bool,

    // ── Initial covariance ──
    pub pos_unc_in: f64,
    pub vel_unc_in: f64,
    pub bias_unc_in: f64,
    pub acc_unc_in: f64,

    // ── Bias clamp ──
    pub bias_lim: f64,

    // ── Horizontal measurement scale ──
    pub scale_x: f64,
    pub scale_y: f64,

    // ── IRLOCK/UWB mount ──
    pub sens_rot: SensorRotation,
    pub sens_pos: [f64; 3],

    // ── Mahalanobis gate ──
    pub gate_enabled: bool,
    pub gate_reject: bool,
    pub gate_chi2_dof1: f64,
    pub gate_chi2_dof2: f64,
    pub gate_chi2_dof3: f64,
}

impl Config {
    pub fn gate_threshold(&self, dof: usize) -> f64 {
        match dof {
            1 => self.gate_chi2_dof1,
            2 => self.gate_chi2_dof2,
            _ => self.gate_chi2_dof3,
        }
    }

    /// MovingAug forces Coupled (§4.3, and §7 "configuration conflict").
    pub fn normalized(mut self) -> Self {
        if self.mode == TargetMode::MovingAug && self.model != TargetModel::Coupled {
            log::warn!("MODE=MovingAug requires MODEL=Coupled; forcing Coupled");
            self.model = TargetModel::Coupled;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aid_mask: AidMask::TARGET_GPS | AidMask::VISION,
            mode: TargetMode::Static,
            model: TargetModel::Decoupled,

            measurement_valid_timeout: 1.0,
            measurement_updated_timeout: 0.1,
            btout: 3.0,

            acc_d_unc: 1.0,
            acc_t_unc: 1.0,
            bias_unc: 0.05,

            meas_unc: 0.01,
            gps_p_noise: 0.5,
            gps_v_noise: 0.3,
            eva_noise: 0.1,
            evp_noise: 0.1,
            ev_noise_md: true,

            pos_unc_in: 3.0,
            vel_unc_in: 3.0,
            bias_unc_in: 0.5,
            acc_unc_in: 1.0,

            bias_lim: 1.0,

            scale_x: 1.0,
            scale_y: 1.0,

            sens_rot: SensorRotation::None,
            sens_pos: [0.0, 0.0, 0.0],

            gate_enabled: true,
            gate_reject: true,
            gate_chi2_dof1: 3.84,
            gate_chi2_dof2: 9.21,
            gate_chi2_dof3: 7.82,
        }
    }
}
