//! Subscribed and published message shapes at the estimator's data-flow
//! boundary. These mirror the uORB-style topics the core is wired to in
//! production, but the bus/transport itself is out of scope here — the
//! Orchestrator is simply handed the latest sample of each.

use serde::{Deserialize, Serialize};

/// Seconds since an arbitrary but monotonic epoch. The scheduler that
/// drives the core owns wall-clock semantics; the core only ever
/// subtracts two of these.
pub type TimestampS = f64;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleAcceleration {
    pub timestamp: TimestampS,
    /// NED, m/s^2
    pub xyz: [f64; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleAttitude {
    pub timestamp: TimestampS,
    /// body -> NED quaternion, (w, x, y, z)
    pub q: [f64; 4],
}

impl Default for VehicleAttitude {
    fn default() -> Self {
        Self { timestamp: 0.0, q: [1.0, 0.0, 0.0, 0.0] }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleLocalPosition {
    pub timestamp: TimestampS,
    /// NED, meters, relative to the local origin
    pub xyz: [f64; 3],
    pub dist_bottom: f64,
    pub dist_bottom_valid: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleGpsPosition {
    pub timestamp: TimestampS,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
    /// NED, m/s
    pub vel_ned: [f64; 3],
    pub eph_m: f64,
    pub epv_m: f64,
    pub fix_valid: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IrlockReport {
    pub timestamp: TimestampS,
    /// tangent-of-angle to target, sensor frame, radians
    pub angle_x: f64,
    pub angle_y: f64,
    pub signal_quality: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UwbDistance {
    pub timestamp: TimestampS,
    /// position of the target in the UWB grid frame, meters
    pub grid_xyz: [f64; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FiducialMarkerReport {
    pub timestamp: TimestampS,
    /// pose of the target in the sensor (or body, if SENS_ROT is identity) frame
    pub xyz: [f64; 3],
    /// per-axis measurement covariance as reported by the vision pipeline,
    /// if the pipeline supplies one (otherwise EVP_NOISE/EV_NOISE_MD apply)
    pub covariance: Option<[f64; 3]>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetGnssReport {
    pub timestamp: TimestampS,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSetpointTriplet {
    pub timestamp: TimestampS,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
    pub valid: bool,
}

/// Published `landing_target_pose`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandingTargetPose {
    pub timestamp: TimestampS,
    /// NED, meters, vehicle -> target
    pub rel_pos: [f64; 3],
    pub rel_pos_var: [f64; 3],
    /// NED, m/s
    pub rel_vel: [f64; 3],
    pub rel_vel_var: [f64; 3],
    pub is_static: bool,
    pub rel_pos_valid: bool,
    pub rel_vel_valid: bool,
    pub abs_pos_valid: bool,
}

/// Published `target_estimator_state`: full internal state plus the
/// covariance diagonal, for offline analysis / telemetry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetEstimatorState {
    pub timestamp: TimestampS,
    pub state: Vec<f64>,
    pub covariance_diag: Vec<f64>,
    pub bias: [f64; 3],
    pub target_acceleration: Option<[f64; 3]>,
}

/// Per-sensor innovation record, published for diagnostic monitoring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InnovationRecord {
    pub sensor: SensorKind,
    pub timestamp: TimestampS,
    pub innovation: Vec<f64>,
    pub innovation_variance: Vec<f64>,
    pub test_ratio: f64,
    pub fused: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    TargetGpsPosition,
    VehicleGpsVelocity,
    Vision,
    Irlock,
    Uwb,
    MissionLandingPosition,
}

/// Diagnostic counters surfaced alongside the published pose. Never
/// reset except by crate construction; the life-cycle layer increments
/// these but never reads them back to make decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub resets: u64,
    pub numeric_faults: u64,
    pub gated_rejections: u64,
}
