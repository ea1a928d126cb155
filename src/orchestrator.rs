//! Fusion Orchestrator (spec §4.3): drives predict/update each tick,
//! selects the filter variant from configuration, handles the life
//! cycle, and publishes the aggregated pose.

use nalgebra::Vector3;

use crate::assembler::{self, Observation};
use crate::config::{AidMask, Config, TargetMode, TargetModel};
use crate::filters::bank::{FilterBank, InitialUncertainty};
use crate::lifecycle;
use crate::types::{
    FiducialMarkerReport, InnovationRecord, IrlockReport, LandingTargetPose, PositionSetpointTriplet, TargetEstimatorState, TargetGnssReport,
    TelemetryCounters, TimestampS, UwbDistance, VehicleAcceleration, VehicleAttitude, VehicleGpsPosition, VehicleLocalPosition,
};

/// The latest known sample of each subscribed topic this tick. `None`
/// means "no fresh sample arrived" for the one-shot topics (target GPS,
/// vision, IRLOCK, UWB, mission setpoint); the continuously-published
/// vehicle topics are expected every tick but tolerate gaps.
#[derive(Clone, Debug, Default)]
pub struct SensorInputs {
    pub vehicle_acceleration: Option<VehicleAcceleration>,
    pub vehicle_attitude: Option<VehicleAttitude>,
    pub vehicle_local_position: Option<VehicleLocalPosition>,
    pub vehicle_gps_position: Option<VehicleGpsPosition>,
    pub target_gnss_report: Option<TargetGnssReport>,
    pub fiducial_marker_report: Option<FiducialMarkerReport>,
    pub irlock_report: Option<IrlockReport>,
    pub uwb_distance: Option<UwbDistance>,
    pub position_setpoint_triplet: Option<PositionSetpointTriplet>,
}

/// Everything a tick publishes (spec §6).
#[derive(Clone, Debug)]
pub struct TickOutput {
    pub pose: LandingTargetPose,
    pub state: TargetEstimatorState,
    pub innovations: Vec<InnovationRecord>,
    pub telemetry: TelemetryCounters,
}

pub struct Estimator {
    cfg: Config,
    mode: TargetMode,
    model: TargetModel,

    bank: Option<FilterBank>,
    initialized: bool,
    last_predict: TimestampS,
    last_update: TimestampS,

    vehicle_attitude: VehicleAttitude,
    vehicle_acceleration: VehicleAcceleration,
    vehicle_local_position: VehicleLocalPosition,
    vehicle_gps_position: VehicleGpsPosition,

    telemetry: TelemetryCounters,
}

impl Estimator {
    pub fn new(cfg: Config) -> Self {
        let cfg = cfg.normalized();
        Self {
            mode: cfg.mode,
            model: cfg.model,
            cfg,
            bank: None,
            initialized: false,
            last_predict: 0.0,
            last_update: 0.0,
            vehicle_attitude: VehicleAttitude::default(),
            vehicle_acceleration: VehicleAcceleration { timestamp: 0.0, xyz: [0.0; 3] },
            vehicle_local_position: VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 0.0, dist_bottom_valid: false },
            vehicle_gps_position: VehicleGpsPosition {
                timestamp: 0.0,
                lat_deg: 0.0,
                lon_deg: 0.0,
                alt_m: 0.0,
                vel_ned: [0.0; 3],
                eph_m: 0.0,
                epv_m: 0.0,
                fix_valid: false,
            },
            telemetry: TelemetryCounters::default(),
        }
    }

    /// Reload configuration (spec §4.3/§6: reloaded on `parameter_update`).
    /// A `MODE`/`MODEL` change forces a reset (spec §4.4 reset condition (c)).
    pub fn set_config(&mut self, cfg: Config) {
        let cfg = cfg.normalized();
        if cfg.mode != self.mode || cfg.model != self.model {
            log::info!("MODE/MODEL changed ({:?}/{:?} -> {:?}/{:?}), resetting", self.mode, self.model, cfg.mode, cfg.model);
            self.reset();
        }
        self.mode = cfg.mode;
        self.model = cfg.model;
        self.cfg = cfg;
    }

    pub fn telemetry(&self) -> TelemetryCounters {
        self.telemetry
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn reset(&mut self) {
        self.bank = None;
        self.initialized = false;
        self.telemetry.resets += 1;
    }

    fn wants_augmented(&self) -> bool {
        self.model == TargetModel::Coupled && self.mode != TargetMode::Static
    }

    fn refresh_vehicle_state(&mut self, inputs: &SensorInputs) {
        if let Some(a) = inputs.vehicle_acceleration {
            self.vehicle_acceleration = a;
        }
        if let Some(a) = inputs.vehicle_attitude {
            self.vehicle_attitude = a;
        }
        if let Some(p) = inputs.vehicle_local_position {
            self.vehicle_local_position = p;
        }
        if let Some(g) = inputs.vehicle_gps_position {
            self.vehicle_gps_position = g;
        }
    }

    /// Assemble every sensor sample present this tick, in the fixed
    /// order of spec §4.3/§5: target_gps_pos (or mission_landing when
    /// target GPS is unavailable), uav_gps_vel, vision, irlock, uwb.
    /// `AID_MASK` gating itself lives in each `assembler::*` function
    /// (`AssemblerError::Disabled`), not here — this just decides which
    /// of the mutually-exclusive position sources to try (§4.3:
    /// "target GPS wins") and whether the model wants vehicle velocity
    /// at all.
    fn assemble_all(&self, now: TimestampS, inputs: &SensorInputs) -> Vec<Observation> {
        let cfg = &self.cfg;
        let mut out = Vec::new();

        if cfg.aid_mask.contains(AidMask::TARGET_GPS) {
            if let Some(report) = &inputs.target_gnss_report {
                match assembler::target_gps_position(report, &self.vehicle_gps_position, now, cfg) {
                    Ok(obs) => out.push(obs),
                    Err(e) => log::debug!("target GPS position rejected: {e}"),
                }
            }
        } else if let Some(setpoint) = &inputs.position_setpoint_triplet {
            match assembler::mission_landing_position(setpoint, &self.vehicle_gps_position, now, cfg) {
                Ok(obs) => out.push(obs),
                Err(e) => log::debug!("mission landing position rejected: {e}"),
            }
        }

        if self.wants_augmented() {
            match assembler::uav_gps_velocity(&self.vehicle_gps_position, now, cfg) {
                Ok(obs) => out.push(obs),
                Err(e) => log::debug!("vehicle GPS velocity rejected: {e}"),
            }
        }

        if let Some(report) = &inputs.fiducial_marker_report {
            match assembler::vision(report, &self.vehicle_attitude, &self.vehicle_local_position, now, cfg) {
                Ok(obs) => out.push(obs),
                Err(e) => log::debug!("vision rejected: {e}"),
            }
        }

        if let Some(report) = &inputs.irlock_report {
            match assembler::irlock(report, &self.vehicle_attitude, &self.vehicle_local_position, now, cfg) {
                Ok(obs) => out.push(obs),
                Err(e) => log::debug!("irlock rejected: {e}"),
            }
        }

        if let Some(sample) = &inputs.uwb_distance {
            match assembler::uwb(sample, &self.vehicle_attitude, now, cfg) {
                Ok(obs) => out.push(obs),
                Err(e) => log::debug!("uwb rejected: {e}"),
            }
        }

        out
    }

    fn attempt_init(&mut self, now: TimestampS, inputs: &SensorInputs) {
        let candidate = self
            .assemble_all(now, inputs)
            .into_iter()
            .find(|obs| matches!(obs.quantity, crate::filters::ObservedQuantity::Position { .. }));

        let Some(obs) = candidate else { return };

        let vehicle_gps_vel = if self.cfg.aid_mask.contains(AidMask::REL_GPS_VEL) && self.vehicle_gps_position.fix_valid {
            Some(Vector3::from(self.vehicle_gps_position.vel_ned))
        } else {
            None
        };

        let init = lifecycle::initial_state(&obs, vehicle_gps_vel, self.mode, &self.cfg);
        let mut bank = FilterBank::new(self.mode, self.model, &self.cfg);
        bank.init(init.p0, init.vel0_or_vu0, init.bias0, InitialUncertainty::from_config(&self.cfg));

        self.bank = Some(bank);
        self.initialized = true;
        self.last_predict = now;
        self.last_update = now;
        log::debug!("estimator initialized from {:?} at t={now}", obs.kind);
    }

    fn poll_sensors(&mut self, now: TimestampS, inputs: &SensorInputs, innovations: &mut Vec<InnovationRecord>) {
        let observations = self.assemble_all(now, inputs);
        let cfg = self.cfg.clone();
        let bank = match self.bank.as_mut() {
            Some(b) => b,
            None => return,
        };

        for obs in observations {
            let outcomes = bank.update(
                obs.quantity,
                obs.mask,
                obs.z,
                obs.r_diag,
                |dof| if cfg.gate_enabled { cfg.gate_threshold(dof) } else { f64::INFINITY },
                cfg.gate_reject,
            );
            for outcome in outcomes {
                if outcome.fused {
                    self.last_update = now;
                } else {
                    self.telemetry.gated_rejections += 1;
                    log::debug!("{:?} update gated: test_ratio={}", obs.kind, outcome.test_ratio);
                }
                innovations.push(InnovationRecord {
                    sensor: obs.kind,
                    timestamp: obs.timestamp,
                    innovation: outcome.innovation.iter().copied().collect(),
                    innovation_variance: outcome.innovation_variance.iter().copied().collect(),
                    test_ratio: outcome.test_ratio,
                    fused: outcome.fused,
                });
            }
        }
    }

    /// Run one tick (spec §4.3 steps 1-6).
    pub fn tick(&mut self, now: TimestampS, inputs: &SensorInputs) -> TickOutput {
        self.refresh_vehicle_state(inputs);

        if !self.initialized {
            self.attempt_init(now, inputs);
        }

        if self.initialized {
            let dt = now - self.last_predict;
            if dt > 1.0 {
                log::warn!("predict gap {dt}s exceeds 1s, resetting");
                self.reset();
            } else if dt > 0.0 {
                let u = Vector3::from(self.vehicle_acceleration.xyz);
                self.bank.as_mut().expect("initialized implies bank present").predict(dt, u);
                self.last_predict = now;
            }
        }

        let mut innovations = Vec::new();
        if self.initialized {
            self.poll_sensors(now, inputs, &mut innovations);
        }

        if self.initialized && lifecycle::update_timeout_exceeded(now, self.last_update, self.cfg.btout) {
            log::warn!("no accepted update for {}s, resetting", self.cfg.btout);
            self.reset();
        }

        if self.initialized {
            let fault = self.bank.as_ref().map(|b| b.has_numeric_fault()).unwrap_or(false);
            if fault {
                log::warn!("numeric fault detected in filter state, resetting");
                self.telemetry.numeric_faults += 1;
                self.reset();
            }
        }

        self.publish(now, innovations)
    }

    fn publish(&self, now: TimestampS, innovations: Vec<InnovationRecord>) -> TickOutput {
        let valid = self.initialized;

        let (rel_pos, rel_pos_var, rel_vel, rel_vel_var, is_static, state, covariance_diag, bias, target_acceleration) =
            if let Some(bank) = &self.bank {
                (
                    to_array(bank.position()),
                    to_array(bank.position_variance()),
                    to_array(bank.relative_velocity()),
                    to_array(bank.velocity_variance()),
                    bank.is_static(),
                    bank.flat_state(),
                    bank.covariance_diag().iter().copied().collect(),
                    to_array(bank.bias()),
                    bank.target_acceleration().map(to_array),
                )
            } else {
                ([0.0; 3], [0.0; 3], [0.0; 3], [0.0; 3], self.mode == TargetMode::Static, Vec::new(), Vec::new(), [0.0; 3], None)
            };

        let pose = LandingTargetPose {
            timestamp: now,
            rel_pos,
            rel_pos_var,
            rel_vel,
            rel_vel_var,
            is_static,
            rel_pos_valid: valid,
            rel_vel_valid: valid,
            abs_pos_valid: valid && self.vehicle_gps_position.fix_valid,
        };

        let state = TargetEstimatorState { timestamp: now, state, covariance_diag, bias, target_acceleration };

        TickOutput { pose, state, innovations, telemetry: self.telemetry }
    }
}

fn to_array(v: Vector3<f64>) -> [f64; 3] {
    [v.x, v.y, v.z]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorRotation;

    fn stationary_gps() -> VehicleGpsPosition {
        VehicleGpsPosition {
            timestamp: 0.0,
            lat_deg: 47.0,
            lon_deg: 8.0,
            alt_m: 500.0,
            vel_ned: [0.0; 3],
            eph_m: 1.0,
            epv_m: 1.0,
            fix_valid: true,
        }
    }

    #[test]
    fn static_irlock_lock_on_converges() {
        let cfg = Config {
            aid_mask: AidMask::IRLOCK,
            mode: TargetMode::Static,
            model: TargetModel::Decoupled,
            sens_rot: SensorRotation::None,
            ..Config::default()
        };
        let mut est = Estimator::new(cfg);

        let mut inputs = SensorInputs {
            vehicle_attitude: Some(VehicleAttitude::default()),
            vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
            vehicle_gps_position: Some(stationary_gps()),
            ..Default::default()
        };

        let mut now = 0.0;
        let mut out = None;
        for i in 0..50 {
            now = i as f64 * 0.02;
            inputs.irlock_report = Some(IrlockReport { timestamp: now, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 });
            out = Some(est.tick(now, &inputs));
        }

        let pose = out.unwrap().pose;
        assert!(pose.rel_pos_valid);
        assert!((pose.rel_pos[0] - 0.5019).abs() < 0.05);
        assert!((pose.rel_pos[2] - (-5.0)).abs() < 0.05);
    }

    #[test]
    fn sensor_timeout_resets_then_reinitializes() {
        let cfg = Config { aid_mask: AidMask::IRLOCK, mode: TargetMode::Static, model: TargetModel::Decoupled, btout: 3.0, ..Config::default() };
        let mut est = Estimator::new(cfg);

        let mut inputs = SensorInputs {
            vehicle_attitude: Some(VehicleAttitude::default()),
            vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
            vehicle_gps_position: Some(stationary_gps()),
            ..Default::default()
        };

        inputs.irlock_report = Some(IrlockReport { timestamp: 0.0, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 });
        let out = est.tick(0.0, &inputs);
        assert!(out.pose.rel_pos_valid);

        inputs.irlock_report = None;
        let out = est.tick(3.5, &inputs);
        assert!(!out.pose.rel_pos_valid);
        assert_eq!(est.telemetry().resets, 1);

        inputs.irlock_report = Some(IrlockReport { timestamp: 4.0, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 });
        let out = est.tick(4.0, &inputs);
        assert!(out.pose.rel_pos_valid);
    }

    #[test]
    fn mode_switch_forces_reset() {
        let cfg = Config { aid_mask: AidMask::IRLOCK, mode: TargetMode::Static, model: TargetModel::Decoupled, ..Config::default() };
        let mut est = Estimator::new(cfg.clone());

        let mut inputs = SensorInputs {
            vehicle_attitude: Some(VehicleAttitude::default()),
            vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
            vehicle_gps_position: Some(stationary_gps()),
            irlock_report: Some(IrlockReport { timestamp: 0.0, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 }),
            ..Default::default()
        };
        let out = est.tick(0.0, &inputs);
        assert!(out.pose.rel_pos_valid);

        est.set_config(Config { mode: TargetMode::Moving, ..cfg });
        assert_eq!(est.telemetry().resets, 1);
        assert!(!est.is_initialized());

        inputs.irlock_report = Some(IrlockReport { timestamp: 0.02, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 });
        let out = est.tick(0.02, &inputs);
        assert!(out.pose.rel_pos_valid);
    }

    /// spec §8 "Reset idempotence": two consecutive resets produce
    /// identical pre-init state.
    #[test]
    fn reset_is_idempotent() {
        let cfg = Config { aid_mask: AidMask::IRLOCK, mode: TargetMode::Static, model: TargetModel::Decoupled, ..Config::default() };
        let mut est = Estimator::new(cfg);

        let inputs = SensorInputs {
            vehicle_attitude: Some(VehicleAttitude::default()),
            vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
            vehicle_gps_position: Some(stationary_gps()),
            irlock_report: Some(IrlockReport { timestamp: 0.0, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 }),
            ..Default::default()
        };
        est.tick(0.0, &inputs);
        assert!(est.is_initialized());

        est.reset();
        assert!(!est.initialized);
        assert!(est.bank.is_none());
        let last_predict_after_one = est.last_predict;
        let last_update_after_one = est.last_update;

        est.reset();
        assert!(!est.initialized);
        assert!(est.bank.is_none());
        assert_eq!(est.last_predict, last_predict_after_one);
        assert_eq!(est.last_update, last_update_after_one);
    }

    /// spec §8 "Monotonic time": `_last_predict` and `_last_update` are
    /// non-decreasing between resets.
    #[test]
    fn last_predict_and_last_update_are_monotonic_between_resets() {
        let cfg = Config { aid_mask: AidMask::IRLOCK, mode: TargetMode::Static, model: TargetModel::Decoupled, ..Config::default() };
        let mut est = Estimator::new(cfg);

        let mut inputs = SensorInputs {
            vehicle_attitude: Some(VehicleAttitude::default()),
            vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
            vehicle_gps_position: Some(stationary_gps()),
            ..Default::default()
        };

        let mut prev_predict = f64::NEG_INFINITY;
        let mut prev_update = f64::NEG_INFINITY;
        for i in 0..50 {
            let now = i as f64 * 0.02;
            inputs.irlock_report = Some(IrlockReport { timestamp: now, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 });
            est.tick(now, &inputs);
            assert!(est.last_predict >= prev_predict);
            assert!(est.last_update >= prev_update);
            prev_predict = est.last_predict;
            prev_update = est.last_update;
        }
    }
}
