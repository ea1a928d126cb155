//! Cross-module end-to-end scenarios from spec §8, driving the public
//! `Estimator` the way an external scheduler would.

use landing_target_estimator::config::{AidMask, TargetMode, TargetModel};
use landing_target_estimator::orchestrator::SensorInputs;
use landing_target_estimator::types::{
    FiducialMarkerReport, IrlockReport, TargetGnssReport, VehicleAttitude, VehicleGpsPosition, VehicleLocalPosition,
};
use landing_target_estimator::{Config, Estimator};

fn stationary_gps() -> VehicleGpsPosition {
    VehicleGpsPosition { timestamp: 0.0, lat_deg: 47.0, lon_deg: 8.0, alt_m: 500.0, vel_ned: [0.0; 3], eph_m: 1.0, epv_m: 1.0, fix_valid: true }
}

#[test]
fn moving_target_via_vision_converges_on_velocity() {
    let cfg = Config { aid_mask: AidMask::VISION, mode: TargetMode::Moving, model: TargetModel::Coupled, ..Config::default() };
    let mut est = Estimator::new(cfg);

    let mut inputs = SensorInputs {
        vehicle_attitude: Some(VehicleAttitude::default()),
        vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
        vehicle_gps_position: Some(stationary_gps()),
        ..Default::default()
    };

    let dt = 0.05; // 20 Hz
    let steps = (5.0 / dt) as usize;
    let mut last_vel = [0.0; 3];
    for i in 0..steps {
        let now = i as f64 * dt;
        let x = 10.0 + 1.0 * now; // 0.1m-noise-free for determinism; gate math is what's under test
        inputs.fiducial_marker_report = Some(FiducialMarkerReport { timestamp: now, xyz: [x, 0.0, -5.0], covariance: None });
        let out = est.tick(now, &inputs);
        last_vel = out.pose.rel_vel;
    }

    assert!((last_vel[0] - 1.0).abs() < 0.1, "expected target velocity near (1,0,0), got {last_vel:?}");
    assert!(last_vel[1].abs() < 0.1);
}

#[test]
fn target_gps_bias_converges_and_stays_within_clamp() {
    let cfg = Config { aid_mask: AidMask::TARGET_GPS, mode: TargetMode::Static, model: TargetModel::Decoupled, bias_lim: 1.0, ..Config::default() };
    let mut est = Estimator::new(cfg);

    let vehicle_gps = stationary_gps();
    let earth_radius_m: f64 = 6.371e6;
    let dlat = 20.5 / earth_radius_m;
    let dlon = 0.3 / (earth_radius_m * vehicle_gps.lat_deg.to_radians().cos());
    let target_lat = vehicle_gps.lat_deg + dlat.to_degrees();
    let target_lon = vehicle_gps.lon_deg + dlon.to_degrees();

    let mut inputs = SensorInputs {
        vehicle_attitude: Some(VehicleAttitude::default()),
        vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
        vehicle_gps_position: Some(vehicle_gps),
        ..Default::default()
    };

    let dt = 0.02;
    let steps = (10.0 / dt) as usize;
    let mut last_bias = [0.0; 3];
    for i in 0..steps {
        let now = i as f64 * dt;
        inputs.target_gnss_report = Some(TargetGnssReport { timestamp: now, lat_deg: target_lat, lon_deg: target_lon, alt_m: vehicle_gps.alt_m });
        let out = est.tick(now, &inputs);
        last_bias = out.state.bias;
    }

    assert!((last_bias[0] - 0.5).abs() < 0.1, "expected bias.x near 0.5, got {last_bias:?}");
    assert!((last_bias[1] - 0.3).abs() < 0.1, "expected bias.y near 0.3, got {last_bias:?}");
    assert!(last_bias.iter().all(|b| b.abs() <= 1.0 + 1e-9));
}

#[test]
fn gate_rejection_keeps_state_drift_small() {
    let cfg = Config {
        aid_mask: AidMask::VISION,
        mode: TargetMode::Static,
        model: TargetModel::Decoupled,
        gate_enabled: true,
        gate_reject: true,
        ..Config::default()
    };
    let mut est = Estimator::new(cfg);

    let mut inputs = SensorInputs {
        vehicle_attitude: Some(VehicleAttitude::default()),
        vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
        vehicle_gps_position: Some(stationary_gps()),
        ..Default::default()
    };

    // Initialize cleanly at the true position.
    inputs.fiducial_marker_report = Some(FiducialMarkerReport { timestamp: 0.0, xyz: [10.0, 0.0, -5.0], covariance: None });
    let out = est.tick(0.0, &inputs);
    let settled_pos = out.pose.rel_pos;

    // A single wild outlier (100x the expected noise) one tick later.
    inputs.fiducial_marker_report = Some(FiducialMarkerReport { timestamp: 0.02, xyz: [20.0, 10.0, -5.0], covariance: None });
    let out = est.tick(0.02, &inputs);

    assert!(out.innovations.iter().any(|r| !r.fused), "expected the outlier to be gated out (fused=false)");
    let drift = (out.pose.rel_pos[0] - settled_pos[0]).abs() + (out.pose.rel_pos[1] - settled_pos[1]).abs();
    assert!(drift < 0.01, "state drifted {drift} after a gated outlier");
}

/// spec §8 "Sensor masking": if `AID_MASK` bit k is clear, observations
/// of type k never alter state. A fresh IRLOCK sample fed in on every
/// tick must leave the published trace byte-identical to a run where
/// IRLOCK is disabled in `AID_MASK` and the sample is absent entirely.
#[test]
fn disabled_sensor_never_alters_published_trace() {
    let cfg = Config { aid_mask: AidMask::VISION, mode: TargetMode::Static, model: TargetModel::Decoupled, ..Config::default() };
    let mut with_irlock_sample = Estimator::new(cfg.clone());
    let mut without_irlock_sample = Estimator::new(cfg);

    let mut base_inputs = SensorInputs {
        vehicle_attitude: Some(VehicleAttitude::default()),
        vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
        vehicle_gps_position: Some(stationary_gps()),
        ..Default::default()
    };

    for i in 0..20 {
        let now = i as f64 * 0.02;
        base_inputs.fiducial_marker_report = Some(FiducialMarkerReport { timestamp: now, xyz: [10.0, 0.0, -5.0], covariance: None });

        let mut inputs_with = base_inputs.clone();
        inputs_with.irlock_report = Some(IrlockReport { timestamp: now, angle_x: 0.5, angle_y: -0.3, signal_quality: 1.0 });

        let out_with = with_irlock_sample.tick(now, &inputs_with);
        let out_without = without_irlock_sample.tick(now, &base_inputs);

        assert_eq!(out_with.pose, out_without.pose, "masked IRLOCK sample altered the published pose at t={now}");
        assert_eq!(out_with.state, out_without.state, "masked IRLOCK sample altered the published state at t={now}");
    }
}
