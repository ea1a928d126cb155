//! Plays the end-to-end scenarios through a simulated fixed-rate
//! scheduler, exercising the estimator in isolation from any wider
//! flight-stack integration.

use clap::{Parser, ValueEnum};
use landing_target_estimator::config::{AidMask, TargetMode, TargetModel};
use landing_target_estimator::orchestrator::{Estimator, SensorInputs};
use landing_target_estimator::types::{
    FiducialMarkerReport, IrlockReport, TargetGnssReport, VehicleAttitude, VehicleGpsPosition, VehicleLocalPosition,
};
use landing_target_estimator::Config;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Scenario {
    IrlockStatic,
    VisionMoving,
    GpsBias,
}

#[derive(Parser, Debug)]
#[command(name = "landing_target_demo")]
struct Args {
    /// Which end-to-end scenario to replay.
    #[arg(long, value_enum, default_value = "irlock-static")]
    scenario: Scenario,
}

fn stationary_gps() -> VehicleGpsPosition {
    VehicleGpsPosition { timestamp: 0.0, lat_deg: 47.0, lon_deg: 8.0, alt_m: 500.0, vel_ned: [0.0; 3], eph_m: 1.0, epv_m: 1.0, fix_valid: true }
}

fn irlock_static_scenario() {
    println!("=== Static IRLOCK lock-on ===");
    let cfg = Config { aid_mask: AidMask::IRLOCK, mode: TargetMode::Static, model: TargetModel::Decoupled, ..Config::default() };
    let mut est = Estimator::new(cfg);

    let mut inputs = SensorInputs {
        vehicle_attitude: Some(VehicleAttitude::default()),
        vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
        vehicle_gps_position: Some(stationary_gps()),
        ..Default::default()
    };

    let dt = 0.02;
    for i in 0..50 {
        let now = i as f64 * dt;
        inputs.irlock_report = Some(IrlockReport { timestamp: now, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 });
        let out = est.tick(now, &inputs);
        if i == 49 {
            println!(
                "t={now:.2}s rel_pos=({:.4}, {:.4}, {:.4}) valid={}",
                out.pose.rel_pos[0], out.pose.rel_pos[1], out.pose.rel_pos[2], out.pose.rel_pos_valid
            );
        }
    }
}

fn vision_moving_scenario() {
    println!("=== Moving target via vision ===");
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
    for i in 0..steps {
        let now = i as f64 * dt;
        let x = 10.0 + 1.0 * now;
        inputs.fiducial_marker_report = Some(FiducialMarkerReport { timestamp: now, xyz: [x, 0.0, -5.0], covariance: None });
        let out = est.tick(now, &inputs);
        if i + 1 == steps {
            println!(
                "t={now:.2}s rel_vel=({:.3}, {:.3}, {:.3})",
                out.pose.rel_vel[0], out.pose.rel_vel[1], out.pose.rel_vel[2]
            );
        }
    }
}

fn gps_bias_scenario() {
    println!("=== GPS bias identification ===");
    let cfg = Config { aid_mask: AidMask::TARGET_GPS, mode: TargetMode::Static, model: TargetModel::Decoupled, ..Config::default() };
    let mut est = Estimator::new(cfg);

    let vehicle_gps = stationary_gps();
    let mut inputs = SensorInputs {
        vehicle_attitude: Some(VehicleAttitude::default()),
        vehicle_local_position: Some(VehicleLocalPosition { timestamp: 0.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true }),
        vehicle_gps_position: Some(vehicle_gps),
        ..Default::default()
    };

    // Target GPS consistently reports 20.5m East / 0.3m North instead of
    // the true 20m/0m offset; approximate the lat/lon that projects back
    // to that NED displacement from the vehicle's fix via the small-angle
    // inverse of the same equirectangular projection used by the
    // assembler.
    let earth_radius_m: f64 = 6.371e6;
    let dlat = 20.5 / earth_radius_m;
    let dlon = 0.3 / (earth_radius_m * vehicle_gps.lat_deg.to_radians().cos());
    let target_lat = vehicle_gps.lat_deg + dlat.to_degrees();
    let target_lon = vehicle_gps.lon_deg + dlon.to_degrees();

    let dt = 0.02;
    let steps = (10.0 / dt) as usize;
    for i in 0..steps {
        let now = i as f64 * dt;
        inputs.target_gnss_report = Some(TargetGnssReport { timestamp: now, lat_deg: target_lat, lon_deg: target_lon, alt_m: vehicle_gps.alt_m });
        let out = est.tick(now, &inputs);
        if i + 1 == steps {
            println!("t={now:.2}s bias=({:.3}, {:.3}, {:.3})", out.state.bias[0], out.state.bias[1], out.state.bias[2]);
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.scenario {
        Scenario::IrlockStatic => irlock_static_scenario(),
        Scenario::VisionMoving => vision_moving_scenario(),
        Scenario::GpsBias => gps_bias_scenario(),
    }
    Ok(())
}
