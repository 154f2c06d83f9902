//! # Vehicle Type Table
//!
//! Maps MAV_TYPE codes (as reported in HEARTBEAT) to the number of
//! propulsion actuators tracked for that kind of vehicle.
//!
//! | MAV_TYPE | Code | Thrusters |
//! |----------|------|-----------|
//! | QUADROTOR | 2 | 4 |
//! | GROUND_ROVER | 10 | 2 |
//! | SURFACE_BOAT | 11 | 2 |
//! | SUBMARINE | 12 | 6 |
//! | HEXAROTOR | 13 | 6 |
//! | OCTOROTOR | 14 | 8 |
//! | TRICOPTER | 15 | 3 |

/// MAV_TYPE_SUBMARINE
pub const MAV_TYPE_SUBMARINE: u8 = 12;

const VEHICLE_TYPES: &[(&str, u8, usize)] = &[
    ("MAV_TYPE_QUADROTOR", 2, 4),
    ("MAV_TYPE_GROUND_ROVER", 10, 2),
    ("MAV_TYPE_SURFACE_BOAT", 11, 2),
    ("MAV_TYPE_SUBMARINE", MAV_TYPE_SUBMARINE, 6),
    ("MAV_TYPE_HEXAROTOR", 13, 6),
    ("MAV_TYPE_OCTOROTOR", 14, 8),
    ("MAV_TYPE_TRICOPTER", 15, 3),
];

/// Resolve a mavlink2rest enum name (e.g. `"MAV_TYPE_SUBMARINE"`) to its code.
///
/// The `MAV_TYPE_` prefix is optional and matching ignores case.
pub fn code_from_name(name: &str) -> Option<u8> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("MAV_TYPE_") {
        upper
    } else {
        format!("MAV_TYPE_{}", upper)
    };

    VEHICLE_TYPES
        .iter()
        .find(|(known, _, _)| *known == full)
        .map(|(_, code, _)| *code)
}

/// Number of thrusters for a vehicle type, `None` for types we do not track.
///
/// # Examples
///
/// ```
/// use rov_odometer::telemetry::vehicle::{thruster_count, MAV_TYPE_SUBMARINE};
///
/// assert_eq!(thruster_count(MAV_TYPE_SUBMARINE), Some(6));
/// assert_eq!(thruster_count(0), None);
/// ```
pub fn thruster_count(code: u8) -> Option<usize> {
    VEHICLE_TYPES
        .iter()
        .find(|(_, known, _)| *known == code)
        .map(|(_, _, count)| *count)
}
