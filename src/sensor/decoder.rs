// Decoding of the sensor query-list response into named readings
//
// SENSOR_PACKETS is both the request and the response layout: segment i of
// the reply belongs to SENSOR_PACKETS[i].

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::ProtocolError;
use crate::oi::packet_size;

/// Packets requested on every readings query, in response order
pub const SENSOR_PACKETS: [u8; 28] = [
    7,  // bumps and wheel drops
    8,  // wall
    9,  // cliff left
    10, // cliff front left
    11, // cliff front right
    12, // cliff right
    13, // virtual wall
    14, // overcurrents
    15, // dirt detect
    17, // IR opcode
    18, // buttons
    19, // distance (mm, signed, since last read)
    20, // angle (deg, signed, since last read)
    21, // charging state
    22, // voltage (mV)
    23, // current (mA, signed)
    24, // temperature (C, signed)
    25, // battery charge (mAh)
    26, // battery capacity (mAh)
    27, // wall signal
    28, // cliff left signal
    29, // cliff front left signal
    30, // cliff front right signal
    31, // cliff right signal
    34, // charging sources available
    35, // OI mode
    39, // requested velocity (mm/s, signed)
    40, // requested radius (mm, signed)
];

pub const CHARGING_STATES: [&str; 6] = [
    "not_charging",
    "reconditioning",
    "full_charging",
    "trickle_charging",
    "waiting",
    "charging_fault",
];

pub const OI_MODES: [&str; 4] = ["off", "passive", "safe", "full"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
}

impl ReadingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One full set of readings, keyed by name
pub type Reading = BTreeMap<&'static str, ReadingValue>;

fn lookup(table: &[&'static str], index: u8) -> &'static str {
    table.get(index as usize).copied().unwrap_or("unknown")
}

struct Fields<'a> {
    reading: Reading,
    segments: &'a [Vec<u8>],
}

impl Fields<'_> {
    fn byte(&self, idx: usize) -> u8 {
        self.segments[idx][0]
    }

    fn u16(&self, idx: usize) -> u16 {
        u16::from_be_bytes([self.segments[idx][0], self.segments[idx][1]])
    }

    fn i16(&self, idx: usize) -> i16 {
        i16::from_be_bytes([self.segments[idx][0], self.segments[idx][1]])
    }

    fn flags(&mut self, idx: usize, bits: &[(&'static str, u8)]) {
        let value = self.byte(idx);
        for &(key, mask) in bits {
            self.reading.insert(key, ReadingValue::Bool(value & mask != 0));
        }
    }

    fn int(&mut self, key: &'static str, value: impl Into<i64>) {
        self.reading.insert(key, ReadingValue::Int(value.into()));
    }

    fn text(&mut self, key: &'static str, value: &'static str) {
        self.reading.insert(key, ReadingValue::Text(value));
    }
}

/// Decode one segment per SENSOR_PACKETS entry into a fresh reading map
pub fn decode(segments: &[Vec<u8>]) -> Result<Reading, ProtocolError> {
    if segments.len() != SENSOR_PACKETS.len() {
        return Err(ProtocolError::CountMismatch {
            expected: SENSOR_PACKETS.len(),
            got: segments.len(),
        });
    }
    for (&id, segment) in SENSOR_PACKETS.iter().zip(segments) {
        let expected = packet_size(id).unwrap_or(0);
        if segment.len() != expected {
            return Err(ProtocolError::SegmentSize {
                id,
                expected,
                got: segment.len(),
            });
        }
    }

    let mut f = Fields {
        reading: Reading::new(),
        segments,
    };

    f.flags(
        0,
        &[
            ("bump_right", 0x01),
            ("bump_left", 0x02),
            ("wheel_drop_right", 0x04),
            ("wheel_drop_left", 0x08),
        ],
    );
    f.flags(1, &[("wall", 0x01)]);
    f.flags(2, &[("cliff_left", 0x01)]);
    f.flags(3, &[("cliff_front_left", 0x01)]);
    f.flags(4, &[("cliff_front_right", 0x01)]);
    f.flags(5, &[("cliff_right", 0x01)]);
    f.flags(6, &[("virtual_wall", 0x01)]);

    // Bit 1 is unused on this packet
    f.flags(
        7,
        &[
            ("overcurrent_side_brush", 0x01),
            ("overcurrent_main_brush", 0x04),
            ("overcurrent_right_wheel", 0x08),
            ("overcurrent_left_wheel", 0x10),
        ],
    );

    f.int("dirt_detect", f.byte(8));
    f.int("ir_opcode", f.byte(9));

    f.flags(
        10,
        &[
            ("button_clean", 0x01),
            ("button_spot", 0x02),
            ("button_dock", 0x04),
            ("button_minute", 0x08),
            ("button_hour", 0x10),
            ("button_day", 0x20),
            ("button_schedule", 0x40),
            ("button_clock", 0x80),
        ],
    );

    f.int("distance_mm", f.i16(11));
    f.int("angle_deg", f.i16(12));

    f.text("charging_state", lookup(&CHARGING_STATES, f.byte(13)));

    f.int("voltage_mv", f.u16(14));
    f.int("current_ma", f.i16(15));
    f.int("temperature_c", f.byte(16) as i8);

    let charge = f.u16(17);
    let capacity = f.u16(18);
    f.int("battery_charge_mah", charge);
    f.int("battery_capacity_mah", capacity);
    // Absent rather than 0% when capacity is unknown
    if capacity > 0 {
        f.reading.insert(
            "battery_percent",
            ReadingValue::Float(f64::from(charge) / f64::from(capacity) * 100.0),
        );
    }

    f.int("wall_signal", f.u16(19));
    f.int("cliff_left_signal", f.u16(20));
    f.int("cliff_front_left_signal", f.u16(21));
    f.int("cliff_front_right_signal", f.u16(22));
    f.int("cliff_right_signal", f.u16(23));

    f.flags(24, &[("charger_internal", 0x01), ("charger_homebase", 0x02)]);

    f.text("oi_mode", lookup(&OI_MODES, f.byte(25)));

    f.int("requested_velocity_mms", f.i16(26));
    f.int("requested_radius_mm", f.i16(27));

    Ok(f.reading)
}
