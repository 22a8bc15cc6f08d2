//! Parsers for SACP query and subscription payloads.
//!
//! The firmware answers one-shot queries and streams subscription pushes
//! with the same payload layouts, so both paths share these parsers. A
//! record that is too short to hold its declared contents yields nothing;
//! callers discard silently because the firmware also emits records outside
//! the documented set.

use std::fmt;

/// Parsed extruder temperature info.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExtruderData {
    pub index: u8,
    /// From header byte 1: 0 = T0 (left), 1 = T1 (right) on the J1S.
    pub head_id: u8,
    pub current_temp: f64,
    pub target_temp: f64,
}

/// Parse nozzle query/subscription data (command set 0x10, id 0xA0).
///
/// Layout: 3-byte header `[_, head_id, count]`, then 17-byte records:
/// index(1) + filament_status(1) + filament_enable(1) + is_available(1)
/// + type(1) + diameter(i32 LE) + cur_temp(i32 LE) + target_temp(i32 LE).
/// Temperatures are in millidegrees.
pub fn parse_extruder_info(data: &[u8]) -> Vec<ExtruderData> {
    const RECORD_SIZE: usize = 17;

    if data.len() < 3 {
        return Vec::new();
    }
    let head_id = data[1];
    let count = data[2] as usize;

    let mut extruders = Vec::new();
    let mut offset = 3;
    for _ in 0..count {
        if offset + RECORD_SIZE > data.len() {
            break;
        }
        let record = &data[offset..offset + RECORD_SIZE];
        extruders.push(ExtruderData {
            index: record[0],
            head_id,
            current_temp: millidegrees(&record[9..13]),
            target_temp: millidegrees(&record[13..17]),
        });
        offset += RECORD_SIZE;
    }
    extruders
}

/// Parsed bed zone temperature info.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BedZoneData {
    pub index: u8,
    pub current_temp: f64,
    /// int16 on the wire; surfaces as whole degrees (units TBD upstream).
    pub target_temp: f64,
}

/// Parse heated bed query/subscription data (command set 0x14, id 0xA0).
///
/// Layout: 3-byte header `[_, key, zone_count]`, then 7-byte records:
/// zone_index(1) + cur_temp(i32 LE millidegrees) + target_temp(i16 LE).
pub fn parse_bed_info(data: &[u8]) -> Vec<BedZoneData> {
    const RECORD_SIZE: usize = 7;

    if data.len() < 3 {
        return Vec::new();
    }
    let count = data[2] as usize;

    let mut zones = Vec::new();
    let mut offset = 3;
    for _ in 0..count {
        if offset + RECORD_SIZE > data.len() {
            break;
        }
        let record = &data[offset..offset + RECORD_SIZE];
        let target = i16::from_le_bytes([record[5], record[6]]);
        zones.push(BedZoneData {
            index: record[0],
            current_temp: millidegrees(&record[1..5]),
            target_temp: target as f64,
        });
        offset += RECORD_SIZE;
    }
    zones
}

fn millidegrees(bytes: &[u8]) -> f64 {
    let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    raw as f64 / 1000.0
}

/// The printer's system status as reported by the heartbeat subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MachineStatus {
    #[default]
    Idle,
    Starting,
    Printing,
    Pausing,
    Paused,
    Stopping,
    Stopped,
    Finishing,
    Completed,
    Recovering,
    Resuming,
    Unknown(u8),
}

impl From<u8> for MachineStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Printing,
            3 => Self::Pausing,
            4 => Self::Paused,
            5 => Self::Stopping,
            6 => Self::Stopped,
            7 => Self::Finishing,
            8 => Self::Completed,
            9 => Self::Recovering,
            10 => Self::Resuming,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Starting => write!(f, "STARTING"),
            Self::Printing => write!(f, "PRINTING"),
            Self::Pausing => write!(f, "PAUSING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Finishing => write!(f, "FINISHING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Recovering => write!(f, "RECOVERING"),
            Self::Resuming => write!(f, "RESUMING"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

impl MachineStatus {
    /// A print job is running or spinning up.
    pub fn is_print_active(self) -> bool {
        matches!(self, Self::Printing | Self::Starting)
    }

    /// States in which cached per-print data (filename, line counts,
    /// elapsed time) is stale and must be cleared.
    pub fn clears_print_data(self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::Stopped)
    }
}

/// Parse heartbeat subscription data (command set 0x01, id 0xA0).
/// Layout: `[result, status]`.
pub fn parse_heartbeat(data: &[u8]) -> Option<MachineStatus> {
    if data.len() < 2 {
        return None;
    }
    Some(MachineStatus::from(data[1]))
}

/// Parse print line subscription data (command set 0xAC, id 0xA0).
/// Layout: `[result, current_line u32 LE]`.
pub fn parse_current_line(data: &[u8]) -> Option<u32> {
    u32_field(data)
}

/// Parse elapsed time subscription data (command set 0xAC, id 0xA5).
/// Layout: `[result, elapsed_seconds u32 LE]`.
pub fn parse_print_time(data: &[u8]) -> Option<u32> {
    u32_field(data)
}

fn u32_field(data: &[u8]) -> Option<u32> {
    if data.len() < 5 {
        return None;
    }
    Some(u32::from_le_bytes([data[1], data[2], data[3], data[4]]))
}

/// Parsed fan info from the fan subscription (command set 0x10, id 0xA3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanData {
    pub head_id: u8,
    pub fan_index: u8,
    /// 0 = part fan, 2 = hotend fan.
    pub fan_type: u8,
    /// 0-255.
    pub speed: u8,
}

/// Parse fan subscription data.
/// Layout: `[result, head_id, fan_count]`, then 3-byte records
/// `[fan_index, fan_type, fan_speed]`.
pub fn parse_fan_info(data: &[u8]) -> Vec<FanData> {
    if data.len() < 3 {
        return Vec::new();
    }
    let head_id = data[1];
    let count = data[2] as usize;

    let mut fans = Vec::new();
    let mut offset = 3;
    for _ in 0..count {
        if offset + 3 > data.len() {
            break;
        }
        fans.push(FanData {
            head_id,
            fan_index: data[offset],
            fan_type: data[offset + 1],
            speed: data[offset + 2],
        });
        offset += 3;
    }
    fans
}

/// Parsed position info.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoordinateData {
    pub homed: bool,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Parse coordinate data (command set 0x01, id 0x30).
///
/// Layout: `[result, homed(0 = yes), coord_system_id, is_origin_offset,
/// axis_count]`, then 5-byte records `[axis_id, position i32 LE]` in
/// micrometers. Axis ids 0/1/2 map to X/Y/Z.
pub fn parse_coordinate_info(data: &[u8]) -> Option<CoordinateData> {
    if data.len() < 5 {
        return None;
    }

    let mut cd = CoordinateData {
        homed: data[1] == 0,
        ..Default::default()
    };
    let axis_count = data[4] as usize;

    let mut offset = 5;
    for _ in 0..axis_count {
        if offset + 5 > data.len() {
            break;
        }
        let raw = i32::from_le_bytes([
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
            data[offset + 4],
        ]);
        let value = raw as f64 / 1000.0;
        match data[offset] {
            0 => cd.x = value,
            1 => cd.y = value,
            2 => cd.z = value,
            _ => {}
        }
        offset += 5;
    }

    Some(cd)
}

/// Parsed file info for the current print job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrintFileInfo {
    pub md5: String,
    pub filename: String,
    pub total_lines: u32,
    /// Seconds.
    pub estimated_time: u32,
}

/// Parse a file info query response (command set 0xAC, id 0x00).
/// Layout: `[result]`, length-prefixed md5, length-prefixed filename.
pub fn parse_file_info(data: &[u8]) -> Option<PrintFileInfo> {
    if data.len() < 3 || data[0] != 0 {
        return None;
    }
    let mut offset = 1;
    let md5 = take_string(data, &mut offset)?;
    let filename = take_string(data, &mut offset)?;

    Some(PrintFileInfo {
        md5,
        filename,
        ..Default::default()
    })
}

/// Parse a printing file info response from the screen MCU
/// (command set 0xAC, id 0x1A).
/// Layout: `[result]`, length-prefixed filename, u32 LE total lines,
/// u32 LE estimated seconds. The trailing fields may be absent.
pub fn parse_printing_file_info(data: &[u8]) -> Option<PrintFileInfo> {
    if data.len() < 3 || data[0] != 0 {
        return None;
    }
    let mut offset = 1;
    let filename = take_string(data, &mut offset)?;

    let mut info = PrintFileInfo {
        filename,
        ..Default::default()
    };
    if offset + 4 <= data.len() {
        info.total_lines =
            u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]);
        offset += 4;
    }
    if offset + 4 <= data.len() {
        info.estimated_time =
            u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]);
    }
    Some(info)
}

/// Read a u16-length-prefixed string, advancing `offset`.
fn take_string(data: &[u8], offset: &mut usize) -> Option<String> {
    if *offset + 2 > data.len() {
        return None;
    }
    let len = u16::from_le_bytes([data[*offset], data[*offset + 1]]) as usize;
    *offset += 2;
    if *offset + len > data.len() {
        return None;
    }
    let s = String::from_utf8_lossy(&data[*offset..*offset + len]).into_owned();
    *offset += len;
    Some(s)
}
