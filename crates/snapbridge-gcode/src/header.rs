//! Snapmaker header generation.
//!
//! Two formats exist in the wild. J1/J1S firmware ("V1") requires a fixed
//! 25-line block; everything else (A150/A250/A350/A400/Artisan, "V0") uses
//! the older free-form key list. The touchscreen matches several keys
//! literally, including two misspelled `matierial_*` fields - they must be
//! emitted exactly as the firmware expects.

use crate::metadata::Metadata;
use std::fmt::Write;

/// Number of lines in a V1 header (without thumbnail).
const V1_HEADER_LINES: usize = 25;

/// PLA density in g/cm3, used for the display-only weight estimate.
const PLA_DENSITY: f64 = 1.24;

/// Filament diameter assumed for weight estimation, in mm.
const FILAMENT_DIAMETER: f64 = 1.75;

/// True for Snapmaker J1 family models.
pub fn is_j1_model(model: &str) -> bool {
    model.to_lowercase().contains("j1")
}

/// Generate the header for the printer model. `total_lines` is the line
/// count of the transformed body.
pub(crate) fn build(meta: &Metadata, printer_model: &str, total_lines: usize) -> String {
    if is_j1_model(printer_model) {
        build_v1(meta, total_lines)
    } else {
        build_v0(meta, printer_model)
    }
}

/// V1 header, required by the J1/J1S HMI to index and display files.
fn build_v1(meta: &Metadata, total_lines: usize) -> String {
    // IDEX modes are not detectable from gcode alone.
    let extruder_mode = "Default";

    let extruders_used = match (meta.tools_used[0], meta.tools_used[1]) {
        (true, true) => 2,
        _ => 1,
    };

    let mut b = String::new();
    b.push_str(";Header Start\n");
    b.push_str(";Version:1\n");
    b.push_str(";Printer:Snapmaker J1\n");
    let _ = writeln!(b, ";Estimated Print Time:{}", meta.estimated_time as i64);
    let _ = writeln!(b, ";Lines:{}", total_lines + V1_HEADER_LINES);
    let _ = writeln!(b, ";Extruder Mode:{extruder_mode}");

    for i in 0..2 {
        let mut material = meta.filament_type[i].as_str();
        let mut temp = meta.nozzle_temp[i];
        let mut retract = meta.retraction[i];
        let mut switch_retract = meta.switch_retraction[i];

        // Unused extruder slots are blanked out.
        if !meta.tools_used[i] && (i == 1 || !meta.tools_used[0]) {
            material = "-";
            temp = 0.0;
            retract = 0.0;
            switch_retract = 0.0;
        }

        let _ = writeln!(b, ";Extruder {i} Nozzle Size:{:.1}", meta.nozzle_diameter[i]);
        let _ = writeln!(b, ";Extruder {i} Material:{material}");
        let _ = writeln!(b, ";Extruder {i} Print Temperature:{temp:.0}");
        let _ = writeln!(b, ";Extruder {i} Retraction Distance:{retract:.2}");
        let _ = writeln!(b, ";Extruder {i} Switch Retraction Distance:{switch_retract:.2}");
    }

    let _ = writeln!(b, ";Bed Temperature:{:.0}", meta.bed_temp);
    let _ = writeln!(b, ";Work Range - Min X:{:.4}", meta.min_x);
    let _ = writeln!(b, ";Work Range - Min Y:{:.4}", meta.min_y);
    let _ = writeln!(b, ";Work Range - Min Z:{:.4}", meta.min_z);
    let _ = writeln!(b, ";Work Range - Max X:{:.4}", meta.max_x);
    let _ = writeln!(b, ";Work Range - Max Y:{:.4}", meta.max_y);
    let _ = writeln!(b, ";Work Range - Max Z:{:.4}", meta.max_z);
    let _ = writeln!(b, ";Extruder(s) Used:{extruders_used}");
    b.push_str(";Header End\n");

    b
}

/// V0 header, used by the SM2 family and Artisan.
fn build_v0(meta: &Metadata, printer_model: &str) -> String {
    let tool_head = if meta.tools_used[1] {
        "dualExtruderToolheadForSM2"
    } else {
        "singleExtruderToolheadForSM2"
    };

    let machine = if printer_model.is_empty() {
        "Snapmaker"
    } else {
        printer_model
    };

    let total_filament_mm = meta.filament_mm[0] + meta.filament_mm[1];
    let total_filament_m = total_filament_mm / 1000.0;

    // Display-only weight estimate: volume (cm3) x density. The firmware
    // shows this number but does not act on it.
    let radius_mm = FILAMENT_DIAMETER / 2.0;
    let volume_cm3 = total_filament_mm * std::f64::consts::PI * radius_mm * radius_mm / 1000.0;
    let weight_g = volume_cm3 * PLA_DENSITY;

    // The firmware's remaining-time display runs fast without the pad.
    let est_time = meta.estimated_time * 1.07;

    // Bitmask: 1 = T0, 2 = T1, 3 = both.
    let mut extruder_mask = 0;
    if meta.tools_used[0] {
        extruder_mask |= 1;
    }
    if meta.tools_used[1] {
        extruder_mask |= 2;
    }
    if extruder_mask == 0 {
        extruder_mask = 1;
    }

    let layer_height = if meta.layer_height == 0.0 {
        0.20
    } else {
        meta.layer_height
    };

    let mut b = String::new();
    b.push_str(";Header Start\n");
    b.push_str(";FAVOR:Marlin\n");
    // Hardcoded dummy; the real estimate goes in estimated_time(s).
    b.push_str(";TIME:6666\n");
    let _ = writeln!(b, ";Filament used: {total_filament_m:.5}m");
    let _ = writeln!(b, ";Layer height: {layer_height:.2}");
    b.push_str(";header_type: 3dp\n");
    let _ = writeln!(b, ";tool_head: {tool_head}");
    let _ = writeln!(b, ";machine: {machine}");
    let _ = writeln!(b, ";estimated_time(s): {est_time:.0}");
    let _ = writeln!(b, ";nozzle_temperature(\u{00b0}C): {:.0}", meta.nozzle_temp[0]);
    let _ = writeln!(b, ";nozzle_0_diameter(mm): {:.1}", meta.nozzle_diameter[0]);
    let _ = writeln!(b, ";nozzle_0_material: {}", meta.filament_type[0]);
    let _ = writeln!(b, ";nozzle_1_temperature(\u{00b0}C): {:.0}", meta.nozzle_temp[1]);
    let _ = writeln!(b, ";nozzle_1_diameter(mm): {:.1}", meta.nozzle_diameter[1]);
    let _ = writeln!(b, ";nozzle_1_material: {}", meta.filament_type[1]);
    let _ = writeln!(b, ";build_plate_temperature(\u{00b0}C): {:.0}", meta.bed_temp);
    let _ = writeln!(b, ";max_x(mm): {:.4}", meta.max_x);
    let _ = writeln!(b, ";max_y(mm): {:.4}", meta.max_y);
    let _ = writeln!(b, ";max_z(mm): {:.4}", meta.max_z);
    let _ = writeln!(b, ";min_x(mm): {:.4}", meta.min_x);
    let _ = writeln!(b, ";min_y(mm): {:.4}", meta.min_y);
    let _ = writeln!(b, ";min_z(mm): {:.4}", meta.min_z);
    let _ = writeln!(b, ";Extruder(s) Used = {extruder_mask}");
    // The misspellings are load-bearing: the firmware matches them literally.
    let _ = writeln!(b, ";matierial_weight: {weight_g:.4}");
    let _ = writeln!(b, ";matierial_length: {total_filament_m:.5}");
    b.push_str(";Header End\n");

    b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual_tool_meta() -> Metadata {
        Metadata {
            nozzle_temp: [210.0, 235.0],
            nozzle_temp_set: [true, true],
            bed_temp: 60.0,
            bed_temp_set: true,
            min_x: 10.0,
            min_y: 20.0,
            min_z: 0.2,
            max_x: 110.0,
            max_y: 120.0,
            max_z: 35.0,
            has_coords: true,
            filament_mm: [800.0, 400.0],
            layer_height: 0.2,
            estimated_time: 3600.0,
            tools_used: [true, true],
            ..Default::default()
        }
    }

    #[test]
    fn v1_header_is_exactly_25_lines() {
        let header = build(&dual_tool_meta(), "Snapmaker J1", 300);
        let lines: Vec<&str> = header.trim_end().split('\n').collect();
        assert_eq!(lines.len(), V1_HEADER_LINES);
        assert_eq!(lines[0], ";Header Start");
        assert_eq!(lines[V1_HEADER_LINES - 1], ";Header End");
    }

    #[test]
    fn v1_line_count_includes_header() {
        let header = build(&dual_tool_meta(), "Snapmaker J1S", 300);
        assert!(header.contains(";Lines:325\n"));
        assert!(header.contains(";Estimated Print Time:3600\n"));
        assert!(header.contains(";Extruder(s) Used:2\n"));
    }

    #[test]
    fn v1_blanks_unused_extruder() {
        let mut meta = dual_tool_meta();
        meta.tools_used = [true, false];
        let header = build(&meta, "Snapmaker J1", 10);
        assert!(header.contains(";Extruder 1 Material:-\n"));
        assert!(header.contains(";Extruder 1 Print Temperature:0\n"));
        assert!(header.contains(";Extruder 0 Material:PLA\n"));
        assert!(header.contains(";Extruder(s) Used:1\n"));
    }

    #[test]
    fn v0_header_fields() {
        let header = build(&dual_tool_meta(), "Snapmaker A350", 300);
        assert!(header.starts_with(";Header Start\n;FAVOR:Marlin\n;TIME:6666\n"));
        assert!(header.contains(";tool_head: dualExtruderToolheadForSM2\n"));
        assert!(header.contains(";machine: Snapmaker A350\n"));
        // 3600 * 1.07
        assert!(header.contains(";estimated_time(s): 3852\n"));
        assert!(header.contains(";Extruder(s) Used = 3\n"));
        assert!(header.contains(";Filament used: 1.20000m\n"));
    }

    #[test]
    fn v0_misspelled_fields_are_literal() {
        let header = build(&dual_tool_meta(), "Snapmaker A250", 300);
        assert!(header.contains(";matierial_length: 1.20000\n"));
        // 1200mm of 1.75mm filament at 1.24 g/cm3.
        let expected_weight = 1200.0 * std::f64::consts::PI * 0.875 * 0.875 / 1000.0 * 1.24;
        assert!(header.contains(&format!(";matierial_weight: {expected_weight:.4}\n")));
    }

    #[test]
    fn v0_single_tool_defaults() {
        let mut meta = Metadata::default();
        meta.filament_mm = [500.0, 0.0];
        meta.tools_used = [true, false];
        let header = build(&meta, "", 10);
        assert!(header.contains(";tool_head: singleExtruderToolheadForSM2\n"));
        assert!(header.contains(";machine: Snapmaker\n"));
        assert!(header.contains(";Extruder(s) Used = 1\n"));
        assert!(header.contains(";Layer height: 0.20\n"));
    }

    #[test]
    fn model_detection() {
        assert!(is_j1_model("Snapmaker J1"));
        assert!(is_j1_model("snapmaker j1s"));
        assert!(!is_j1_model("Snapmaker A350"));
        assert!(!is_j1_model(""));
    }
}
