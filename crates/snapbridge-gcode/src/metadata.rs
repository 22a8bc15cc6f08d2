//! Metadata scan pass.
//!
//! One pass over all lines collecting what the header generators and the
//! rewrite pass need: first-seen temperatures, per-tool extrusion totals,
//! coordinate bounds, slicer comment values, and where each tool is last
//! active. Malformed numeric fields are skipped, the scan never fails.

/// Extracted gcode metadata. Tool-indexed arrays are in remapped (mod 2)
/// tool space.
#[derive(Debug, Clone)]
pub(crate) struct Metadata {
    pub nozzle_temp: [f64; 2],
    pub nozzle_temp_set: [bool; 2],
    pub bed_temp: f64,
    pub bed_temp_set: bool,

    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
    pub has_coords: bool,

    /// Per-tool filament extruded, in mm.
    pub filament_mm: [f64; 2],
    pub layer_height: f64,
    /// Seconds.
    pub estimated_time: f64,
    pub tools_used: [bool; 2],
    pub filament_type: [String; 2],
    pub nozzle_diameter: [f64; 2],
    pub retraction: [f64; 2],
    pub switch_retraction: [f64; 2],
    /// Highest tool number observed anywhere in the file.
    pub max_tool: u32,
    /// Last line index where each remapped tool is active.
    pub last_tool_line: [Option<usize>; 2],
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            nozzle_temp: [0.0; 2],
            nozzle_temp_set: [false; 2],
            bed_temp: 0.0,
            bed_temp_set: false,
            min_x: f64::MAX,
            min_y: f64::MAX,
            min_z: f64::MAX,
            max_x: f64::MIN,
            max_y: f64::MIN,
            max_z: f64::MIN,
            has_coords: false,
            filament_mm: [0.0; 2],
            layer_height: 0.0,
            estimated_time: 0.0,
            tools_used: [false; 2],
            filament_type: ["PLA".to_string(), "PLA".to_string()],
            nozzle_diameter: [0.4; 2],
            retraction: [0.8; 2],
            switch_retraction: [0.0; 2],
            max_tool: 0,
            last_tool_line: [None; 2],
        }
    }
}

/// Parse a tool-change word (`T0`, `T1`, ...). Only a bare `T<number>`
/// counts; words like `TURN` are not tool changes.
pub(crate) fn parse_tool_change(code: &str) -> Option<u32> {
    let rest = code.strip_prefix(['T', 't'])?;
    rest.parse().ok()
}

/// Scan all gcode lines for metadata.
pub(crate) fn scan(lines: &[&str]) -> Metadata {
    let mut meta = Metadata::default();

    let mut current_tool: u32 = 0;
    let mut relative = false;
    let mut last_abs_e = 0.0_f64;
    let mut prev_z = 0.0_f64;
    let mut z_moves = 0_u32;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        // Pure comment line.
        if trimmed.starts_with(';') {
            scan_comment(trimmed, &mut meta);
            continue;
        }

        // Split code and inline comment.
        let code_part = match trimmed.find(';') {
            Some(idx) => {
                scan_comment(&trimmed[idx..], &mut meta);
                trimmed[..idx].trim()
            }
            None => trimmed,
        };
        if code_part.is_empty() {
            continue;
        }

        let upper = code_part.to_uppercase();

        // Tool change.
        if let Some(n) = parse_tool_change(&upper) {
            current_tool = n;
            meta.max_tool = meta.max_tool.max(n);
            let remapped = (n % 2) as usize;
            meta.tools_used[remapped] = true;
            meta.last_tool_line[remapped] = Some(i);
            continue;
        }

        // Extrusion mode.
        match upper.as_str() {
            "M82" => {
                relative = false;
                continue;
            }
            "M83" => {
                relative = true;
                continue;
            }
            _ => {}
        }

        // G92 resets the absolute extrusion baseline.
        if upper.starts_with("G92") {
            for field in code_part.split_whitespace() {
                if field.len() >= 2 && field.starts_with(['E', 'e']) {
                    if let Ok(v) = field[1..].parse::<f64>() {
                        last_abs_e = v;
                    }
                }
            }
        }

        // Temperature commands.
        if upper.starts_with("M104 ") || upper.starts_with("M109 ") {
            scan_temp_command(code_part, current_tool, &mut meta, false);
        } else if upper.starts_with("M140 ") || upper.starts_with("M190 ") {
            scan_temp_command(code_part, current_tool, &mut meta, true);
        }

        // G0/G1 move commands.
        if is_move(&upper) {
            let remapped = (current_tool % 2) as usize;
            for field in code_part.split_whitespace().skip(1) {
                if field.len() < 2 {
                    continue;
                }
                let Ok(value) = field[1..].parse::<f64>() else {
                    continue;
                };
                match field.as_bytes()[0] {
                    b'X' | b'x' => {
                        meta.has_coords = true;
                        meta.min_x = meta.min_x.min(value);
                        meta.max_x = meta.max_x.max(value);
                    }
                    b'Y' | b'y' => {
                        meta.has_coords = true;
                        meta.min_y = meta.min_y.min(value);
                        meta.max_y = meta.max_y.max(value);
                    }
                    b'Z' | b'z' => {
                        meta.has_coords = true;
                        meta.min_z = meta.min_z.min(value);
                        meta.max_z = meta.max_z.max(value);
                        // Derive layer height from the first positive Z
                        // step when no slicer comment provided one.
                        if meta.layer_height == 0.0 && z_moves > 0 && value > prev_z {
                            meta.layer_height = value - prev_z;
                        }
                        prev_z = value;
                        z_moves += 1;
                    }
                    b'E' | b'e' => {
                        meta.last_tool_line[remapped] = Some(i);
                        if relative {
                            if value > 0.0 {
                                meta.filament_mm[remapped] += value;
                            }
                        } else {
                            if value > last_abs_e {
                                meta.filament_mm[remapped] += value - last_abs_e;
                            }
                            last_abs_e = value;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if !meta.has_coords {
        meta.min_x = 0.0;
        meta.min_y = 0.0;
        meta.min_z = 0.0;
        meta.max_x = 0.0;
        meta.max_y = 0.0;
        meta.max_z = 0.0;
    }

    // A file may extrude on T0 without ever issuing a T word.
    if meta.filament_mm[0] > 0.0 {
        meta.tools_used[0] = true;
    }
    if meta.filament_mm[1] > 0.0 {
        meta.tools_used[1] = true;
    }

    meta
}

fn is_move(upper: &str) -> bool {
    upper.starts_with("G0 ")
        || upper.starts_with("G1 ")
        || upper.starts_with("G0\t")
        || upper.starts_with("G1\t")
        || upper == "G0"
        || upper == "G1"
}

/// Extract metadata from a gcode comment.
fn scan_comment(comment: &str, meta: &mut Metadata) {
    let s = comment.trim_start_matches([';', ' ']);
    let lower = s.to_lowercase();

    // ;TIME:3600 (Cura/OrcaSlicer).
    if let Some(rest) = lower.strip_prefix("time:") {
        if meta.estimated_time == 0.0 {
            if let Ok(v) = rest.trim().parse::<f64>() {
                meta.estimated_time = v;
            }
        }
        return;
    }

    // Key = value pairs (PrusaSlicer / SuperSlicer).
    let Some(idx) = s.find('=') else { return };
    let key = s[..idx].trim().to_lowercase();
    let value = s[idx + 1..].trim();

    match key.as_str() {
        "layer_height" => {
            if meta.layer_height == 0.0 {
                if let Ok(v) = value.parse::<f64>() {
                    meta.layer_height = v;
                }
            }
        }
        "estimated printing time" | "estimated printing time (normal mode)" => {
            if meta.estimated_time == 0.0 {
                meta.estimated_time = parse_duration(value);
            }
        }
        "filament_type" => {
            // Semicolon-separated for multi-tool, e.g. "PLA;PETG".
            let mut parts = value.split(';');
            if let Some(t) = parts.next().map(str::trim).filter(|t| !t.is_empty()) {
                meta.filament_type[0] = t.to_string();
            }
            if let Some(t) = parts.next().map(str::trim).filter(|t| !t.is_empty()) {
                meta.filament_type[1] = t.to_string();
            }
        }
        "nozzle_diameter" => {
            // Comma-separated for multi-tool.
            let mut parts = value.split(',');
            if let Some(Ok(v)) = parts.next().map(|p| p.trim().parse::<f64>()) {
                meta.nozzle_diameter[0] = v;
            }
            if let Some(Ok(v)) = parts.next().map(|p| p.trim().parse::<f64>()) {
                meta.nozzle_diameter[1] = v;
            }
        }
        "retract_length" => {
            if let Some(Ok(v)) = value.split(',').next().map(|p| p.parse::<f64>()) {
                meta.retraction = [v, v];
            }
        }
        "retract_length_toolchange" => {
            if let Some(Ok(v)) = value.split(',').next().map(|p| p.parse::<f64>()) {
                meta.switch_retraction = [v, v];
            }
        }
        _ => {}
    }
}

/// Extract temperatures from M104/M109/M140/M190. The first non-zero S
/// value per heater wins; an explicit T parameter overrides the current
/// tool for nozzle commands.
fn scan_temp_command(line: &str, current_tool: u32, meta: &mut Metadata, is_bed: bool) {
    let mut s_value = 0.0_f64;
    let mut tool = current_tool;

    for field in line.split_whitespace().skip(1) {
        if field.len() < 2 {
            continue;
        }
        match field.as_bytes()[0] {
            b'S' | b's' => {
                if let Ok(v) = field[1..].parse::<f64>() {
                    s_value = v;
                }
            }
            b'T' | b't' => {
                if let Ok(v) = field[1..].parse::<u32>() {
                    tool = v;
                }
            }
            _ => {}
        }
    }

    if is_bed {
        if !meta.bed_temp_set && s_value > 0.0 {
            meta.bed_temp = s_value;
            meta.bed_temp_set = true;
        }
    } else {
        let remapped = (tool % 2) as usize;
        if !meta.nozzle_temp_set[remapped] && s_value > 0.0 {
            meta.nozzle_temp[remapped] = s_value;
            meta.nozzle_temp_set[remapped] = true;
        }
        meta.max_tool = meta.max_tool.max(tool);
    }
}

/// Parse human-readable durations like "1h 30m 15s" to seconds. Plain
/// numbers are taken as seconds already.
pub(crate) fn parse_duration(s: &str) -> f64 {
    let s: String = s.chars().filter(|c| *c != ' ').collect();

    if let Ok(v) = s.parse::<f64>() {
        return v;
    }

    let mut total = 0.0;
    let mut rest = s.as_str();
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 || digits >= rest.len() {
            break;
        }
        let Ok(value) = rest[..digits].parse::<f64>() else {
            break;
        };
        match rest.as_bytes()[digits] {
            b'd' | b'D' => total += value * 86_400.0,
            b'h' | b'H' => total += value * 3_600.0,
            b'm' | b'M' => total += value * 60.0,
            b's' | b'S' => total += value,
            _ => {}
        }
        rest = &rest[digits + 1..];
    }

    total
}
