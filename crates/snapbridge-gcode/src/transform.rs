//! Rewrite pass.
//!
//! When the file addresses tools beyond T1, every tool reference is
//! remapped mod 2 onto the printer's two physical extruders, and heater
//! shutoff commands are inserted at the last hand-off away from a tool.
//! Files using only T0/T1 pass through byte-identical.

use crate::metadata::{parse_tool_change, Metadata};

/// Rewrite gcode lines: remap tool numbers and insert nozzle shutoffs.
pub(crate) fn transform(lines: &[&str], meta: &Metadata) -> Vec<String> {
    let need_remap = meta.max_tool > 1;
    let mut result: Vec<String> = Vec::with_capacity(lines.len() + 8);
    let mut current_tool: u32 = 0;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        let (code_part, comment_part) = match trimmed.find(';') {
            Some(idx) => (trimmed[..idx].trim(), &trimmed[idx..]),
            None => (trimmed, ""),
        };

        if code_part.is_empty() {
            result.push((*line).to_string());
            continue;
        }

        let upper = code_part.to_uppercase();

        // Tool change.
        if let Some(n) = parse_tool_change(&upper) {
            let prev_tool = (current_tool % 2) as usize;
            current_tool = n;
            let new_tool = (n % 2) as usize;

            if need_remap && n > 1 {
                let mut out = format!("T{new_tool}");
                if !comment_part.is_empty() {
                    out.push(' ');
                    out.push_str(comment_part);
                }
                result.push(out);
            } else {
                result.push((*line).to_string());
            }

            // The outgoing tool is done for good once its last active line
            // is behind us; turn its heater off.
            if need_remap
                && prev_tool != new_tool
                && meta.last_tool_line[prev_tool].is_some_and(|last| last <= i)
            {
                result.push(format!("M104 S0 T{prev_tool} ; shutoff unused nozzle"));
            }

            continue;
        }

        if need_remap && (upper.starts_with("M104 ") || upper.starts_with("M109 ")) {
            result.push(remap_param(line, code_part, comment_part, b'T'));
            continue;
        }

        if need_remap && (upper.starts_with("M106 ") || upper.starts_with("M107 ")) {
            result.push(remap_param(line, code_part, comment_part, b'P'));
            continue;
        }

        result.push((*line).to_string());
    }

    result
}

/// Rewrite a parameter (T or P) with values > 1 using mod 2, preserving the
/// trailing comment. Untouched lines are returned verbatim.
fn remap_param(original: &str, code_part: &str, comment_part: &str, param: u8) -> String {
    let lower = param.to_ascii_lowercase();
    let mut fields: Vec<String> = code_part.split_whitespace().map(str::to_string).collect();
    let mut changed = false;

    for field in &mut fields {
        let bytes = field.as_bytes();
        if bytes.len() >= 2 && (bytes[0] == param || bytes[0] == lower) {
            if let Ok(n) = field[1..].parse::<u32>() {
                if n > 1 {
                    *field = format!("{}{}", param as char, n % 2);
                    changed = true;
                }
            }
        }
    }

    if !changed {
        return original.to_string();
    }
    let mut out = fields.join(" ");
    if !comment_part.is_empty() {
        out.push(' ');
        out.push_str(comment_part);
    }
    out
}
