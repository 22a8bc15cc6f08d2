//! # Snapbridge GCode
//!
//! Post-processes sliced gcode for Snapmaker printers. The printer's
//! touchscreen only indexes files that begin with a firmware-specific
//! comment header, and dual-extruder models address tools T0/T1 while
//! slicers may emit T2+ for multi-material setups.
//!
//! Processing is two passes over the file:
//! 1. a metadata scan (temperatures, extrusion, bounds, slicer comments)
//! 2. a rewrite (tool remapping, unused-nozzle shutoff insertion)
//!
//! followed by header generation in the format the target model expects.

mod header;
mod metadata;
mod transform;

pub use header::is_j1_model;

/// Transform raw gcode for the given printer model: remap tool numbers for
/// dual-extruder compatibility and prepend the metadata header the
/// touchscreen requires for indexing.
///
/// Idempotent: input already carrying a `;Header Start` marker is returned
/// unchanged.
pub fn process(data: &[u8], printer_model: &str) -> Vec<u8> {
    let content = String::from_utf8_lossy(data);

    if content.contains(";Header Start") {
        tracing::debug!("gcode header already present, skipping processing");
        return data.to_vec();
    }

    // Normalize line endings.
    let content = content.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = content.split('\n').collect();

    let meta = metadata::scan(&lines);
    tracing::debug!(
        lines = lines.len(),
        max_tool = meta.max_tool,
        nozzle_temps = ?meta.nozzle_temp,
        bed_temp = meta.bed_temp,
        filament_mm = ?meta.filament_mm,
        estimated_s = meta.estimated_time,
        "scanned gcode metadata"
    );

    let transformed = transform::transform(&lines, &meta);
    let header = header::build(&meta, printer_model, transformed.len());
    tracing::debug!(
        header_bytes = header.len(),
        output_lines = transformed.len(),
        "gcode header prepended"
    );

    let mut out = header.into_bytes();
    out.extend_from_slice(transformed.join("\n").as_bytes());
    out
}
