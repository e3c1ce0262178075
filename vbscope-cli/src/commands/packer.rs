use std::path::Path;

use serde::Serialize;
use vbscope::metadata::packer::detect_packer;

use crate::app::GlobalOptions;
use crate::output::print_output;

#[derive(Serialize)]
struct PackerReport {
    packed: bool,
    packer: Option<String>,
    confidence: Option<f64>,
    method: Option<String>,
    advisory: Option<String>,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let file = super::load_file(path)?;

    let report = match detect_packer(&file) {
        Some(detection) => PackerReport {
            packed: true,
            packer: Some(detection.packer.name().to_string()),
            confidence: Some(detection.confidence),
            method: Some(detection.method.clone()),
            advisory: Some(detection.packer.advisory().to_string()),
        },
        None => PackerReport {
            packed: false,
            packer: None,
            confidence: None,
            method: None,
            advisory: None,
        },
    };

    print_output(&report, opts, |report| {
        if report.packed {
            println!(
                "Packed: {} (confidence {:.0}%)",
                report.packer.as_deref().unwrap_or("?"),
                report.confidence.unwrap_or(0.0) * 100.0
            );
            if let Some(method) = &report.method {
                println!("Detected via {method}");
            }
            if let Some(advisory) = &report.advisory {
                println!("{advisory}");
            }
        } else {
            println!("No packer detected");
        }
    })
}
