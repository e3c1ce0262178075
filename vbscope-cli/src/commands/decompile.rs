use std::path::Path;

use log::{info, warn};
use vbscope::Decompiler;

pub fn run(path: &Path, output: Option<&Path>, no_structure: bool) -> anyhow::Result<()> {
    let image = super::load_image(path)?;

    let decompiler = if no_structure {
        Decompiler::new().without_structuring()
    } else {
        Decompiler::new()
    };

    let fallback = path
        .file_stem()
        .map_or_else(|| "Project1".to_string(), |s| s.to_string_lossy().into_owned());
    let result = decompiler.decompile_image(&image, &fallback)?;

    info!(
        "{}: {} objects, {} methods ({})",
        result.project_name,
        result.object_count,
        result.method_count,
        if result.is_pcode { "P-Code" } else { "native" }
    );
    if result.partial_method_count > 0 {
        warn!(
            "{} of {} methods decompiled partially",
            result.partial_method_count, result.method_count
        );
    }

    match output {
        Some(target) => {
            std::fs::write(target, &result.vb6_source)?;
            info!("wrote {}", target.display());
        }
        None => print!("{}", result.vb6_source),
    }

    Ok(())
}
