//! The decompilation pipeline.
//!
//! Ties the stages together for a whole file:
//!
//! ```text
//! File -> VbImage -> per method:
//!     pcode::disassemble_procedure -> ir::lift -> TypeRecovery
//!     -> structurer::structure -> emitter::emit_function
//! ```
//!
//! Per-procedure failures (stack underflow, unresolvable targets) degrade to
//! a commented stub and the pipeline continues with the next method; only
//! file-level problems (not PE32, no `VB5!` metadata) abort a decompilation.
//! Methods are independent, so the per-method work fans out over rayon with
//! the read-only image as the only shared state.
//!
//! Native-code images cannot be lifted; they decompile to per-method x86
//! disassembly listings with a "native code not fully supported" notice.

pub mod emitter;
pub mod recovery;
pub mod structurer;

use std::path::Path;

use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    ir,
    metadata::{CodeKind, VbImage, VbMethod},
    pcode, x86, File, Result,
};
use recovery::TypeRecovery;

pub use emitter::{emit_expr, emit_function};
pub use recovery::unify;
pub use structurer::{structure, StructureResult, Structured};

/// The outcome of decompiling one file.
#[derive(Debug, Clone)]
pub struct DecompilationResult {
    /// Project name recovered from the VB header, or the file stem.
    pub project_name: String,
    /// The emitted VB6 source (or annotated disassembly for native images).
    pub vb6_source: String,
    /// True when the image is P-Code.
    pub is_pcode: bool,
    /// Number of VB objects (forms, modules, classes).
    pub object_count: usize,
    /// Number of methods processed.
    pub method_count: usize,
    /// Methods that failed to lift and were emitted as stubs.
    pub partial_method_count: usize,
}

/// The decompiler front door.
///
/// # Example
///
/// ```rust,no_run
/// use vbscope::Decompiler;
///
/// let result = Decompiler::new().decompile_file("program.exe")?;
/// println!("' {} objects, {} methods", result.object_count, result.method_count);
/// println!("{}", result.vb6_source);
/// # Ok::<(), vbscope::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Decompiler {
    structure_control_flow: bool,
}

impl Decompiler {
    /// Creates a decompiler with control-flow structuring enabled.
    #[must_use]
    pub fn new() -> Self {
        Decompiler {
            structure_control_flow: true,
        }
    }

    /// Disables structuring: bodies emit as labelled blocks with gotos.
    #[must_use]
    pub fn without_structuring(mut self) -> Self {
        self.structure_control_flow = false;
        self
    }

    /// Decompiles a file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error for unreadable files, non-PE32/i386 images, and
    /// images without VB metadata. Per-method failures do not error.
    pub fn decompile_file(&self, path: impl AsRef<Path>) -> Result<DecompilationResult> {
        let path = path.as_ref();
        let file = File::from_file(path)?;
        let image = VbImage::parse(file)?;

        let fallback_name = path
            .file_stem()
            .map_or_else(|| "Project1".to_string(), |s| s.to_string_lossy().into_owned());

        self.decompile_image(&image, &fallback_name)
    }

    /// Decompiles an already parsed image.
    ///
    /// # Errors
    ///
    /// Currently infallible for parsed images; the `Result` mirrors
    /// [`Self::decompile_file`] so callers handle one shape.
    pub fn decompile_image(
        &self,
        image: &VbImage,
        fallback_name: &str,
    ) -> Result<DecompilationResult> {
        let methods = image.methods();
        let is_pcode = image.is_pcode();

        debug!(
            "decompiling {} methods across {} objects ({})",
            methods.len(),
            image.objects().len(),
            if is_pcode { "P-Code" } else { "native" }
        );

        // Each method owns disjoint state; the image is shared read-only.
        let emitted: Vec<(String, bool)> = methods
            .par_iter()
            .map(|method| self.emit_method(method))
            .collect();

        let partial_method_count = emitted.iter().filter(|(_, partial)| *partial).count();

        let mut source = String::new();
        let mut current_object = u32::MAX;
        for (method, (text, _)) in methods.iter().zip(&emitted) {
            if method.object_index != current_object {
                current_object = method.object_index;
                let object = image
                    .objects()
                    .iter()
                    .find(|o| o.object_index == current_object);
                let (name, kind) = object
                    .map_or(("?", "Object"), |o| (o.name.as_str(), o.kind_name()));
                source.push_str(&format!("' ===== {kind} {name} =====\n\n"));
            }
            source.push_str(text);
            source.push('\n');
        }

        if !is_pcode {
            source.insert_str(0, "' native code not fully supported; listing only\n\n");
        }

        Ok(DecompilationResult {
            project_name: image
                .project_name()
                .unwrap_or_else(|| fallback_name.to_string()),
            vb6_source: source,
            is_pcode,
            object_count: image.objects().len(),
            method_count: methods.len(),
            partial_method_count,
        })
    }

    /// Emits one method; the flag reports whether it degraded to a stub.
    fn emit_method(&self, method: &VbMethod) -> (String, bool) {
        match method.kind {
            CodeKind::PCode => match self.decompile_pcode_method(method) {
                Ok(text) => (text, false),
                Err(e) => {
                    warn!(
                        "{}.{} lifted partially: {e}",
                        method.object_name, method.method_name
                    );
                    (
                        format!(
                            "' {}.{}: decompilation failed: {e}\nSub {}()\nEnd Sub\n",
                            method.object_name, method.method_name, method.method_name
                        ),
                        true,
                    )
                }
            },
            CodeKind::Native => (self.disassemble_native_method(method), false),
        }
    }

    /// The full P-Code path for one method.
    ///
    /// # Errors
    /// Returns lift errors; decode and structuring never fail.
    pub fn decompile_pcode_method(&self, method: &VbMethod) -> Result<String> {
        let instructions = pcode::disassemble_procedure(&method.code_bytes, method.start_address);
        let mut function = ir::lift(&instructions, &method.method_name, method.start_address)?;

        let recovery = TypeRecovery::analyze(&function);
        recovery.apply(&mut function);

        if self.structure_control_flow {
            let structured = structurer::structure(&function);
            Ok(emitter::emit_function(&function, Some(&structured)))
        } else {
            Ok(emitter::emit_function(&function, None))
        }
    }

    /// Annotated x86 listing for one native method.
    fn disassemble_native_method(&self, method: &VbMethod) -> String {
        let mut out = format!(
            "' Sub {}.{} - native x86\n",
            method.object_name, method.method_name
        );

        for instr in x86::disassemble_function(&method.code_bytes, method.start_address) {
            out.push_str(&format!(
                "'   0x{:08X}  {:<20}  {}\n",
                instr.address,
                instr.bytes_hex(),
                instr
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcode_method_end_to_end() {
        let method = VbMethod {
            object_index: 0,
            method_index: 0,
            object_name: "Module1".to_string(),
            method_name: "Add".to_string(),
            kind: CodeKind::PCode,
            // LitI4 10; LitI4 20; AddI4; Ret
            code_bytes: vec![
                0xF5, 0x0A, 0x00, 0x00, 0x00,
                0xF5, 0x14, 0x00, 0x00, 0x00,
                0xA1,
                0x12,
            ],
            start_address: 0x1000,
        };

        let text = Decompiler::new().decompile_pcode_method(&method).unwrap();
        assert_eq!(
            text,
            "Function Add() As Variant\n    Return 10 + 20\nEnd Function\n"
        );
    }

    #[test]
    fn single_exitproc_is_an_empty_sub() {
        let method = VbMethod {
            object_index: 0,
            method_index: 0,
            object_name: "Module1".to_string(),
            method_name: "Noop".to_string(),
            kind: CodeKind::PCode,
            code_bytes: vec![0x14],
            start_address: 0,
        };

        let text = Decompiler::new().decompile_pcode_method(&method).unwrap();
        assert_eq!(text, "Sub Noop()\n    Return\nEnd Sub\n");
    }

    #[test]
    fn native_method_becomes_listing() {
        let method = VbMethod {
            object_index: 0,
            method_index: 0,
            object_name: "Form1".to_string(),
            method_name: "Command1_Click".to_string(),
            kind: CodeKind::Native,
            code_bytes: vec![0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3],
            start_address: 0x40_1000,
        };

        let (text, partial) = Decompiler::new().emit_method(&method);
        assert!(!partial);
        assert!(text.contains("native x86"));
        assert!(text.contains("mov eax, 0x2A"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn broken_method_degrades_to_stub() {
        let method = VbMethod {
            object_index: 0,
            method_index: 0,
            object_name: "Module1".to_string(),
            method_name: "Broken".to_string(),
            kind: CodeKind::PCode,
            // AddI4 on an empty stack
            code_bytes: vec![0xA1, 0x12],
            start_address: 0,
        };

        let (text, partial) = Decompiler::new().emit_method(&method);
        assert!(partial);
        assert!(text.contains("decompilation failed"));
        assert!(text.contains("Sub Broken()"));
    }
}
