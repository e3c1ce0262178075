//! VB5/6 runtime metadata parsing.
//!
//! A VB executable carries, somewhere in its initialised data, the structure
//! graph the MSVBVM runtime walks at startup: the `VB5!` header, the project
//! info, the object table, and per-object method tables. This module locates
//! that graph, validates it, and exposes it as an iterable view of objects
//! and method descriptors with their raw code bytes.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use vbscope::{File, VbImage};
//!
//! let file = File::from_file(Path::new("program.exe"))?;
//! let image = VbImage::parse(file)?;
//!
//! for object in image.objects() {
//!     println!("{} ({} methods)", object.name, object.method_names.len());
//! }
//! for method in image.methods() {
//!     println!("  {}.{}: {} bytes of {:?}",
//!              method.object_name, method.method_name,
//!              method.code_bytes.len(), method.kind);
//! }
//! # Ok::<(), vbscope::Error>(())
//! ```

pub mod packer;
pub mod structures;

use log::warn;

use crate::{
    Error::{NotVisualBasic, OutOfBounds},
    File, Parser, Result,
};
use structures::{
    ObjectTypeFlags, VbHeader, VbMethodName, VbObjectInfo, VbObjectTableHeader,
    VbOptionalObjectInfo, VbProcDescInfo, VbProjectInfo, VbPublicObjectDescriptor, VB5_MAGIC,
};

/// Whether a method body is P-Code or native x86.
///
/// The distinction is image-wide: `lpNativeCode` in the project info is zero
/// for P-Code builds and nonzero for native builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// Stack-based bytecode executed by the MSVBVM runtime.
    PCode,
    /// x86 machine code produced by the VB6 native compiler.
    Native,
}

/// A parsed VB object: a form, module or class with its method names.
#[derive(Debug, Clone)]
pub struct VbObject {
    /// Object name, `<Object{n}>` when the binary carries none.
    pub name: String,
    /// Index within the object table.
    pub object_index: u32,
    /// Raw `fObjectType` bits.
    pub object_type: u32,
    /// Method names in method-table order; missing entries are `<unnamed>`.
    pub method_names: Vec<String>,
    /// The raw descriptor.
    pub descriptor: VbPublicObjectDescriptor,
    /// The object info, when the descriptor points at one.
    pub info: Option<VbObjectInfo>,
    /// Optional form/control info, when `HAS_OPTIONAL_INFO` is set.
    pub optional_info: Option<VbOptionalObjectInfo>,
}

impl VbObject {
    /// True for forms.
    #[must_use]
    pub fn is_form(&self) -> bool {
        self.flags().contains(ObjectTypeFlags::FORM)
    }

    /// True for standard modules.
    #[must_use]
    pub fn is_module(&self) -> bool {
        self.flags().contains(ObjectTypeFlags::MODULE)
    }

    /// True for class modules.
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.flags().contains(ObjectTypeFlags::CLASS)
    }

    /// A short kind label for reports.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        if self.is_form() {
            "Form"
        } else if self.is_class() {
            "Class"
        } else if self.is_module() {
            "Module"
        } else {
            "Object"
        }
    }

    /// Decoded object type flags.
    #[must_use]
    pub fn flags(&self) -> ObjectTypeFlags {
        ObjectTypeFlags::from_bits_truncate(self.object_type)
    }
}

/// One method of one object, with an owned copy of its code bytes.
#[derive(Debug, Clone)]
pub struct VbMethod {
    /// Index of the owning object in the object table.
    pub object_index: u32,
    /// Index within the owning object's method table.
    pub method_index: u32,
    /// Owning object's name.
    pub object_name: String,
    /// Method name, `<unnamed>` when the binary carries none.
    pub method_name: String,
    /// Whether the bytes are P-Code or native x86.
    pub kind: CodeKind,
    /// Owned copy of the raw method body.
    pub code_bytes: Vec<u8>,
    /// Virtual address of the body, for display and branch resolution.
    pub start_address: u32,
}

/// A parsed view of the VB metadata inside a PE image.
///
/// Owns the underlying [`File`]; everything is resolved eagerly at parse time
/// so the view is immutable afterwards.
#[derive(Debug)]
pub struct VbImage {
    file: File,
    header_rva: u32,
    header: VbHeader,
    project_info: VbProjectInfo,
    object_table: VbObjectTableHeader,
    objects: Vec<VbObject>,
}

impl VbImage {
    /// Parses the VB metadata graph of a loaded PE image.
    ///
    /// # Errors
    ///
    /// Returns [`NotVisualBasic`] when no section contains the `VB5!`
    /// signature or the graph behind it is unreadable, and
    /// [`crate::Error::Malformed`] / [`OutOfBounds`] for structurally broken
    /// metadata.
    pub fn parse(file: File) -> Result<VbImage> {
        let header_rva = Self::find_vb_header(&file)?;

        let header_bytes = file.read_at_rva(header_rva, VbHeader::SIZE)?;
        let header = VbHeader::read(&mut Parser::new(header_bytes))?;
        if &header.signature != VB5_MAGIC {
            return Err(NotVisualBasic("corrupt VB5! header signature".to_string()));
        }

        if header.lp_project_info == 0 {
            return Err(NotVisualBasic(
                "VB header has no project info pointer".to_string(),
            ));
        }

        let image_base = file.image_base();
        let project_info_rva = header.lp_project_info.wrapping_sub(image_base);
        if file.section_by_rva(project_info_rva).is_none() {
            return Err(NotVisualBasic(format!(
                "project info VA 0x{:08X} is outside every section",
                header.lp_project_info
            )));
        }

        let info_bytes = file.read_at_rva(project_info_rva, VbProjectInfo::SIZE)?;
        let project_info = VbProjectInfo::read(&mut Parser::new(info_bytes))?;

        if project_info.lp_object_table == 0 {
            return Err(NotVisualBasic(
                "project info has no object table pointer".to_string(),
            ));
        }

        let table_rva = project_info.lp_object_table.wrapping_sub(image_base);
        let table_bytes = file.read_at_rva(table_rva, VbObjectTableHeader::SIZE)?;
        let object_table = VbObjectTableHeader::read(&mut Parser::new(table_bytes))?;

        let mut image = VbImage {
            file,
            header_rva,
            header,
            project_info,
            object_table,
            objects: Vec::new(),
        };
        image.objects = image.parse_objects()?;

        Ok(image)
    }

    /// Searches every section's raw bytes for the first `VB5!` occurrence.
    fn find_vb_header(file: &File) -> Result<u32> {
        for section in file.sections() {
            if let Some(pos) = section
                .data
                .windows(VB5_MAGIC.len())
                .position(|window| window == VB5_MAGIC)
            {
                #[allow(clippy::cast_possible_truncation)]
                return Ok(section.virtual_address + pos as u32);
            }
        }

        Err(NotVisualBasic(
            "VB5! signature not found in any section".to_string(),
        ))
    }

    fn parse_objects(&self) -> Result<Vec<VbObject>> {
        let mut objects = Vec::with_capacity(self.object_table.total_objects as usize);
        if self.object_table.total_objects == 0 {
            return Ok(objects);
        }

        let array_rva = self.va_to_rva(self.object_table.lp_object_array);
        for index in 0..u32::from(self.object_table.total_objects) {
            let descriptor_rva = array_rva + index * VbPublicObjectDescriptor::SIZE as u32;

            let descriptor = match self
                .file
                .read_at_rva(descriptor_rva, VbPublicObjectDescriptor::SIZE)
                .and_then(|bytes| VbPublicObjectDescriptor::read(&mut Parser::new(bytes)))
            {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!("skipping object {index}: unreadable descriptor ({e})");
                    continue;
                }
            };

            objects.push(self.parse_object(descriptor, index));
        }

        Ok(objects)
    }

    fn parse_object(&self, descriptor: VbPublicObjectDescriptor, index: u32) -> VbObject {
        let name = if descriptor.lp_object_name == 0 {
            format!("<Object{index}>")
        } else {
            self.read_string_at_va(descriptor.lp_object_name)
                .unwrap_or_else(|| format!("<Object{index}>"))
        };

        let info = if descriptor.lp_object_info == 0 {
            None
        } else {
            let info_rva = self.va_to_rva(descriptor.lp_object_info);
            self.file
                .read_at_rva(info_rva, VbObjectInfo::SIZE)
                .and_then(|bytes| VbObjectInfo::read(&mut Parser::new(bytes)))
                .ok()
        };

        // The optional info sits directly behind the object info in memory.
        let optional_info = if info.is_some()
            && descriptor.flags().contains(ObjectTypeFlags::HAS_OPTIONAL_INFO)
        {
            let optional_rva =
                self.va_to_rva(descriptor.lp_object_info) + VbObjectInfo::SIZE as u32;
            self.file
                .read_at_rva(optional_rva, VbOptionalObjectInfo::SIZE)
                .and_then(|bytes| VbOptionalObjectInfo::read(&mut Parser::new(bytes)))
                .ok()
        } else {
            None
        };

        let method_names = self.parse_method_names(&descriptor);

        VbObject {
            name,
            object_index: index,
            object_type: descriptor.object_type,
            method_names,
            descriptor,
            info,
            optional_info,
        }
    }

    fn parse_method_names(&self, descriptor: &VbPublicObjectDescriptor) -> Vec<String> {
        if descriptor.method_count == 0 || descriptor.lp_method_names_array == 0 {
            return Vec::new();
        }

        let array_rva = self.va_to_rva(descriptor.lp_method_names_array);
        let mut names = Vec::with_capacity(descriptor.method_count as usize);

        for i in 0..descriptor.method_count {
            let entry_rva = array_rva + i * VbMethodName::SIZE as u32;

            let name = self
                .file
                .read_at_rva(entry_rva, VbMethodName::SIZE)
                .and_then(|bytes| VbMethodName::read(&mut Parser::new(bytes)))
                .ok()
                .filter(|entry| entry.lp_method_name != 0)
                .and_then(|entry| self.read_string_at_va(entry.lp_method_name));

            names.push(name.unwrap_or_else(|| "<unnamed>".to_string()));
        }

        names
    }

    /// Reads a nul-terminated ASCII string at an absolute virtual address.
    fn read_string_at_va(&self, va: u32) -> Option<String> {
        let bytes = self.file.read_at_rva(self.va_to_rva(va), 256).ok()?;
        let mut parser = Parser::new(bytes);
        parser.read_string_utf8(256).ok().filter(|s| !s.is_empty())
    }

    fn va_to_rva(&self, va: u32) -> u32 {
        va.wrapping_sub(self.file.image_base())
    }

    /// The underlying PE image.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// RVA at which the `VB5!` signature was found.
    #[must_use]
    pub fn header_rva(&self) -> u32 {
        self.header_rva
    }

    /// The VB header.
    #[must_use]
    pub fn header(&self) -> &VbHeader {
        &self.header
    }

    /// The project info.
    #[must_use]
    pub fn project_info(&self) -> &VbProjectInfo {
        &self.project_info
    }

    /// The object table header.
    #[must_use]
    pub fn object_table(&self) -> &VbObjectTableHeader {
        &self.object_table
    }

    /// The parsed objects (forms, modules, classes).
    #[must_use]
    pub fn objects(&self) -> &[VbObject] {
        &self.objects
    }

    /// Finds an object by name.
    #[must_use]
    pub fn object_by_name(&self, name: &str) -> Option<&VbObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    /// Whether the executable code of this image is P-Code or native x86.
    #[must_use]
    pub fn code_kind(&self) -> CodeKind {
        if self.project_info.lp_native_code == 0 {
            CodeKind::PCode
        } else {
            CodeKind::Native
        }
    }

    /// True for P-Code builds.
    #[must_use]
    pub fn is_pcode(&self) -> bool {
        self.code_kind() == CodeKind::PCode
    }

    /// The project name, from the VB header string or the project path.
    #[must_use]
    pub fn project_name(&self) -> Option<String> {
        if self.header.project_name != 0 {
            if let Some(name) = self.read_string_at_va(self.header.project_name) {
                return Some(name);
            }
        }

        let path = self.project_info.path();
        if path.is_empty() {
            None
        } else {
            Some(path)
        }
    }

    /// Enumerates every method of every object as an owned descriptor.
    ///
    /// Objects without a readable method table contribute nothing; methods
    /// with a zero-length body are skipped (they have no code to show).
    #[must_use]
    pub fn methods(&self) -> Vec<VbMethod> {
        let mut methods = Vec::new();

        for object in &self.objects {
            let Some(info) = &object.info else { continue };
            if info.lp_methods == 0 {
                continue;
            }

            for method_index in 0..u32::from(info.method_count) {
                match self.extract_method(object, info.lp_methods, method_index) {
                    Ok(Some(method)) => methods.push(method),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            "skipping {}.{}: {e}",
                            object.name,
                            object
                                .method_names
                                .get(method_index as usize)
                                .map_or("<unnamed>", String::as_str)
                        );
                    }
                }
            }
        }

        methods
    }

    /// Extracts a single method's descriptor and body bytes.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] / [`crate::Error::Malformed`] when the
    /// procedure descriptor or its body cannot be read.
    fn extract_method(
        &self,
        object: &VbObject,
        lp_methods: u32,
        method_index: u32,
    ) -> Result<Option<VbMethod>> {
        let desc_rva =
            self.va_to_rva(lp_methods) + method_index * VbProcDescInfo::SIZE as u32;
        let desc_bytes = self.file.read_at_rva(desc_rva, VbProcDescInfo::SIZE)?;
        let desc = VbProcDescInfo::read(&mut Parser::new(desc_bytes))?;

        if desc.proc_size == 0 {
            return Ok(None);
        }

        // The body bytes immediately follow the descriptor.
        let body_rva = desc_rva + VbProcDescInfo::SIZE as u32;
        let body = self.file.read_at_rva(body_rva, desc.proc_size as usize)?;
        if body.len() < desc.proc_size as usize {
            return Err(OutOfBounds);
        }

        let method_name = object
            .method_names
            .get(method_index as usize)
            .cloned()
            .unwrap_or_else(|| "<unnamed>".to_string());

        Ok(Some(VbMethod {
            object_index: object.object_index,
            method_index,
            object_name: object.name.clone(),
            method_name,
            kind: self.code_kind(),
            code_bytes: body.to_vec(),
            start_address: self.file.image_base().wrapping_add(body_rva),
        }))
    }
}
