//! Raw VB5/6 runtime structures.
//!
//! These are the packed, little-endian structures the VB runtime walks at
//! startup, read field-by-field so the layout is explicit and byte-exact.
//! All `lp*` fields are absolute virtual addresses; subtract the image base
//! before resolving them through the PE section table. Field offsets follow
//! the layout established by the Semi-VB-Decompiler research.
//!
//! Structure graph:
//!
//! ```text
//! VB5! signature -> VbHeader -> VbProjectInfo -> VbObjectTableHeader
//!                                    |                 |
//!                                    v                 v
//!                              lpNativeCode     VbPublicObjectDescriptor[n]
//!                                                      |
//!                                      +---------------+--------------+
//!                                      v                              v
//!                                 VbObjectInfo (+ optional)    VbMethodName[n]
//!                                      |
//!                                      v
//!                                 VbProcDescInfo + method body bytes
//! ```

use bitflags::bitflags;

use crate::{Parser, Result};

/// The four-byte signature that marks the start of the VB metadata header.
pub const VB5_MAGIC: &[u8; 4] = b"VB5!";

bitflags! {
    /// `fObjectType` bits of [`VbPublicObjectDescriptor`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectTypeFlags: u32 {
        /// Standard module.
        const MODULE = 0x01;
        /// Class module.
        const CLASS = 0x02;
        /// Form.
        const FORM = 0x10;
        /// Optional info (controls, events) follows the object info.
        const HAS_OPTIONAL_INFO = 0x80;
    }
}

bitflags! {
    /// `dwThreadFlags` bits of [`VbHeader`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u32 {
        /// Apartment threading model.
        const APARTMENT_MODEL = 0x01;
        /// OCX requires a license.
        const REQUIRE_LICENSE = 0x02;
        /// No GUI (unattended execution).
        const UNATTENDED = 0x04;
        /// Single-threaded.
        const SINGLE_THREADED = 0x08;
        /// Retained in memory.
        const RETAINED = 0x10;
    }
}

/// VB5/6 header, located by the `VB5!` signature. 104 bytes.
#[derive(Debug, Clone)]
pub struct VbHeader {
    /// `VB5!` identifier.
    pub signature: [u8; 4],
    /// Runtime build number.
    pub runtime_build: u16,
    /// Language DLL name (0x2A padded when unused).
    pub language_dll: [u8; 14],
    /// Backup language DLL name.
    pub backup_language_dll: [u8; 14],
    /// Runtime DLL version.
    pub runtime_dll_version: u16,
    /// Language ID.
    pub lcid: u32,
    /// Backup language ID.
    pub backup_lcid: u32,
    /// VA of `Sub Main` (0 means a form is loaded at startup).
    pub lp_sub_main: u32,
    /// VA of the project info structure.
    pub lp_project_info: u32,
    /// MDL internal objects flag.
    pub mdl_int_objs: u32,
    /// MDL internal objects flag 2.
    pub mdl_int_objs2: u32,
    /// Thread flags, see [`ThreadFlags`].
    pub thread_flags: u32,
    /// Thread count.
    pub thread_count: u32,
    /// Number of forms.
    pub form_count: u16,
    /// External component count.
    pub external_count: u16,
    /// Thunk count.
    pub thunk_count: u32,
    /// VA of the GUI table.
    pub lp_gui_table: u32,
    /// VA of the external component table.
    pub lp_external_component_table: u32,
    /// VA of the COM registration data.
    pub lp_com_register_data: u32,
    /// Offset to the project description string.
    pub project_description: u32,
    /// Offset to the project EXE name string.
    pub project_exe_name: u32,
    /// Offset to the help file string.
    pub project_help_file: u32,
    /// Offset to the project name string.
    pub project_name: u32,
}

impl VbHeader {
    /// Packed size in the image.
    pub const SIZE: usize = 104;

    /// Read a header from the parser at its current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        let mut signature = [0u8; 4];
        signature.copy_from_slice(parser.read_bytes(4)?);

        let runtime_build = parser.read_le::<u16>()?;

        let mut language_dll = [0u8; 14];
        language_dll.copy_from_slice(parser.read_bytes(14)?);
        let mut backup_language_dll = [0u8; 14];
        backup_language_dll.copy_from_slice(parser.read_bytes(14)?);

        Ok(VbHeader {
            signature,
            runtime_build,
            language_dll,
            backup_language_dll,
            runtime_dll_version: parser.read_le::<u16>()?,
            lcid: parser.read_le::<u32>()?,
            backup_lcid: parser.read_le::<u32>()?,
            lp_sub_main: parser.read_le::<u32>()?,
            lp_project_info: parser.read_le::<u32>()?,
            mdl_int_objs: parser.read_le::<u32>()?,
            mdl_int_objs2: parser.read_le::<u32>()?,
            thread_flags: parser.read_le::<u32>()?,
            thread_count: parser.read_le::<u32>()?,
            form_count: parser.read_le::<u16>()?,
            external_count: parser.read_le::<u16>()?,
            thunk_count: parser.read_le::<u32>()?,
            lp_gui_table: parser.read_le::<u32>()?,
            lp_external_component_table: parser.read_le::<u32>()?,
            lp_com_register_data: parser.read_le::<u32>()?,
            project_description: parser.read_le::<u32>()?,
            project_exe_name: parser.read_le::<u32>()?,
            project_help_file: parser.read_le::<u32>()?,
            project_name: parser.read_le::<u32>()?,
        })
    }

    /// Decoded thread flags.
    #[must_use]
    pub fn thread_flags(&self) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.thread_flags)
    }

    /// True when startup runs `Sub Main` instead of loading a form.
    #[must_use]
    pub fn has_sub_main(&self) -> bool {
        self.lp_sub_main != 0
    }
}

/// Project-level information. 564 bytes.
#[derive(Debug, Clone)]
pub struct VbProjectInfo {
    /// Signature / version.
    pub version: u32,
    /// VA of the object table.
    pub lp_object_table: u32,
    /// Reserved.
    pub null: u32,
    /// VA of the start of code.
    pub lp_code_start: u32,
    /// VA of the end of code.
    pub lp_code_end: u32,
    /// Data size.
    pub data_size: u32,
    /// VA of the thread space.
    pub lp_thread_space: u32,
    /// VA of the VBA exception handler.
    pub lp_vba_seh: u32,
    /// VA of native code; nonzero means the image is native x86, zero P-Code.
    pub lp_native_code: u32,
    /// Project path (MAX_PATH, NUL padded).
    pub path1: [u8; 260],
    /// Secondary path.
    pub path2: [u8; 260],
    /// VA of the external table.
    pub lp_external_table: u32,
    /// External entry count.
    pub external_count: u32,
}

impl VbProjectInfo {
    /// Packed size in the image.
    pub const SIZE: usize = 564;

    /// Read a project info from the parser at its current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        let version = parser.read_le::<u32>()?;
        let lp_object_table = parser.read_le::<u32>()?;
        let null = parser.read_le::<u32>()?;
        let lp_code_start = parser.read_le::<u32>()?;
        let lp_code_end = parser.read_le::<u32>()?;
        let data_size = parser.read_le::<u32>()?;
        let lp_thread_space = parser.read_le::<u32>()?;
        let lp_vba_seh = parser.read_le::<u32>()?;
        let lp_native_code = parser.read_le::<u32>()?;

        let mut path1 = [0u8; 260];
        path1.copy_from_slice(parser.read_bytes(260)?);
        let mut path2 = [0u8; 260];
        path2.copy_from_slice(parser.read_bytes(260)?);

        Ok(VbProjectInfo {
            version,
            lp_object_table,
            null,
            lp_code_start,
            lp_code_end,
            data_size,
            lp_thread_space,
            lp_vba_seh,
            lp_native_code,
            path1,
            path2,
            lp_external_table: parser.read_le::<u32>()?,
            external_count: parser.read_le::<u32>()?,
        })
    }

    /// The primary project path as text, empty when unset.
    #[must_use]
    pub fn path(&self) -> String {
        let end = self.path1.iter().position(|&b| b == 0).unwrap_or(self.path1.len());
        String::from_utf8_lossy(&self.path1[..end]).into_owned()
    }
}

/// Object table header. 60 bytes.
#[derive(Debug, Clone)]
pub struct VbObjectTableHeader {
    /// Heap link.
    pub lp_heap_link: u32,
    /// VA of the execution project.
    pub lp_exec_proj: u32,
    /// VA of a second project info.
    pub lp_project_info2: u32,
    /// Reserved.
    pub reserved: u16,
    /// Total number of objects.
    pub total_objects: u16,
    /// Compiled objects.
    pub compiled_objects: u16,
    /// Objects in use.
    pub objects_in_use: u16,
    /// VA of the object descriptor array.
    pub lp_object_array: u32,
    /// IDE flag.
    pub ide_flag: u32,
    /// IDE flag 2.
    pub ide_flag2: u32,
    /// IDE data pointer.
    pub lp_ide_data: u32,
    /// IDE data pointer 2.
    pub lp_ide_data2: u32,
    /// VA of the project name string.
    pub lp_project_name: u32,
    /// LCID.
    pub lcid: u32,
    /// LCID 2.
    pub lcid2: u32,
    /// IDE data pointer 3.
    pub lp_ide_data3: u32,
    /// Template version.
    pub identifier: u32,
}

impl VbObjectTableHeader {
    /// Packed size in the image.
    pub const SIZE: usize = 60;

    /// Read an object table header from the parser at its current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(VbObjectTableHeader {
            lp_heap_link: parser.read_le::<u32>()?,
            lp_exec_proj: parser.read_le::<u32>()?,
            lp_project_info2: parser.read_le::<u32>()?,
            reserved: parser.read_le::<u16>()?,
            total_objects: parser.read_le::<u16>()?,
            compiled_objects: parser.read_le::<u16>()?,
            objects_in_use: parser.read_le::<u16>()?,
            lp_object_array: parser.read_le::<u32>()?,
            ide_flag: parser.read_le::<u32>()?,
            ide_flag2: parser.read_le::<u32>()?,
            lp_ide_data: parser.read_le::<u32>()?,
            lp_ide_data2: parser.read_le::<u32>()?,
            lp_project_name: parser.read_le::<u32>()?,
            lcid: parser.read_le::<u32>()?,
            lcid2: parser.read_le::<u32>()?,
            lp_ide_data3: parser.read_le::<u32>()?,
            identifier: parser.read_le::<u32>()?,
        })
    }
}

/// Public object descriptor, one per form/module/class. 48 bytes.
#[derive(Debug, Clone)]
pub struct VbPublicObjectDescriptor {
    /// VA of the object info.
    pub lp_object_info: u32,
    /// Reserved.
    pub reserved: u32,
    /// VA of public bytes.
    pub lp_public_bytes: u32,
    /// VA of static bytes.
    pub lp_static_bytes: u32,
    /// VA of module public data.
    pub lp_module_public: u32,
    /// VA of module static data.
    pub lp_module_static: u32,
    /// VA of the nul-terminated object name.
    pub lp_object_name: u32,
    /// Number of method name entries.
    pub method_count: u32,
    /// VA of the method names array.
    pub lp_method_names_array: u32,
    /// Static vars offset.
    pub static_vars: u32,
    /// Object type bits, see [`ObjectTypeFlags`].
    pub object_type: u32,
    /// Reserved.
    pub null: u32,
}

impl VbPublicObjectDescriptor {
    /// Packed size in the image.
    pub const SIZE: usize = 48;

    /// Read an object descriptor from the parser at its current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(VbPublicObjectDescriptor {
            lp_object_info: parser.read_le::<u32>()?,
            reserved: parser.read_le::<u32>()?,
            lp_public_bytes: parser.read_le::<u32>()?,
            lp_static_bytes: parser.read_le::<u32>()?,
            lp_module_public: parser.read_le::<u32>()?,
            lp_module_static: parser.read_le::<u32>()?,
            lp_object_name: parser.read_le::<u32>()?,
            method_count: parser.read_le::<u32>()?,
            lp_method_names_array: parser.read_le::<u32>()?,
            static_vars: parser.read_le::<u32>()?,
            object_type: parser.read_le::<u32>()?,
            null: parser.read_le::<u32>()?,
        })
    }

    /// Decoded object type flags.
    #[must_use]
    pub fn flags(&self) -> ObjectTypeFlags {
        ObjectTypeFlags::from_bits_truncate(self.object_type)
    }
}

/// Per-object info with the method table pointer. 56 bytes.
#[derive(Debug, Clone)]
pub struct VbObjectInfo {
    /// Reference count.
    pub ref_count: u16,
    /// Index of this object.
    pub object_index: u16,
    /// VA back to the object table.
    pub lp_object_table: u32,
    /// IDE data.
    pub lp_ide_data: u32,
    /// VA of the private object.
    pub lp_private_object: u32,
    /// Reserved.
    pub reserved: u32,
    /// Reserved.
    pub null: u32,
    /// VA of the object.
    pub lp_object: u32,
    /// VA of project data.
    pub lp_project_data: u32,
    /// Number of methods.
    pub method_count: u16,
    /// Second method count.
    pub method_count2: u16,
    /// VA of the method (procedure descriptor) array.
    pub lp_methods: u32,
    /// Constants in use.
    pub constants: u16,
    /// Constant capacity.
    pub max_constants: u16,
    /// IDE data 2.
    pub lp_ide_data2: u32,
    /// IDE data 3.
    pub lp_ide_data3: u32,
    /// VA of the constant pool.
    pub lp_constants: u32,
}

impl VbObjectInfo {
    /// Packed size in the image.
    pub const SIZE: usize = 56;

    /// Read an object info from the parser at its current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(VbObjectInfo {
            ref_count: parser.read_le::<u16>()?,
            object_index: parser.read_le::<u16>()?,
            lp_object_table: parser.read_le::<u32>()?,
            lp_ide_data: parser.read_le::<u32>()?,
            lp_private_object: parser.read_le::<u32>()?,
            reserved: parser.read_le::<u32>()?,
            null: parser.read_le::<u32>()?,
            lp_object: parser.read_le::<u32>()?,
            lp_project_data: parser.read_le::<u32>()?,
            method_count: parser.read_le::<u16>()?,
            method_count2: parser.read_le::<u16>()?,
            lp_methods: parser.read_le::<u32>()?,
            constants: parser.read_le::<u16>()?,
            max_constants: parser.read_le::<u16>()?,
            lp_ide_data2: parser.read_le::<u32>()?,
            lp_ide_data3: parser.read_le::<u32>()?,
            lp_constants: parser.read_le::<u32>()?,
        })
    }
}

/// Optional info for forms and controls; immediately follows
/// [`VbObjectInfo`] when `HAS_OPTIONAL_INFO` is set. 64 bytes.
#[derive(Debug, Clone)]
pub struct VbOptionalObjectInfo {
    /// Designer flag (2 means designer).
    pub designer_flag: u32,
    /// VA of the object CLSID.
    pub lp_object_clsid: u32,
    /// Reserved.
    pub null1: u32,
    /// VA of the GUI GUID.
    pub lp_guid_object_gui: u32,
    /// Default IID count.
    pub default_iid_count: u32,
    /// VA of the events IID table.
    pub lp_events_iid_table: u32,
    /// Events IID count.
    pub events_iid_count: u32,
    /// VA of the default IID table.
    pub lp_default_iid_table: u32,
    /// Number of controls.
    pub control_count: u32,
    /// VA of the control array.
    pub lp_control_array: u32,
    /// Number of events.
    pub event_count: u16,
    /// P-Code count.
    pub pcode_count: u16,
    /// Initialize event offset.
    pub initialize_event: u16,
    /// Terminate event offset.
    pub terminate_event: u16,
    /// VA of the event link array.
    pub lp_event_link_array: u32,
    /// VA of the basic class object.
    pub lp_basic_class_object: u32,
    /// Reserved.
    pub null2: u32,
    /// Flags.
    pub flags: u32,
}

impl VbOptionalObjectInfo {
    /// Packed size in the image.
    pub const SIZE: usize = 64;

    /// Read an optional object info from the parser at its current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(VbOptionalObjectInfo {
            designer_flag: parser.read_le::<u32>()?,
            lp_object_clsid: parser.read_le::<u32>()?,
            null1: parser.read_le::<u32>()?,
            lp_guid_object_gui: parser.read_le::<u32>()?,
            default_iid_count: parser.read_le::<u32>()?,
            lp_events_iid_table: parser.read_le::<u32>()?,
            events_iid_count: parser.read_le::<u32>()?,
            lp_default_iid_table: parser.read_le::<u32>()?,
            control_count: parser.read_le::<u32>()?,
            lp_control_array: parser.read_le::<u32>()?,
            event_count: parser.read_le::<u16>()?,
            pcode_count: parser.read_le::<u16>()?,
            initialize_event: parser.read_le::<u16>()?,
            terminate_event: parser.read_le::<u16>()?,
            lp_event_link_array: parser.read_le::<u32>()?,
            lp_basic_class_object: parser.read_le::<u32>()?,
            null2: parser.read_le::<u32>()?,
            flags: parser.read_le::<u32>()?,
        })
    }
}

/// Procedure descriptor preceding every P-Code method body. 30 bytes.
///
/// Only `frame_size`, `proc_size` and `flags` carry meaning for us; the body
/// bytes immediately follow the descriptor in memory.
#[derive(Debug, Clone)]
pub struct VbProcDescInfo {
    /// Table pointer.
    pub lp_table: u32,
    /// Reserved.
    pub reserved1: u16,
    /// Stack frame size.
    pub frame_size: u16,
    /// Procedure body size in bytes.
    pub proc_size: u16,
    /// Reserved words (9 of them in the packed layout).
    pub reserved: [u16; 9],
    /// Flags.
    pub flags: u16,
}

impl VbProcDescInfo {
    /// Packed size in the image.
    pub const SIZE: usize = 30;

    /// Read a procedure descriptor from the parser at its current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        let lp_table = parser.read_le::<u32>()?;
        let reserved1 = parser.read_le::<u16>()?;
        let frame_size = parser.read_le::<u16>()?;
        let proc_size = parser.read_le::<u16>()?;

        let mut reserved = [0u16; 9];
        for slot in &mut reserved {
            *slot = parser.read_le::<u16>()?;
        }

        Ok(VbProcDescInfo {
            lp_table,
            reserved1,
            frame_size,
            proc_size,
            reserved,
            flags: parser.read_le::<u16>()?,
        })
    }
}

/// One entry of the method names array. 8 bytes.
#[derive(Debug, Clone)]
pub struct VbMethodName {
    /// VA of the nul-terminated method name.
    pub lp_method_name: u32,
    /// Visibility / type flags.
    pub flags: u32,
}

impl VbMethodName {
    /// Packed size in the image.
    pub const SIZE: usize = 8;

    /// Read a method name entry from the parser at its current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(VbMethodName {
            lp_method_name: parser.read_le::<u32>()?,
            flags: parser.read_le::<u32>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        // Byte-exact crafted header: magic, then known values at known offsets.
        let mut data = vec![0u8; VbHeader::SIZE];
        data[0..4].copy_from_slice(b"VB5!");
        data[0x04..0x06].copy_from_slice(&0x1234u16.to_le_bytes()); // runtime build
        data[0x2C..0x30].copy_from_slice(&0x0040_1000u32.to_le_bytes()); // lpSubMain
        data[0x30..0x34].copy_from_slice(&0x0040_2000u32.to_le_bytes()); // lpProjectInfo
        data[0x3C..0x40].copy_from_slice(&0x0000_0005u32.to_le_bytes()); // thread flags
        data[0x44..0x46].copy_from_slice(&3u16.to_le_bytes()); // form count

        let mut parser = Parser::new(&data);
        let header = VbHeader::read(&mut parser).unwrap();

        assert_eq!(parser.pos(), VbHeader::SIZE);
        assert_eq!(&header.signature, VB5_MAGIC);
        assert_eq!(header.runtime_build, 0x1234);
        assert_eq!(header.lp_sub_main, 0x0040_1000);
        assert_eq!(header.lp_project_info, 0x0040_2000);
        assert_eq!(header.form_count, 3);
        assert!(header.has_sub_main());
        assert_eq!(
            header.thread_flags(),
            ThreadFlags::APARTMENT_MODEL | ThreadFlags::UNATTENDED
        );
    }

    #[test]
    fn project_info_layout() {
        let mut data = vec![0u8; VbProjectInfo::SIZE];
        data[0x04..0x08].copy_from_slice(&0x0040_3000u32.to_le_bytes()); // lpObjectTable
        data[0x20..0x24].copy_from_slice(&0x0040_9000u32.to_le_bytes()); // lpNativeCode
        data[0x24..0x28].copy_from_slice(b"C:\\p");

        let mut parser = Parser::new(&data);
        let info = VbProjectInfo::read(&mut parser).unwrap();

        assert_eq!(parser.pos(), VbProjectInfo::SIZE);
        assert_eq!(info.lp_object_table, 0x0040_3000);
        assert_eq!(info.lp_native_code, 0x0040_9000);
        assert_eq!(info.path(), "C:\\p");
    }

    #[test]
    fn descriptor_sizes_consume_exactly() {
        let data = vec![0u8; 512];

        let mut parser = Parser::new(&data);
        VbObjectTableHeader::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), VbObjectTableHeader::SIZE);

        let mut parser = Parser::new(&data);
        VbPublicObjectDescriptor::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), VbPublicObjectDescriptor::SIZE);

        let mut parser = Parser::new(&data);
        VbObjectInfo::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), VbObjectInfo::SIZE);

        let mut parser = Parser::new(&data);
        VbOptionalObjectInfo::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), VbOptionalObjectInfo::SIZE);

        let mut parser = Parser::new(&data);
        VbProcDescInfo::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), VbProcDescInfo::SIZE);

        let mut parser = Parser::new(&data);
        VbMethodName::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), VbMethodName::SIZE);
    }

    #[test]
    fn proc_desc_fields() {
        let mut data = vec![0u8; VbProcDescInfo::SIZE];
        data[0x06..0x08].copy_from_slice(&0x20u16.to_le_bytes()); // frame size
        data[0x08..0x0A].copy_from_slice(&0x40u16.to_le_bytes()); // proc size
        data[0x1C..0x1E].copy_from_slice(&0x01u16.to_le_bytes()); // flags

        let mut parser = Parser::new(&data);
        let desc = VbProcDescInfo::read(&mut parser).unwrap();

        assert_eq!(desc.frame_size, 0x20);
        assert_eq!(desc.proc_size, 0x40);
        assert_eq!(desc.flags, 0x01);
    }
}
