//! Handle-based C boundary for hosting the decompiler in any UI or CLI.
//!
//! The surface is deliberately small: create a handle, decompile a file
//! into an owned result, free everything through the matching `free`
//! functions. Status codes: `0` success, `-1` invalid argument, `-2`
//! invalid UTF-8 in the path, `-3` decompilation error (the message is
//! available through [`decompiler_last_error`]).
//!
//! Every string crossing the boundary is NUL-terminated UTF-8 owned by this
//! library; callers must release them with [`decompiler_free_string`] or by
//! freeing the owning result. The last-error buffer is thread-local and
//! invalidated by the next call on the same thread.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;

use crate::{x86, Decompiler};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: &str) {
    let owned = CString::new(message.replace('\0', " "))
        .unwrap_or_else(|_| CString::new("error").expect("static string"));
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(owned));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Opaque decompiler handle.
#[repr(C)]
pub struct DecompilerHandle {
    _private: [u8; 0],
}

/// Decompilation result as seen across the C boundary.
#[repr(C)]
pub struct DecompilationResultFfi {
    /// Project name; free with [`decompiler_free_string`].
    pub project_name: *mut c_char,
    /// Emitted VB6 source; free with [`decompiler_free_string`].
    pub vb6_source_text: *mut c_char,
    /// True when the image is P-Code.
    pub is_pcode: bool,
    /// Number of VB objects.
    pub object_count: usize,
    /// Number of methods processed.
    pub method_count: usize,
}

/// Creates a decompiler instance.
#[no_mangle]
pub extern "C" fn decompiler_new() -> *mut DecompilerHandle {
    let decompiler = Box::new(Decompiler::new());
    Box::into_raw(decompiler).cast::<DecompilerHandle>()
}

/// Frees a decompiler instance. A null handle is a no-op.
///
/// # Safety
/// `handle` must come from [`decompiler_new`] and not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn decompiler_free(handle: *mut DecompilerHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle.cast::<Decompiler>()) });
    }
}

/// Decompiles `path` (NUL-terminated UTF-8) into `*result`.
///
/// Returns `0` and stores an owned result on success; on failure returns a
/// negative status and leaves `*result` untouched.
///
/// # Safety
/// `handle` must come from [`decompiler_new`]; `path` must point at a
/// NUL-terminated string; `result` must point at writable pointer storage.
#[no_mangle]
pub unsafe extern "C" fn decompiler_decompile_file(
    handle: *mut DecompilerHandle,
    path: *const c_char,
    result: *mut *mut DecompilationResultFfi,
) -> c_int {
    if handle.is_null() || path.is_null() || result.is_null() {
        set_last_error("invalid argument");
        return -1;
    }
    clear_last_error();

    let decompiler = unsafe { &*handle.cast::<Decompiler>() };

    let Ok(path) = unsafe { CStr::from_ptr(path) }.to_str() else {
        set_last_error("path is not valid UTF-8");
        return -2;
    };

    match decompiler.decompile_file(path) {
        Ok(outcome) => {
            let ffi = Box::new(DecompilationResultFfi {
                project_name: into_c_string(outcome.project_name),
                vb6_source_text: into_c_string(outcome.vb6_source),
                is_pcode: outcome.is_pcode,
                object_count: outcome.object_count,
                method_count: outcome.method_count,
            });
            unsafe { *result = Box::into_raw(ffi) };
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -3
        }
    }
}

/// Frees a result returned by [`decompiler_decompile_file`], including its
/// strings. A null pointer is a no-op.
///
/// # Safety
/// `result` must come from this library and not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn decompiler_free_result(result: *mut DecompilationResultFfi) {
    if result.is_null() {
        return;
    }
    let owned = unsafe { Box::from_raw(result) };
    unsafe {
        decompiler_free_string(owned.project_name);
        decompiler_free_string(owned.vb6_source_text);
    }
}

/// Frees a string allocated by this library. A null pointer is a no-op.
///
/// # Safety
/// `string` must come from this library and not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn decompiler_free_string(string: *mut c_char) {
    if !string.is_null() {
        drop(unsafe { CString::from_raw(string) });
    }
}

/// The last error message on this thread, or null when the last call
/// succeeded. Owned by the library; invalidated by the next call.
#[no_mangle]
pub extern "C" fn decompiler_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

/// Disassembles `len` bytes of 32-bit x86 at `address` into a newline-joined
/// `address  bytes  text` listing. Free the string with
/// [`decompiler_free_string`]; returns null for null input.
///
/// # Safety
/// `bytes` must point at `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn decompiler_disassemble_x86(
    bytes: *const u8,
    len: usize,
    address: u32,
) -> *mut c_char {
    if bytes.is_null() {
        set_last_error("invalid argument");
        return ptr::null_mut();
    }
    clear_last_error();

    let data = unsafe { std::slice::from_raw_parts(bytes, len) };
    let listing = x86::disassemble(data, address, 0)
        .iter()
        .map(|instr| format!("0x{:08X}  {:<20}  {}", instr.address, instr.bytes_hex(), instr))
        .collect::<Vec<_>>()
        .join("\n");

    into_c_string(listing)
}

fn into_c_string(text: String) -> *mut c_char {
    CString::new(text.replace('\0', " "))
        .map_or(ptr::null_mut(), CString::into_raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_lifecycle() {
        let handle = decompiler_new();
        assert!(!handle.is_null());
        unsafe { decompiler_free(handle) };
        unsafe { decompiler_free(ptr::null_mut()) };
    }

    #[test]
    fn invalid_arguments_are_reported() {
        let status = unsafe {
            decompiler_decompile_file(ptr::null_mut(), ptr::null(), ptr::null_mut())
        };
        assert_eq!(status, -1);
        assert!(!decompiler_last_error().is_null());
    }

    #[test]
    fn missing_file_sets_last_error() {
        let handle = decompiler_new();
        let path = CString::new("/nonexistent/program.exe").unwrap();
        let mut result: *mut DecompilationResultFfi = ptr::null_mut();

        let status = unsafe {
            decompiler_decompile_file(handle, path.as_ptr(), &mut result)
        };
        assert_eq!(status, -3);
        assert!(result.is_null());

        let message = unsafe { CStr::from_ptr(decompiler_last_error()) };
        assert!(!message.to_bytes().is_empty());

        unsafe { decompiler_free(handle) };
    }

    #[test]
    fn x86_listing_roundtrip() {
        let code = [0xB8u8, 0x2A, 0x00, 0x00, 0x00, 0xC3];
        let listing = unsafe { decompiler_disassemble_x86(code.as_ptr(), code.len(), 0) };
        assert!(!listing.is_null());

        let text = unsafe { CStr::from_ptr(listing) }.to_str().unwrap().to_string();
        assert!(text.contains("mov eax, 0x2A"));
        assert!(text.contains("ret"));

        unsafe { decompiler_free_string(listing) };
    }
}
