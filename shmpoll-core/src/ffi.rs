//! C ABI for linking shmpoll-core as a static library from C/C++ or wasm hosts.
//! Exposes the reference module's export surface behind an opaque handle; hosts
//! read and write the returned regions directly and never pass callbacks in.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::ptr;

use crate::echo::EchoModule;
use crate::module::Module;
use crate::protocol::{DEFAULT_BUFFER_SIZE, PROTOCOL_VERSION};

/// Returns the protocol version. Used so the staticlib exports a C symbol and is linkable.
#[no_mangle]
pub extern "C" fn shmpoll_version() -> u8 {
    PROTOCOL_VERSION
}

/// Create a module with `capacity` bytes per buffer (0 = 64 KiB). Returns opaque handle or null on failure.
#[no_mangle]
pub extern "C" fn shmpoll_module_create(capacity: u32) -> *mut c_void {
    let capacity = if capacity == 0 {
        DEFAULT_BUFFER_SIZE
    } else {
        capacity as usize
    };
    match EchoModule::new(capacity) {
        Ok(m) => Box::into_raw(Box::new(m)) as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

/// Destroy module instance. No-op if h is null.
#[no_mangle]
pub extern "C" fn shmpoll_module_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut EchoModule) };
}

fn region_ptr(h: *mut c_void, offset: fn(&EchoModule) -> u32) -> *mut u8 {
    if h.is_null() {
        return ptr::null_mut();
    }
    let module = unsafe { &mut *(h as *mut EchoModule) };
    let at = offset(module) as usize;
    module.memory_mut()[at..].as_mut_ptr()
}

/// Pointer to the input region header (status, length, then payload). Null if h null.
#[no_mangle]
pub extern "C" fn shmpoll_get_input_buffer(h: *mut c_void) -> *mut u8 {
    region_ptr(h, EchoModule::input_buffer)
}

/// Pointer to the output region header. Null if h null.
#[no_mangle]
pub extern "C" fn shmpoll_get_output_buffer(h: *mut c_void) -> *mut u8 {
    region_ptr(h, EchoModule::output_buffer)
}

/// Pointer to the control block. Null if h null.
#[no_mangle]
pub extern "C" fn shmpoll_get_control(h: *mut c_void) -> *mut u8 {
    region_ptr(h, EchoModule::control_block)
}

/// Payload capacity of each buffer. 0 if h null.
#[no_mangle]
pub extern "C" fn shmpoll_get_buffer_size(h: *mut c_void) -> u32 {
    if h.is_null() {
        return 0;
    }
    let module = unsafe { &*(h as *const EchoModule) };
    module.buffer_size()
}

#[no_mangle]
pub extern "C" fn shmpoll_reset_buffers(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let module = unsafe { &mut *(h as *mut EchoModule) };
    module.reset_buffers();
}

/// Call after writing `length` bytes at input + 8. A `length` above the buffer
/// size is clamped to it (logged at warn level); no error is recorded.
#[no_mangle]
pub extern "C" fn shmpoll_signal_input_ready(h: *mut c_void, length: u32) {
    if h.is_null() {
        return;
    }
    let module = unsafe { &mut *(h as *mut EchoModule) };
    module.signal_input_ready(length);
}

/// Returns 1 if output is ready, 0 otherwise (or if h null).
#[no_mangle]
pub extern "C" fn shmpoll_has_output(h: *mut c_void) -> c_int {
    if h.is_null() {
        return 0;
    }
    let module = unsafe { &*(h as *const EchoModule) };
    module.has_output() as c_int
}

#[no_mangle]
pub extern "C" fn shmpoll_get_output_length(h: *mut c_void) -> u32 {
    if h.is_null() {
        return 0;
    }
    let module = unsafe { &*(h as *const EchoModule) };
    module.output_length()
}

/// Acknowledge consumed output; may publish the next streamed row.
#[no_mangle]
pub extern "C" fn shmpoll_ack_output(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let module = unsafe { &mut *(h as *mut EchoModule) };
    module.ack_output();
}

/// Process the signalled input. Returns 0 on success, -1 on failure (see control block) or if h null.
#[no_mangle]
pub extern "C" fn shmpoll_process_message(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let module = unsafe { &mut *(h as *mut EchoModule) };
    module.process_message()
}

/// Stream `num_rows` DataRow messages, one per ack. Returns 0 on success, -1 on failure or bad arguments.
#[no_mangle]
pub extern "C" fn shmpoll_process_multi_row(h: *mut c_void, num_rows: c_int) -> c_int {
    if h.is_null() || num_rows < 0 {
        return -1;
    }
    let module = unsafe { &mut *(h as *mut EchoModule) };
    module.process_multiple(num_rows as u32).unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Operation, HEADER_SIZE};
    use crate::wire;

    unsafe fn read_u32(p: *const u8) -> u32 {
        let mut b = [0u8; 4];
        ptr::copy_nonoverlapping(p, b.as_mut_ptr(), 4);
        u32::from_le_bytes(b)
    }

    #[test]
    fn exchange_through_raw_pointers() {
        let h = shmpoll_module_create(1024);
        assert!(!h.is_null());
        assert_eq!(shmpoll_get_buffer_size(h), 1024);
        shmpoll_reset_buffers(h);

        let query = b"select now();";
        let input = shmpoll_get_input_buffer(h);
        unsafe {
            ptr::copy_nonoverlapping(query.as_ptr(), input.add(HEADER_SIZE), query.len());
        }
        shmpoll_signal_input_ready(h, query.len() as u32);
        assert_eq!(shmpoll_process_message(h), 0);

        let control = shmpoll_get_control(h);
        assert_eq!(unsafe { read_u32(control) }, Operation::Completed as u32);
        assert_eq!(shmpoll_has_output(h), 1);
        let len = shmpoll_get_output_length(h) as usize;
        let output = shmpoll_get_output_buffer(h);
        assert_eq!(unsafe { read_u32(output.add(4)) } as usize, len);
        let mut out = vec![0u8; len];
        unsafe {
            ptr::copy_nonoverlapping(output.add(HEADER_SIZE), out.as_mut_ptr(), len);
        }
        let msg = wire::decode(&out).unwrap();
        assert_eq!(msg.payload, b"SELECT NOW();");

        shmpoll_ack_output(h);
        assert_eq!(shmpoll_has_output(h), 0);
        shmpoll_module_destroy(h);
    }

    #[test]
    fn multi_row_over_c_abi() {
        let h = shmpoll_module_create(0);
        assert_eq!(shmpoll_get_buffer_size(h) as usize, DEFAULT_BUFFER_SIZE);
        assert_eq!(shmpoll_process_multi_row(h, 2), 0);
        let mut rows = 0;
        while shmpoll_has_output(h) == 1 {
            rows += 1;
            shmpoll_ack_output(h);
        }
        assert_eq!(rows, 2);
        assert_eq!(shmpoll_process_multi_row(h, -1), -1);
        shmpoll_module_destroy(h);
    }

    #[test]
    fn null_handle_is_harmless() {
        let h = ptr::null_mut();
        assert!(shmpoll_get_input_buffer(h).is_null());
        assert_eq!(shmpoll_get_buffer_size(h), 0);
        assert_eq!(shmpoll_has_output(h), 0);
        assert_eq!(shmpoll_process_message(h), -1);
        shmpoll_reset_buffers(h);
        shmpoll_ack_output(h);
        shmpoll_module_destroy(h);
        assert_eq!(shmpoll_version(), PROTOCOL_VERSION);
    }
}
