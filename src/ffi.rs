use crate::bridge::{encode_frame, GuestBridge};
use crate::error::status;
use crate::SPSC::{Message, ProtocolTag};
use std::ptr;
use std::time::Duration;

/// Handle to a guest bridge (opaque pointer)
pub struct BridgeHandle {
    inner: GuestBridge,
    // Frame received but not yet copied out because the caller's buffer was short
    pending: Option<Vec<u8>>,
}

/// Hand a bridge to C code. The pointer must be released with `dpb_bridge_free`.
pub fn bridge_into_raw(bridge: GuestBridge) -> *mut BridgeHandle {
    Box::into_raw(Box::new(BridgeHandle {
        inner: bridge,
        pending: None,
    }))
}

/// Copy `data` to `out_buf`, or report the needed size through `out_len`.
///
/// # Safety
/// `out_len` must be valid for reads and writes; `out_buf` must be valid for
/// `*out_len` bytes of writes when not null.
unsafe fn copy_out(data: &[u8], out_buf: *mut u8, out_len: *mut usize) -> i32 {
    let max_len = *out_len;
    *out_len = data.len();
    if data.len() > max_len || (out_buf.is_null() && !data.is_empty()) {
        return status::CAPACITY_EXCEEDED; // Buffer too small
    }
    if !data.is_empty() {
        ptr::copy_nonoverlapping(data.as_ptr(), out_buf, data.len());
    }
    status::SUCCESS
}

// -----------------------------------------------------------------------------
// Bridge API
// -----------------------------------------------------------------------------

/// Submit one raw guest frame.
///
/// # Returns
/// * 0 on success.
/// * `MALFORMED_INPUT` if the frame was rejected; nothing entered the pipeline.
/// * `SLOT_OCCUPIED`, `CHANNEL_CLOSED` or another negative code from the ingress channel.
///
/// # Safety
/// `handle` must come from `bridge_into_raw`; `data` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn dpb_bridge_submit(handle: *mut BridgeHandle, data: *const u8, len: usize) -> i32 {
    if handle.is_null() || (data.is_null() && len != 0) {
        return status::NULL_POINTER;
    }

    let bridge = &(*handle).inner;
    let raw = if len == 0 { &[][..] } else { std::slice::from_raw_parts(data, len) };

    match bridge.guest_to_pipeline(raw) {
        Ok(()) => status::SUCCESS,
        Err(e) => e.status_code(),
    }
}

/// Receive the next egress frame.
///
/// # Arguments
/// * `timeout_ms` - 0 polls; otherwise wait up to this long.
/// * `out_buf` - Buffer to write the frame into.
/// * `out_len` - Input: size of buf, Output: size of the frame.
///
/// # Returns
/// * 0 on success.
/// * `EMPTY` if polling found nothing, `TIMEOUT` if the wait expired.
/// * `CAPACITY_EXCEEDED` if the buffer is too small; `*out_len` holds the
///   needed size and the frame is kept for the next call.
///
/// # Safety
/// `handle` must come from `bridge_into_raw`; `out_len` must be valid and
/// `out_buf` valid for `*out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn dpb_bridge_receive(
    handle: *mut BridgeHandle,
    timeout_ms: u32,
    out_buf: *mut u8,
    out_len: *mut usize,
) -> i32 {
    if handle.is_null() || out_len.is_null() {
        return status::NULL_POINTER;
    }
    let handle = &mut *handle;

    let frame = match handle.pending.take() {
        Some(frame) => frame,
        None if timeout_ms == 0 => match handle.inner.egress().try_receive() {
            Ok(Some(frame)) => frame,
            Ok(None) => return status::EMPTY,
            Err(e) => return e.status_code(),
        },
        None => match handle.inner.receive(Duration::from_millis(timeout_ms as u64)) {
            Ok(frame) => frame,
            Err(e) => return e.status_code(),
        },
    };

    let code = copy_out(&frame, out_buf, out_len);
    if code != status::SUCCESS {
        handle.pending = Some(frame);
    }
    code
}

/// Free a bridge handle.
///
/// # Safety
/// `handle` must come from `bridge_into_raw` and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn dpb_bridge_free(handle: *mut BridgeHandle) {
    if !handle.is_null() {
        let _ = Box::from_raw(handle); // Dropped automatically
    }
}

// -----------------------------------------------------------------------------
// Framing helper for guests
// -----------------------------------------------------------------------------

/// Build a guest frame from its parts.
///
/// # Returns
/// * 0 on success, `INVALID_ARG` for an unknown tag, `CAPACITY_EXCEEDED` if
///   `out_buf` is too small (`*out_len` then holds the needed size).
///
/// # Safety
/// `payload` must be valid for `len` bytes; `out_len` must be valid and
/// `out_buf` valid for `*out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn dpb_frame_encode(
    protocol_tag: u8,
    timestamp: u64,
    payload: *const u8,
    len: usize,
    out_buf: *mut u8,
    out_len: *mut usize,
) -> i32 {
    if out_len.is_null() || (payload.is_null() && len != 0) {
        return status::NULL_POINTER;
    }
    let Ok(tag) = ProtocolTag::try_from(protocol_tag) else {
        return status::INVALID_ARG;
    };
    let payload = if len == 0 { &[][..] } else { std::slice::from_raw_parts(payload, len) };

    match encode_frame(&Message::with_timestamp(tag, timestamp, payload)) {
        Ok(frame) => copy_out(&frame, out_buf, out_len),
        Err(_) => status::CAPACITY_EXCEEDED,
    }
}
