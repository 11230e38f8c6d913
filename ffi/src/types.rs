//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type but uses C-compatible representations:
//! `*mut c_char` instead of `String`, raw pointers instead of `Vec`, and
//! tagged enums with explicit discriminants. Conversion functions live here
//! to keep `lib.rs` focused on the `extern "C"` surface.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use bytes::Bytes;
use gallery_core::error::DATA_USER_MESSAGE;
use gallery_core::{Cat, ErrorCause, GalleryClient, RequestError, TransportError};
use tokio::runtime::Runtime;

/// Opaque handle to a `GalleryClient` and the runtime its requests run on.
/// C callers receive a pointer to this and pass it back into every FFI
/// function.
pub struct FfiGalleryClient {
    pub(crate) inner: GalleryClient,
    pub(crate) runtime: Option<Runtime>,
}

impl Drop for FfiGalleryClient {
    fn drop(&mut self) {
        // The last reference may be released from a callback on a worker.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Called once per operation with its result. The callee owns `result` and
/// must release it with `gallery_free_result`.
pub type FfiResultCallback = extern "C" fn(result: *mut FfiGalleryResult, user_data: *mut c_void);

/// A host callback and its opaque context, carried to a worker thread.
///
/// Dropped without a result (its operation was abandoned, e.g. by freeing
/// the client), it reports `Cancelled` so the host still hears back once.
pub(crate) struct HostContext {
    callback: Option<FfiResultCallback>,
    user_data: *mut c_void,
}

// The host promises `user_data` may be used from any thread.
unsafe impl Send for HostContext {}

impl HostContext {
    pub(crate) fn new(callback: FfiResultCallback, user_data: *mut c_void) -> Self {
        Self {
            callback: Some(callback),
            user_data,
        }
    }

    pub(crate) fn deliver(mut self, result: *mut FfiGalleryResult) {
        if let Some(callback) = self.callback.take() {
            callback(result, self.user_data);
        }
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            let cancelled = RequestError::NetworkError(ErrorCause::new(TransportError::Cancelled));
            callback(FfiGalleryResult::from_error(cancelled), self.user_data);
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Error codes returned in `FfiGalleryResult`.
///
/// `Ok` through `UnknownError` follow the core error kinds. `Cancelled` is
/// the network error of a cancelled operation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    InvalidData = 1,
    InvalidUrl = 2,
    NetworkError = 3,
    DecodingError = 4,
    ServerError = 5,
    ResponseUnsuccessful = 6,
    DownloadImageError = 7,
    UnknownError = 8,
    Cancelled = 9,
    Panic = 10,
    NullArg = 11,
    InvalidArg = 12,
}

/// Tag that tells `gallery_free_result` what `FfiGalleryResult::data` points to.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiDataTag {
    None = 0,
    CatList = 1,
    Image = 2,
}

/// A cat exposed to C. `owner` is null when the cat has none; dates are RFC 3339.
#[repr(C)]
pub struct FfiCat {
    pub id: *mut c_char,
    pub tags: *mut *mut c_char,
    pub tags_len: u32,
    pub owner: *mut c_char,
    pub created_at: *mut c_char,
    pub updated_at: *mut c_char,
}

#[repr(C)]
pub struct FfiCatList {
    pub items: *mut FfiCat,
    pub len: u32,
}

/// Encoded image bytes, exactly as served.
#[repr(C)]
pub struct FfiImage {
    pub bytes: *mut u8,
    pub len: usize,
}

/// Result envelope for every operation.
///
/// On success `error_code` is `Ok`, both messages are null, and `data`
/// points to the payload (tagged by `data_tag`).
/// On failure `log_message` carries the diagnostic text, `user_message` the
/// text to show, `http_status` the status of a `ServerError`, and `data` is
/// null.
#[repr(C)]
pub struct FfiGalleryResult {
    pub error_code: FfiErrorCode,
    pub log_message: *mut c_char,
    pub user_message: *mut c_char,
    pub http_status: u16,
    pub data_tag: FfiDataTag,
    pub data: *mut c_void,
}

/// Convert to a C string, dropping interior NULs rather than failing.
pub(crate) fn to_c_string(s: impl Into<String>) -> *mut c_char {
    let c = CString::new(s.into()).unwrap_or_else(|e| {
        let mut bytes = e.into_vec();
        bytes.retain(|b| *b != 0);
        CString::new(bytes).unwrap_or_default()
    });
    c.into_raw()
}

/// Hand a vector to C as a pointer; empty vectors become null.
fn into_raw_parts<T>(items: Vec<T>) -> (*mut T, usize) {
    if items.is_empty() {
        return (std::ptr::null_mut(), 0);
    }
    let boxed = items.into_boxed_slice();
    let len = boxed.len();
    (Box::into_raw(boxed) as *mut T, len)
}

impl FfiCat {
    fn from_core(cat: Cat) -> Self {
        let tags: Vec<*mut c_char> = cat.tags.into_iter().map(to_c_string).collect();
        let (tags, tags_len) = into_raw_parts(tags);
        FfiCat {
            id: to_c_string(cat.id),
            tags,
            tags_len: tags_len as u32,
            owner: cat.owner.map(to_c_string).unwrap_or(std::ptr::null_mut()),
            created_at: to_c_string(cat.created_at.to_rfc3339()),
            updated_at: to_c_string(cat.updated_at.to_rfc3339()),
        }
    }
}

impl FfiGalleryResult {
    fn ok(data_tag: FfiDataTag, data: *mut c_void) -> *mut Self {
        Box::into_raw(Box::new(FfiGalleryResult {
            error_code: FfiErrorCode::Ok,
            log_message: std::ptr::null_mut(),
            user_message: std::ptr::null_mut(),
            http_status: 0,
            data_tag,
            data,
        }))
    }

    fn failure(error_code: FfiErrorCode, log_message: String, user_message: &str, http_status: u16) -> *mut Self {
        Box::into_raw(Box::new(FfiGalleryResult {
            error_code,
            log_message: to_c_string(log_message),
            user_message: to_c_string(user_message),
            http_status,
            data_tag: FfiDataTag::None,
            data: std::ptr::null_mut(),
        }))
    }

    pub(crate) fn from_cats(result: Result<Vec<Cat>, RequestError>) -> *mut Self {
        match result {
            Ok(cats) => {
                let items: Vec<FfiCat> = cats.into_iter().map(FfiCat::from_core).collect();
                let (items, len) = into_raw_parts(items);
                let list = Box::new(FfiCatList { items, len: len as u32 });
                Self::ok(FfiDataTag::CatList, Box::into_raw(list) as *mut c_void)
            }
            Err(e) => Self::from_error(e),
        }
    }

    pub(crate) fn from_image(result: Result<Bytes, RequestError>) -> *mut Self {
        match result {
            Ok(bytes) => {
                let (bytes, len) = into_raw_parts(bytes.to_vec());
                let image = Box::new(FfiImage { bytes, len });
                Self::ok(FfiDataTag::Image, Box::into_raw(image) as *mut c_void)
            }
            Err(e) => Self::from_error(e),
        }
    }

    /// Build an error result from a `RequestError`.
    pub(crate) fn from_error(err: RequestError) -> *mut Self {
        let (error_code, http_status) = match &err {
            e if e.is_cancellation() => (FfiErrorCode::Cancelled, 0),
            RequestError::InvalidData(_) => (FfiErrorCode::InvalidData, 0),
            RequestError::InvalidUrl(_) => (FfiErrorCode::InvalidUrl, 0),
            RequestError::NetworkError(_) => (FfiErrorCode::NetworkError, 0),
            RequestError::DecodingError(_) => (FfiErrorCode::DecodingError, 0),
            RequestError::ServerError { status_code } => (FfiErrorCode::ServerError, *status_code),
            RequestError::ResponseUnsuccessful(_) => (FfiErrorCode::ResponseUnsuccessful, 0),
            RequestError::DownloadImageError(_) => (FfiErrorCode::DownloadImageError, 0),
            RequestError::UnknownError(_) => (FfiErrorCode::UnknownError, 0),
        };
        Self::failure(error_code, err.log_message(), err.user_message(), http_status)
    }

    /// Build an error result for a null argument.
    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::failure(FfiErrorCode::NullArg, format!("null argument: {name}"), DATA_USER_MESSAGE, 0)
    }

    /// Build an error result for an argument that is not valid UTF-8.
    pub(crate) fn invalid_arg(name: &str) -> *mut Self {
        Self::failure(FfiErrorCode::InvalidArg, format!("argument is not valid UTF-8: {name}"), DATA_USER_MESSAGE, 0)
    }

    /// Build an error result for a caught panic.
    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::failure(FfiErrorCode::Panic, msg.to_string(), DATA_USER_MESSAGE, 0)
    }
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

/// Reclaim a pointer produced by `into_raw_parts`.
///
/// # Safety
/// `ptr` and `len` must come from one `into_raw_parts` call.
unsafe fn from_raw_parts<T>(ptr: *mut T, len: usize) -> Vec<T> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)).into_vec()
}

/// # Safety
/// `s` must be null or come from `to_c_string`.
pub(crate) unsafe fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Free the fields of an `FfiCat` (but not the struct itself).
unsafe fn free_cat_fields(cat: &FfiCat) {
    free_c_string(cat.id);
    for tag in from_raw_parts(cat.tags, cat.tags_len as usize) {
        free_c_string(tag);
    }
    free_c_string(cat.owner);
    free_c_string(cat.created_at);
    free_c_string(cat.updated_at);
}

/// Release a result and everything it owns.
///
/// # Safety
/// `result` must be non-null and come from one of the constructors above,
/// and must not be used afterwards.
pub(crate) unsafe fn free_result(result: *mut FfiGalleryResult) {
    let result = Box::from_raw(result);
    free_c_string(result.log_message);
    free_c_string(result.user_message);
    if result.data.is_null() {
        return;
    }
    match result.data_tag {
        FfiDataTag::CatList => {
            let list = Box::from_raw(result.data as *mut FfiCatList);
            for cat in from_raw_parts(list.items, list.len as usize) {
                free_cat_fields(&cat);
            }
        }
        FfiDataTag::Image => {
            let image = Box::from_raw(result.data as *mut FfiImage);
            drop(from_raw_parts(image.bytes, image.len));
        }
        FfiDataTag::None => {}
    }
}
