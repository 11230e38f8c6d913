//! C-ABI wrapper around `gallery-core`.
//!
//! # Overview
//! Exposes the cat gallery client through `extern "C"` functions so a native
//! host app can list cats and load their images without linking to Rust's
//! async runtime or serde directly.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Each client owns a small multi-threaded tokio runtime; operations return
//!   immediately with a task id and report through a C callback, invoked
//!   exactly once, normally on a worker thread. Hosts marshal onto their UI
//!   thread.
//! - A single `FfiGalleryResult` envelope with `FfiDataTag` + `void* data`
//!   conveys success payloads and errors uniformly.
//! - The C caller owns every result and returned string and must call the
//!   matching `gallery_free_*` function to release them.

pub mod types;

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use gallery_core::{ClientConfig, GalleryClient, Immediate, TaskId};
use tokio::runtime::Runtime;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use types::*;

/// Worker threads per client runtime.
const WORKER_THREADS: usize = 2;

/// Borrow a C string. `None` if it is not valid UTF-8.
///
/// # Safety
/// `ptr` must be non-null and point to a NUL-terminated string that outlives `'a`.
unsafe fn borrow_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    CStr::from_ptr(ptr).to_str().ok()
}

fn start_runtime() -> Option<Runtime> {
    match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .thread_name("gallery-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            error!(error = %e, "could not start client runtime");
            None
        }
    }
}

fn new_client(config: ClientConfig) -> *mut FfiGalleryClient {
    let Some(runtime) = start_runtime() else {
        return std::ptr::null_mut();
    };
    let inner = GalleryClient::connect(config, runtime.handle().clone(), Arc::new(Immediate));
    Box::into_raw(Box::new(FfiGalleryClient {
        inner,
        runtime: Some(runtime),
    }))
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client for the cat API at `base_url`, with default settings.
///
/// Returns null if `base_url` is null, empty or not UTF-8, or if the
/// client runtime cannot start.
/// The caller must free the returned pointer with `gallery_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_client_new(base_url: *const c_char) -> *mut FfiGalleryClient {
    catch_unwind(|| {
        if base_url.is_null() {
            return std::ptr::null_mut();
        }
        match unsafe { borrow_str(base_url) } {
            Some(url) if !url.trim().is_empty() => new_client(ClientConfig::default().with_base_url(url)),
            _ => std::ptr::null_mut(),
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Create a client from a JSON `ClientConfig`, e.g.
/// `{"base_url":"https://cataas.com","image_timeout_secs":30}`.
///
/// Returns null if `config_json` is null or not a valid configuration.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_client_new_with_config(config_json: *const c_char) -> *mut FfiGalleryClient {
    catch_unwind(|| {
        if config_json.is_null() {
            return std::ptr::null_mut();
        }
        let Some(raw) = (unsafe { borrow_str(config_json) }) else {
            return std::ptr::null_mut();
        };
        match ClientConfig::from_json(raw) {
            Ok(config) => new_client(config),
            Err(e) => {
                warn!(error = %e, "rejecting client config");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `gallery_client_new*`. Safe to call with null.
///
/// Operations still in flight are abandoned. Each one's callback still
/// fires once with `Cancelled`, either during this call or shortly after on
/// a worker thread, so `user_data` must stay valid until it does.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_client_free(client: *mut FfiGalleryClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Run an operation that owes `ctx` exactly one result.
///
/// `op` takes the context out of the slot when it hands it off. A panic
/// while the context is still in the slot is reported to the host as
/// `Panic`; one after the handoff drops the context, which reports
/// `Cancelled`.
fn run_operation<F>(name: &str, ctx: HostContext, op: F) -> u64
where
    F: FnOnce(&mut Option<HostContext>) -> u64,
{
    let mut slot = Some(ctx);
    match catch_unwind(AssertUnwindSafe(|| op(&mut slot))) {
        Ok(id) => id,
        Err(_) => {
            error!(operation = name, "panic caught at the FFI boundary");
            if let Some(ctx) = slot.take() {
                ctx.deliver(FfiGalleryResult::panic(&format!("panic in {name}")));
            }
            0
        }
    }
}

/// Report an argument error through the context still in `slot`.
fn reject(slot: &mut Option<HostContext>, result: impl FnOnce() -> *mut FfiGalleryResult) -> u64 {
    if let Some(ctx) = slot.take() {
        ctx.deliver(result());
    }
    0
}

/// List cats, optionally only those tagged `tag` (null for all).
///
/// `callback` receives exactly one result, with `data_tag = CatList` on
/// success. Returns the task id for `gallery_cancel`, or 0 if no request was
/// started (argument errors are reported through the callback). Nothing
/// happens when `callback` is null.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_list_cats(
    client: *const FfiGalleryClient,
    tag: *const c_char,
    callback: Option<FfiResultCallback>,
    user_data: *mut c_void,
) -> u64 {
    let Some(callback) = callback else {
        return 0;
    };
    run_operation("gallery_list_cats", HostContext::new(callback, user_data), |slot| {
        if client.is_null() {
            return reject(slot, || FfiGalleryResult::null_arg("client"));
        }
        let client = unsafe { &*client };
        let tag = if tag.is_null() {
            None
        } else {
            match unsafe { borrow_str(tag) } {
                Some(tag) => Some(tag),
                None => return reject(slot, || FfiGalleryResult::invalid_arg("tag")),
            }
        };
        let Some(ctx) = slot.take() else {
            return 0;
        };
        client
            .inner
            .list_cats_with(tag, move |result| ctx.deliver(FfiGalleryResult::from_cats(result)))
            .map_or(0, |id| id.get())
    })
}

/// Load the image of the cat `id_or_tag` (an id, or a tag for a random cat).
///
/// `callback` receives exactly one result, with `data_tag = Image` on
/// success. Returns the task id, or 0 if no request was started, which
/// includes images answered from the client's cache.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_cat_image(
    client: *const FfiGalleryClient,
    id_or_tag: *const c_char,
    callback: Option<FfiResultCallback>,
    user_data: *mut c_void,
) -> u64 {
    let Some(callback) = callback else {
        return 0;
    };
    run_operation("gallery_cat_image", HostContext::new(callback, user_data), |slot| {
        if client.is_null() {
            return reject(slot, || FfiGalleryResult::null_arg("client"));
        }
        if id_or_tag.is_null() {
            return reject(slot, || FfiGalleryResult::null_arg("id_or_tag"));
        }
        let client = unsafe { &*client };
        let Some(id_or_tag) = (unsafe { borrow_str(id_or_tag) }) else {
            return reject(slot, || FfiGalleryResult::invalid_arg("id_or_tag"));
        };
        let Some(ctx) = slot.take() else {
            return 0;
        };
        client
            .inner
            .cat_image_with(id_or_tag, move |result| ctx.deliver(FfiGalleryResult::from_image(result)))
            .map_or(0, |id| id.get())
    })
}

/// Cancel the most recently started operation. Its callback reports
/// `Cancelled`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_cancel_current(client: *const FfiGalleryClient) {
    if client.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let client = unsafe { &*client };
        client.inner.cancel_current();
    }));
}

/// Cancel the operation `task_id`. Unknown or finished ids are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_cancel(client: *const FfiGalleryClient, task_id: u64) {
    if client.is_null() || task_id == 0 {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let client = unsafe { &*client };
        client.inner.executor().cancel(TaskId::new(task_id));
    }));
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install a process-wide log subscriber writing to stderr.
///
/// `filter` uses `RUST_LOG` syntax (e.g. `gallery_core=debug`); null means
/// `info`. Returns false if the filter is invalid or a subscriber is
/// already installed.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_logging_init(filter: *const c_char) -> bool {
    catch_unwind(|| {
        let directives = if filter.is_null() {
            "info"
        } else {
            match unsafe { borrow_str(filter) } {
                Some(f) => f,
                None => return false,
            }
        };
        let Ok(filter) = EnvFilter::try_new(directives) else {
            return false;
        };
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    })
    .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiGalleryResult` passed to a callback. Safe to call with null.
/// Uses `data_tag` to determine what `data` points to.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_free_result(result: *mut FfiGalleryResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| unsafe { free_result(result) });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn gallery_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| unsafe { free_c_string(s) });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::mpsc;
    use std::time::Duration;

    use mock_server::{AppState, PNG_SIGNATURE};

    /// What a callback saw, copied out before the result is freed.
    #[derive(Debug)]
    struct Received {
        code: FfiErrorCode,
        http_status: u16,
        log_message: Option<String>,
        user_message: Option<String>,
        cats: Vec<(String, Vec<String>, Option<String>)>,
        image: Option<Vec<u8>>,
    }

    unsafe fn opt_string(ptr: *const c_char) -> Option<String> {
        (!ptr.is_null()).then(|| CStr::from_ptr(ptr).to_str().unwrap().to_string())
    }

    unsafe fn summarize(result: &FfiGalleryResult) -> Received {
        let mut received = Received {
            code: result.error_code,
            http_status: result.http_status,
            log_message: opt_string(result.log_message),
            user_message: opt_string(result.user_message),
            cats: Vec::new(),
            image: None,
        };
        match result.data_tag {
            FfiDataTag::CatList => {
                let list = &*(result.data as *const FfiCatList);
                if list.len > 0 {
                    for cat in std::slice::from_raw_parts(list.items, list.len as usize) {
                        let tags = if cat.tags_len == 0 {
                            Vec::new()
                        } else {
                            std::slice::from_raw_parts(cat.tags, cat.tags_len as usize)
                                .iter()
                                .map(|t| opt_string(*t).unwrap())
                                .collect()
                        };
                        received.cats.push((opt_string(cat.id).unwrap(), tags, opt_string(cat.owner)));
                    }
                }
            }
            FfiDataTag::Image => {
                let image = &*(result.data as *const FfiImage);
                received.image = Some(std::slice::from_raw_parts(image.bytes, image.len).to_vec());
            }
            FfiDataTag::None => {}
        }
        received
    }

    extern "C" fn collect(result: *mut FfiGalleryResult, user_data: *mut c_void) {
        let received = unsafe { summarize(&*result) };
        gallery_free_result(result);
        let tx = unsafe { &*(user_data as *const mpsc::Sender<Received>) };
        let _ = tx.send(received);
    }

    fn sink() -> (Box<mpsc::Sender<Received>>, mpsc::Receiver<Received>) {
        let (tx, rx) = mpsc::channel();
        (Box::new(tx), rx)
    }

    fn user_data(tx: &mpsc::Sender<Received>) -> *mut c_void {
        tx as *const mpsc::Sender<Received> as *mut c_void
    }

    fn wait(rx: &mpsc::Receiver<Received>) -> Received {
        rx.recv_timeout(Duration::from_secs(10)).unwrap()
    }

    /// Start the mock server on a random port in a background thread.
    fn start_server(state: AppState) -> CString {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                mock_server::run_with_state(listener, state).await
            })
            .unwrap();
        });

        CString::new(format!("http://{addr}")).unwrap()
    }

    // --- lifecycle ---

    #[test]
    fn client_new_and_free() {
        let url = CString::new("http://localhost:3000").unwrap();
        let client = gallery_client_new(url.as_ptr());
        assert!(!client.is_null());
        gallery_client_free(client);
    }

    #[test]
    fn client_new_null_or_empty_returns_null() {
        assert!(gallery_client_new(std::ptr::null()).is_null());
        let empty = CString::new("  ").unwrap();
        assert!(gallery_client_new(empty.as_ptr()).is_null());
    }

    #[test]
    fn client_free_null_is_safe() {
        gallery_client_free(std::ptr::null_mut());
    }

    #[test]
    fn client_from_config() {
        let json = CString::new(r#"{"base_url":"http://localhost:3000","image_timeout_secs":5}"#).unwrap();
        let client = gallery_client_new_with_config(json.as_ptr());
        assert!(!client.is_null());
        gallery_client_free(client);
    }

    #[test]
    fn client_from_bad_config_returns_null() {
        let json = CString::new(r#"{"base_url":""}"#).unwrap();
        assert!(gallery_client_new_with_config(json.as_ptr()).is_null());
        let json = CString::new("not json").unwrap();
        assert!(gallery_client_new_with_config(json.as_ptr()).is_null());
        assert!(gallery_client_new_with_config(std::ptr::null()).is_null());
    }

    // --- argument errors ---

    #[test]
    fn list_cats_null_client_reports_null_arg() {
        let (tx, rx) = sink();
        let id = gallery_list_cats(std::ptr::null(), std::ptr::null(), Some(collect), user_data(&tx));
        assert_eq!(id, 0);
        let received = wait(&rx);
        assert_eq!(received.code, FfiErrorCode::NullArg);
        assert_eq!(received.log_message.as_deref(), Some("null argument: client"));
        assert_eq!(received.user_message.as_deref(), Some("Unable to load data"));
    }

    #[test]
    fn list_cats_without_callback_does_nothing() {
        let url = CString::new("http://localhost:3000").unwrap();
        let client = gallery_client_new(url.as_ptr());
        assert_eq!(gallery_list_cats(client, std::ptr::null(), None, std::ptr::null_mut()), 0);
        gallery_client_free(client);
    }

    #[test]
    fn cat_image_null_id_reports_null_arg() {
        let url = CString::new("http://localhost:3000").unwrap();
        let client = gallery_client_new(url.as_ptr());
        let (tx, rx) = sink();
        let id = gallery_cat_image(client, std::ptr::null(), Some(collect), user_data(&tx));
        assert_eq!(id, 0);
        assert_eq!(wait(&rx).code, FfiErrorCode::NullArg);
        gallery_client_free(client);
    }

    #[test]
    fn cancel_is_safe_for_null_and_unknown_ids() {
        gallery_cancel_current(std::ptr::null());
        gallery_cancel(std::ptr::null(), 7);
        let url = CString::new("http://localhost:3000").unwrap();
        let client = gallery_client_new(url.as_ptr());
        gallery_cancel(client, 0);
        gallery_cancel(client, 42);
        gallery_cancel_current(client);
        gallery_client_free(client);
    }

    #[test]
    fn free_functions_accept_null() {
        gallery_free_result(std::ptr::null_mut());
        gallery_free_string(std::ptr::null_mut());
    }

    #[test]
    fn logging_init_installs_once() {
        let filter = CString::new("gallery_core=debug").unwrap();
        gallery_logging_init(filter.as_ptr());
        assert!(!gallery_logging_init(std::ptr::null()));
    }

    // --- exactly one callback ---

    #[test]
    fn panic_before_handoff_reports_panic() {
        let (tx, rx) = sink();
        let ctx = HostContext::new(collect, user_data(&tx));
        let id = run_operation("gallery_list_cats", ctx, |_| panic!("boom"));
        assert_eq!(id, 0);
        let received = wait(&rx);
        assert_eq!(received.code, FfiErrorCode::Panic);
        assert_eq!(received.log_message.as_deref(), Some("panic in gallery_list_cats"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn panic_after_handoff_reports_cancelled() {
        let (tx, rx) = sink();
        let ctx = HostContext::new(collect, user_data(&tx));
        let id = run_operation("gallery_cat_image", ctx, |slot| {
            let _owned = slot.take();
            panic!("boom")
        });
        assert_eq!(id, 0);
        assert_eq!(wait(&rx).code, FfiErrorCode::Cancelled);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn delivered_context_does_not_report_again() {
        let (tx, rx) = sink();
        HostContext::new(collect, user_data(&tx)).deliver(FfiGalleryResult::null_arg("client"));
        assert_eq!(wait(&rx).code, FfiErrorCode::NullArg);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        drop(HostContext::new(collect, user_data(&tx)));
        let received = wait(&rx);
        assert_eq!(received.code, FfiErrorCode::Cancelled);
        assert_eq!(received.http_status, 0);
    }

    #[test]
    fn freeing_client_mid_flight_reports_cancelled_once() {
        // Accepts connections and never answers them.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                held.push(stream);
            }
        });

        let json = CString::new(format!(r#"{{"base_url":"http://{addr}","request_timeout_secs":2}}"#)).unwrap();
        let client = gallery_client_new_with_config(json.as_ptr());
        assert!(!client.is_null());
        let (tx, rx) = sink();

        let id = gallery_list_cats(client, std::ptr::null(), Some(collect), user_data(&tx));
        assert_ne!(id, 0);
        gallery_client_free(client);

        let received = wait(&rx);
        assert_eq!(received.code, FfiErrorCode::Cancelled);
        // The blocked request times out after the free; nothing more arrives.
        assert!(rx.recv_timeout(Duration::from_secs(4)).is_err());
    }

    // --- end to end ---

    #[test]
    fn list_cats_end_to_end() {
        let url = start_server(AppState::seeded());
        let client = gallery_client_new(url.as_ptr());
        let (tx, rx) = sink();

        let tag = CString::new("cute").unwrap();
        let id = gallery_list_cats(client, tag.as_ptr(), Some(collect), user_data(&tx));
        assert_ne!(id, 0);

        let received = wait(&rx);
        assert_eq!(received.code, FfiErrorCode::Ok);
        assert!(received.log_message.is_none());
        assert_eq!(received.cats.len(), 2);
        assert!(received.cats.iter().all(|(_, tags, _)| tags.contains(&"cute".to_string())));
        assert_eq!(received.cats[1].2.as_deref(), Some("Ann"));

        gallery_client_free(client);
    }

    #[test]
    fn cat_image_end_to_end_uses_cache() {
        let state = AppState::seeded();
        let cat_id = CString::new(state.cats()[0].id.clone()).unwrap();
        let url = start_server(state.clone());
        let client = gallery_client_new(url.as_ptr());
        let (tx, rx) = sink();

        let first_id = gallery_cat_image(client, cat_id.as_ptr(), Some(collect), user_data(&tx));
        assert_ne!(first_id, 0);
        let first = wait(&rx);
        assert_eq!(first.code, FfiErrorCode::Ok);
        let bytes = first.image.unwrap();
        assert_eq!(&bytes[..8], &PNG_SIGNATURE);

        let second_id = gallery_cat_image(client, cat_id.as_ptr(), Some(collect), user_data(&tx));
        assert_eq!(second_id, 0);
        assert_eq!(wait(&rx).image.unwrap(), bytes);
        assert_eq!(state.image_hits(), 1);

        gallery_client_free(client);
    }

    #[test]
    fn missing_image_reports_status() {
        let url = start_server(AppState::seeded());
        let client = gallery_client_new(url.as_ptr());
        let (tx, rx) = sink();

        let missing = CString::new("nothing").unwrap();
        gallery_cat_image(client, missing.as_ptr(), Some(collect), user_data(&tx));
        let received = wait(&rx);
        assert_eq!(received.code, FfiErrorCode::ServerError);
        assert_eq!(received.http_status, 404);
        assert!(received.image.is_none());

        gallery_client_free(client);
    }

    #[test]
    fn unreachable_server_reports_image_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let url = CString::new(format!("http://127.0.0.1:{port}")).unwrap();
        let client = gallery_client_new(url.as_ptr());
        let (tx, rx) = sink();

        let id = CString::new("any").unwrap();
        gallery_cat_image(client, id.as_ptr(), Some(collect), user_data(&tx));
        let received = wait(&rx);
        assert_eq!(received.code, FfiErrorCode::DownloadImageError);
        assert_eq!(received.user_message.as_deref(), Some("Unable to load image"));

        gallery_client_free(client);
    }
}
