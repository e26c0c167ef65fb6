//! C entry points for loading a converted model on device.

use super::MobileModel;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;

#[no_mangle]
pub extern "C" fn mobile_model_load(path: *const c_char) -> *mut MobileModel {
    if path.is_null() {
        return std::ptr::null_mut();
    }
    let c_str = unsafe { CStr::from_ptr(path) };
    let path = PathBuf::from(c_str.to_string_lossy().into_owned());
    match MobileModel::load_mmap(&path).or_else(|_| MobileModel::load(&path)) {
        Ok(model) => Box::into_raw(Box::new(model)),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to load mobile model");
            std::ptr::null_mut()
        }
    }
}

/// Number of tensors in a loaded model, or -1 for a null handle.
#[no_mangle]
pub extern "C" fn mobile_model_tensor_count(model: *const MobileModel) -> c_int {
    if model.is_null() {
        return -1;
    }
    let model = unsafe { &*model };
    model.tensors.len() as c_int
}

#[no_mangle]
pub extern "C" fn mobile_model_free(model: *mut MobileModel) {
    if !model.is_null() {
        unsafe {
            drop(Box::from_raw(model));
        }
    }
}
