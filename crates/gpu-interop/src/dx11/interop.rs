//! `WGL_NV_DX_interop2`: registering D3D11 textures with a GL context.

use std::ffi::{c_void, CStr};

use gl::types::{GLenum, GLint, GLuint};
use tracing::{debug, warn};
use windows::core::{Interface, PCSTR};
use windows::Win32::Graphics::Direct3D11::ID3D11Device;
use windows::Win32::Graphics::Gdi::HDC;
use windows::Win32::Graphics::OpenGL::{wglGetCurrentDC, wglGetProcAddress};

use crate::backend::{ForeignTexture, InteropDevice, InteropObject};
use crate::error::{InteropError, InteropResult};

const WGL_ACCESS_READ_ONLY_NV: GLenum = 0x0000;

type WglDxOpenDeviceNv = unsafe extern "system" fn(dx_device: *mut c_void) -> *mut c_void;
type WglDxCloseDeviceNv = unsafe extern "system" fn(device: *mut c_void) -> i32;
type WglDxRegisterObjectNv = unsafe extern "system" fn(
    device: *mut c_void,
    dx_object: *mut c_void,
    name: GLuint,
    object_type: GLenum,
    access: GLenum,
) -> *mut c_void;
type WglDxUnregisterObjectNv = unsafe extern "system" fn(device: *mut c_void, object: *mut c_void) -> i32;
type WglDxLockObjectsNv =
    unsafe extern "system" fn(device: *mut c_void, count: GLint, objects: *mut *mut c_void) -> i32;
type WglGetExtensionsStringArb = unsafe extern "system" fn(hdc: HDC) -> *const i8;

struct WglInteropFunctions {
    open_device: WglDxOpenDeviceNv,
    close_device: WglDxCloseDeviceNv,
    register_object: WglDxRegisterObjectNv,
    unregister_object: WglDxUnregisterObjectNv,
    lock_objects: WglDxLockObjectsNv,
    unlock_objects: WglDxLockObjectsNv,
}

/// Address of a WGL entry point for the current GL context.
unsafe fn proc_address(name: &CStr) -> Option<*mut c_void> {
    let address = wglGetProcAddress(PCSTR(name.as_ptr() as *const u8))?;
    Some(address as usize as *mut c_void).filter(|ptr| !ptr.is_null())
}

impl WglInteropFunctions {
    fn load() -> Option<Self> {
        unsafe {
            Some(Self {
                open_device: std::mem::transmute::<*mut c_void, WglDxOpenDeviceNv>(proc_address(
                    c"wglDXOpenDeviceNV",
                )?),
                close_device: std::mem::transmute::<*mut c_void, WglDxCloseDeviceNv>(proc_address(
                    c"wglDXCloseDeviceNV",
                )?),
                register_object: std::mem::transmute::<*mut c_void, WglDxRegisterObjectNv>(
                    proc_address(c"wglDXRegisterObjectNV")?,
                ),
                unregister_object: std::mem::transmute::<*mut c_void, WglDxUnregisterObjectNv>(
                    proc_address(c"wglDXUnregisterObjectNV")?,
                ),
                lock_objects: std::mem::transmute::<*mut c_void, WglDxLockObjectsNv>(proc_address(
                    c"wglDXLockObjectsNV",
                )?),
                unlock_objects: std::mem::transmute::<*mut c_void, WglDxLockObjectsNv>(proc_address(
                    c"wglDXUnlockObjectsNV",
                )?),
            })
        }
    }
}

/// Whether the current GL context advertises `WGL_NV_DX_interop2`.
pub fn is_available() -> bool {
    unsafe {
        let Some(address) = proc_address(c"wglGetExtensionsStringARB") else {
            return false;
        };
        let get_extensions = std::mem::transmute::<*mut c_void, WglGetExtensionsStringArb>(address);
        let extensions = get_extensions(wglGetCurrentDC());
        if extensions.is_null() {
            return false;
        }
        CStr::from_ptr(extensions)
            .to_string_lossy()
            .split_ascii_whitespace()
            .any(|ext| ext == "WGL_NV_DX_interop2")
    }
}

/// A D3D11 device opened for interop with the GL context that was current
/// when it was created. Closed on drop, which must happen on that context's
/// thread.
pub struct WglInteropDevice {
    fns: WglInteropFunctions,
    handle: *mut c_void,
}

// SAFETY: only used from the render thread that owns the GL context; it is
// moved between threads only to be dropped on that thread's executor.
unsafe impl Send for WglInteropDevice {}

impl WglInteropDevice {
    pub fn open(device: &ID3D11Device) -> InteropResult<Self> {
        if !is_available() {
            return Err(InteropError::Unsupported("WGL_NV_DX_interop2 not exposed".into()));
        }
        let fns = WglInteropFunctions::load()
            .ok_or_else(|| InteropError::Unsupported("WGL_NV_DX_interop2 entry points missing".into()))?;
        let handle = unsafe { (fns.open_device)(Interface::as_raw(device)) };
        if handle.is_null() {
            // the GL context runs on another adapter
            return Err(InteropError::DifferentDevice);
        }
        debug!("interop device opened");
        Ok(Self { fns, handle })
    }

    fn lock_call(&self, lock: WglDxLockObjectsNv, object: InteropObject, name: &str) -> InteropResult<()> {
        let mut objects = [object.raw() as *mut c_void];
        let ok = unsafe { lock(self.handle, 1, objects.as_mut_ptr()) };
        if ok == 0 {
            return Err(InteropError::Api(format!("{name} failed")));
        }
        Ok(())
    }
}

impl InteropDevice for WglInteropDevice {
    fn register(&self, texture: &dyn ForeignTexture, gl_texture: GLuint) -> InteropResult<InteropObject> {
        let object = unsafe {
            (self.fns.register_object)(
                self.handle,
                texture.raw(),
                gl_texture,
                gl::TEXTURE_2D,
                WGL_ACCESS_READ_ONLY_NV,
            )
        };
        if object.is_null() {
            return Err(InteropError::Unsupported("wglDXRegisterObjectNV refused the texture".into()));
        }
        Ok(InteropObject::from_raw(object as usize))
    }

    fn unregister(&self, object: InteropObject) {
        if unsafe { (self.fns.unregister_object)(self.handle, object.raw() as *mut c_void) } == 0 {
            warn!("wglDXUnregisterObjectNV failed");
        }
    }

    fn lock(&self, object: InteropObject) -> InteropResult<()> {
        self.lock_call(self.fns.lock_objects, object, "wglDXLockObjectsNV")
    }

    fn unlock(&self, object: InteropObject) -> InteropResult<()> {
        self.lock_call(self.fns.unlock_objects, object, "wglDXUnlockObjectsNV")
    }
}

impl Drop for WglInteropDevice {
    fn drop(&mut self) {
        if unsafe { (self.fns.close_device)(self.handle) } == 0 {
            warn!("wglDXCloseDeviceNV failed");
        }
    }
}
