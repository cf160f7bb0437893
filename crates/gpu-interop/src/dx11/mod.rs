//! D3D11 backend (Windows, zero-copy through `WGL_NV_DX_interop2`).

mod backend;
mod device;
mod interop;

pub use backend::{Dx11Backend, Dx11Staging, Dx11Texture};
pub use device::Dx11Device;
pub use interop::WglInteropDevice;

use windows::core::Error as WinError;

use crate::error::InteropError;

fn api(call: &'static str) -> impl FnOnce(WinError) -> InteropError {
    move |err| InteropError::Api(format!("{call}: {err}"))
}
