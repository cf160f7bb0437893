//! D3D11 device shared by every texture a backend opens.

use anyhow::{bail, Result};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;

use super::api;
use crate::error::{InteropError, InteropResult};

/// D3D11 device plus its immediate context.
///
/// The device is created without `D3D11_CREATE_DEVICE_SINGLETHREADED`, so
/// resource creation is free-threaded; the immediate context is only handed
/// out behind a mutex.
pub struct Dx11Device {
    device: ID3D11Device,
    context: Mutex<ID3D11DeviceContext>,
}

// SAFETY: the device is free-threaded and the context is only reachable
// through the mutex.
unsafe impl Send for Dx11Device {}
unsafe impl Sync for Dx11Device {}

impl Dx11Device {
    /// Hardware device, or WARP when no hardware adapter is usable.
    pub fn new() -> Result<Self> {
        for driver_type in [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP] {
            let mut device = None;
            let mut context = None;
            let created = unsafe {
                D3D11CreateDevice(
                    None,
                    driver_type,
                    HMODULE::default(),
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    Some(&[D3D_FEATURE_LEVEL_11_0]),
                    D3D11_SDK_VERSION,
                    Some(&mut device as *mut _),
                    None,
                    Some(&mut context as *mut _),
                )
            };
            match (created, device, context) {
                (Ok(()), Some(device), Some(context)) => {
                    debug!(?driver_type, "D3D11 device created");
                    return Ok(Self {
                        device,
                        context: Mutex::new(context),
                    });
                }
                (Err(err), ..) => warn!(?driver_type, %err, "D3D11 device creation failed"),
                _ => warn!(?driver_type, "D3D11 device creation returned no device"),
            }
        }
        bail!("failed to create a D3D11 device with any driver type")
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> MutexGuard<'_, ID3D11DeviceContext> {
        self.context.lock()
    }

    /// `D3D11_QUERY_EVENT` signalled once the work before its `End` is done.
    pub fn create_event_query(&self) -> InteropResult<ID3D11Query> {
        let desc = D3D11_QUERY_DESC {
            Query: D3D11_QUERY_EVENT,
            ..Default::default()
        };
        let mut query = None;
        unsafe { self.device.CreateQuery(&desc, Some(&mut query as *mut _)) }.map_err(api("CreateQuery"))?;
        query.ok_or_else(|| InteropError::Api("CreateQuery returned no query".into()))
    }
}
