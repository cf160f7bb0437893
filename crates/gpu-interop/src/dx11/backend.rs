use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use render_core::PixelFormat;
use tracing::{debug, warn};
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::{CloseHandle, CompareObjectHandles, DuplicateHandle, DUPLICATE_SAME_ACCESS, HANDLE};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::IDXGIKeyedMutex;
use windows::Win32::System::Threading::GetCurrentProcess;

use super::api;
use super::device::Dx11Device;
use super::interop::WglInteropDevice;
use crate::backend::{
    ForeignTexture, InteropDevice, MappedTexture, SharedHandle, SharedTextureBackend, StagingTexture, TextureDesc,
};
use crate::error::{InteropError, InteropResult};

/// `WAIT_TIMEOUT` as returned by `IDXGIKeyedMutex::AcquireSync`. It is a
/// success code, so it has to be checked on the raw `HRESULT`.
const KEYED_MUTEX_TIMEOUT: HRESULT = HRESULT(0x0000_0102);
const KEYED_MUTEX_ABANDONED: HRESULT = HRESULT(0x0000_0080);

fn handle(handle: SharedHandle) -> HANDLE {
    HANDLE(handle.raw() as *mut c_void)
}

fn pixel_format(format: DXGI_FORMAT) -> Option<PixelFormat> {
    let format = match format {
        DXGI_FORMAT_B8G8R8A8_UNORM | DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => PixelFormat::bgra8(),
        DXGI_FORMAT_R8G8B8A8_UNORM | DXGI_FORMAT_R8G8B8A8_UNORM_SRGB => PixelFormat::rgba8(),
        DXGI_FORMAT_R16G16B16A16_FLOAT => PixelFormat::uncompressed(gl::RGBA, gl::HALF_FLOAT, gl::RGBA16F, 8),
        DXGI_FORMAT_R32G32B32A32_FLOAT => PixelFormat::rgba32f(),
        DXGI_FORMAT_R10G10B10A2_UNORM => {
            PixelFormat::uncompressed(gl::RGBA, gl::UNSIGNED_INT_2_10_10_10_REV, gl::RGB10_A2, 4)
        }
        _ => return None,
    };
    Some(format)
}

/// Shared textures opened on one [`Dx11Device`].
pub struct Dx11Backend {
    device: Arc<Dx11Device>,
}

impl Dx11Backend {
    pub fn new() -> Result<Self> {
        Ok(Self::with_device(Arc::new(Dx11Device::new()?)))
    }

    pub fn with_device(device: Arc<Dx11Device>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<Dx11Device> {
        &self.device
    }
}

impl SharedTextureBackend for Dx11Backend {
    fn duplicate_handle(&self, source: SharedHandle) -> InteropResult<SharedHandle> {
        let mut target = HANDLE::default();
        unsafe {
            let process = GetCurrentProcess();
            DuplicateHandle(
                process,
                handle(source),
                process,
                &mut target,
                0,
                false,
                DUPLICATE_SAME_ACCESS,
            )
        }
        .map_err(api("DuplicateHandle"))?;
        Ok(SharedHandle::from_raw(target.0 as usize))
    }

    fn close_handle(&self, owned: SharedHandle) {
        if let Err(err) = unsafe { CloseHandle(handle(owned)) } {
            warn!(%err, "CloseHandle failed on shared texture handle");
        }
    }

    fn compare_handles(&self, a: SharedHandle, b: SharedHandle) -> bool {
        a == b || unsafe { CompareObjectHandles(handle(a), handle(b)) }.as_bool()
    }

    fn open_texture(&self, shared: SharedHandle) -> InteropResult<Box<dyn ForeignTexture>> {
        let device = self.device.device();
        let opened: windows::core::Result<ID3D11Texture2D> = match device.cast::<ID3D11Device1>() {
            Ok(device1) => unsafe { device1.OpenSharedResource1(handle(shared)) },
            Err(_) => unsafe { device.OpenSharedResource(handle(shared)) },
        };
        let texture = opened.map_err(|err| {
            // E_INVALIDARG: the resource lives on another adapter
            if err.code() == windows::Win32::Foundation::E_INVALIDARG {
                InteropError::DifferentDevice
            } else {
                InteropError::Api(format!("OpenSharedResource: {err}"))
            }
        })?;

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };
        let format = pixel_format(desc.Format)
            .ok_or_else(|| InteropError::Unsupported(format!("DXGI format {:?}", desc.Format)))?;
        let keyed_mutex = texture.cast::<IDXGIKeyedMutex>().ok();
        debug!(
            width = desc.Width,
            height = desc.Height,
            keyed_mutex = keyed_mutex.is_some(),
            "D3D11 shared texture opened"
        );
        Ok(Box::new(Dx11Texture {
            device: Arc::clone(&self.device),
            texture,
            keyed_mutex,
            desc,
            info: TextureDesc {
                width: desc.Width,
                height: desc.Height,
                format,
            },
        }))
    }

    fn open_interop_device(&self) -> InteropResult<Box<dyn InteropDevice>> {
        Ok(Box::new(WglInteropDevice::open(self.device.device())?))
    }
}

/// A shared `ID3D11Texture2D` and its optional keyed mutex.
pub struct Dx11Texture {
    device: Arc<Dx11Device>,
    texture: ID3D11Texture2D,
    keyed_mutex: Option<IDXGIKeyedMutex>,
    desc: D3D11_TEXTURE2D_DESC,
    info: TextureDesc,
}

// SAFETY: accessed only under the owning shared texture's device mutex.
unsafe impl Send for Dx11Texture {}

impl ForeignTexture for Dx11Texture {
    fn desc(&self) -> TextureDesc {
        self.info
    }

    fn acquire_sync(&self, key: u64, timeout: Duration) -> InteropResult<()> {
        let Some(mutex) = &self.keyed_mutex else {
            return Ok(());
        };
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let hr = unsafe { (Interface::vtable(mutex).AcquireSync)(Interface::as_raw(mutex), key, millis) };
        match hr {
            KEYED_MUTEX_TIMEOUT => Err(InteropError::Timeout),
            KEYED_MUTEX_ABANDONED => Err(InteropError::Api("keyed mutex abandoned by producer".into())),
            hr if hr.is_ok() => Ok(()),
            hr => Err(InteropError::Api(format!("AcquireSync: {}", hr.message()))),
        }
    }

    fn release_sync(&self, key: u64) -> InteropResult<()> {
        match &self.keyed_mutex {
            Some(mutex) => unsafe { mutex.ReleaseSync(key) }.map_err(api("ReleaseSync")),
            None => Ok(()),
        }
    }

    fn create_staging(&self) -> InteropResult<Box<dyn StagingTexture>> {
        let desc = D3D11_TEXTURE2D_DESC {
            MipLevels: 1,
            ArraySize: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
            ..self.desc
        };
        let mut texture = None;
        unsafe { self.device.device().CreateTexture2D(&desc, None, Some(&mut texture as *mut _)) }
            .map_err(api("CreateTexture2D"))?;
        let texture = texture.ok_or_else(|| InteropError::Api("CreateTexture2D returned no texture".into()))?;
        Ok(Box::new(Dx11Staging {
            device: Arc::clone(&self.device),
            texture,
            query: self.device.create_event_query()?,
            info: self.info,
        }))
    }

    fn copy_to_staging(&self, staging: &mut dyn StagingTexture) -> InteropResult<()> {
        let staging = staging
            .as_any_mut()
            .downcast_mut::<Dx11Staging>()
            .ok_or_else(|| InteropError::Api("staging texture from another backend".into()))?;
        let context = self.device.context();
        unsafe {
            context.CopyResource(&staging.texture, &self.texture);
            context.End(&staging.query);
        }
        Ok(())
    }

    fn raw(&self) -> *mut c_void {
        self.texture.as_raw()
    }
}

/// CPU-readable copy target with the event query that marks the copy done.
pub struct Dx11Staging {
    device: Arc<Dx11Device>,
    texture: ID3D11Texture2D,
    query: ID3D11Query,
    info: TextureDesc,
}

// SAFETY: accessed only under the owning shared texture's device mutex.
unsafe impl Send for Dx11Staging {}

impl StagingTexture for Dx11Staging {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn poll(&mut self) -> InteropResult<bool> {
        // GetData leaves `done` untouched and returns S_FALSE while pending
        let mut done: u32 = 0;
        unsafe {
            self.device.context().GetData(
                &self.query,
                Some(&mut done as *mut u32 as *mut c_void),
                std::mem::size_of::<u32>() as u32,
                0,
            )
        }
        .map_err(api("GetData"))?;
        Ok(done != 0)
    }

    fn map(&mut self) -> InteropResult<MappedTexture<'_>> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.device
                .context()
                .Map(&self.texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
        }
        .map_err(api("Map"))?;
        let row_pitch = mapped.RowPitch as usize;
        let rows = self.info.height as usize;
        let len = match rows {
            0 => 0,
            rows => row_pitch * (rows - 1) + self.info.row_bytes(),
        };
        // SAFETY: the mapping covers `rows` rows of `row_pitch` bytes, the
        // last one at least `row_bytes` long, until `unmap`
        let data = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) };
        Ok(MappedTexture { data, row_pitch })
    }

    fn unmap(&mut self) {
        unsafe { self.device.context().Unmap(&self.texture, 0) };
    }
}
