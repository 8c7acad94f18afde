//! Shared-memory buffers handed to the compositor via wl_shm.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, OwnedFd};
use std::ptr::NonNull;

use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::{debug, warn};
use wayland_client::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_client::{Dispatch, QueueHandle};

use shotcopy_platform::frame::BufferGeometry;
use shotcopy_platform::transport::SharedBuffer;
use shotcopy_platform::CaptureError;

/// Anonymous memfd of a fixed size, mapped read-write
pub struct MappedRegion {
    fd: OwnedFd,
    ptr: NonNull<c_void>,
    len: usize,
}

impl MappedRegion {
    /// Create and map a region of exactly `size` bytes
    pub fn allocate(size: usize) -> Result<Self, CaptureError> {
        let len = NonZeroUsize::new(size)
            .ok_or_else(|| CaptureError::Allocation("zero-sized buffer requested".into()))?;

        let fd = memfd_create(c"shotcopy-frame", MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| CaptureError::Allocation(format!("memfd_create failed: {}", e)))?;
        let file_len = nix::libc::off_t::try_from(size)
            .map_err(|_| CaptureError::Allocation(format!("{} bytes exceeds off_t", size)))?;
        nix::unistd::ftruncate(&fd, file_len)
            .map_err(|e| CaptureError::Allocation(format!("ftruncate to {} failed: {}", size, e)))?;

        // On failure `fd` drops here and the memfd goes with it
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(|e| CaptureError::Map(format!("mmap of {} bytes failed: {}", size, e)))?;

        debug!("mapped {} byte shm region", size);
        Ok(Self { fd, ptr, len: size })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr maps exactly `len` bytes for as long as self lives
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped only here
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("munmap of {} bytes failed: {}", self.len, e);
        }
    }
}

/// A mapped region published to the compositor as a wl_buffer.
///
/// Dropping destroys the wl_buffer first, then unmaps and closes the memfd.
pub struct ShmBuffer {
    wl_buffer: wl_buffer::WlBuffer,
    geometry: BufferGeometry,
    region: MappedRegion,
}

impl ShmBuffer {
    /// Wrap `region` as a compositor-visible buffer of `geometry`
    pub fn publish<D>(
        region: MappedRegion,
        shm: &wl_shm::WlShm,
        geometry: BufferGeometry,
        qh: &QueueHandle<D>,
    ) -> Result<Self, CaptureError>
    where
        D: Dispatch<wl_shm_pool::WlShmPool, ()> + Dispatch<wl_buffer::WlBuffer, ()> + 'static,
    {
        if geometry.byte_size() != Some(region.len()) {
            return Err(CaptureError::Allocation(format!(
                "region of {} bytes does not fit {}",
                region.len(),
                geometry
            )));
        }
        let format = wl_shm::Format::try_from(geometry.format)
            .map_err(|_| CaptureError::FormatUnsupported(geometry.format))?;
        let pool_size = i32::try_from(region.len())
            .map_err(|_| CaptureError::Allocation(format!("{} bytes exceeds pool limit", region.len())))?;
        let (width, height, stride) = (
            to_i32(geometry.width)?,
            to_i32(geometry.height)?,
            to_i32(geometry.stride)?,
        );

        let pool = shm.create_pool(region.fd.as_fd(), pool_size, qh, ());
        let wl_buffer = pool.create_buffer(0, width, height, stride, format, qh, ());
        pool.destroy();

        debug!("published wl_buffer {}", geometry);
        Ok(Self {
            wl_buffer,
            geometry,
            region,
        })
    }

    pub fn wl_buffer(&self) -> &wl_buffer::WlBuffer {
        &self.wl_buffer
    }
}

fn to_i32(value: u32) -> Result<i32, CaptureError> {
    i32::try_from(value)
        .map_err(|_| CaptureError::Allocation(format!("dimension {} out of range", value)))
}

impl SharedBuffer for ShmBuffer {
    fn geometry(&self) -> BufferGeometry {
        self.geometry
    }

    fn bytes(&self) -> &[u8] {
        self.region.as_bytes()
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        self.wl_buffer.destroy();
        debug!("released wl_buffer {}", self.geometry);
    }
}
