//! Device lifecycle: building a RAM disk against a [`Host`] and tearing it
//! down again.
//!
//! Creation acquires, in order: the device class, the backing store, the
//! dispatch resource and the disk handle, then configures the queue and
//! publishes the disk as the very last step. A failure at any point releases
//! what was acquired so far in reverse order, so a device is either fully
//! published or absent. [`Device::destroy`] runs the same ladder after
//! unpublishing.

use crate::error::ErrorKind;
use crate::geometry::{page_size, Geometry};
use crate::host::{DiskId, Host, Major, TagSetId};
use crate::queue::{Dispatch, Locking, RamQueue};
use crate::request::{Request, Status};
use crate::storage::{BackingStore, Sector, SECTOR_SHIFT};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use log::{error, info, warn};

pub const DEFAULT_NAME: &str = "blkram";
pub const DEFAULT_CAPACITY_MB: u64 = 40;
pub const DEFAULT_MAX_SEGMENTS: u16 = 32;
pub const DEFAULT_MAX_SEGMENT_SIZE: u32 = 65536;
pub const DEFAULT_QUEUE_DEPTH: u32 = 128;

/// Sizing and geometry a device is created from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    name: String,
    capacity_mb: u64,
    logical_block_size: u32,
    physical_block_size: u32,
    max_segments: u16,
    max_segment_size: u32,
    queue_depth: u32,
    locking: Locking,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let page = page_size();
        DeviceConfig {
            name: DEFAULT_NAME.to_string(),
            capacity_mb: DEFAULT_CAPACITY_MB,
            logical_block_size: page,
            physical_block_size: page,
            max_segments: DEFAULT_MAX_SEGMENTS,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            locking: Locking::None,
        }
    }
}

impl DeviceConfig {
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_capacity_mb(mut self, capacity_mb: u64) -> Self {
        self.capacity_mb = capacity_mb;
        self
    }

    pub fn with_block_sizes(mut self, logical: u32, physical: u32) -> Self {
        self.logical_block_size = logical;
        self.physical_block_size = physical;
        self
    }

    pub fn with_max_segments(mut self, max_segments: u16) -> Self {
        self.max_segments = max_segments;
        self
    }

    pub fn with_max_segment_size(mut self, max_segment_size: u32) -> Self {
        self.max_segment_size = max_segment_size;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: u32) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    pub fn with_locking(mut self, locking: Locking) -> Self {
        self.locking = locking;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity_mb(&self) -> u64 {
        self.capacity_mb
    }

    pub fn geometry(&self) -> Result<Geometry, ErrorKind> {
        Geometry::new(
            self.logical_block_size,
            self.physical_block_size,
            self.max_segments,
            self.max_segment_size,
            self.queue_depth,
        )
    }

    /// Backing store size in bytes.
    pub fn size_bytes(&self) -> Result<usize, ErrorKind> {
        if self.capacity_mb == 0 {
            error!("{}: capacity must be at least 1 MB", self.name);
            return Err(ErrorKind::InvalidGeometry);
        }
        self.capacity_mb
            .checked_mul(1 << 20)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| {
                error!("{}: {} MB does not fit in memory", self.name, self.capacity_mb);
                ErrorKind::InvalidGeometry
            })
    }
}

struct Handles {
    major: Major,
    tag_set: TagSetId,
    disk: DiskId,
}

/// A published RAM disk.
///
/// Must be handed back through [`Device::destroy`] with the host it was
/// created on. Dropping it instead leaves the host registrations in place
/// and keeps the backing store alive for as long as the host holds its
/// dispatch callback.
#[must_use]
pub struct Device {
    name: String,
    capacity: Sector,
    geometry: Geometry,
    queue: Arc<RamQueue>,
    handles: Handles,
}

impl Device {
    pub fn create<H: Host + ?Sized>(host: &mut H, config: &DeviceConfig) -> Result<Self, ErrorKind> {
        let name = config.name();
        let geometry = config.geometry()?;
        let nbytes = config.size_bytes()?;
        let capacity = Sector((nbytes >> SECTOR_SHIFT) as u64);

        let major = host.register_device_class(name).map_err(|e| {
            error!("{}: unable to register device class: {}", name, e);
            e
        })?;

        let store = match BackingStore::allocate(nbytes) {
            Ok(store) => store,
            Err(e) => {
                release(host, name, major, None, None, None);
                return Err(e);
            }
        };
        let queue = Arc::new(RamQueue::new(store, config.locking));

        let tag_set = match host.allocate_dispatch(geometry.queue_depth(), queue.clone()) {
            Ok(tag_set) => tag_set,
            Err(e) => {
                error!("{}: unable to allocate dispatch resource: {}", name, e);
                release(host, name, major, Some(queue), None, None);
                return Err(e);
            }
        };

        let disk = match host.allocate_disk(&tag_set) {
            Ok(disk) => disk,
            Err(e) => {
                error!("{}: error allocating a disk: {}", name, e);
                release(host, name, major, Some(queue), Some(tag_set), None);
                return Err(e);
            }
        };

        host.configure_queue(&disk, &geometry);

        if let Err(e) = host.publish(&disk, &major, capacity, name) {
            error!("{}: unable to publish disk: {}", name, e);
            release(host, name, major, Some(queue), Some(tag_set), Some(disk));
            return Err(e);
        }

        info!(
            "{}: loaded, {} sectors, lbs {} pbs {}",
            name,
            capacity.0,
            geometry.logical_block_size(),
            geometry.physical_block_size()
        );
        Ok(Device {
            name: name.to_string(),
            capacity,
            geometry,
            queue,
            handles: Handles {
                major,
                tag_set,
                disk,
            },
        })
    }

    /// Unpublish the disk, then release everything in reverse order of
    /// acquisition. Consumes the device, so it can only happen once.
    pub fn destroy<H: Host + ?Sized>(self, host: &mut H) {
        let Device {
            name,
            queue,
            handles,
            ..
        } = self;
        host.unpublish(&handles.disk);
        release(
            host,
            &name,
            handles.major,
            Some(queue),
            Some(handles.tag_set),
            Some(handles.disk),
        );
        info!("{}: unloaded", name);
    }

    /// Run one request directly against the device, bypassing the host.
    pub fn process(&self, rq: &mut Request<'_>) -> Status {
        self.queue.queue_rq(rq)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> Sector {
        self.capacity
    }

    pub fn size_bytes(&self) -> usize {
        self.queue.store().len()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn locking(&self) -> Locking {
        self.queue.locking()
    }
}

/// Release whatever was acquired, newest first.
fn release<H: Host + ?Sized>(
    host: &mut H,
    name: &str,
    major: Major,
    queue: Option<Arc<RamQueue>>,
    tag_set: Option<TagSetId>,
    disk: Option<DiskId>,
) {
    if let Some(disk) = disk {
        host.release_disk(disk);
    }
    if let Some(tag_set) = tag_set {
        host.release_dispatch(tag_set);
    }
    if let Some(queue) = queue {
        if Arc::strong_count(&queue) > 1 {
            warn!("{}: host still holds the request queue", name);
        }
        drop(queue);
    }
    host.unregister_device_class(major, name);
}
