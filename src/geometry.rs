use crate::error::ErrorKind;
use crate::storage::SECTOR_SIZE;
use log::{error, warn};

/// Deepest tag set a host will allocate.
pub const MAX_QUEUE_DEPTH: u32 = 10240;

/// Platform page size, the default for both block sizes.
pub fn page_size() -> u32 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf only reads a process-wide constant.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if let Ok(size) = u32::try_from(size) {
            if size > 0 {
                return size;
            }
        }
    }
    4096
}

/// Block and queue parameters of a device. Fixed once the device exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    logical_block_size: u32,
    physical_block_size: u32,
    max_segments: u16,
    max_segment_size: u32,
    queue_depth: u32,
}

impl Geometry {
    pub fn new(
        logical_block_size: u32,
        physical_block_size: u32,
        max_segments: u16,
        max_segment_size: u32,
        queue_depth: u32,
    ) -> Result<Self, ErrorKind> {
        let page = page_size();

        if !logical_block_size.is_power_of_two()
            || (logical_block_size as usize) < SECTOR_SIZE
            || logical_block_size > page
        {
            error!("logical block size {} not supported", logical_block_size);
            return Err(ErrorKind::InvalidGeometry);
        }
        if !physical_block_size.is_power_of_two() || physical_block_size < logical_block_size {
            error!(
                "physical block size {} not supported with logical block size {}",
                physical_block_size, logical_block_size
            );
            return Err(ErrorKind::InvalidGeometry);
        }
        if max_segments == 0 || max_segment_size == 0 {
            error!("segment limits must be non-zero");
            return Err(ErrorKind::InvalidGeometry);
        }
        if queue_depth == 0 || queue_depth > MAX_QUEUE_DEPTH {
            error!("queue depth {} outside 1..={}", queue_depth, MAX_QUEUE_DEPTH);
            return Err(ErrorKind::InvalidGeometry);
        }

        let max_segment_size = if max_segment_size < page {
            warn!(
                "max segment size {} below page size, using {}",
                max_segment_size, page
            );
            page
        } else {
            max_segment_size
        };

        Ok(Geometry {
            logical_block_size,
            physical_block_size,
            max_segments,
            max_segment_size,
            queue_depth,
        })
    }

    pub fn logical_block_size(&self) -> u32 {
        self.logical_block_size
    }

    pub fn physical_block_size(&self) -> u32 {
        self.physical_block_size
    }

    pub fn max_segments(&self) -> u16 {
        self.max_segments
    }

    pub fn max_segment_size(&self) -> u32 {
        self.max_segment_size
    }

    pub fn queue_depth(&self) -> u32 {
        self.queue_depth
    }
}
