use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A resource needed to build the device could not be allocated.
    AllocationFailed,
    /// Sizing or block geometry rejected before anything was acquired.
    InvalidGeometry,
    /// Request addressed bytes past the end of the backing store.
    OutOfBounds,
    /// Request operation is neither a read nor a write.
    NotImplemented,
    /// The host framework refused a registration or configuration call.
    HostFailure,
    /// No published disk under the given name.
    NoEntry,
    /// Every tag of the dispatch resource is in flight.
    Busy,
    /// Request exceeds the queue's segment limits.
    LimitExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ErrorKind::AllocationFailed => "allocation failed",
            ErrorKind::InvalidGeometry => "invalid device geometry",
            ErrorKind::OutOfBounds => "access beyond end of device",
            ErrorKind::NotImplemented => "unsupported request operation",
            ErrorKind::HostFailure => "host framework call failed",
            ErrorKind::NoEntry => "no such device",
            ErrorKind::Busy => "no free dispatch tag",
            ErrorKind::LimitExceeded => "request exceeds queue limits",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ErrorKind {}
