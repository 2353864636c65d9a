use std::ops::{Deref, DerefMut};

use atomic_refcell::{AtomicRef, AtomicRefCell, AtomicRefMut};
use basedrop::{Handle, Shared};

use crate::signal::{self, Sample};

/// Which kind of port or channel a buffer belongs to. Used for debugging
/// purposes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferClass {
    NodeIn,
    NodeOut,
    DeviceIn,
    DeviceOut,
}

impl std::fmt::Debug for BufferClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                BufferClass::NodeIn => "In",
                BufferClass::NodeOut => "Out",
                BufferClass::DeviceIn => "DevIn",
                BufferClass::DeviceOut => "DevOut",
            }
        )
    }
}

/// Identifies a buffer by its owner and port/channel index. Used for
/// debugging purposes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub class: BufferClass,
    pub owner: u32,
    pub port: u32,
}

impl std::fmt::Debug for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({}.{})", self.class, self.owner, self.port)
    }
}

/// A block of samples, one vector-size long.
pub struct Buffer {
    data: Vec<Sample>,
}

impl Buffer {
    /// Allocate a zeroed buffer of `len` samples.
    pub(crate) fn new(len: usize) -> Buffer {
        Buffer {
            data: vec![0.0; len],
        }
    }

    /// Allocate a zeroed buffer of `len` samples, reporting refusal instead
    /// of aborting so compilation can surface the failure as an error.
    pub(crate) fn try_alloc(len: usize) -> Option<Buffer> {
        let mut data = Vec::new();
        data.try_reserve_exact(len).ok()?;
        data.resize(len, 0.0);
        Some(Buffer { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Zero the whole buffer.
    pub fn clear(&mut self) {
        signal::vclear(&mut self.data);
    }
}

impl Deref for Buffer {
    type Target = [Sample];

    fn deref(&self) -> &[Sample] {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [Sample] {
        &mut self.data
    }
}

/// A reference-counted buffer shared between ports and the device.
///
/// The non-rt thread allocates these during compilation; the rt thread only
/// ever borrows them for the duration of a single kernel, so the runtime
/// borrow check in [`AtomicRefCell`] never observes an overlap (in-place
/// nodes read and write through a single mutable borrow of the aliased
/// buffer).
pub struct SharedBuffer {
    buffer: Shared<(AtomicRefCell<Buffer>, BufferId)>,
}

impl SharedBuffer {
    pub(crate) fn new(buffer: Buffer, id: BufferId, coll_handle: &Handle) -> Self {
        Self {
            buffer: Shared::new(coll_handle, (AtomicRefCell::new(buffer), id)),
        }
    }

    #[inline]
    pub fn borrow(&self) -> AtomicRef<'_, Buffer> {
        self.buffer.0.borrow()
    }

    #[inline]
    pub fn borrow_mut(&self) -> AtomicRefMut<'_, Buffer> {
        self.buffer.0.borrow_mut()
    }

    #[inline]
    pub fn buffer_id(&self) -> BufferId {
        self.buffer.1
    }

    /// Whether two handles point at the same storage. This is how in-place
    /// aliasing is observable from outside the engine.
    #[inline]
    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        std::ptr::eq::<(AtomicRefCell<Buffer>, BufferId)>(&*self.buffer, &*other.buffer)
    }
}

impl Clone for SharedBuffer {
    fn clone(&self) -> Self {
        Self {
            buffer: Shared::clone(&self.buffer),
        }
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.buffer.1.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;

    fn id() -> BufferId {
        BufferId {
            class: BufferClass::NodeOut,
            owner: 0,
            port: 0,
        }
    }

    #[test]
    fn alloc_is_zeroed() {
        let buf = Buffer::try_alloc(8).unwrap();
        assert_eq!(buf.len(), 8);
        assert!(buf.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn shared_identity() {
        let collector = Collector::new();
        let a = SharedBuffer::new(Buffer::new(4), id(), &collector.handle());
        let b = a.clone();
        let c = SharedBuffer::new(Buffer::new(4), id(), &collector.handle());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }
}
