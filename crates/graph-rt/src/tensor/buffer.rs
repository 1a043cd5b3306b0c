//! Runtime tensors exchanged between callers and backends.
//!
//! A [`Tensor`] is a refcounted handle: clones share the same buffer and the memory is released
//! when the last clone drops. Backend-owned tensors own a heap allocation; caller-owned tensors
//! borrow a region the caller keeps alive and are never freed here.

use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, PoisonError, RwLock};

use crate::backend::handle::BackendId;
use crate::error::{Error, Result};
use crate::tensor::{ElementType, NativeElement, Shape, TensorDesc};

enum Memory {
    Owned(Box<[u8]>),
    External { ptr: NonNull<u8>, len: usize },
}

// SAFETY: external regions are only reached through the tensor's RwLock, and the caller of
// `Tensor::from_external` guarantees the region outlives every clone of the tensor.
unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl Memory {
    fn bytes(&self) -> &[u8] {
        match self {
            Memory::Owned(data) => data,
            // SAFETY: see `Tensor::from_external`.
            Memory::External { ptr, len } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *len)
            },
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Memory::Owned(data) => data,
            // SAFETY: see `Tensor::from_external`.
            Memory::External { ptr, len } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), *len)
            },
        }
    }
}

struct TensorInner {
    desc: TensorDesc,
    owner: Option<BackendId>,
    memory: RwLock<Memory>,
}

/// Typed, shaped byte buffer owned by a backend or borrowed from the caller.
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Tensor {
    /// Allocates a zero-filled buffer owned by `owner`.
    pub fn allocate(owner: BackendId, element_type: ElementType, shape: Shape) -> Result<Self> {
        let len = shape.byte_size(element_type)?;
        Ok(Tensor {
            inner: Arc::new(TensorInner {
                desc: TensorDesc::new(element_type, shape),
                owner: Some(owner),
                memory: RwLock::new(Memory::Owned(vec![0u8; len].into_boxed_slice())),
            }),
        })
    }

    /// Wraps caller-owned memory without taking ownership of it.
    ///
    /// Fails with [`Error::ArgumentMismatch`] when `len` is smaller than the dense size of
    /// `shape`; only the first `shape.byte_size(element_type)` bytes are addressed.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as any clone of the
    /// returned tensor (including clones held by a backend) is alive, and must not be accessed
    /// through other references while the tensor is being read or written.
    pub unsafe fn from_external(
        element_type: ElementType,
        shape: Shape,
        ptr: NonNull<u8>,
        len: usize,
    ) -> Result<Self> {
        let required = shape.byte_size(element_type)?;
        if len < required {
            return Err(Error::argument(format!(
                "external buffer holds {len} bytes, {element_type}{shape} needs {required}"
            )));
        }
        Ok(Tensor {
            inner: Arc::new(TensorInner {
                desc: TensorDesc::new(element_type, shape),
                owner: None,
                memory: RwLock::new(Memory::External { ptr, len: required }),
            }),
        })
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.inner.desc
    }

    pub fn element_type(&self) -> ElementType {
        self.inner.desc.element_type
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.desc.shape
    }

    /// Backend that allocated the buffer, or `None` for caller-owned memory.
    pub fn owner(&self) -> Option<BackendId> {
        self.inner.owner
    }

    pub fn is_external(&self) -> bool {
        self.inner.owner.is_none()
    }

    pub fn byte_len(&self) -> usize {
        self.read_memory().bytes().len()
    }

    /// Returns true when both handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let memory = self.read_memory();
        let src = checked_range(memory.bytes(), offset, dst.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Copies `src` into the buffer starting at `offset`.
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut memory = self.write_memory();
        let bytes = memory.bytes_mut();
        let len = bytes.len();
        let end = offset.checked_add(src.len()).unwrap_or(usize::MAX);
        if end > len {
            return Err(Error::OutOfRange { offset, end, len });
        }
        bytes[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Overwrites the whole tensor with typed values.
    pub fn write_slice<T: NativeElement>(&self, values: &[T]) -> Result<()> {
        self.check_native::<T>()?;
        let count = self.shape().element_count()?;
        if values.len() != count {
            return Err(Error::argument(format!(
                "tensor {} holds {count} elements, got {}",
                self.desc(),
                values.len()
            )));
        }
        let width = T::ELEMENT_TYPE.size_in_bytes();
        let mut memory = self.write_memory();
        for (chunk, value) in memory.bytes_mut().chunks_exact_mut(width).zip(values) {
            value.write_le(chunk);
        }
        Ok(())
    }

    /// Reads the whole tensor as typed values.
    pub fn to_vec<T: NativeElement>(&self) -> Result<Vec<T>> {
        self.check_native::<T>()?;
        Ok(crate::tensor::decode_values(self.read_memory().bytes()))
    }

    /// Copies the full contents out of the tensor.
    pub fn snapshot(&self) -> Vec<u8> {
        self.read_memory().bytes().to_vec()
    }

    /// Runs `f` with shared access to the raw bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.read_memory().bytes())
    }

    /// Runs `f` with exclusive access to the raw bytes.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(self.write_memory().bytes_mut())
    }

    fn check_native<T: NativeElement>(&self) -> Result<()> {
        if T::ELEMENT_TYPE != self.element_type() {
            return Err(Error::argument(format!(
                "tensor holds {} but {} was requested",
                self.element_type(),
                T::ELEMENT_TYPE
            )));
        }
        Ok(())
    }

    fn read_memory(&self) -> std::sync::RwLockReadGuard<'_, Memory> {
        self.inner
            .memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_memory(&self) -> std::sync::RwLockWriteGuard<'_, Memory> {
        self.inner
            .memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn checked_range(bytes: &[u8], offset: usize, count: usize) -> Result<&[u8]> {
    let len = bytes.len();
    let end = offset.checked_add(count).unwrap_or(usize::MAX);
    if end > len {
        return Err(Error::OutOfRange { offset, end, len });
    }
    Ok(&bytes[offset..end])
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("desc", self.desc())
            .field("owner", &self.inner.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> BackendId {
        BackendId::next()
    }

    #[test]
    fn allocated_tensor_has_dense_size() {
        let tensor = Tensor::allocate(owner(), ElementType::F32, Shape::new([2, 3])).unwrap();
        assert_eq!(tensor.byte_len(), 24);
        assert!(!tensor.is_external());
    }

    #[test]
    fn byte_range_access_is_bounds_checked() {
        let tensor = Tensor::allocate(owner(), ElementType::U8, Shape::new([4])).unwrap();
        tensor.write(1, &[7, 8, 9]).unwrap();
        let mut out = [0u8; 4];
        tensor.read(0, &mut out).unwrap();
        assert_eq!(out, [0, 7, 8, 9]);

        assert_eq!(
            tensor.write(2, &[1, 2, 3]),
            Err(Error::OutOfRange {
                offset: 2,
                end: 5,
                len: 4
            })
        );
        let mut big = [0u8; 5];
        assert!(matches!(
            tensor.read(0, &mut big),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            tensor.read(usize::MAX, &mut out),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn typed_access_checks_element_type_and_count() {
        let tensor = Tensor::allocate(owner(), ElementType::I32, Shape::new([3])).unwrap();
        tensor.write_slice(&[1i32, -2, 3]).unwrap();
        assert_eq!(tensor.to_vec::<i32>().unwrap(), vec![1, -2, 3]);
        assert!(tensor.write_slice(&[1.0f32, 2.0, 3.0]).is_err());
        assert!(tensor.write_slice(&[1i32, 2]).is_err());
    }

    #[test]
    fn external_memory_is_shared_with_caller() {
        let mut storage = vec![0u8; 16];
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let tensor = unsafe {
            Tensor::from_external(ElementType::F32, Shape::new([4]), ptr, storage.len())
        }
        .unwrap();
        assert!(tensor.is_external());
        tensor.write_slice(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        drop(tensor);
        assert_eq!(&storage[..4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn undersized_external_memory_is_rejected() {
        let mut storage = vec![0u8; 8];
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let result =
            unsafe { Tensor::from_external(ElementType::F32, Shape::new([4]), ptr, storage.len()) };
        assert!(matches!(result, Err(Error::ArgumentMismatch(_))));
    }

    #[test]
    fn clones_share_the_buffer() {
        let tensor = Tensor::allocate(owner(), ElementType::U8, Shape::new([2])).unwrap();
        let alias = tensor.clone();
        alias.write(0, &[5, 6]).unwrap();
        assert!(tensor.ptr_eq(&alias));
        assert_eq!(tensor.snapshot(), vec![5, 6]);
    }
}
