//! Shared pixel storage
//!
//! Render targets, per-source temporary images and coverage masks are all
//! `Image<T>` values: a `width x height` view onto a reference-counted,
//! lock-protected `Vec<T>`. Coarser screen scales create views onto the
//! storage of the finest scale, so resizing the canvas allocates once per
//! buffer and every level reuses it.

use crate::error::{RenderError, RenderResult};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// A 2D image view onto shared storage
pub struct Image<T> {
    width: u32,
    height: u32,
    data: Arc<Mutex<Vec<T>>>,
}

/// Packed `0xAARRGGBB` pixels
pub type ArgbImage = Image<u32>;

/// Per-pixel coverage bytes used by cache-aware projectors
pub type MaskImage = Image<u8>;

impl<T> Clone for Image<T> {
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: Arc::clone(&self.data),
        }
    }
}

impl<T> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("storage", &Arc::as_ptr(&self.data))
            .finish()
    }
}

impl<T: Copy + Default + Send> Image<T> {
    /// Allocates a new image filled with `T::default()`
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            data: Arc::new(Mutex::new(vec![T::default(); len])),
        }
    }

    /// Creates a `width x height` view onto the storage of `backing`
    ///
    /// Fails if the backing storage holds fewer than `width * height` pixels.
    pub fn view_of(backing: &Image<T>, width: u32, height: u32) -> RenderResult<Self> {
        let capacity = backing.capacity();
        if width as usize * height as usize > capacity {
            return Err(RenderError::StorageTooSmall {
                width,
                height,
                capacity,
            });
        }
        Ok(Self {
            width,
            height,
            data: Arc::clone(&backing.data),
        })
    }

    /// Image width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels in this view
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the view has zero area
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of pixels the underlying storage can hold
    pub fn capacity(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether two views share the same storage
    pub fn shares_storage_with(&self, other: &Image<T>) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Runs `f` with mutable access to this view's pixels, row-major
    pub fn with_pixels_mut<R>(&self, f: impl FnOnce(&mut [T]) -> R) -> R {
        let len = self.len();
        let mut guard = self.data.lock();
        f(&mut guard[..len])
    }

    /// Runs `f` with read access to this view's pixels, row-major
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        let len = self.len();
        let guard = self.data.lock();
        f(&guard[..len])
    }

    /// Locks the storage and returns this view's pixels
    ///
    /// Used where several images must be held at once.
    pub fn lock(&self) -> MappedMutexGuard<'_, [T]> {
        let len = self.len();
        MutexGuard::map(self.data.lock(), |data| &mut data[..len])
    }

    /// Sets every pixel of the view to `value`
    pub fn fill(&self, value: T) {
        self.with_pixels_mut(|pixels| pixels.fill(value));
    }

    /// Copies the pixels out of the view
    pub fn to_vec(&self) -> Vec<T> {
        self.with_pixels(|pixels| pixels.to_vec())
    }

    /// Pixel at `(x, y)`
    pub fn get(&self, x: u32, y: u32) -> Option<T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.with_pixels(|pixels| pixels.get(index).copied())
    }
}

/// ARGB packing helpers
pub mod argb {
    /// Packs four 8-bit channels
    pub fn pack(a: u8, r: u8, g: u8, b: u8) -> u32 {
        (u32::from(a) << 24) | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
    }

    /// Alpha channel
    pub fn alpha(v: u32) -> u8 {
        (v >> 24) as u8
    }

    /// Red channel
    pub fn red(v: u32) -> u8 {
        (v >> 16) as u8
    }

    /// Green channel
    pub fn green(v: u32) -> u8 {
        (v >> 8) as u8
    }

    /// Blue channel
    pub fn blue(v: u32) -> u8 {
        v as u8
    }
}
