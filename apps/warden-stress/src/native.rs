//! In-process stand-in for a native raster library
//!
//! Datasets own their pixel buffer and a fixed list of bands. Getting the
//! same band twice returns the same object, like the real library does, so
//! the registry's proxy reuse gets exercised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use warden_errors::Result;
use warden_jobs::{engine, ProgressReporter};

/// Shape of the raster every fake dataset is opened with
#[derive(Debug, Clone, Copy)]
pub struct RasterSpec {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub magic_offset: usize,
    pub magic_value: u8,
}

impl RasterSpec {
    #[must_use]
    pub fn pixels(&self) -> usize {
        self.width * self.height
    }
}

#[derive(Debug)]
pub struct NativeDataset {
    bands: Vec<Arc<NativeBand>>,
    closed: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct NativeBand {
    index: usize,
    width: usize,
    height: usize,
    pixels: Arc<[u8]>,
    closed: Arc<AtomicBool>,
}

impl NativeDataset {
    /// Open a dataset
    ///
    /// # Errors
    ///
    /// Fails like the native open would, for a raster that cannot hold the
    /// magic pixel.
    pub fn open(spec: RasterSpec) -> Result<Arc<Self>> {
        if spec.magic_offset >= spec.pixels() || spec.bands == 0 {
            engine::record(format!(
                "raster of {}x{} cannot hold offset {}",
                spec.width, spec.height, spec.magic_offset
            ));
            return Err(engine::failure("open failed"));
        }

        let mut pixels: Vec<u8> = (0..spec.pixels())
            .map(|i| u8::try_from(i % 251).unwrap_or_default())
            .collect();
        pixels[spec.magic_offset] = spec.magic_value;
        let pixels: Arc<[u8]> = pixels.into();
        let closed = Arc::new(AtomicBool::new(false));

        let bands = (1..=spec.bands)
            .map(|index| {
                Arc::new(NativeBand {
                    index,
                    width: spec.width,
                    height: spec.height,
                    pixels: Arc::clone(&pixels),
                    closed: Arc::clone(&closed),
                })
            })
            .collect();

        Ok(Arc::new(Self { bands, closed }))
    }

    /// Band `index`, counted from 1
    ///
    /// # Errors
    ///
    /// Fails for an index the dataset does not have, or a closed dataset.
    pub fn band(&self, index: usize) -> Result<Arc<NativeBand>> {
        if self.closed.load(Ordering::Acquire) {
            engine::record("dataset already closed");
        } else if let Some(band) = index.checked_sub(1).and_then(|i| self.bands.get(i)) {
            return Ok(Arc::clone(band));
        } else {
            engine::record(format!("Illegal band # {index}"));
        }
        Err(engine::failure("band lookup failed"))
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl NativeBand {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Read every pixel row by row, reporting progress as it goes
    ///
    /// # Errors
    ///
    /// Fails if the owning dataset was closed, which would be a locking bug.
    pub fn read(&self, progress: &dyn ProgressReporter) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.pixels.len());
        for (row, chunk) in self.pixels.chunks(self.width).enumerate() {
            if self.closed.load(Ordering::Acquire) {
                engine::record("read from a closed dataset");
                return Err(engine::failure("read failed"));
            }
            data.extend_from_slice(chunk);
            if progress.is_enabled() && row % 32 == 0 {
                #[allow(clippy::cast_precision_loss)]
                progress.progress(row as f64 / self.height as f64);
            }
        }
        progress.progress(1.0);
        Ok(data)
    }
}
