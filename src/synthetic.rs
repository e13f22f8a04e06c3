//! Procedural cache-backed volume
//!
//! [`SyntheticVolume`] is a multi-resolution scalar field made of gaussian
//! blobs. Level `l` is downsampled by `2^l`, and its voxel centers sit at
//! the center of the `2^l` finer voxels they cover. The data is split into
//! cells that start out non-resident: volatile reads of missing cells return
//! invalid samples and queue the cell for loading. [`run_loader`] is the
//! asynchronous loader that makes queued cells resident after a simulated
//! latency.
//!
//! # Usage
//!
//! ```no_run
//! use mipview::synthetic::{run_loader, SyntheticVolume};
//! use mipview::painter::RepaintSignal;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let volume = Arc::new(SyntheticVolume::new("blobs", [512, 512, 64], 4, 7));
//! let signal = RepaintSignal::new();
//! let loader = tokio::spawn(run_loader(
//!     volume.clone(),
//!     Duration::from_millis(2),
//!     Arc::new(signal.clone()),
//! ));
//! // ... render ...
//! volume.shutdown_loader();
//! loader.await.unwrap();
//! # }
//! ```

use crate::cache::{CacheControl, CacheHints, IoTimeBudget, LoadingStrategy};
use crate::painter::RepaintTrigger;
use crate::source::{CellGrid, Interpolation, Source, VolatileSource, VolatileValue};
use crate::transform::Affine3;
use log::{debug, info, trace};
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Default cell edge length in voxels
pub const DEFAULT_CELL_SIZE: u32 = 32;

/// Default time charged to the IO budget for one synchronous cell load
pub const DEFAULT_SYNC_LOAD_COST: Duration = Duration::from_micros(200);

/// Maximum extra loader latency on top of the base latency
const LOADER_JITTER_MICROS: u64 = 500;

/// Identifies one cell of one level at one timepoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub timepoint: u32,
    pub level: usize,
    pub cell: [i64; 3],
}

#[derive(Debug, Clone, Copy)]
struct Blob {
    center: [f64; 3],
    inv_radius_sq: f64,
    amplitude: f64,
    drift: [f64; 3],
}

/// Load queues ordered by priority
#[derive(Debug, Default)]
struct LoadQueue {
    queues: Vec<VecDeque<CellKey>>,
    queued: HashSet<CellKey>,
}

impl LoadQueue {
    fn push(&mut self, key: CellKey, hints: CacheHints) {
        if !self.queued.insert(key) {
            return;
        }
        if self.queues.len() <= hints.queue_priority {
            self.queues.resize_with(hints.queue_priority + 1, VecDeque::new);
        }
        let queue = &mut self.queues[hints.queue_priority];
        if hints.enqueue_to_front {
            queue.push_front(key);
        } else {
            queue.push_back(key);
        }
    }

    fn pop(&mut self) -> Option<CellKey> {
        let key = self.queues.iter_mut().find_map(|q| q.pop_front())?;
        self.queued.remove(&key);
        Some(key)
    }

    fn clear(&mut self) -> usize {
        let dropped = self.queued.len();
        self.queues.iter_mut().for_each(VecDeque::clear);
        self.queued.clear();
        dropped
    }

    fn len(&self) -> usize {
        self.queued.len()
    }
}

/// Procedural multi-resolution volume with a simulated cell cache
pub struct SyntheticVolume {
    name: String,
    dimensions: [u64; 3],
    num_levels: usize,
    cell_size: u32,
    sync_load_cost: Duration,
    blobs: Vec<Blob>,
    resident: RwLock<HashSet<CellKey>>,
    queue: Mutex<LoadQueue>,
    hints: RwLock<HashMap<(u32, usize), CacheHints>>,
    budget: Mutex<IoTimeBudget>,
    loads: AtomicU64,
    shutdown: AtomicBool,
    notify: Notify,
}

impl SyntheticVolume {
    /// Creates a volume of `dimensions` voxels at level 0 with `num_levels`
    /// levels and blobs placed from `seed`
    pub fn new(name: impl Into<String>, dimensions: [u64; 3], num_levels: usize, seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let dimensions = dimensions.map(|d| d.max(1));
        let extent = dimensions.iter().copied().max().unwrap_or(1) as f64;
        let blobs = (0..12)
            .map(|_| {
                let radius = rng.gen_range(0.05..0.2) * extent;
                Blob {
                    center: [0, 1, 2].map(|d| rng.gen_range(0.0..dimensions[d] as f64)),
                    inv_radius_sq: 1.0 / (radius * radius),
                    amplitude: rng.gen_range(0.3..1.0),
                    drift: [0, 1, 2].map(|d| rng.gen_range(-0.01..0.01) * dimensions[d] as f64),
                }
            })
            .collect();

        Self {
            name: name.into(),
            dimensions,
            num_levels: num_levels.max(1),
            cell_size: DEFAULT_CELL_SIZE,
            sync_load_cost: DEFAULT_SYNC_LOAD_COST,
            blobs,
            resident: RwLock::new(HashSet::new()),
            queue: Mutex::new(LoadQueue::default()),
            hints: RwLock::new(HashMap::new()),
            budget: Mutex::new(IoTimeBudget::new(2)),
            loads: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Sets the cell edge length
    pub fn with_cell_size(mut self, cell_size: u32) -> Self {
        self.cell_size = cell_size.max(1);
        self
    }

    /// Sets the IO budget charge of a synchronous cell load
    pub fn with_sync_load_cost(mut self, cost: Duration) -> Self {
        self.sync_load_cost = cost;
        self
    }

    fn downsampling(level: usize) -> f64 {
        (1u64 << level.min(62)) as f64
    }

    fn level_dimensions(&self, level: usize) -> [u64; 3] {
        let factor = 1u64 << level.min(62);
        self.dimensions.map(|d| d.div_ceil(factor).max(1))
    }

    /// Field value at a world position
    fn field(&self, timepoint: u32, world: [f64; 3]) -> f32 {
        let t = f64::from(timepoint);
        let value: f64 = self
            .blobs
            .iter()
            .map(|blob| {
                let d2: f64 = (0..3)
                    .map(|d| {
                        let delta = world[d] - (blob.center[d] + blob.drift[d] * t);
                        delta * delta
                    })
                    .sum();
                blob.amplitude * (-d2 * blob.inv_radius_sq).exp()
            })
            .sum();
        value.min(1.0) as f32
    }

    /// Voxel indices a sample at `position` reads, `None` outside the data
    fn footprint(&self, level: usize, position: [f64; 3], interpolation: Interpolation) -> Option<Vec<[i64; 3]>> {
        let dims = self.level_dimensions(level);
        for d in 0..3 {
            if !(position[d] >= -0.5 && position[d] <= dims[d] as f64 - 0.5) {
                return None;
            }
        }
        let clamp = |v: f64, d: usize| (v as i64).clamp(0, dims[d] as i64 - 1);
        let voxels = match interpolation {
            Interpolation::NearestNeighbor => vec![[0, 1, 2].map(|d| clamp(position[d].round(), d))],
            Interpolation::Linear => {
                let lo = [0, 1, 2].map(|d| clamp(position[d].floor(), d));
                let hi = [0, 1, 2].map(|d| clamp(position[d].floor() + 1.0, d));
                let mut corners = Vec::with_capacity(8);
                for &x in &[lo[0], hi[0]] {
                    for &y in &[lo[1], hi[1]] {
                        for &z in &[lo[2], hi[2]] {
                            corners.push([x, y, z]);
                        }
                    }
                }
                corners
            }
        };
        Some(voxels)
    }

    fn cells_of(&self, timepoint: u32, level: usize, voxels: &[[i64; 3]]) -> Vec<CellKey> {
        let grid = self.grid(level);
        let mut cells: Vec<CellKey> = voxels
            .iter()
            .map(|&v| CellKey {
                timepoint,
                level,
                cell: grid.cell_of(v),
            })
            .collect();
        cells.sort_unstable_by_key(|k| k.cell);
        cells.dedup();
        cells
    }

    fn grid(&self, level: usize) -> CellGrid {
        CellGrid {
            dimensions: self.level_dimensions(level),
            cell_dimensions: [self.cell_size; 3],
        }
    }

    fn contains_cell(&self, level: usize, cell: [i64; 3]) -> bool {
        let grid = self.grid(level).grid_dimensions();
        (0..3).all(|d| cell[d] >= 0 && (cell[d] as u64) < grid[d])
    }

    fn hints_for(&self, timepoint: u32, level: usize) -> CacheHints {
        self.hints.read().get(&(timepoint, level)).copied().unwrap_or_default()
    }

    /// Makes missing cells resident or queues them according to `hints`
    ///
    /// Returns whether every cell is resident afterwards.
    fn request(&self, missing: Vec<CellKey>, hints: CacheHints) -> bool {
        let mut all_loaded = true;
        for key in missing {
            let load_now = match hints.loading_strategy {
                LoadingStrategy::Blocking => true,
                LoadingStrategy::Budgeted => {
                    let mut budget = self.budget.lock();
                    if budget.time_left(hints.queue_priority) >= self.sync_load_cost {
                        budget.consume(self.sync_load_cost, hints.queue_priority);
                        true
                    } else {
                        false
                    }
                }
                LoadingStrategy::Volatile | LoadingStrategy::DontLoad => false,
            };
            if load_now {
                self.mark_resident(key);
            } else {
                all_loaded = false;
                if hints.allows_loading() {
                    self.enqueue(key, hints);
                }
            }
        }
        all_loaded
    }

    fn enqueue(&self, key: CellKey, hints: CacheHints) {
        self.queue.lock().push(key, hints);
        self.notify.notify_one();
    }

    fn mark_resident(&self, key: CellKey) {
        if self.resident.write().insert(key) {
            self.loads.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether a cell is resident
    pub fn is_resident(&self, key: &CellKey) -> bool {
        self.resident.read().contains(key)
    }

    /// Number of resident cells
    pub fn resident_cells(&self) -> usize {
        self.resident.read().len()
    }

    /// Number of queued loads
    pub fn pending_loads(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of cells made resident so far
    pub fn total_loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Loads the most urgent queued cell right away
    ///
    /// Returns the loaded cell, `None` if nothing was queued.
    pub fn load_next(&self) -> Option<CellKey> {
        let key = self.queue.lock().pop()?;
        self.mark_resident(key);
        Some(key)
    }

    /// Loads every queued cell right away
    pub fn load_all_pending(&self) -> usize {
        std::iter::from_fn(|| self.load_next()).count()
    }

    /// Drops every resident cell
    pub fn evict_all(&self) {
        self.resident.write().clear();
    }

    /// Stops [`run_loader`] tasks serving this volume
    pub fn shutdown_loader(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

impl Source for SyntheticVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_mipmap_levels(&self) -> usize {
        self.num_levels
    }

    fn source_transform(&self, _timepoint: u32, level: usize) -> Affine3 {
        let s = Self::downsampling(level);
        let offset = (s - 1.0) / 2.0;
        Affine3::scaling(s, s, s).pre_concatenate(&Affine3::translation(offset, offset, offset))
    }

    fn dimensions(&self, _timepoint: u32, level: usize) -> [u64; 3] {
        self.level_dimensions(level)
    }

    fn sample(&self, timepoint: u32, level: usize, position: [f64; 3], interpolation: Interpolation) -> Option<f32> {
        self.footprint(level, position, interpolation)?;
        let world = self.source_transform(timepoint, level).apply(position);
        Some(self.field(timepoint, world))
    }
}

impl VolatileSource for SyntheticVolume {
    fn sample_volatile(
        &self,
        timepoint: u32,
        level: usize,
        position: [f64; 3],
        interpolation: Interpolation,
    ) -> Option<VolatileValue> {
        let voxels = self.footprint(level, position, interpolation)?;
        let cells = self.cells_of(timepoint, level, &voxels);
        let missing: Vec<CellKey> = {
            let resident = self.resident.read();
            cells.into_iter().filter(|k| !resident.contains(k)).collect()
        };
        if !missing.is_empty() && !self.request(missing, self.hints_for(timepoint, level)) {
            return Some(VolatileValue::invalid());
        }
        let world = self.source_transform(timepoint, level).apply(position);
        Some(VolatileValue::valid(self.field(timepoint, world)))
    }

    fn set_cache_hints(&self, timepoint: u32, level: usize, hints: CacheHints) {
        self.hints.write().insert((timepoint, level), hints);
    }

    fn cell_grid(&self, _timepoint: u32, level: usize) -> Option<CellGrid> {
        (level < self.num_levels).then(|| self.grid(level))
    }

    fn prefetch_cell(&self, timepoint: u32, level: usize, cell: [i64; 3], hints: CacheHints) {
        if !hints.allows_loading() || !self.contains_cell(level, cell) {
            return;
        }
        let key = CellKey { timepoint, level, cell };
        if !self.is_resident(&key) {
            self.enqueue(key, hints);
        }
    }
}

impl CacheControl for SyntheticVolume {
    fn prepare_next_frame(&self) {
        let dropped = self.queue.lock().clear();
        if dropped > 0 {
            trace!("{}: dropped {} stale loads", self.name, dropped);
        }
    }

    fn reset_io_budget(&self, budget: &[Duration]) {
        self.budget.lock().reset(budget);
    }
}

/// Loads queued cells of `volume` until [`SyntheticVolume::shutdown_loader`]
///
/// Each load takes `latency` plus a random jitter; `loaded` is triggered
/// after every load so a renderer can pick up the new data.
pub async fn run_loader(volume: Arc<SyntheticVolume>, latency: Duration, loaded: Arc<dyn RepaintTrigger>) {
    info!("📦 Loader started for {}", volume.name);
    loop {
        if volume.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let next = volume.queue.lock().pop();
        match next {
            Some(key) => {
                let jitter = Duration::from_micros(rand::thread_rng().gen_range(0..=LOADER_JITTER_MICROS));
                tokio::time::sleep(latency + jitter).await;
                volume.mark_resident(key);
                trace!("loaded cell {:?} of level {}", key.cell, key.level);
                loaded.request_repaint();
            }
            None => volume.notify.notified().await,
        }
    }
    debug!("Loader for {} stopped after {} loads", volume.name, volume.total_loads());
}
