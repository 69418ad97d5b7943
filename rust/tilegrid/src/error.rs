//! Error taxonomy for grid construction, device memory and launches.

/// A grid or kernel configuration that can never launch.
///
/// These are detected while building extents, plans and launches, before any
/// work-item runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("extent dimension {dim} has size zero")]
    ZeroExtent { dim: usize },
    #[error("extent {dims:?} holds more work-items than fit in usize")]
    ExtentOverflow { dims: Vec<usize> },
    #[error("tile dimension {dim} has size zero")]
    ZeroTile { dim: usize },
    #[error("tile size {tile} does not evenly divide extent {extent} in dimension {dim}")]
    UnevenTile {
        dim: usize,
        extent: usize,
        tile: usize,
    },
    #[error("tile of {tile_len} work-items is not a multiple of the wave width {wave_width}")]
    NotWaveMultiple { tile_len: usize, wave_width: usize },
    #[error("wave-shuffle reduction needs a tile of exactly one wave ({wave_width}), got {tile_len}")]
    TileNotOneWave { tile_len: usize, wave_width: usize },
    #[error("tile of {tile_len} work-items exceeds the device limit of {limit}")]
    TileTooLarge { tile_len: usize, limit: usize },
    #[error("wave width {0} must be a power of two between 1 and 64")]
    InvalidWaveWidth(usize),
    #[error("reduction input length {0} is odd")]
    OddInput(usize),
    #[error("reduction tile size {0} is not a power of two")]
    TileNotPowerOfTwo(usize),
    #[error("{name} holds {actual} elements, expected {expected}")]
    ShapeMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

/// Errors surfaced by the accelerator, its buffers and its launches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("invalid grid configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("group memory request of {requested} bytes exceeds the {limit} byte limit")]
    ResourceExhaustion { requested: usize, limit: usize },
    #[error("device allocation of {requested} bytes failed ({available} bytes available)")]
    Allocation { requested: usize, available: usize },
    #[error("buffer {id} is leased by a running kernel")]
    BufferInUse { id: u64 },
    #[error("copy of {len} elements exceeds buffer length {capacity}")]
    CopyOutOfBounds { len: usize, capacity: usize },
    #[error("barrier divergence in tile {tile}: {detail}")]
    Divergence { tile: usize, detail: String },
    #[error("kernel fault at {site}: {message}")]
    KernelFault { site: String, message: String },
    #[error("launch was dropped before reporting completion")]
    LaunchDropped,
}

pub type Result<T, E = GridError> = std::result::Result<T, E>;
