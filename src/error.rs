use prism_graphics::DeviceError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ray tracing is not supported by the device")]
    Unsupported,
    #[error("BLAS pool is exhausted")]
    PoolExhausted,
    #[error("TLAS instance limit reached")]
    InstanceLimit,
    #[error("refit queue is full")]
    QueueFull,
    #[error("acceleration structure build failed: {0}")]
    BuildFailed(String),
    #[error("out of GPU memory")]
    GpuOom,
    #[error("shader `{0}` is missing")]
    ShaderMissing(String),
    #[error("descriptor allocation failed")]
    DescriptorAllocFailed,
    #[error("invalid BLAS {0:?}")]
    InvalidBlas(crate::BlasId),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl From<DeviceError> for Error {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::OutOfMemory => Self::GpuOom,
            DeviceError::Unsupported => Self::Unsupported,
            DeviceError::InvalidShader(name) => Self::ShaderMissing(name),
            DeviceError::DescriptorPool => Self::DescriptorAllocFailed,
            DeviceError::DeviceLost => Self::BuildFailed("device lost".to_string()),
            DeviceError::Build(message) => Self::BuildFailed(message),
        }
    }
}

impl Error {
    /// Failure of the build step itself, with allocation errors kept apart.
    pub(crate) fn build(error: DeviceError) -> Self {
        match error {
            DeviceError::OutOfMemory => Self::GpuOom,
            other => Self::BuildFailed(other.to_string()),
        }
    }
}

bitflags::bitflags! {
    /// Categories of reports that are only logged once per world.
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct WarnCategory: u32 {
        const POOL_EXHAUSTED = 1 << 0;
        const INSTANCE_LIMIT = 1 << 1;
        const QUEUE_FULL = 1 << 2;
        const ENTITY_PARSE = 1 << 3;
        const HARDWARE_UNSUPPORTED = 1 << 4;
        const BUILD_FAILED = 1 << 5;
        const SHADOW_FALLBACK = 1 << 6;
        const MATERIAL_INDEX = 1 << 7;
    }
}

#[derive(Clone, Debug, Default)]
pub struct WarnOnce {
    fired: WarnCategory,
}

impl WarnOnce {
    /// Returns `true` the first time `category` is reported.
    pub fn first(&mut self, category: WarnCategory) -> bool {
        let first = !self.fired.contains(category);
        self.fired |= category;
        first
    }

    pub fn has_fired(&self, category: WarnCategory) -> bool {
        self.fired.contains(category)
    }

    pub fn reset(&mut self) {
        self.fired = WarnCategory::empty();
    }
}
