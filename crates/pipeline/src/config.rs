use turnloop_core::PipelineSettings;

/// Default bytes buffered in front of the sink before the source is paused.
const DEFAULT_HIGH_WATER_MARK: usize = 256 * 1024;

/// Default bytes read per source chunk.
const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Flow-control settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bytes the engine buffers for a paused sink before it stops pulling
    /// from the source.
    pub high_water_mark: usize,

    /// Bytes the reader-backed sources pull per chunk.
    pub read_chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl PipelineConfig {
    pub fn new(high_water_mark: usize, read_chunk_size: usize) -> Self {
        Self {
            high_water_mark: high_water_mark.max(1),
            read_chunk_size: read_chunk_size.max(1),
        }
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self::new(settings.high_water_mark, settings.read_chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_zero_values() {
        let config = PipelineConfig::new(0, 0);
        assert_eq!(config.high_water_mark, 1);
        assert_eq!(config.read_chunk_size, 1);
    }

    #[test]
    fn from_settings() {
        let config = PipelineConfig::from(&PipelineSettings::default());
        assert_eq!(config, PipelineConfig::default());
    }
}
