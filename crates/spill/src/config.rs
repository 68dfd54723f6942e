use serde::{Deserialize, Serialize};

/// Configuration for a [MemoryDataSpiller](crate::MemoryDataSpiller).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpillerConfig {
    /// Name of the writer thread.
    pub thread_name: String,

    /// Maximum number of slices passed to one gathering write.  Each buffer
    /// takes two, one for its header and one for its payload.
    pub max_io_slices: usize,

    /// Whether to sync the file to stable storage after every request.
    ///
    /// Spill files are scratch space that does not outlive the process, so
    /// this is off by default.
    pub sync_on_spill: bool,
}

impl SpillerConfig {
    /// Lower bound for [Self::max_io_slices]: one whole frame.
    pub const MIN_IO_SLICES: usize = 2;

    /// Linux's `IOV_MAX`.
    pub const DEFAULT_IO_SLICES: usize = 1024;

    pub(crate) fn io_slices(&self) -> usize {
        self.max_io_slices.max(Self::MIN_IO_SLICES)
    }
}

impl Default for SpillerConfig {
    fn default() -> Self {
        Self {
            thread_name: "spill-writer".to_string(),
            max_io_slices: Self::DEFAULT_IO_SLICES,
            sync_on_spill: false,
        }
    }
}
