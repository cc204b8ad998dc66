//! Progress reporting hooks for the encode and decode pipelines.
//!
//! Work items may complete on rayon worker threads, so implementations must
//! be `Sync`. Every method defaults to a no-op.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Rendering one QR symbol per record.
    Rendering,
    /// Looking for symbols in page images.
    Scanning,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Rendering => "Rendering",
            Stage::Scanning => "Scanning",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Stage::Rendering => "symbols",
            Stage::Scanning => "images",
        }
    }
}

pub trait Progress: Sync {
    fn start(&self, stage: Stage, total: usize) {
        let _ = (stage, total);
    }

    fn advance(&self, stage: Stage) {
        let _ = stage;
    }

    fn finish(&self, stage: Stage) {
        let _ = stage;
    }
}

/// Reports nothing.
pub struct NoProgress;

impl Progress for NoProgress {}
