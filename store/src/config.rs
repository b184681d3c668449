//! Engine/view configuration (spec §9's `engine_params`). Plain
//! data-holding structs, built directly by the caller — there is no daemon
//! around this library and so no config-file or env-var layer.

/// Parameters shared by all three engines plus the block container.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    block_size: usize,
    depth: usize,
    direct_io: bool,
}

impl StoreConfig {
    pub fn new(block_size: usize, depth: usize, direct_io: bool) -> StoreConfig {
        StoreConfig {
            block_size,
            depth,
            direct_io,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn direct_io(&self) -> bool {
        self.direct_io
    }
}

impl Default for StoreConfig {
    fn default() -> StoreConfig {
        StoreConfig {
            block_size: 4096,
            depth: 32,
            direct_io: false,
        }
    }
}

/// Engine-specific knobs, one variant per store type (spec §9's
/// "monomorphized variants per supported parameter value").
#[derive(Debug, Clone, Copy)]
pub enum EngineParams {
    /// `a`: objects per index entry, typically a small power of two.
    PaCHash { a: u32 },
    /// `s`: separator bit width, one of `{4,5,6,8,10}`.
    Separator { s: u8 },
    Cuckoo,
}

impl EngineParams {
    pub fn pachash_a(&self) -> Option<u32> {
        match self {
            EngineParams::PaCHash { a } => Some(*a),
            _ => None,
        }
    }

    pub fn separator_s(&self) -> Option<u8> {
        match self {
            EngineParams::Separator { s } => Some(*s),
            _ => None,
        }
    }
}
