//! Closure environment layout.
//!
//! Captured symbols do not live in registers; they live in heap-allocated
//! environments chained through parent links. One environment is created per
//! scope that declares captured symbols, so each loop iteration gets fresh
//! slots for the variables it captures.
//!
//! The collection is shared across all functions of one module compilation:
//! an outer function assigns locations while it is lowered, and nested
//! functions (lowered later from the job queue) look the locations up.

use ahash::AHashMap;

use crate::semantics::SymbolId;

/// Id of a closure environment within one module compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(pub u32);

/// The location of a captured symbol: which environment and which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvLocation {
    pub env: EnvId,
    pub index: u32,
}

#[derive(Debug)]
struct ClosureEnv {
    parent: Option<EnvId>,
    size: u32,
}

/// All closure environments of a module plus the captured symbol locations.
#[derive(Debug, Default)]
pub struct ClosureEnvCollection {
    envs: Vec<ClosureEnv>,
    locations: AHashMap<SymbolId, EnvLocation>,
}

impl ClosureEnvCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_env(&mut self, parent: Option<EnvId>, size: u32) -> EnvId {
        debug_assert!(size > 0, "environments hold at least one slot");
        let id = EnvId(u32::try_from(self.envs.len()).expect("env id overflow"));
        self.envs.push(ClosureEnv { parent, size });
        id
    }

    #[must_use]
    pub fn parent(&self, env: EnvId) -> Option<EnvId> {
        self.envs[env.0 as usize].parent
    }

    #[must_use]
    pub fn size(&self, env: EnvId) -> u32 {
        self.envs[env.0 as usize].size
    }

    pub fn set_location(&mut self, symbol: SymbolId, location: EnvLocation) {
        let previous = self.locations.insert(symbol, location);
        debug_assert!(previous.is_none(), "symbol already has an environment slot");
    }

    #[must_use]
    pub fn location(&self, symbol: SymbolId) -> Option<EnvLocation> {
        self.locations.get(&symbol).copied()
    }

    /// Number of parent links to follow from `from` to reach `to`.
    ///
    /// Panics when `to` is not on `from`'s parent chain; the resolver
    /// guarantees captured symbols are only read from nested scopes.
    #[must_use]
    pub fn distance(&self, from: EnvId, to: EnvId) -> u32 {
        let mut levels = 0;
        let mut current = from;
        while current != to {
            current = self
                .parent(current)
                .expect("target environment must be on the parent chain");
            levels += 1;
        }
        levels
    }
}
