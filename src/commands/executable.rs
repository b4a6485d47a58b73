use std::path::Path;

use crate::commands::{Access, CommandError, Registry, Reply};
use crate::store::{Store, StoreRead, StoreWrite};

pub trait Executable {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError>;
}

/// Everything a handler may touch while it runs. Store access is gated by the capability the
/// handler was registered with.
pub struct Context<'a> {
    pub(crate) store: &'a Store,
    pub(crate) registry: &'a Registry,
    pub(crate) access: Access,
}

impl<'a> Context<'a> {
    pub fn read(&self) -> StoreRead<'a> {
        self.store.read()
    }

    /// Exclusive access, only granted to mutating handlers.
    pub fn write(&self) -> Result<StoreWrite<'a>, CommandError> {
        match self.access {
            Access::Mutating => Ok(self.store.write()),
            Access::ReadOnly => Err(CommandError::Internal(
                "read-only command requested exclusive access".to_string(),
            )),
        }
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn data_file(&self) -> Option<&'a Path> {
        self.registry.data_file()
    }
}
