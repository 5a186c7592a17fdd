use std::collections::HashMap;

/// Dictionary ids observed during one transaction, awaiting commit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheUpdates {
    pub parameter_names: HashMap<String, i64>,
    pub code_systems: HashMap<String, i64>,
    pub resource_types: HashMap<String, i64>,
}

impl CacheUpdates {
    pub fn is_empty(&self) -> bool {
        self.parameter_names.is_empty()
            && self.code_systems.is_empty()
            && self.resource_types.is_empty()
    }
}
