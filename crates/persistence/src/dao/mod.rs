//! Data access objects for the normalized schema.
//!
//! - [`ResourceDao`] - versioned rows of the `resources` table
//! - [`ParameterDao`] - per-type search parameter rows
//! - [`DictionaryDao`] - parameter names, code systems and resource types
//!
//! All DAOs take the connection per call so that writes share the caller's
//! transaction. SQL errors are translated before they leave this module.

mod dictionary;
mod parameter;
mod resource;

pub use dictionary::{Dictionary, DictionaryDao};
pub use parameter::ParameterDao;
pub use resource::{RESOURCE_COLUMNS, RESOURCE_FROM, ResourceDao, map_resource_row};
