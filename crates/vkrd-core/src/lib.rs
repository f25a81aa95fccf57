pub mod error;
pub mod object_table;
pub mod options;

pub use error::CoreError;
pub use object_table::ObjectTable;
pub use options::ReplayOptions;
