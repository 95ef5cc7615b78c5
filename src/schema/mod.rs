pub mod evolution;
pub mod key;
pub mod types;

pub use evolution::{added_columns, merge, reindex, union_columns};
pub use key::{is_degenerate, normalize_key};
pub use types::{Cell, Table, FIELD_SEPARATOR, PROVENANCE_COLUMN};
