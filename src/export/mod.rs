//! CSV download and profile-save payloads for a finished series.

mod csv;
mod persist;

pub use self::csv::{export_file_name, to_csv, write_csv};
pub use persist::{build_record, RunSummary, SaveMetadata, SavedRecord};
