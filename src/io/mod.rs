//! Input tables and the run artifact

pub mod artifact;
mod csv;

pub use self::artifact::{parse, serialize, ArtifactContent, ResultView};
pub use self::csv::{read_count_matrix, read_count_table, read_metadata, read_metadata_table};
