pub mod corpus;
pub mod csv;

pub use corpus::{load_text, split_papers, DEFAULT_PAPER_DELIMITER};
pub use csv::{write_records, CsvFormat, CsvRecord, CsvTable};
