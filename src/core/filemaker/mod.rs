pub mod client;
pub mod connector;
pub mod extract;

pub use client::{FileMakerClient, Range, ResultSet, ScriptCall};
pub use connector::FmConnector;
pub use extract::{extract_records, process_return, FindOptions, Returned, Returning};

pub const FM_RECORD_ID: &str = "__RECORD_ID__";
pub const FM_MOD_ID: &str = "__MODIFICATION_ID__";
pub const FM_RECORD: &str = "__RECORD__";
pub const FM_METADATA: &str = "__METADATA__";
