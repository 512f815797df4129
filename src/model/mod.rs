pub mod labels;
pub mod matcher;
pub mod sample;
pub mod value;

pub use labels::{is_valid_label_name, is_valid_metric_name, LabelSet, METRIC_NAME};
pub use matcher::{MatchKind, Matcher};
pub use sample::{Sample, Series, MAX_TIMESTAMP_MS};
pub use value::{InstantSample, Value, ValueKind};
