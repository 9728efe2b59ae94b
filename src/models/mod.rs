mod granularity;
mod quota_data;

pub use granularity::*;
pub use quota_data::*;
