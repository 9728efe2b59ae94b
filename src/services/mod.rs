mod quota_data;

pub use quota_data::{MAX_USER_RANGE_SECS, QueryError, QuotaDataService, check_user_range};
