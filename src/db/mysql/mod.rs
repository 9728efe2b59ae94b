mod quota_data;

use std::str::FromStr;

use sqlx::mysql::MySqlConnectOptions;

pub use quota_data::MySqlQuotaDataRepo;

use crate::db::DbResult;

/// Parse a MySQL URL into connect options with the session pinned to UTC.
pub fn connect_options(url: &str) -> DbResult<MySqlConnectOptions> {
    Ok(MySqlConnectOptions::from_str(url)?.timezone(Some(String::from("+00:00"))))
}
