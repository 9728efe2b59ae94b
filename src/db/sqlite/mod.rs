mod quota_data;

pub use quota_data::SqliteQuotaDataRepo;
