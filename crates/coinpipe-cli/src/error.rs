use coinpipe_core::{AnalyticsError, ConfigError, ValidationError};
use coinpipe_warehouse::WarehouseError;
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage unavailable: {0}")]
    Storage(#[from] WarehouseError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Validation(_) => 2,
            Self::Storage(_) => coinpipe_core::pipeline::EXIT_STORAGE_UNAVAILABLE,
            Self::Analytics(AnalyticsError::InsufficientData { .. }) => {
                coinpipe_core::pipeline::EXIT_INSUFFICIENT_DATA
            }
            Self::Analytics(_) => coinpipe_core::pipeline::EXIT_STORAGE_UNAVAILABLE,
            Self::Serialization(_) | Self::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use coinpipe_core::AssetId;

    use super::*;

    #[test]
    fn failure_classes_have_distinct_exit_codes() {
        let asset_id = AssetId::parse("bitcoin").expect("asset");
        let config = CliError::from(ValidationError::EmptyAssetId);
        let storage = CliError::from(WarehouseError::QueryRejected(String::from("locked")));
        let insufficient = CliError::from(AnalyticsError::InsufficientData { asset_id, found: 1 });

        assert_eq!(config.exit_code(), 2);
        assert_eq!(storage.exit_code(), 5);
        assert_eq!(insufficient.exit_code(), 6);
    }
}
