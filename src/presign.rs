//! Presigned URL expiry bounds.

use std::time::Duration;

use crate::StorageError;

/// Maximum presigned URL expiry (7 days for SigV4 and GCS V4 signing).
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Validate presigned URL expiry duration.
pub fn validate_expiry(expires_in: Duration) -> Result<(), String> {
    if expires_in > MAX_PRESIGN_EXPIRY {
        Err(format!(
            "Expiry duration {:?} exceeds maximum allowed {:?}",
            expires_in, MAX_PRESIGN_EXPIRY
        ))
    } else if expires_in.is_zero() {
        Err("Expiry duration must be greater than zero".to_string())
    } else {
        Ok(())
    }
}

/// Like [`validate_expiry`], as a storage error.
pub(crate) fn check_expiry(expires_in: Duration) -> Result<(), StorageError> {
    validate_expiry(expires_in).map_err(|reason| StorageError::Presign { reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_expiry() {
        assert!(validate_expiry(Duration::from_secs(3600)).is_ok());
        assert!(validate_expiry(MAX_PRESIGN_EXPIRY).is_ok());
        assert!(validate_expiry(MAX_PRESIGN_EXPIRY + Duration::from_secs(1)).is_err());
        assert!(validate_expiry(Duration::ZERO).is_err());
    }

    #[test]
    fn test_check_expiry_maps_to_presign_error() {
        let err = check_expiry(Duration::ZERO).unwrap_err();
        assert!(matches!(err, StorageError::Presign { .. }));
    }
}
