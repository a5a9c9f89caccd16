//! Close-time verification of bytes streamed from the remote.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use hoard_remote::error::ErrorKind as RemoteErrorKind;
use hoard_remote::{HashKind, RemoteObject, hash};

/// Compare locally computed digests against the ones the remote publishes.
///
/// Kinds the remote has no digest for are skipped, as is everything once the
/// object has vanished from the remote: at that point there is nothing left
/// to compare against.
pub async fn verify(sums: &[(HashKind, String)], object: &dyn RemoteObject) -> Result<()> {
    for (kind, local) in sums {
        let remote = match object.hash(*kind).await {
            Ok(Some(remote)) => remote,
            Ok(None) => continue,
            Err(e) if matches!(&*e, RemoteErrorKind::NotFound(_)) => {
                tracing::debug!(path = %object.path().display(), "Object vanished before integrity check");
                return Ok(());
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Remote),
        };
        if !hash::equals(local, &remote) {
            exn::bail!(ErrorKind::CorruptedTransfer {
                kind: *kind,
                local: local.clone(),
                remote,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_remote::mock::MockObject;

    #[tokio::test]
    async fn test_matching_digest() {
        let object = MockObject::new("a.bin", b"hello".to_vec());
        let sums = vec![(HashKind::Crc32, "3610A686".to_string())];
        verify(&sums, &object).await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatch() {
        let object = MockObject::new("a.bin", b"hello".to_vec()).with_digest(HashKind::Crc32, Some("deadbeef"));
        let sums = vec![(HashKind::Crc32, HashKind::Crc32.digest(b"hello"))];
        let err = verify(&sums, &object).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptedTransfer { kind: HashKind::Crc32, .. }));
    }

    #[tokio::test]
    async fn test_missing_digest_is_skipped() {
        let object = MockObject::new("a.bin", b"hello".to_vec()).with_digest(HashKind::Blake3, None);
        let sums = vec![(HashKind::Blake3, "anything".to_string())];
        verify(&sums, &object).await.unwrap();
    }

    #[tokio::test]
    async fn test_vanished_object_is_skipped() {
        let object = MockObject::new("a.bin", b"hello".to_vec());
        object.vanish();
        let sums = vec![(HashKind::Crc32, "00000000".to_string())];
        verify(&sums, &object).await.unwrap();
    }
}
