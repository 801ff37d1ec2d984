//! Client-side map check. Advisory only: the server validates again.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use fastdl_protocol::constants::{MAP_EXTENSION, MAP_MAGIC};

use crate::CandidateFile;

/// Why a candidate was refused. Every variant shows the same generic
/// reason; the detail is only for logs.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{}", fastdl_protocol::constants::INVALID_MAP_REASON)]
    WrongExtension { name: String },

    #[error("{}", fastdl_protocol::constants::INVALID_MAP_REASON)]
    BadSignature { found: [u8; 4] },

    #[error("{}", fastdl_protocol::constants::INVALID_MAP_REASON)]
    Unreadable(#[source] std::io::Error),
}

/// `true` if `name` ends in `.bsp`, ignoring ASCII case.
pub fn has_map_extension(name: &str) -> bool {
    let suffix = MAP_EXTENSION.len();
    name.len() >= suffix
        && name.is_char_boundary(name.len() - suffix)
        && name[name.len() - suffix..].eq_ignore_ascii_case(MAP_EXTENSION)
}

/// Reads exactly the first [`MAP_MAGIC`]`.len()` bytes of `reader` and
/// compares them with the magic. Nothing past the prefix is read.
pub async fn check_signature<R>(mut reader: R) -> Result<(), ValidationError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; MAP_MAGIC.len()];
    reader
        .read_exact(&mut prefix)
        .await
        .map_err(ValidationError::Unreadable)?;

    if prefix != MAP_MAGIC {
        return Err(ValidationError::BadSignature { found: prefix });
    }
    Ok(())
}

/// Accepts `file` only if its name has the map suffix and its content starts
/// with the map magic. The name check happens before the file is opened.
pub async fn validate_map(file: &CandidateFile) -> Result<(), ValidationError> {
    if !has_map_extension(file.name()) {
        debug!(name = %file.name(), "rejected: wrong extension");
        return Err(ValidationError::WrongExtension {
            name: file.name().to_string(),
        });
    }

    let handle = tokio::fs::File::open(file.path()).await.map_err(|e| {
        debug!(path = %file.path().display(), "rejected: cannot open: {e}");
        ValidationError::Unreadable(e)
    })?;

    check_signature(handle).await.inspect_err(|e| {
        debug!(name = %file.name(), "rejected: {e:?}");
    })
}
