//! Shared test utilities for engine tests.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use trove_log::VerifiableLog;
use trove_stamp::testing::ManualStampClient;
use trove_store::MemoryStore;
use trove_types::{File, MetadataStream, Token};

use crate::backend::TroveBackend;
use crate::mime;
use crate::tstore::Tstore;

/// A backend over in-memory stores plus handles to its internals.
pub struct TestEnv {
    pub backend: TroveBackend,
    pub tstore: Arc<Tstore>,
    pub stamper: Arc<ManualStampClient>,
}

/// Build a backend over an in-memory log, store, and stamp service.
pub async fn test_env() -> TestEnv {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let log = Arc::new(VerifiableLog::new());
    let store = Arc::new(MemoryStore::new());
    let stamper = Arc::new(ManualStampClient::new());
    let tstore = Tstore::new(log, store, stamper.clone());
    let backend = TroveBackend::new(tstore.clone()).await.unwrap();
    TestEnv {
        backend,
        tstore,
        stamper,
    }
}

/// A valid text file with the given contents.
pub fn text_file(name: &str, contents: &str) -> File {
    File {
        name: name.to_string(),
        mime: mime::MIME_TEXT.to_string(),
        digest: hex::encode(Sha256::digest(contents.as_bytes())),
        payload: BASE64.encode(contents.as_bytes()),
    }
}

/// A valid metadata stream.
pub fn stream(plugin_id: &str, stream_id: u32, payload: &str) -> MetadataStream {
    MetadataStream {
        plugin_id: plugin_id.to_string(),
        stream_id,
        payload: payload.to_string(),
    }
}

/// Parse a record metadata token back into a [`Token`].
pub fn token_of(record: &trove_types::Record) -> Token {
    Token::from_hex(&record.metadata.token).unwrap()
}
