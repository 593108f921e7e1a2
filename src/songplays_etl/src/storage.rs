//! Storage locations and object-store wiring.
//!
//! All locations are URLs. `file://` roots are served by the engine's built-in
//! local filesystem store; every `s3://` bucket referenced by a root gets an
//! [`AmazonS3`](object_store::aws::AmazonS3) store registered on the session.

use std::path::PathBuf;
use std::sync::Arc;

use deltalake::datafusion::error::DataFusionError;
use deltalake::datafusion::execution::object_store::ObjectStoreUrl;
use deltalake::datafusion::execution::runtime_env::RuntimeEnv;
use deltalake::datafusion::prelude::SessionContext;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use secrecy::ExposeSecret;
use snafu::ResultExt;
use tracing::debug;
use url::Url;

use crate::config::{Credentials, Settings};
use crate::errors::{EtlError, LocationSnafu, ObjectStoreSnafu};

/// Resolve `segment` below a directory URL.
///
/// `segment` should end with `/` when it names a directory.
pub fn child(base: &Url, segment: &str) -> Result<Url, EtlError> {
    base.join(segment).context(LocationSnafu {
        base: base.to_string(),
        segment,
    })
}

/// The bucket-level URL (`s3://bucket/`) an object store is registered under.
pub fn store_url(url: &Url) -> Url {
    let mut root = url.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    root
}

/// The object store the runtime serves `url` from.
pub fn lookup_store(runtime: &RuntimeEnv, url: &Url) -> Result<Arc<dyn ObjectStore>, DataFusionError> {
    let key = ObjectStoreUrl::parse(store_url(url))?;
    runtime.object_store(key)
}

/// Object path of a URL inside its store, without leading or trailing `/`.
pub fn object_path(url: &Url) -> ObjectPath {
    let trimmed = url.path().trim_matches('/');
    // Url paths are already percent-encoded
    ObjectPath::from_url_path(trimmed).unwrap_or_else(|_| ObjectPath::from(trimmed))
}

/// Filesystem path of a `file://` URL.
pub fn local_path(url: &Url) -> Option<PathBuf> {
    if url.scheme() == "file" {
        url.to_file_path().ok()
    } else {
        None
    }
}

fn s3_store(bucket: &str, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
    let store = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(&credentials.region)
        .with_access_key_id(credentials.access_key_id.expose_secret())
        .with_secret_access_key(credentials.secret_access_key.expose_secret())
        .build()?;
    Ok(Arc::new(store))
}

/// Register an object store for every remote root in `settings`.
///
/// Roots sharing a bucket share a store.
pub fn register_stores(session: &SessionContext, settings: &Settings) -> Result<(), EtlError> {
    let mut registered: Vec<Url> = Vec::new();
    for root in [&settings.input_root, &settings.output_root] {
        if root.scheme() != "s3" {
            continue;
        }
        let url = store_url(root);
        if registered.contains(&url) {
            continue;
        }
        let bucket = url.host_str().unwrap_or_default();
        let store = s3_store(bucket, &settings.credentials).context(ObjectStoreSnafu {
            url: url.to_string(),
        })?;
        session.runtime_env().register_object_store(&url, store);
        debug!(store = %url, region = %settings.credentials.region, "Registered object store");
        registered.push(url);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn child_stays_below_root() {
        let root = url("s3://udacity-dend/lake/");
        let songs = child(&root, "songs/").unwrap();
        assert_eq!(songs.as_str(), "s3://udacity-dend/lake/songs/");
        assert_eq!(store_url(&songs).as_str(), "s3://udacity-dend/");
    }

    #[test]
    fn object_paths_drop_slashes() {
        let songs = url("s3://bucket/out/songs/");
        assert_eq!(object_path(&songs).as_ref(), "out/songs");
        assert_eq!(object_path(&url("s3://bucket/")).as_ref(), "");
    }

    #[test]
    fn local_paths_only_for_file_urls() {
        assert!(local_path(&url("s3://bucket/a/")).is_none());
        let dir = std::env::temp_dir();
        let as_url = Url::from_directory_path(&dir).unwrap();
        assert_eq!(local_path(&as_url).unwrap(), dir);
    }

    #[test]
    fn registers_one_store_per_bucket() {
        let settings = Settings::new(
            Credentials::new("AKIDEXAMPLE", "secret", "us-west-2"),
            url("s3://udacity-dend/"),
            url("s3://sparkify-lake/out/"),
        );
        let session = SessionContext::new();
        register_stores(&session, &settings).unwrap();

        let env = session.runtime_env();
        assert!(lookup_store(&env, &url("s3://udacity-dend/song_data/")).is_ok());
        assert!(lookup_store(&env, &url("s3://sparkify-lake/out/songs/")).is_ok());
        assert!(lookup_store(&env, &url("s3://elsewhere/")).is_err());
        assert!(lookup_store(&env, &url("file:///tmp/lake/")).is_ok());
    }
}
