//! src/services/storage_client.rs
//!
//! Storage access for discovery scans. `StorageClient` is the seam the
//! orchestrator talks to; `ObjectStoreClient` implements it on top of the
//! `object_store` crate so one code path serves Azure Blob, local
//! directories and the in-memory store used in tests.

use crate::{
    config::AccountConfig,
    errors::{DiscoveryError, DiscoveryResult},
    models::object::{DiscoveredObject, ScanScope},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::{
    ObjectMeta, ObjectStore,
    azure::{AzureConfigKey, MicrosoftAzureBuilder},
    local::LocalFileSystem,
    memory::InMemory,
    path::Path,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};
use tracing::{debug, warn};
use url::Url;

/// Listing and bounded reads against one storage account.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// List objects under `scope`, keeping only names ending in one of
    /// `extensions` when given. At most the configured listing cap is
    /// returned.
    async fn list(
        &self,
        scope: &ScanScope,
        extensions: Option<&[String]>,
    ) -> DiscoveryResult<Vec<DiscoveredObject>>;

    /// First `max_bytes` of the object. Empty on any failure.
    async fn read_head(&self, object: &DiscoveredObject, max_bytes: u64) -> Bytes;

    /// Last `max_bytes` of the object. Empty on any failure.
    async fn read_tail(&self, object: &DiscoveredObject, max_bytes: u64) -> Bytes;
}

/// Builds a client for an account. Kept separate so scans can be driven
/// against fakes.
pub trait StorageConnector: Send + Sync {
    fn connect(&self, account: &AccountConfig) -> DiscoveryResult<Arc<dyn StorageClient>>;
}

pub struct ObjectStoreConnector {
    listing_cap: usize,
}

impl ObjectStoreConnector {
    pub fn new(listing_cap: usize) -> Self {
        Self { listing_cap }
    }
}

impl StorageConnector for ObjectStoreConnector {
    fn connect(&self, account: &AccountConfig) -> DiscoveryResult<Arc<dyn StorageClient>> {
        Ok(Arc::new(ObjectStoreClient::from_account(
            account,
            self.listing_cap,
        )?))
    }
}

enum Backend {
    /// One store holds every container as a top-level directory.
    Shared(Arc<dyn ObjectStore>),
    /// One store per container, built lazily.
    Azure {
        account: String,
        options: BTreeMap<String, String>,
    },
}

#[derive(Clone)]
struct ContainerStore {
    store: Arc<dyn ObjectStore>,
    /// Path of the container root inside `store`.
    root: String,
}

pub struct ObjectStoreClient {
    account: String,
    backend: Backend,
    listing_cap: usize,
    containers: Mutex<HashMap<String, ContainerStore>>,
}

impl ObjectStoreClient {
    /// Build a client from the account DSN.
    ///
    /// - `file:///srv/blobs`: containers are directories below the path
    /// - `memory://`: process-local store
    /// - `az://<storage account>`: Azure Blob, credentials via `options`
    pub fn from_account(account: &AccountConfig, listing_cap: usize) -> DiscoveryResult<Self> {
        let url = Url::parse(&account.dsn).map_err(|e| {
            DiscoveryError::Config(format!("invalid storage DSN for `{}`: {}", account.name, e))
        })?;

        let backend = match url.scheme() {
            "file" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(DiscoveryError::Config(
                        "file DSN must specify a path: file:///path/to/storage".into(),
                    ));
                }
                Backend::Shared(Arc::new(LocalFileSystem::new_with_prefix(path)?))
            }
            "memory" => Backend::Shared(Arc::new(InMemory::new())),
            "az" | "azure" | "abfs" | "abfss" => {
                let storage_account = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| {
                        DiscoveryError::Config(format!(
                            "azure DSN for `{}` must name the storage account: az://<account>",
                            account.name
                        ))
                    })?;
                Backend::Azure {
                    account: storage_account.to_string(),
                    options: account.options.clone(),
                }
            }
            scheme => {
                return Err(DiscoveryError::Config(format!(
                    "unsupported storage scheme: {scheme}. Supported: file, memory, az"
                )));
            }
        };

        Ok(Self {
            account: account.name.clone(),
            backend,
            listing_cap,
            containers: Mutex::new(HashMap::new()),
        })
    }

    /// Wrap an existing store whose top-level directories are containers.
    #[cfg(test)]
    pub fn with_store(
        account: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        listing_cap: usize,
    ) -> Self {
        Self {
            account: account.into(),
            backend: Backend::Shared(store),
            listing_cap,
            containers: Mutex::new(HashMap::new()),
        }
    }

    fn container_store(&self, container: &str) -> DiscoveryResult<ContainerStore> {
        let mut cache = self
            .containers
            .lock()
            .map_err(|_| DiscoveryError::Config("storage client cache poisoned".into()))?;
        if let Some(found) = cache.get(container) {
            return Ok(found.clone());
        }

        let built = match &self.backend {
            Backend::Shared(store) => ContainerStore {
                store: store.clone(),
                root: container.trim_matches('/').to_string(),
            },
            Backend::Azure { account, options } => {
                let mut builder = MicrosoftAzureBuilder::new()
                    .with_account(account)
                    .with_container_name(container);
                for (key, value) in options {
                    let key = key.parse::<AzureConfigKey>().map_err(|e| {
                        DiscoveryError::Config(format!("unknown azure option `{key}`: {e}"))
                    })?;
                    builder = builder.with_config(key, value);
                }
                ContainerStore {
                    store: Arc::new(builder.build()?),
                    root: String::new(),
                }
            }
        };
        cache.insert(container.to_string(), built.clone());
        Ok(built)
    }

    async fn read_range(&self, object: &DiscoveredObject, start: u64, end: u64) -> Bytes {
        if start >= end {
            return Bytes::new();
        }
        let result = async {
            let target = self.container_store(&object.container)?;
            let location = Path::from(join_path(&target.root, &object.path));
            Ok::<_, DiscoveryError>(target.store.get_range(&location, start..end).await?)
        }
        .await;

        match result {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    account = %self.account,
                    container = %object.container,
                    path = %object.path,
                    error = %err,
                    "sample read failed, continuing without schema"
                );
                Bytes::new()
            }
        }
    }

    fn to_discovered(&self, scope: &ScanScope, root: &str, meta: ObjectMeta) -> DiscoveredObject {
        let location = meta.location.as_ref();
        let path = if root.is_empty() {
            location.to_string()
        } else {
            location
                .strip_prefix(root)
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(location)
                .to_string()
        };

        let mut provider_metadata = BTreeMap::new();
        if let Some(version) = meta.version {
            provider_metadata.insert("version".to_string(), version);
        }

        DiscoveredObject {
            storage_identifier: self.account.clone(),
            container: scope.container.clone(),
            content_type: content_type_for(&path).map(str::to_string),
            path,
            size: meta.size as u64,
            etag: meta.e_tag,
            last_modified: Some(meta.last_modified),
            created_at: None,
            provider_metadata,
        }
    }
}

#[async_trait]
impl StorageClient for ObjectStoreClient {
    async fn list(
        &self,
        scope: &ScanScope,
        extensions: Option<&[String]>,
    ) -> DiscoveryResult<Vec<DiscoveredObject>> {
        let target = self.container_store(&scope.container)?;
        let prefix = join_path(&target.root, &scope.folder);
        let prefix = (!prefix.is_empty()).then(|| Path::from(prefix));

        debug!(
            account = %self.account,
            container = %scope.container,
            folder = %scope.folder,
            "listing objects"
        );

        let mut stream = target.store.list(prefix.as_ref());
        let mut objects = Vec::new();
        let mut listed = 0usize;
        while let Some(meta) = stream.next().await {
            if listed >= self.listing_cap {
                warn!(
                    account = %self.account,
                    container = %scope.container,
                    folder = %scope.folder,
                    cap = self.listing_cap,
                    "listing cap reached, remaining objects skipped this run"
                );
                break;
            }
            listed += 1;

            let object = self.to_discovered(scope, &target.root, meta?);
            if matches_extension(object.name(), extensions) {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    async fn read_head(&self, object: &DiscoveredObject, max_bytes: u64) -> Bytes {
        self.read_range(object, 0, object.size.min(max_bytes)).await
    }

    async fn read_tail(&self, object: &DiscoveredObject, max_bytes: u64) -> Bytes {
        self.read_range(object, object.size.saturating_sub(max_bytes), object.size)
            .await
    }
}

fn join_path(root: &str, rest: &str) -> String {
    let rest = rest.trim_matches('/');
    match (root.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => root.to_string(),
        (false, false) => format!("{root}/{rest}"),
    }
}

/// Case-insensitive suffix match; `.csv` and `csv` are equivalent.
fn matches_extension(name: &str, extensions: Option<&[String]>) -> bool {
    let Some(extensions) = extensions else {
        return true;
    };
    let name = name.to_lowercase();
    extensions.iter().any(|ext| {
        let ext = ext.trim().trim_start_matches('.').to_lowercase();
        !ext.is_empty() && name.ends_with(&format!(".{ext}"))
    })
}

fn content_type_for(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "txt" => "text/plain",
        "json" => "application/json",
        "jsonl" | "ndjson" => "application/x-ndjson",
        "parquet" => "application/vnd.apache.parquet",
        "avro" => "application/avro",
        "xml" => "application/xml",
        "gz" => "application/gzip",
        "zip" => "application/zip",
        _ => return None,
    })
}
