use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use log::debug;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Secrets are cached for at most this long.
const SECRET_TTL: Duration = Duration::from_secs(10);
const SECRET_CACHE_CAPACITY: usize = 1024;

/// Reads the raw byte fields of one namespaced secret.
#[async_trait]
pub trait SecretReader: Send + Sync {
    async fn read(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>>;
}

/// Reader backed by the Kubernetes API, using in-cluster credentials when
/// running inside a pod.
pub struct KubeSecretReader {
    client: Client,
}

impl KubeSecretReader {
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn read(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;
        let mut fields = BTreeMap::new();
        if let Some(data) = secret.data {
            for (field, bytes) in data {
                fields.insert(field, bytes.0);
            }
        }
        Ok(fields)
    }
}

/// Reader used when no Kubernetes client could be constructed; every lookup
/// reports the secret as unavailable.
pub struct UnavailableSecretReader;

#[async_trait]
impl SecretReader for UnavailableSecretReader {
    async fn read(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        Err(Error::SecretError(format!(
            "no Kubernetes client available to read secret {namespace}/{name}"
        )))
    }
}

struct CachedSecret {
    data: BTreeMap<String, String>,
    fetched_at: Instant,
}

/// Process-local, TTL-bounded cache of decoded secret data, keyed by
/// `(namespace, name)`. Safe for concurrent readers and writers.
pub struct SecretCache {
    reader: Box<dyn SecretReader>,
    entries: DashMap<(String, String), CachedSecret>,
    ttl: Duration,
    capacity: usize,
}

impl SecretCache {
    pub fn new(reader: Box<dyn SecretReader>) -> Self {
        Self::with_limits(reader, SECRET_TTL, SECRET_CACHE_CAPACITY)
    }

    pub fn with_limits(reader: Box<dyn SecretReader>, ttl: Duration, capacity: usize) -> Self {
        Self {
            reader,
            entries: DashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Resolve a secret reference of the form `"namespace/name"` or a bare
    /// `"name"`, which resolves in the current pod namespace.
    pub async fn get_for_ref(&self, reference: &str) -> Result<BTreeMap<String, String>> {
        let parts: Vec<&str> = reference.split('/').collect();
        match parts.as_slice() {
            [name] => self.get(current_namespace()?, name).await,
            [namespace, name] => self.get(namespace, name).await,
            _ => Err(Error::SecretError(format!(
                "malformed secret reference: {reference}"
            ))),
        }
    }

    /// Fetch the decoded data of one secret, from cache when fresh.
    ///
    /// Every field must be ASCII; a single undecodable field fails the whole
    /// lookup and nothing is cached.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let key = (namespace.to_string(), name.to_string());
        if let Some(entry) = self.entries.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.data.clone());
            }
        }

        let raw = self.reader.read(namespace, name).await?;
        let data = decode_fields(namespace, name, raw)?;

        self.entries.insert(
            key,
            CachedSecret {
                data: data.clone(),
                fetched_at: Instant::now(),
            },
        );
        if self.entries.len() > self.capacity {
            self.evict();
        }
        debug!("cached secret {namespace}/{name}");
        Ok(data)
    }

    /// Drop expired entries, then the oldest entries until within capacity.
    fn evict(&self) {
        self.entries
            .retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().fetched_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// HTTP header values must be ASCII, so ASCII is the decoding applied to
/// every secret field.
fn decode_fields(
    namespace: &str,
    name: &str,
    raw: BTreeMap<String, Vec<u8>>,
) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    for (field, bytes) in raw {
        if !bytes.is_ascii() {
            return Err(Error::SecretError(format!(
                "field {field} of secret {namespace}/{name} is not ASCII-decodable"
            )));
        }
        let value = String::from_utf8(bytes).map_err(|_| {
            Error::SecretError(format!(
                "field {field} of secret {namespace}/{name} is not ASCII-decodable"
            ))
        })?;
        data.insert(field, value);
    }
    Ok(data)
}

fn current_namespace() -> Result<&'static str> {
    static NAMESPACE: OnceCell<String> = OnceCell::new();
    let namespace = NAMESPACE.get_or_try_init(|| -> Result<String> {
        let raw = std::fs::read_to_string(NAMESPACE_FILE)?;
        Ok(raw.trim().to_string())
    })?;
    Ok(namespace)
}
