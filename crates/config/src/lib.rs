//! # Meshwork Config
//!
//! The agent's durable configuration: a name→value `kvstore` collection
//! in the persistent document store. First run seeds the four values an
//! agent needs — `agtuuid`, `socket_host`, `socket_port`, and
//! `secret_digest` — and everything else in the system rebuilds from
//! scratch on restart.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use meshwork_store::{Collection, Query, Store, StoreError};
use tracing::info;

/// Default listen port for the overlay endpoints.
pub const DEFAULT_PORT: u16 = 53080;
/// Default shared-secret passphrase; `meshwork init --secret` replaces it.
pub const DEFAULT_PASSPHRASE: &str = "changeme";

/// One persisted name/value record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyValue {
    name: String,
    value: Value,
}

/// Typed access to the `kvstore` collection of a persistent store.
pub struct Kvstore {
    records: Collection,
}

impl Kvstore {
    pub fn new(store: &Store) -> Result<Kvstore, StoreError> {
        let records = store.collection("kvstore");
        records.create_attribute("name", "/name")?;
        Ok(Kvstore { records })
    }

    pub fn get(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .records
            .find_as::<KeyValue>(&Query::new().filter("name", name))?
            .into_iter()
            .next()
            .map(|kv| kv.value))
    }

    pub fn set(&self, name: &str, value: Value) -> Result<(), StoreError> {
        let existing = self
            .records
            .find_objuuids(&Query::new().filter("name", name))?;
        let record = KeyValue {
            name: name.to_string(),
            value,
        };
        match existing.first() {
            Some(objuuid) => self.records.upsert_at(objuuid, &record),
            None => self.records.upsert(&record).map(|_| ()),
        }
    }

    /// Read a value, seeding it with `default` on first access.
    pub fn get_or_insert(&self, name: &str, default: Value) -> Result<Value, StoreError> {
        match self.get(name)? {
            Some(value) => Ok(value),
            None => {
                self.set(name, default.clone())?;
                Ok(default)
            }
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        for objuuid in self
            .records
            .find_objuuids(&Query::new().filter("name", name))?
        {
            self.records.remove(&objuuid)?;
        }
        Ok(())
    }
}

/// The identity an agent runs under, loaded from the kvstore.
#[derive(Debug, Clone)]
pub struct Identity {
    pub agtuuid: String,
    pub socket_host: String,
    pub socket_port: u16,
    pub secret_digest: String,
}

impl Identity {
    /// Load the identity, seeding defaults on first run: a fresh
    /// agtuuid, `0.0.0.0:53080`, and the digest of the default
    /// passphrase.
    pub fn load(kvstore: &Kvstore) -> Result<Identity, StoreError> {
        let agtuuid = kvstore
            .get_or_insert("agtuuid", json!(uuid::Uuid::new_v4().to_string()))?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let socket_host = kvstore
            .get_or_insert("socket_host", json!("0.0.0.0"))?
            .as_str()
            .unwrap_or("0.0.0.0")
            .to_string();
        let socket_port = kvstore
            .get_or_insert("socket_port", json!(DEFAULT_PORT))?
            .as_u64()
            .unwrap_or(DEFAULT_PORT as u64) as u16;
        let secret_digest = kvstore
            .get_or_insert(
                "secret_digest",
                json!(meshwork_crypto::secret_digest(DEFAULT_PASSPHRASE)),
            )?
            .as_str()
            .unwrap_or_default()
            .to_string();

        info!(%agtuuid, %socket_host, socket_port, "identity loaded");
        Ok(Identity {
            agtuuid,
            socket_host,
            socket_port,
            secret_digest,
        })
    }

    /// Bind address for the HTTP front.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.socket_host, self.socket_port)
    }

    /// Control endpoint on the loopback interface, for the admin CLI.
    pub fn local_control_url(&self) -> String {
        format!("http://127.0.0.1:{}/control", self.socket_port)
    }
}

/// The agent's data directory: `$MESHWORK_HOME` or `~/.meshwork`.
pub fn data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("MESHWORK_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".meshwork")
}

/// Path of the persistent kvstore snapshot.
pub fn kvstore_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("kvstore.json")
}

/// Path of the persistent peer table snapshot.
pub fn peers_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("peers.json")
}
