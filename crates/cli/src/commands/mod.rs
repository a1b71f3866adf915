//! Command implementations and the shared CLI context.

pub mod daemon;
pub mod file;
pub mod init;
pub mod peer;
pub mod route;
pub mod ticket;

use std::path::PathBuf;

use meshwork_client::ControlClient;
use meshwork_config::{Identity, Kvstore};
use meshwork_crypto::SecretKey;
use meshwork_store::Store;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Resolved global options shared by every command.
pub struct Context {
    pub data_dir: PathBuf,
    url_override: Option<String>,
}

impl Context {
    pub fn resolve(data_dir: Option<String>, url: Option<String>) -> Result<Context, Box<dyn std::error::Error>> {
        let data_dir = match data_dir {
            Some(dir) => PathBuf::from(dir),
            None => meshwork_config::data_dir(),
        };
        Ok(Context {
            data_dir,
            url_override: url,
        })
    }

    /// The persistent kvstore under the data directory.
    pub fn kvstore(&self) -> Result<Kvstore, Box<dyn std::error::Error>> {
        let store = Store::open(meshwork_config::kvstore_path(&self.data_dir));
        Ok(Kvstore::new(&store)?)
    }

    pub fn identity(&self) -> Result<Identity, Box<dyn std::error::Error>> {
        Ok(Identity::load(&self.kvstore()?)?)
    }

    /// A control client plus the endpoint URL to aim it at.
    pub fn control(&self) -> Result<(ControlClient, String), Box<dyn std::error::Error>> {
        let identity = self.identity()?;
        let key = SecretKey::from_digest(&identity.secret_digest)?;
        let url = self
            .url_override
            .clone()
            .unwrap_or_else(|| identity.local_control_url());
        Ok((ControlClient::new(key), url))
    }
}

/// Render an epoch-seconds timestamp for humans.
pub fn fmt_time(seconds: f64) -> String {
    chrono::DateTime::from_timestamp(seconds as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("{seconds}"))
}
