//! Conference token minting seam.
//!
//! Minting real tokens is an external service; the engine only needs the
//! one operation below. The dev minter produces unique opaque strings so
//! the rest of the pipeline (which requires distinct per-uid tokens) can
//! run locally without credentials.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

#[async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint(&self, channel: &str, uid: u32, role: Role, expiry: Duration) -> Result<String>;
}

/// Local-development stub: deterministic per (channel, uid) and therefore
/// unique per uid, which is all the translator API checks.
pub struct DevTokenMinter {
    app_certificate: String,
}

impl DevTokenMinter {
    pub fn new(app_certificate: String) -> Self {
        Self { app_certificate }
    }
}

#[async_trait]
impl TokenMinter for DevTokenMinter {
    async fn mint(&self, channel: &str, uid: u32, role: Role, expiry: Duration) -> Result<String> {
        let role = match role {
            Role::Publisher => "pub",
            Role::Subscriber => "sub",
        };
        Ok(format!(
            "dev-{}-{channel}-{uid}-{role}-{}",
            self.app_certificate,
            expiry.as_secs()
        ))
    }
}
