//! # certkeeper
//!
//! 以 ACME DNS-01 驗證為網域與其萬用字元子網域申請、續期證書，
//! 並將帳戶、訂單、金鑰與證書鏈保存在 bucket 中。
//!
//! 主要模組：
//!
//! - **orchestrator**：單次執行的完整流程，依訂單狀態決定驗證、最終確認或只檢查續期時間。
//! - **account** / **order** / **authorization**：對應 ACME 的帳戶、訂單與授權處理。
//! - **provisioner**：透過 Namecheap 的整組取代式 DNS API 佈署驗證記錄，並以 DNS-over-HTTPS 確認傳播。
//! - **acme**：RFC 8555 的 HTTP 傳輸，包含 JWS 簽署與 nonce 管理。
//! - **artifact** / **storage** / **gcs**：以路徑定址的持久化，支援 GCS 與本機目錄。
//!
//! ## 示例
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use certkeeper::{
//!     acme::HttpAcmeClient,
//!     artifact::ArtifactStore,
//!     clock::SystemClock,
//!     directory::LETS_ENCRYPT_STAGING,
//!     dns::DohOracle,
//!     key_pair::RsaKeyPairGenerator,
//!     namecheap::{NamecheapClient, NamecheapCredentials},
//!     orchestrator::{Context, Orchestrator},
//!     provisioner::RegistrarChallengeProvisioner,
//!     storage::open_storage,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clock = Arc::new(SystemClock::new());
//!     let credentials = NamecheapCredentials::from_file("namecheap.json")?;
//!     let registrar = NamecheapClient::new(credentials, NamecheapClient::fetch_client_ip()?);
//!
//!     let orchestrator = Orchestrator::new(Context {
//!         api: Arc::new(HttpAcmeClient::new(LETS_ENCRYPT_STAGING)?),
//!         store: ArtifactStore::new(open_storage("file:///var/lib/certkeeper")?, None),
//!         keys: Arc::new(RsaKeyPairGenerator::default()),
//!         provisioner: Arc::new(RegistrarChallengeProvisioner::new(
//!             Box::new(registrar),
//!             Box::new(DohOracle::default()),
//!             clock.clone(),
//!         )),
//!         clock,
//!     });
//!
//!     orchestrator.try_run("admin@example.com", "example.com")?;
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod acme;
pub mod artifact;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod csr;
pub mod directory;
pub mod dns;
pub mod gcs;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod namecheap;
pub mod nonce;
pub mod order;
pub mod orchestrator;
pub mod payload;
pub mod protection;
pub mod provisioner;
pub mod signature;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
