//! # Access Point Client
//!
//! Async session runtime on top of the [`protocol`] crate.
//!
//! ## Overview
//!
//! A [`Session`] owns one TCP connection to an access point and provides:
//!
//! - **Endpoint Selection**: First reachable candidate out of the configured list
//! - **Handshake and Login**: Key agreement, signature check, credentials exchange
//! - **Send Lock**: Frames from many tasks are encrypted and written one at a time
//! - **Dispatch Loop**: Sole reader of the connection after login
//! - **Mercury**: Concurrent request/response calls and push subscriptions
//! - **Audio Keys**: Per-file key requests with a bounded wait
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Session                           │
//! │                                                          │
//! │  ┌────────────────┐  ┌────────────────┐                  │
//! │  │ MercuryManager │  │ AudioKeyManager│   callers         │
//! │  └───────┬────────┘  └───────┬────────┘                  │
//! │          │ send              │ send                      │
//! │  ┌───────▼───────────────────▼────────┐                  │
//! │  │      PacketSender (send lock)      │──► FramedWrite   │
//! │  └────────────────────────────────────┘                  │
//! │                                                          │
//! │  ┌────────────────────────────────────┐                  │
//! │  │   Dispatcher (background task)     │◄── FramedRead    │
//! │  └────────────────────────────────────┘                  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use client::{Config, Credentials, Session};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut config = Config::load_default()?;
//! config.apply_env_overrides();
//! client::logging::init(&config.client.log_level);
//!
//! let session = Session::connect(
//!     &config.session_config()?,
//!     &Credentials::with_password("user", "secret"),
//! )
//! .await?;
//!
//! let response = session.mercury().get("hm://example/resource").await?;
//! println!("{} -> {}", response.uri(), response.status_code());
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration and the runtime session settings
//! - [`logging`]: Subscriber setup
//! - [`endpoint`]: Access point addresses and connection attempts
//! - [`connection`]: Async handshake driver and the established transport
//! - [`credentials`]: Login payloads and welcome parsing
//! - [`session`]: Session handle, send lock and dispatch loop
//! - [`mercury`]: Mercury multiplexer
//! - [`audio_key`]: Audio key requests
//! - [`error`]: Error types

pub mod audio_key;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod mercury;
pub mod session;

pub use audio_key::{AudioKey, AudioKeyManager};
pub use config::{Config, ConfigError, SessionConfig};
pub use connection::Transport;
pub use credentials::{Credentials, Welcome};
pub use endpoint::AccessPoint;
pub use error::{AudioKeyError, MercuryError, SessionError};
pub use mercury::{MercuryManager, Subscription};
pub use session::{PacketSender, Session};
