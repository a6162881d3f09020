//! Remote-access tunnel provisioning for home-automation hubs.
//!
//! A hub signs in through the device authorization grant, enrolls with the provisioning portal to
//! obtain a one-time tunnel secret, and keeps the local tunnel client add-on configured.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod bridge;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod http;
pub mod obs;
pub mod oidc;
pub mod portal;
pub mod reconcile;
pub mod supervisor;

mod _prelude {
	pub use std::{
		collections::HashSet,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize, de::DeserializeOwned};
	pub use serde_json::{Map as JsonMap, Value as JsonValue};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
