//! Authenticated request pipeline for the nutrio backend.
//!
//! Every outbound call flows through the same chain: the
//! [`augment::RequestAugmenter`] stamps identity onto the request, the
//! [`dispatch::Dispatcher`] drives the send → refresh-on-401 → resend-once
//! protocol against the shared [`nutrio_auth::CredentialSource`], the
//! [`account::AccountStore`] reconciles server-assigned account identity out
//! of responses, and [`escalate::Escalation`] handles the terminal failure
//! path. [`client::ApiClient`] wires the chain together for the UI layer.

pub mod account;
pub mod augment;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod escalate;
pub mod request;
pub mod response;
pub mod telemetry;
pub mod testkit;
pub mod transport;

pub use account::AccountStore;
pub use augment::RequestAugmenter;
pub use client::{ApiClient, ApiClientBuilder};
pub use config::ApiConfig;
pub use dispatch::Dispatcher;
pub use error::ApiError;
pub use escalate::{AuthNotice, Escalation, EscalationReason, Navigator, NoopNavigator};
pub use request::{ApiRequest, RequestBody};
pub use response::{ApiResponse, ResponseBody, decode_body};
pub use transport::{HttpTransport, ReqwestTransport};

pub use nutrio_auth as auth;
