//! Business collaborators invoked by the dispatcher.
//!
//! The server only knows the [`Backend`] trait: every method takes the
//! request's opaque payload and returns a [`Reply`] or a [`HandlerError`].
//! A backend is constructed once and injected into the server as
//! `Arc<dyn Backend>`.

pub mod memory;
pub mod model;

pub use memory::MemoryBackend;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Successful handler outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message: String,
    pub payload: Option<String>,
}

impl Reply {
    /// Reply with a message and no payload.
    pub fn message(message: impl Into<String>) -> Self {
        Reply {
            message: message.into(),
            payload: None,
        }
    }

    /// Reply carrying `value` encoded as JSON.
    pub fn json<T: Serialize + ?Sized>(message: impl Into<String>, value: &T) -> HandlerResult {
        let payload = serde_json::to_string(value)
            .map_err(|e| HandlerError::Internal(format!("failed to encode reply: {e}")))?;
        Ok(Reply {
            message: message.into(),
            payload: Some(payload),
        })
    }
}

/// Failure raised by a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Recoverable, client-facing condition; the message is sent verbatim.
    #[error("{0}")]
    Business(String),

    /// Anything else; logged, never sent to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn business(message: impl Into<String>) -> Self {
        HandlerError::Business(message.into())
    }
}

pub type HandlerResult = Result<Reply, HandlerError>;

/// Decode a request payload as JSON of type `T`.
///
/// A missing or ill-shaped payload is a business error carrying `context`.
pub fn decode<T: DeserializeOwned>(payload: Option<&str>, context: &str) -> Result<T, HandlerError> {
    let raw = payload.ok_or_else(|| HandlerError::business(format!("{context}: missing data")))?;
    serde_json::from_str(raw)
        .map_err(|e| HandlerError::business(format!("{context}: invalid data format ({e})")))
}

macro_rules! unsupported {
    ($($method:ident),* ; $($bulk:ident),*) => {
        $(
            fn $method(&self, _payload: Option<&str>) -> HandlerResult {
                Err(HandlerError::Internal(
                    concat!(stringify!($method), " is not supported by this backend").to_string(),
                ))
            }
        )*
        $(
            fn $bulk(&self) -> HandlerResult {
                Err(HandlerError::Internal(
                    concat!(stringify!($bulk), " is not supported by this backend").to_string(),
                ))
            }
        )*
    };
}

/// The storage-facing side of every operation.
///
/// Methods default to an internal error so partial backends (test fakes,
/// read-only replicas) only implement what they serve.
pub trait Backend: Send + Sync {
    unsupported!(
        create_stock, read_stock, update_stock, delete_stock,
        create_company, read_company, update_company, delete_company,
        register, read_user, update_user, delete_user,
        company_stocks, stock_company, join_stock_company, separate_stock_company,
        add_holding, read_holding, update_holding, delete_holding, user_holdings,
        read_account, set_account, available_amount, login
        ;
        all_companies, all_stocks, all_users, all_roles, unassigned_stocks,
        all_holding_pairs
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_missing_payload() {
        let err = decode::<u32>(None, "Invalid stock id").unwrap_err();
        assert!(matches!(err, HandlerError::Business(ref m) if m.starts_with("Invalid stock id")));
    }

    #[test]
    fn test_decode_wrong_shape() {
        let err = decode::<u32>(Some("\"abc\""), "Invalid stock id").unwrap_err();
        assert!(matches!(err, HandlerError::Business(_)));
        assert_eq!(decode::<u32>(Some("7"), "Invalid stock id").unwrap(), 7);
    }

    #[test]
    fn test_unimplemented_method_is_internal() {
        struct Empty;
        impl Backend for Empty {}
        assert!(matches!(Empty.all_roles(), Err(HandlerError::Internal(_))));
        assert!(matches!(Empty.login(None), Err(HandlerError::Internal(_))));
    }

    #[test]
    fn test_json_reply() {
        let reply = Reply::json("ok", &vec![1, 2]).unwrap();
        assert_eq!(reply.payload.as_deref(), Some("[1,2]"));
        assert_eq!(Reply::message("bye").payload, None);
    }
}
