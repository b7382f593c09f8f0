//! This crate provides an asynchronous implementation of the legacy RCON
//! protocol spoken by Rust game servers, as implemented in the pre-WebRCON
//! dedicated server.
//!
//! The client is entirely asynchronous and requires a [Tokio](https://tokio.rs/) runtime.
//!
//! To connect to an RCON server and create a client instance, use the [`connect`] function.
//! The connection authenticates immediately and spawns a background reader that
//! correlates (possibly fragmented) replies with the commands that caused them,
//! while queueing unsolicited server chatter for [`RconClient::read_passive`].
//!
//! # Example
//! ```rust,no_run
//! use rust_rcon_client::connect;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = connect("localhost", 28016, "password123")
//!         .await
//!         .unwrap();
//!
//!     let id = client.send("status").await.unwrap();
//!     client.register_callback(id, |req| println!("{}", req.response));
//!
//!     loop {
//!         if let Some(msg) = client.read_passive().unwrap() {
//!             println!("> {}", msg.response);
//!         }
//!     }
//! }
//! ```

mod client;
mod codec;
mod reader;

/// Error type for RCON operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A construction parameter was rejected before any connection attempt.
    #[error("invalid argument: {0}")]
    Argument(&'static str),

    /// The transport could not establish a connection.
    #[error("connection failed")]
    Connection(#[source] std::io::Error),

    /// Socket I/O failed after the connection was established.
    #[error("IO error")]
    Io(#[from] std::io::Error),

    /// The inbound byte stream broke the framing or correlation contract.
    /// Fatal: the stream is no longer trustworthy once misaligned.
    #[error("illegal protocol: {0}")]
    IllegalProtocol(String),

    /// The background reader already died of an I/O error; reported by
    /// later polls on the same session.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// [`Result`] alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub use self::client::{connect, RconClient, Request};
