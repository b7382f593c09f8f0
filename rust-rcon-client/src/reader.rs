use crate::client::Shared;
use crate::codec::{self, DISCARD_ID};
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Continuous decode loop. Runs for the lifetime of the connection: decodes
/// one frame at a time and hands it to the session for correlation.
///
/// Stops when the session signals shutdown (dropping any partially-read
/// frame) or when decoding or delivery fails, in which case the error is
/// recorded on the session for the owner to observe.
pub(crate) async fn run<R: AsyncRead + Unpin>(mut read: R, shared: Arc<Shared>) {
    loop {
        let frame = tokio::select! {
            _ = shared.closed() => break,
            result = codec::decode(&mut read) => match result {
                Ok(frame) => frame,
                Err(err) => {
                    shared.set_fatal(&err);
                    break;
                }
            },
        };

        // Buffer-duplicate artifact; never delivered.
        if frame.id == DISCARD_ID {
            log::debug!("discarding reserved-id frame: {:?}", frame.body);
            continue;
        }

        if let Err(err) = shared.deliver(frame) {
            shared.set_fatal(&err);
            break;
        }
    }
}
