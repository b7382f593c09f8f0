use crate::codec::{Frame, PackageType, DISCARD_ID, FIRST_COMMAND_ID, PASSIVE_ID};
use crate::{reader, Error, Result};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};

type Callback = Box<dyn FnOnce(Request) + Send + 'static>;

/// Asynchronously connect to a legacy Rust RCON server.
///
/// Validates the arguments, opens the TCP connection, spawns the background
/// reader and immediately authenticates with `password`. The server does not
/// acknowledge authentication in a correlatable way (its reply arrives on the
/// reserved ID 1 and is dropped), so a successful return means the transport
/// is up, not that the password was accepted.
///
/// # Example
/// ```rust,no_run
/// use rust_rcon_client::connect;
///
/// #[tokio::main]
/// async fn main() {
///     let client = connect("localhost", 28016, "password123")
///         .await
///         .unwrap();
///
///     client.send("say hello").await.unwrap();
/// }
/// ```
pub async fn connect(host: &str, port: u16, password: &str) -> Result<RconClient> {
    RconClient::connect(host, port, password).await
}

/// A caller-visible view of one issued command and the reply accumulated for
/// it so far, or of one passive (unsolicited) server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The command's ID, or 0 for passive traffic.
    pub id: i32,
    /// The text sent to the server. Empty for passive traffic.
    pub content: String,
    /// Reply fragments received so far, concatenated in arrival order.
    pub response: String,
    /// Whether the paired validation reply has been seen, meaning `response`
    /// is the full reply. Always true for passive traffic.
    pub complete: bool,
}

/// An issued command the session is still tracking: the public view plus the
/// correlation bookkeeping the caller never sees.
struct Pending {
    id: i32,
    content: String,
    /// ID of the empty marker package sent right behind the command. The
    /// marker's echoed reply is the end-of-response signal. Absent for Auth
    /// and for markers themselves.
    validation_id: Option<i32>,
    response: String,
    complete: bool,
    callbacks: Vec<Callback>,
}

impl Pending {
    fn snapshot(&self) -> Request {
        Request {
            id: self.id,
            content: self.content.clone(),
            response: self.response.clone(),
            complete: self.complete,
        }
    }
}

/// How the reader died, kept so later calls can report it.
enum Fatal {
    Protocol(String),
    Io(String),
}

impl Fatal {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::IllegalProtocol(msg) => Fatal::Protocol(msg.clone()),
            other => Fatal::Io(other.to_string()),
        }
    }

    fn to_error(&self) -> Error {
        match self {
            Fatal::Protocol(msg) => Error::IllegalProtocol(msg.clone()),
            Fatal::Io(msg) => Error::ConnectionLost(msg.clone()),
        }
    }
}

struct State {
    pending: Vec<Pending>,
    passive: VecDeque<Request>,
    next_id: i32,
    fatal: Option<Fatal>,
}

impl State {
    fn new() -> Self {
        State {
            pending: Vec::new(),
            passive: VecDeque::new(),
            next_id: FIRST_COMMAND_ID,
            fatal: None,
        }
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

pub(crate) struct Shared {
    state: Mutex<State>,
    write: tokio::sync::Mutex<OwnedWriteHalf>,
    callback_tx: mpsc::UnboundedSender<CallbackJob>,
    shutdown: Notify,
}

struct CallbackJob {
    request: Request,
    callbacks: Vec<Callback>,
}

/// A connected RCON session.
///
/// Cheap to share behind an [`Arc`]; every operation takes `&self`. Dropping
/// the client (or calling [`RconClient::close`]) stops the background reader.
pub struct RconClient {
    shared: Arc<Shared>,
}

impl RconClient {
    pub(crate) async fn connect(host: &str, port: u16, password: &str) -> Result<Self> {
        if host.is_empty() {
            return Err(Error::Argument("host must not be empty"));
        }
        if password.is_empty() {
            return Err(Error::Argument("password must not be empty"));
        }
        if port == 0 {
            return Err(Error::Argument("port must be in 1..=65535"));
        }

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(Error::Connection)?;
        let (read, write) = stream.into_split();

        let (callback_tx, callback_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(State::new()),
            write: tokio::sync::Mutex::new(write),
            callback_tx,
            shutdown: Notify::new(),
        });

        tokio::spawn(dispatch_callbacks(callback_rx));
        tokio::spawn(reader::run(read, Arc::clone(&shared)));

        let client = RconClient { shared };
        client.send_package(password, PackageType::Auth).await?;
        Ok(client)
    }

    /// Send a command to the server, returning the ID to correlate its reply
    /// with via [`RconClient::read_by_id`] or [`RconClient::register_callback`].
    pub async fn send(&self, command: &str) -> Result<i32> {
        self.send_package(command, PackageType::Command).await
    }

    async fn send_package(&self, content: &str, kind: PackageType) -> Result<i32> {
        let (package, marker) = {
            let mut state = self.shared.state.lock().unwrap();
            if let Some(fatal) = &state.fatal {
                return Err(fatal.to_error());
            }

            let id = state.allocate_id();
            let validation_id = match kind {
                PackageType::Auth | PackageType::Validation => None,
                PackageType::Command => Some(state.allocate_id()),
            };

            state.pending.push(Pending {
                id,
                content: content.to_string(),
                validation_id,
                response: String::new(),
                complete: false,
                callbacks: Vec::new(),
            });

            let package = Frame {
                id,
                ty: kind.wire_code(),
                body: content.to_string(),
            };
            let marker = validation_id.map(|id| Frame {
                id,
                ty: PackageType::Validation.wire_code(),
                body: String::new(),
            });
            (package, marker)
        };

        let mut write = self.shared.write.lock().await;
        write.write_all(&package.encode()).await?;
        if let Some(marker) = &marker {
            write.write_all(&marker.encode()).await?;
        }
        write.flush().await?;

        Ok(package.id)
    }

    /// Register a callback fired exactly once, off the reader task, when the
    /// request's full reply has arrived. If the request is already complete
    /// the callback fires immediately. Unknown IDs are ignored.
    pub fn register_callback<F>(&self, id: i32, callback: F)
    where
        F: FnOnce(Request) + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(pending) = state.pending.iter_mut().find(|p| p.id == id) {
            if pending.complete {
                let _ = self.shared.callback_tx.send(CallbackJob {
                    request: pending.snapshot(),
                    callbacks: vec![Box::new(callback)],
                });
            } else {
                pending.callbacks.push(Box::new(callback));
            }
        }
    }

    /// Pop the oldest unsolicited server message (chat, join/leave notices),
    /// if any. Passive messages are consumed by the read.
    pub fn read_passive(&self) -> Result<Option<Request>> {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(front) = state.passive.pop_front() {
            return Ok(Some(front));
        }
        match &state.fatal {
            Some(fatal) => Err(fatal.to_error()),
            None => Ok(None),
        }
    }

    /// Poll for a specific request. A completed request is removed by the
    /// read; an incomplete one is returned as-is and stays retrievable.
    /// `read_by_id(0)` reads the passive channel, like [`RconClient::read_passive`].
    pub fn read_by_id(&self, id: i32) -> Result<Option<Request>> {
        if id == PASSIVE_ID {
            return self.read_passive();
        }

        let mut state = self.shared.state.lock().unwrap();
        if let Some(pos) = state.pending.iter().position(|p| p.id == id) {
            if state.pending[pos].complete {
                let done = state.pending.remove(pos);
                return Ok(Some(done.snapshot()));
            }
            return Ok(Some(state.pending[pos].snapshot()));
        }
        match &state.fatal {
            Some(fatal) => Err(fatal.to_error()),
            None => Ok(None),
        }
    }

    /// Stop the background reader. In-flight socket reads are abandoned
    /// without delivering partial frames; queued completion callbacks still
    /// drain.
    pub fn close(&self) {
        self.shared.shutdown.notify_one();
    }
}

impl Drop for RconClient {
    fn drop(&mut self) {
        self.shared.shutdown.notify_one();
    }
}

impl Shared {
    pub(crate) async fn closed(&self) {
        self.shutdown.notified().await;
    }

    pub(crate) fn set_fatal(&self, err: &Error) {
        log::debug!("reader stopped: {}", err);
        let mut state = self.state.lock().unwrap();
        if state.fatal.is_none() {
            state.fatal = Some(Fatal::from_error(err));
        }
    }

    /// Classify one inbound frame. Called only from the reader task, which
    /// has already dropped ID-1 frames.
    pub(crate) fn deliver(&self, frame: Frame) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if frame.id > DISCARD_ID {
            // The marker's echo: everything for this request has arrived.
            if let Some(pending) = state
                .pending
                .iter_mut()
                .find(|p| p.validation_id == Some(frame.id))
            {
                if pending.complete {
                    return Err(Error::IllegalProtocol(format!(
                        "duplicate validation for request {}",
                        pending.id
                    )));
                }
                pending.complete = true;

                let callbacks = std::mem::take(&mut pending.callbacks);
                if !callbacks.is_empty() {
                    let _ = self.callback_tx.send(CallbackJob {
                        request: pending.snapshot(),
                        callbacks,
                    });
                }
                return Ok(());
            }

            // A reply fragment for a request still in flight.
            if let Some(pending) = state.pending.iter_mut().find(|p| p.id == frame.id) {
                pending.response.push_str(&frame.body);
                return Ok(());
            }

            return Err(Error::IllegalProtocol(format!(
                "unexpected inbound id {}",
                frame.id
            )));
        }

        // ID 0: unsolicited traffic, queued in arrival order.
        state.passive.push_back(Request {
            id: frame.id,
            content: String::new(),
            response: frame.body,
            complete: true,
        });
        Ok(())
    }
}

/// Runs completion callbacks away from the reader task so a slow or panicking
/// callback never stalls frame delivery. Exits once the session is gone and
/// the queue has drained.
async fn dispatch_callbacks(mut rx: mpsc::UnboundedReceiver<CallbackJob>) {
    while let Some(job) = rx.recv().await {
        for callback in job.callbacks {
            let request = job.request.clone();
            if catch_unwind(AssertUnwindSafe(move || callback(request))).is_err() {
                log::warn!("completion callback for request {} panicked", job.request.id);
            }
        }
    }
}
