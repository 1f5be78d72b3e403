//! Per-session IPC link to the external player
//!
//! Each session gets a freshly named endpoint. The player listens on it and
//! we connect as the client, with a bounded retry loop since the player
//! needs a moment to create the socket. Reading and writing run on their
//! own tasks; commands are queued and sent best-effort.

use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicU64, Ordering };
use std::time::Duration;

use thiserror::Error;
use tokio::io::{ AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader };
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::protocol::{ decode_line, ChannelEvent, ControlCommand };


/// Errors that can occur while opening a control channel.
#[derive( Debug, Error )]
pub enum ChannelError {
    #[error( "Control channel {path:?} unavailable after {attempts} attempts: {reason}" )]
    Unavailable { path: PathBuf, attempts: u32, reason: String },
}


/// Stream of events coming back from the player.
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;


/// A uniquely named IPC endpoint.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct IpcEndpoint {
    path: PathBuf,
}


impl IpcEndpoint {
    /// Creates a new endpoint name that no other session uses.
    #[cfg( unix )]
    pub fn unique( dir: &Path ) -> Self {
        Self { path: dir.join( format!( "devdeck-mpv-{}.sock", Uuid::new_v4().simple() ) ) }
    }


    /// Creates a new endpoint name that no other session uses.
    #[cfg( windows )]
    pub fn unique( _dir: &Path ) -> Self {
        Self { path: PathBuf::from( format!( r"\\.\pipe\devdeck-mpv-{}", Uuid::new_v4().simple() ) ) }
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }


    /// The player argument that makes it listen on this endpoint.
    pub fn player_arg( &self ) -> String {
        format!( "--input-ipc-server={}", self.path.display() )
    }


    /// Removes the socket file left behind by the player.
    pub fn cleanup( &self ) {
        #[cfg( unix )]
        {
            match std::fs::remove_file( &self.path ) {
                Ok(()) => tracing::trace!( "Removed socket {:?}", self.path ),
                Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err( e ) => tracing::debug!( "Failed to remove socket {:?}: {}", self.path, e ),
            }
        }
    }
}


#[cfg( unix )]
async fn open_stream( path: &Path ) -> std::io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect( path ).await
}


#[cfg( windows )]
async fn open_stream( path: &Path ) -> std::io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    tokio::net::windows::named_pipe::ClientOptions::new().open( path )
}


/// Connected control channel.
///
/// After `close` (or drop) every `send` is a no-op.
pub struct ControlChannel {
    path: PathBuf,
    outbound: Option<mpsc::UnboundedSender<String>>,
    next_request: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}


impl ControlChannel {
    /// Connects to the endpoint, retrying up to `attempts` times.
    pub async fn connect(
        endpoint: &IpcEndpoint,
        attempts: u32,
        backoff: Duration,
    ) -> Result<( Self, EventReceiver ), ChannelError> {
        let attempts = attempts.max( 1 );
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match open_stream( endpoint.path() ).await {
                Ok( stream ) => {
                    tracing::debug!( "Control channel connected on attempt {}", attempt );
                    return Ok( Self::from_stream( stream, endpoint.path() ) );
                }
                Err( e ) => {
                    tracing::trace!( "Control channel attempt {} failed: {}", attempt, e );
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::time::sleep( backoff ).await;
            }
        }

        Err( ChannelError::Unavailable {
            path: endpoint.path().to_path_buf(),
            attempts,
            reason: last_error,
        })
    }


    /// Wraps an already-connected stream.
    pub fn from_stream<S>( stream: S, path: &Path ) -> ( Self, EventReceiver )
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let ( read_half, mut write_half ) = tokio::io::split( stream );
        let ( out_tx, mut out_rx ) = mpsc::unbounded_channel::<String>();
        let ( event_tx, event_rx ) = mpsc::unbounded_channel();

        let writer = tokio::spawn( async move {
            while let Some( line ) = out_rx.recv().await {
                if let Err( e ) = write_half.write_all( line.as_bytes() ).await {
                    tracing::debug!( "Control channel write failed: {}", e );
                    break;
                }
            }
        });

        let reader = tokio::spawn( async move {
            let mut lines = BufReader::new( read_half ).lines();
            loop {
                match lines.next_line().await {
                    Ok( Some( line ) ) => {
                        if let Some( event ) = decode_line( &line ) {
                            if event_tx.send( event ).is_err() {
                                break;
                            }
                        }
                    }
                    Ok( None ) => {
                        tracing::debug!( "Control channel closed by player" );
                        break;
                    }
                    Err( e ) => {
                        tracing::debug!( "Control channel read failed: {}", e );
                        break;
                    }
                }
            }
        });

        let channel = Self {
            path: path.to_path_buf(),
            outbound: Some( out_tx ),
            next_request: AtomicU64::new( 1 ),
            tasks: vec![ writer, reader ],
        };
        ( channel, event_rx )
    }


    /// Queues a command for the player. Failures are dropped silently.
    pub fn send( &self, command: ControlCommand ) {
        let Some( ref outbound ) = self.outbound else {
            tracing::trace!( "Dropping {:?}: channel closed", command );
            return;
        };

        let request_id = self.next_request.fetch_add( 1, Ordering::Relaxed );
        if outbound.send( command.encode( request_id ) ).is_err() {
            tracing::trace!( "Dropping {:?}: writer gone", command );
        }
    }


    pub fn is_open( &self ) -> bool {
        self.outbound.as_ref().is_some_and( |tx| !tx.is_closed() )
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }


    /// Stops the IO tasks. Safe to call more than once.
    pub fn close( &mut self ) {
        if self.outbound.take().is_some() {
            tracing::debug!( "Closing control channel {:?}", self.path );
        }
        for task in self.tasks.drain( .. ) {
            task.abort();
        }
    }
}


impl Drop for ControlChannel {
    fn drop( &mut self ) {
        self.close();
    }
}


#[cfg( all( test, unix ) )]
mod tests {
    use super::*;
    use tokio::net::UnixListener;


    #[test]
    fn test_endpoints_are_unique() {
        let dir = Path::new( "/tmp" );
        let a = IpcEndpoint::unique( dir );
        let b = IpcEndpoint::unique( dir );
        assert_ne!( a, b );
        assert!( a.player_arg().starts_with( "--input-ipc-server=/tmp/devdeck-mpv-" ) );
    }


    #[tokio::test]
    async fn test_send_and_receive_events() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::unique( dir.path() );
        let listener = UnixListener::bind( endpoint.path() ).unwrap();

        let server = tokio::spawn( async move {
            let ( stream, _ ) = listener.accept().await.unwrap();
            let ( read_half, mut write_half ) = stream.into_split();
            let mut lines = BufReader::new( read_half ).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            write_half
                .write_all( b"{\"event\":\"property-change\",\"id\":1,\"name\":\"eof-reached\",\"data\":true}\n" )
                .await
                .unwrap();
            first
        });

        let ( channel, mut events ) = ControlChannel::connect( &endpoint, 5, Duration::from_millis( 10 ) )
            .await
            .unwrap();
        assert!( channel.is_open() );
        channel.send( ControlCommand::TogglePause );

        let received = server.await.unwrap();
        assert!( received.contains( r#"["cycle","pause"]"# ) );
        assert_eq!( events.recv().await, Some( ChannelEvent::EndOfFile ) );
    }


    #[tokio::test]
    async fn test_connect_gives_up_after_budget() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::unique( dir.path() );

        let err = ControlChannel::connect( &endpoint, 3, Duration::from_millis( 5 ) )
            .await
            .err()
            .unwrap();
        assert!( matches!( err, ChannelError::Unavailable { attempts: 3, .. } ) );
    }


    #[tokio::test]
    async fn test_connect_retries_until_listener_appears() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::unique( dir.path() );
        let path = endpoint.path().to_path_buf();

        let server = tokio::spawn( async move {
            tokio::time::sleep( Duration::from_millis( 60 ) ).await;
            let listener = UnixListener::bind( &path ).unwrap();
            let _ = listener.accept().await.unwrap();
        });

        let result = ControlChannel::connect( &endpoint, 50, Duration::from_millis( 20 ) ).await;
        assert!( result.is_ok() );
        server.await.unwrap();
    }


    #[tokio::test]
    async fn test_send_after_close_is_silent() {
        let ( client, _server ) = tokio::net::UnixStream::pair().unwrap();
        let ( mut channel, _events ) = ControlChannel::from_stream( client, Path::new( "pair" ) );

        channel.close();
        channel.close();
        assert!( !channel.is_open() );
        channel.send( ControlCommand::SetVolume { percent: 40 } );
    }


    #[test]
    fn test_cleanup_missing_socket_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = IpcEndpoint::unique( dir.path() );
        endpoint.cleanup();
        std::fs::write( endpoint.path(), b"" ).unwrap();
        endpoint.cleanup();
        assert!( !endpoint.path().exists() );
    }
}
