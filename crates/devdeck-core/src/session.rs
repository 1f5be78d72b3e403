//! Single-track playback session
//!
//! A session resolves one track's stream, starts the external player bound
//! to a fresh control channel, and then waits for whichever happens first:
//! the player exiting, an end-of-file event on the channel, a user control,
//! or a stop request from the orchestrator. Every exit path runs the same
//! teardown before the session reports its outcome.

use std::future::{ pending, Future };
use std::path::PathBuf;
use std::process::{ ExitStatus, Stdio };
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{ Child, Command };
use tokio::sync::mpsc;
use tokio::time::{ Instant, Interval, MissedTickBehavior };
use tokio_util::sync::CancellationToken;

use crate::channel::{ ControlChannel, EventReceiver, IpcEndpoint };
use crate::config::PlayerConfig;
use crate::protocol::{ ChannelEvent, ControlCommand };
use crate::queue::{ LoopMode, Track };
use crate::resolver::Resolve;


/// Errors that end a whole run, not just one track.
#[derive( Debug, Error )]
pub enum SessionError {
    #[error( "Failed to start player {bin:?}: {source}" )]
    SpawnFailed {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },
}


/// How a session finished.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SessionOutcome {
    /// The track played to its end.
    Ended,
    /// The user skipped, or the track could not be played.
    Skipped,
    /// The user asked to leave playback.
    Quit,
    /// The orchestrator stopped the run.
    Aborted,
}


/// Session lifecycle state.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SessionState {
    Loading,
    Playing,
    Paused,
    Ended,
    Skipped,
    Aborted,
}


impl SessionState {
    pub fn is_finished( &self ) -> bool {
        matches!( self, SessionState::Ended | SessionState::Skipped | SessionState::Aborted )
    }
}


/// Transport controls, from the keyboard or the orchestrator.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SessionControl {
    TogglePause,
    SeekBack,
    SeekForward,
    VolumeUp,
    VolumeDown,
    Skip,
    Quit,
}


/// Locally tracked transport position and settings.
///
/// Elapsed time is driven by a local timer, so it only approximates the
/// player's real position.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Transport {
    elapsed: u64,
    total: u64,
    paused: bool,
    volume: u8,
}


impl Transport {
    pub fn new( total: u64, volume: u8 ) -> Self {
        Self {
            elapsed: 0,
            total,
            paused: false,
            volume: volume.min( 100 ),
        }
    }


    /// Advances one second unless paused.
    pub fn tick( &mut self ) {
        if self.paused {
            return;
        }
        self.elapsed += 1;
        if self.total > 0 {
            self.elapsed = self.elapsed.min( self.total );
        }
    }


    /// Flips the paused flag and returns the new value.
    pub fn toggle_pause( &mut self ) -> bool {
        self.paused = !self.paused;
        self.paused
    }


    pub fn set_paused( &mut self, paused: bool ) {
        self.paused = paused;
    }


    /// Moves the elapsed counter, clamped to `[0, total]` when total is known.
    pub fn seek( &mut self, delta: i64 ) {
        let moved = if delta < 0 {
            self.elapsed.saturating_sub( delta.unsigned_abs() )
        } else {
            self.elapsed.saturating_add( delta as u64 )
        };
        self.elapsed = if self.total > 0 { moved.min( self.total ) } else { moved };
    }


    /// Changes the volume by `delta` percent, clamped to 0..=100.
    pub fn change_volume( &mut self, delta: i16 ) -> u8 {
        self.volume = ( self.volume as i16 + delta ).clamp( 0, 100 ) as u8;
        self.volume
    }


    /// Fraction played, or `None` when the total is unknown.
    pub fn progress( &self ) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(( self.elapsed as f64 / self.total as f64 ).min( 1.0 ))
        }
    }


    pub fn elapsed( &self ) -> u64 {
        self.elapsed
    }


    pub fn total( &self ) -> u64 {
        self.total
    }


    pub fn is_paused( &self ) -> bool {
        self.paused
    }


    pub fn volume( &self ) -> u8 {
        self.volume
    }
}


/// Everything a frontend needs to draw the transport view.
#[derive( Debug, Clone, PartialEq )]
pub struct NowPlaying {
    pub title: String,
    pub author: String,
    pub elapsed: u64,
    pub total: u64,
    pub progress: Option<f64>,
    pub paused: bool,
    pub volume: u8,
    pub loop_mode: LoopMode,
    pub position: usize,
    pub queue_len: usize,
    pub state: SessionState,
    /// False while the control channel is not (yet) connected.
    pub live_control: bool,
}


/// Where a session shows itself and takes keyboard input from.
pub trait Frontend: Send {
    /// Starts forwarding key presses into `controls`.
    ///
    /// Returns false when this frontend has no keyboard.
    fn attach( &mut self, controls: mpsc::UnboundedSender<SessionControl> ) -> bool;

    /// Draws the transport view.
    fn render( &mut self, view: &NowPlaying );

    /// Shows a short status message.
    fn notice( &mut self, message: &str );

    /// Stops forwarding key presses.
    fn detach( &mut self );
}


/// Frontend for background runs: no keyboard, no screen.
#[derive( Debug, Default )]
pub struct Detached;


impl Frontend for Detached {
    fn attach( &mut self, _controls: mpsc::UnboundedSender<SessionControl> ) -> bool {
        false
    }


    fn render( &mut self, _view: &NowPlaying ) {}


    fn notice( &mut self, message: &str ) {
        tracing::info!( "{}", message );
    }


    fn detach( &mut self ) {}
}


/// Run-wide control queue shared by every session of one run.
#[derive( Debug )]
pub struct Controls {
    tx: mpsc::UnboundedSender<SessionControl>,
    rx: mpsc::UnboundedReceiver<SessionControl>,
}


impl Controls {
    pub fn new() -> Self {
        let ( tx, rx ) = mpsc::unbounded_channel();
        Self { tx, rx }
    }


    pub fn sender( &self ) -> mpsc::UnboundedSender<SessionControl> {
        self.tx.clone()
    }


    async fn next( &mut self ) -> SessionControl {
        match self.rx.recv().await {
            Some( control ) => control,
            // We hold a sender ourselves, so this cannot close.
            None => pending().await,
        }
    }
}


impl Default for Controls {
    fn default() -> Self {
        Self::new()
    }
}


/// Per-session inputs handed down by the orchestrator.
#[derive( Debug, Clone )]
pub struct SessionContext {
    /// Volume carried over from the previous session.
    pub volume: u8,
    pub loop_mode: LoopMode,
    pub position: usize,
    pub queue_len: usize,
    pub cancel: CancellationToken,
}


/// What a finished session hands back to the orchestrator.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub volume: u8,
}


/// Plays one track to completion.
#[async_trait]
pub trait SessionRunner: Send + Sync {
    async fn play(
        &self,
        track: Track,
        ctx: SessionContext,
        frontend: &mut dyn Frontend,
        controls: &mut Controls,
    ) -> Result<SessionReport, SessionError>;
}


/// Runner that drives the external player.
#[derive( Clone )]
pub struct PlayerRunner {
    config: Arc<PlayerConfig>,
    resolver: Arc<dyn Resolve>,
}


impl PlayerRunner {
    pub fn new( config: Arc<PlayerConfig>, resolver: Arc<dyn Resolve> ) -> Self {
        Self { config, resolver }
    }
}


#[async_trait]
impl SessionRunner for PlayerRunner {
    async fn play(
        &self,
        track: Track,
        ctx: SessionContext,
        frontend: &mut dyn Frontend,
        controls: &mut Controls,
    ) -> Result<SessionReport, SessionError> {
        let session = PlaybackSession::new( track, ctx, Arc::clone( &self.config ), Arc::clone( &self.resolver ) );
        session.run( frontend, controls ).await
    }
}


/// Resources owned by a live session, released in a fixed order.
#[derive( Default )]
pub struct Teardown {
    ticker: Option<Interval>,
    keyboard: bool,
    channel: Option<ControlChannel>,
    child: Option<Child>,
    endpoint: Option<IpcEndpoint>,
}


impl Teardown {
    /// Stops the UI timer, detaches the keyboard, closes the channel, then
    /// kills the player. Running it again is a no-op.
    pub async fn run( &mut self, frontend: &mut dyn Frontend ) {
        self.ticker = None;

        if std::mem::take( &mut self.keyboard ) {
            frontend.detach();
        }

        if let Some( mut channel ) = self.channel.take() {
            channel.close();
        }

        if let Some( mut child ) = self.child.take() {
            kill_player( &mut child ).await;
        }

        if let Some( endpoint ) = self.endpoint.take() {
            endpoint.cleanup();
        }
    }


    pub fn is_clear( &self ) -> bool {
        self.ticker.is_none()
            && !self.keyboard
            && self.channel.is_none()
            && self.child.is_none()
            && self.endpoint.is_none()
    }
}


/// Forcefully stops the player unless it already exited.
async fn kill_player( child: &mut Child ) {
    match child.try_wait() {
        Ok( Some( status ) ) => {
            tracing::debug!( "Player already exited ({})", status );
        }
        _ => {
            tracing::debug!( "Killing player process {:?}", child.id() );
            if let Err( e ) = child.kill().await {
                tracing::debug!( "Kill failed: {}", e );
            }
        }
    }
}


/// One thing that woke the session loop.
enum Wake {
    Exited( std::io::Result<ExitStatus> ),
    Event( ChannelEvent ),
    Connected( Result<( ControlChannel, EventReceiver ), crate::channel::ChannelError> ),
    Tick,
    Control( SessionControl ),
    Cancelled,
}


async fn cancelled( cancel: Option<&CancellationToken> ) {
    match cancel {
        Some( cancel ) => cancel.cancelled().await,
        None => pending().await,
    }
}


async fn wait_child( child: &mut Option<Child> ) -> std::io::Result<ExitStatus> {
    match child {
        Some( child ) => child.wait().await,
        None => pending().await,
    }
}


async fn next_event( events: &mut Option<EventReceiver> ) -> ChannelEvent {
    if let Some( rx ) = events.as_mut() {
        if let Some( event ) = rx.recv().await {
            return event;
        }
        *events = None;
    }
    pending().await
}


async fn next_tick( ticker: &mut Option<Interval> ) {
    match ticker {
        Some( ticker ) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}


/// Arguments for one player process.
pub fn player_args( config: &PlayerConfig, endpoint: &IpcEndpoint, volume: u8, stream: &str ) -> Vec<String> {
    let mut args = config.player_extra_args.clone();
    args.extend([
        "--no-video".to_string(),
        "--no-terminal".to_string(),
        format!( "--volume={}", volume ),
        endpoint.player_arg(),
        "--idle=no".to_string(),
        "--".to_string(),
        stream.to_string(),
    ]);
    args
}


/// Awaits `fut` while still honoring quit and skip, plus stop requests
/// when `cancel` is given.
///
/// Other controls are ignored while no player is running.
async fn interruptible<F: Future>(
    fut: F,
    controls: &mut Controls,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, SessionOutcome> {
    tokio::pin!( fut );
    loop {
        tokio::select! {
            output = &mut fut => return Ok( output ),
            _ = cancelled( cancel ) => return Err( SessionOutcome::Aborted ),
            control = controls.next() => match control {
                SessionControl::Quit => return Err( SessionOutcome::Quit ),
                SessionControl::Skip => return Err( SessionOutcome::Skipped ),
                other => tracing::trace!( "Ignoring {:?} while loading", other ),
            },
        }
    }
}


/// The lifecycle of attempting to play exactly one track.
pub struct PlaybackSession {
    track: Track,
    ctx: SessionContext,
    config: Arc<PlayerConfig>,
    resolver: Arc<dyn Resolve>,
    state: SessionState,
    transport: Transport,
    resources: Teardown,
}


impl PlaybackSession {
    pub fn new(
        track: Track,
        ctx: SessionContext,
        config: Arc<PlayerConfig>,
        resolver: Arc<dyn Resolve>,
    ) -> Self {
        let transport = Transport::new( track.duration_secs, ctx.volume );
        Self {
            track,
            ctx,
            config,
            resolver,
            state: SessionState::Loading,
            transport,
            resources: Teardown::default(),
        }
    }


    /// Plays the track and always tears down before returning.
    pub async fn run(
        mut self,
        frontend: &mut dyn Frontend,
        controls: &mut Controls,
    ) -> Result<SessionReport, SessionError> {
        self.resources.keyboard = frontend.attach( controls.sender() );

        let result = self.drive( frontend, controls ).await;
        self.resources.run( frontend ).await;

        let outcome = result?;
        tracing::info!( "Session for '{}' finished: {:?}", self.track.title, outcome );
        Ok( SessionReport { outcome, volume: self.transport.volume() } )
    }


    pub fn state( &self ) -> SessionState {
        self.state
    }


    pub fn transport( &self ) -> &Transport {
        &self.transport
    }


    /// Snapshot for the frontend.
    pub fn now_playing( &self ) -> NowPlaying {
        NowPlaying {
            title: self.track.title.clone(),
            author: self.track.author.clone(),
            elapsed: self.transport.elapsed(),
            total: self.transport.total(),
            progress: self.transport.progress(),
            paused: self.transport.is_paused(),
            volume: self.transport.volume(),
            loop_mode: self.ctx.loop_mode,
            position: self.ctx.position,
            queue_len: self.ctx.queue_len,
            state: self.state,
            live_control: self.resources.channel.is_some(),
        }
    }


    fn set_state( &mut self, state: SessionState ) {
        if self.state != state {
            tracing::debug!( "Session '{}': {:?} -> {:?}", self.track.title, self.state, state );
            self.state = state;
        }
    }


    /// Moves to the terminal state matching `outcome`.
    fn finish( &mut self, outcome: SessionOutcome ) -> SessionOutcome {
        self.set_state( match outcome {
            SessionOutcome::Ended => SessionState::Ended,
            SessionOutcome::Skipped => SessionState::Skipped,
            SessionOutcome::Quit | SessionOutcome::Aborted => SessionState::Aborted,
        });
        outcome
    }


    async fn drive(
        &mut self,
        frontend: &mut dyn Frontend,
        controls: &mut Controls,
    ) -> Result<SessionOutcome, SessionError> {
        self.set_state( SessionState::Loading );
        frontend.notice( &format!( "Loading '{}'...", self.track.title ) );
        frontend.render( &self.now_playing() );

        let track_id = self.track.id.clone();
        let resolver = Arc::clone( &self.resolver );
        let cancel = self.ctx.cancel.clone();
        // A stop request lets an in-flight resolution finish first.
        let stream = match interruptible( resolver.resolve( &track_id ), controls, None ).await {
            Ok( result ) => result,
            Err( outcome ) => return Ok( self.finish( outcome ) ),
        };

        if self.ctx.cancel.is_cancelled() {
            return Ok( self.finish( SessionOutcome::Aborted ) );
        }

        let stream = match stream {
            Ok( stream ) => stream,
            Err( e ) => {
                tracing::warn!( "Cannot play '{}': {}", self.track.title, e );
                self.set_state( SessionState::Skipped );
                frontend.notice( &format!( "Cannot play '{}', skipping", self.track.title ) );
                let delay = tokio::time::sleep( self.config.skip_delay() );
                if let Err( outcome ) = interruptible( delay, controls, Some( &cancel ) ).await {
                    return Ok( self.finish( outcome ) );
                }
                return Ok( self.finish( SessionOutcome::Skipped ) );
            }
        };

        let endpoint = IpcEndpoint::unique( &self.config.socket_dir() );
        self.spawn_player( &endpoint, &stream )?;
        self.resources.endpoint = Some( endpoint.clone() );

        let mut ticker = tokio::time::interval_at( Instant::now() + Duration::from_secs( 1 ), Duration::from_secs( 1 ) );
        ticker.set_missed_tick_behavior( MissedTickBehavior::Delay );
        self.resources.ticker = Some( ticker );

        self.set_state( SessionState::Playing );
        frontend.notice( "" );
        frontend.render( &self.now_playing() );

        let connect = ControlChannel::connect(
            &endpoint,
            self.config.connect_attempts,
            self.config.connect_backoff(),
        );
        tokio::pin!( connect );
        let mut connecting = true;
        let mut events: Option<EventReceiver> = None;

        loop {
            let wake = tokio::select! {
                status = wait_child( &mut self.resources.child ) => Wake::Exited( status ),
                event = next_event( &mut events ) => Wake::Event( event ),
                result = &mut connect, if connecting => Wake::Connected( result ),
                _ = next_tick( &mut self.resources.ticker ) => Wake::Tick,
                control = controls.next() => Wake::Control( control ),
                _ = self.ctx.cancel.cancelled() => Wake::Cancelled,
            };

            if let Wake::Connected( result ) = wake {
                connecting = false;
                match result {
                    Ok(( channel, rx )) => {
                        channel.send( ControlCommand::ObserveEofReached );
                        channel.send( ControlCommand::SetVolume { percent: self.transport.volume() } );
                        self.resources.channel = Some( channel );
                        events = Some( rx );
                    }
                    Err( e ) => {
                        tracing::warn!( "{}; continuing without live control", e );
                    }
                }
                frontend.render( &self.now_playing() );
                continue;
            }

            if let Some( outcome ) = self.apply( wake ) {
                return Ok( self.finish( outcome ) );
            }
            frontend.render( &self.now_playing() );
        }
    }


    /// Starts the player process for `stream`.
    fn spawn_player( &mut self, endpoint: &IpcEndpoint, stream: &str ) -> Result<(), SessionError> {
        let args = player_args( &self.config, endpoint, self.transport.volume(), stream );
        tracing::info!( "Starting player for '{}'", self.track.title );
        tracing::debug!( "{:?} {:?}", self.config.player_bin, args );

        let child = Command::new( &self.config.player_bin )
            .args( &args )
            .stdin( Stdio::null() )
            .stdout( Stdio::null() )
            .stderr( Stdio::null() )
            .kill_on_drop( true )
            .spawn()
            .map_err( |source| SessionError::SpawnFailed {
                bin: self.config.player_bin.clone(),
                source,
            })?;

        self.resources.child = Some( child );
        Ok(())
    }


    /// Applies one wake-up. Returns the outcome once the session is resolved.
    ///
    /// After the first outcome every further call is ignored.
    fn apply( &mut self, wake: Wake ) -> Option<SessionOutcome> {
        if self.state.is_finished() {
            return None;
        }

        match wake {
            Wake::Exited( status ) => {
                tracing::debug!( "Player exited: {:?}", status );
                Some( SessionOutcome::Ended )
            }
            Wake::Event( event ) if event.ends_track() => {
                tracing::debug!( "End of track reported: {:?}", event );
                Some( SessionOutcome::Ended )
            }
            Wake::Event( ChannelEvent::Pause( paused ) ) => {
                self.transport.set_paused( paused );
                self.set_state( if paused { SessionState::Paused } else { SessionState::Playing } );
                None
            }
            Wake::Event( ChannelEvent::FileEnded { reason } ) => {
                tracing::debug!( "Player reported end-file ({})", reason );
                None
            }
            Wake::Event( _ ) | Wake::Connected( _ ) => None,
            Wake::Tick => {
                if self.state == SessionState::Playing {
                    self.transport.tick();
                }
                None
            }
            Wake::Control( control ) => self.handle_control( control ),
            Wake::Cancelled => Some( SessionOutcome::Aborted ),
        }
    }


    fn handle_control( &mut self, control: SessionControl ) -> Option<SessionOutcome> {
        match control {
            SessionControl::Skip => return Some( SessionOutcome::Skipped ),
            SessionControl::Quit => return Some( SessionOutcome::Quit ),
            _ if self.resources.channel.is_none() => {
                tracing::trace!( "No control channel, ignoring {:?}", control );
                return None;
            }
            _ => {}
        }

        let seek = self.config.seek_step_secs as i64;
        let step = self.config.volume_step as i16;
        let command = match control {
            SessionControl::TogglePause => {
                let paused = self.transport.toggle_pause();
                self.set_state( if paused { SessionState::Paused } else { SessionState::Playing } );
                ControlCommand::TogglePause
            }
            SessionControl::SeekBack => {
                self.transport.seek( -seek );
                ControlCommand::SeekRelative { seconds: -seek }
            }
            SessionControl::SeekForward => {
                self.transport.seek( seek );
                ControlCommand::SeekRelative { seconds: seek }
            }
            SessionControl::VolumeUp => ControlCommand::SetVolume { percent: self.transport.change_volume( step ) },
            SessionControl::VolumeDown => ControlCommand::SetVolume { percent: self.transport.change_volume( -step ) },
            SessionControl::Skip | SessionControl::Quit => return None,
        };

        if let Some( ref channel ) = self.resources.channel {
            channel.send( command );
        }
        None
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::resolver::ResolveError;


    /// Frontend that records what it was asked to do.
    #[derive( Default, Clone )]
    pub struct Recorder {
        pub log: Arc<Mutex<Vec<String>>>,
    }


    impl Frontend for Recorder {
        fn attach( &mut self, _controls: mpsc::UnboundedSender<SessionControl> ) -> bool {
            self.log.lock().unwrap().push( "attach".into() );
            true
        }


        fn render( &mut self, view: &NowPlaying ) {
            self.log.lock().unwrap().push( format!( "render {:?}", view.state ) );
        }


        fn notice( &mut self, message: &str ) {
            self.log.lock().unwrap().push( format!( "notice {}", message ) );
        }


        fn detach( &mut self ) {
            self.log.lock().unwrap().push( "detach".into() );
        }
    }


    /// Resolver with a fixed answer.
    pub struct FixedResolver( pub Option<&'static str> );


    #[async_trait]
    impl Resolve for FixedResolver {
        async fn resolve( &self, track_id: &str ) -> Result<String, ResolveError> {
            self.0
                .map( str::to_string )
                .ok_or_else( || ResolveError::ResolutionFailed { track_id: track_id.to_string() } )
        }
    }


    fn context() -> SessionContext {
        SessionContext {
            volume: 100,
            loop_mode: LoopMode::None,
            position: 0,
            queue_len: 1,
            cancel: CancellationToken::new(),
        }
    }


    fn config_with( player: &str, script: &str ) -> Arc<PlayerConfig> {
        Arc::new( PlayerConfig {
            player_bin: PathBuf::from( player ),
            player_extra_args: vec![ "-c".into(), script.into() ],
            ipc_dir: Some( std::env::temp_dir() ),
            connect_attempts: 2,
            connect_backoff_ms: 10,
            skip_delay_ms: 0,
            ..Default::default()
        })
    }


    fn session( config: Arc<PlayerConfig>, stream: Option<&'static str>, ctx: SessionContext ) -> PlaybackSession {
        PlaybackSession::new(
            Track::new( "id1", "Song", "Band", 180 ),
            ctx,
            config,
            Arc::new( FixedResolver( stream ) ),
        )
    }


    #[test]
    fn test_transport_tick_and_pause() {
        let mut transport = Transport::new( 3, 80 );
        transport.tick();
        assert_eq!( transport.elapsed(), 1 );
        assert!( transport.toggle_pause() );
        transport.tick();
        assert_eq!( transport.elapsed(), 1 );
        assert!( !transport.toggle_pause() );
        for _ in 0..5 {
            transport.tick();
        }
        assert_eq!( transport.elapsed(), 3 );
    }


    #[test]
    fn test_seek_clamps_to_known_total() {
        let mut transport = Transport::new( 30, 100 );
        transport.seek( -10 );
        assert_eq!( transport.elapsed(), 0 );
        transport.seek( 25 );
        transport.seek( 10 );
        assert_eq!( transport.elapsed(), 30 );
    }


    #[test]
    fn test_unknown_total_has_no_upper_bound() {
        let mut transport = Transport::new( 0, 100 );
        transport.seek( 500 );
        assert_eq!( transport.elapsed(), 500 );
        assert_eq!( transport.progress(), None );
        assert_eq!( Transport::new( 200, 100 ).progress(), Some( 0.0 ) );
    }


    #[test]
    fn test_volume_clamps() {
        let mut transport = Transport::new( 0, 100 );
        assert_eq!( transport.change_volume( 5 ), 100 );
        assert_eq!( transport.change_volume( -30 ), 70 );
        assert_eq!( Transport::new( 0, 3 ).change_volume( -5 ), 0 );
    }


    #[test]
    fn test_player_args_shape() {
        let config = PlayerConfig { player_extra_args: vec![ "--ao=alsa".into() ], ..Default::default() };
        let endpoint = IpcEndpoint::unique( std::path::Path::new( "/tmp" ) );
        let args = player_args( &config, &endpoint, 65, "https://stream" );
        assert_eq!( args[ 0 ], "--ao=alsa" );
        assert!( args.contains( &"--no-video".to_string() ) );
        assert!( args.contains( &"--volume=65".to_string() ) );
        assert!( args.contains( &"--idle=no".to_string() ) );
        assert!( args.contains( &endpoint.player_arg() ) );
        assert_eq!( args.last().unwrap(), "https://stream" );
    }


    #[test]
    fn test_end_signals_resolve_once() {
        let mut session = session( Arc::new( PlayerConfig::default() ), None, context() );
        session.set_state( SessionState::Playing );

        let first = session.apply( Wake::Event( ChannelEvent::EndOfFile ) );
        assert_eq!( first, Some( SessionOutcome::Ended ) );
        session.finish( SessionOutcome::Ended );

        assert_eq!( session.apply( Wake::Exited( Ok( ExitStatus::default() ) ) ), None );
        assert_eq!( session.apply( Wake::Control( SessionControl::Skip ) ), None );
        assert_eq!( session.state(), SessionState::Ended );
    }


    #[test]
    fn test_controls_without_channel_are_noops() {
        let mut session = session( Arc::new( PlayerConfig::default() ), None, context() );
        session.set_state( SessionState::Playing );

        assert_eq!( session.apply( Wake::Control( SessionControl::TogglePause ) ), None );
        assert_eq!( session.apply( Wake::Control( SessionControl::VolumeDown ) ), None );
        assert!( !session.transport().is_paused() );
        assert_eq!( session.transport().volume(), 100 );
        assert_eq!( session.apply( Wake::Control( SessionControl::Quit ) ), Some( SessionOutcome::Quit ) );
    }


    #[test]
    fn test_ticks_only_count_while_playing() {
        let mut session = session( Arc::new( PlayerConfig::default() ), None, context() );
        session.apply( Wake::Tick );
        assert_eq!( session.transport().elapsed(), 0 );
        session.set_state( SessionState::Playing );
        session.apply( Wake::Tick );
        session.apply( Wake::Event( ChannelEvent::Pause( true ) ) );
        session.apply( Wake::Tick );
        assert_eq!( session.transport().elapsed(), 1 );
        assert_eq!( session.state(), SessionState::Paused );
    }


    #[tokio::test]
    async fn test_unresolvable_track_is_skipped() {
        let recorder = Recorder::default();
        let mut frontend = recorder.clone();
        let mut controls = Controls::new();

        let report = session( config_with( "sh", "exit 0" ), None, context() )
            .run( &mut frontend, &mut controls )
            .await
            .unwrap();

        assert_eq!( report.outcome, SessionOutcome::Skipped );
        let log = recorder.log.lock().unwrap();
        assert!( log.iter().any( |l| l.starts_with( "notice Cannot play 'Song'" ) ) );
        assert_eq!( log.last().map( String::as_str ), Some( "detach" ) );
    }


    #[tokio::test]
    async fn test_missing_player_is_spawn_failure() {
        let mut controls = Controls::new();
        let result = session( config_with( "/nonexistent/devdeck-player", "" ), Some( "https://s" ), context() )
            .run( &mut Detached, &mut controls )
            .await;
        assert!( matches!( result, Err( SessionError::SpawnFailed { .. } ) ) );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_player_exit_ends_session() {
        let mut controls = Controls::new();
        let report = session( config_with( "sh", "exit 0" ), Some( "https://s" ), context() )
            .run( &mut Detached, &mut controls )
            .await
            .unwrap();
        assert_eq!( report, SessionReport { outcome: SessionOutcome::Ended, volume: 100 } );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_quit_kills_running_player() {
        let recorder = Recorder::default();
        let mut frontend = recorder.clone();
        let mut controls = Controls::new();
        let sender = controls.sender();

        let play = session( config_with( "sh", "sleep 30" ), Some( "https://s" ), context() )
            .run( &mut frontend, &mut controls );
        let quit = async {
            tokio::time::sleep( Duration::from_millis( 100 ) ).await;
            sender.send( SessionControl::Quit ).unwrap();
        };

        let ( report, () ) = tokio::time::timeout( Duration::from_secs( 5 ), async { tokio::join!( play, quit ) } )
            .await
            .unwrap();
        assert_eq!( report.unwrap().outcome, SessionOutcome::Quit );

        let log = recorder.log.lock().unwrap();
        let detach_at = log.iter().position( |l| l == "detach" ).unwrap();
        assert_eq!( detach_at, log.len() - 1, "nothing may render after teardown" );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_cancel_aborts_running_player() {
        let ctx = context();
        let cancel = ctx.cancel.clone();
        let mut controls = Controls::new();

        let mut detached = Detached;
        let play = session( config_with( "sh", "sleep 30" ), Some( "https://s" ), ctx )
            .run( &mut detached, &mut controls );
        let stop = async {
            tokio::time::sleep( Duration::from_millis( 100 ) ).await;
            cancel.cancel();
        };

        let ( report, () ) = tokio::join!( play, stop );
        assert_eq!( report.unwrap().outcome, SessionOutcome::Aborted );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let child = Command::new( "sleep" ).arg( "30" ).kill_on_drop( true ).spawn().unwrap();
        let recorder = Recorder::default();
        let mut frontend = recorder.clone();

        let mut teardown = Teardown {
            ticker: Some( tokio::time::interval( Duration::from_secs( 1 ) ) ),
            keyboard: true,
            child: Some( child ),
            ..Default::default()
        };

        teardown.run( &mut frontend ).await;
        teardown.run( &mut frontend ).await;

        assert!( teardown.is_clear() );
        assert_eq!( *recorder.log.lock().unwrap(), vec![ "detach".to_string() ] );
    }
}
