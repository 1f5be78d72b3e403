//! Playback orchestrator
//!
//! Owns the queue and runs sessions one after another, applying the
//! loop-advance rule between them. At most one run exists at a time, either
//! in the foreground (attached to a frontend, awaited by the caller) or in
//! the background (detached task, stopped through `stop_background`).

use std::fmt;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PlayerConfig;
use crate::queue::{ LoopMode, Queue, QueueError, Track };
use crate::session::{ Controls, Detached, Frontend, SessionContext, SessionError, SessionOutcome, SessionRunner };


/// Errors returned by orchestrator operations.
#[derive( Debug, Error )]
pub enum OrchestratorError {
    #[error( "A {0} run is already active" )]
    AlreadyActive( RunMode ),

    #[error( "Playback stopped: {0}" )]
    Spawn( #[from] SessionError ),
}


/// Which kind of run owns the orchestrator.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum RunMode {
    Foreground,
    Background,
}


impl fmt::Display for RunMode {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            RunMode::Foreground => write!( f, "foreground" ),
            RunMode::Background => write!( f, "background" ),
        }
    }
}


/// How a run came to an end.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum RunEnd {
    /// The queue was empty, nothing was started.
    NothingToPlay,
    /// The loop-advance rule ran past the end of the queue.
    Finished,
    /// The user quit from the transport view.
    Quit,
    /// `stop_background` (or a cancelled token) ended the run.
    Stopped,
}


/// Result of asking for a background run.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum BackgroundStart {
    Started,
    NothingToPlay,
}


struct RunSlot {
    id: u64,
    mode: RunMode,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<RunEnd, OrchestratorError>>>,
}


/// State shared with background tasks.
#[derive( Default )]
struct Shared {
    queue: Mutex<Queue>,
    slot: Mutex<Option<RunSlot>>,
    current_title: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
    next_run: AtomicU64,
    /// Set when a run played past the end of the queue.
    played_through: AtomicBool,
}


impl Shared {
    fn release( &self, id: u64 ) {
        let mut slot = lock( &self.slot );
        if slot.as_ref().is_some_and( |s| s.id == id ) {
            *slot = None;
            *lock( &self.current_title ) = None;
        }
    }


    /// Positions the cursor for a new run: back to the top after a run that
    /// played through, otherwise on the track the last run stopped at.
    fn rewind( &self ) {
        let mut queue = lock( &self.queue );
        let start = if self.played_through.swap( false, Ordering::Relaxed ) {
            0
        } else {
            queue.current_index()
        };
        if let Err( e ) = queue.jump_to( start ) {
            tracing::debug!( "Cursor left in place: {}", e );
        }
    }
}


fn lock<T>( mutex: &Mutex<T> ) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else( PoisonError::into_inner )
}


/// Clears the run slot when a foreground run exits, however it exits.
struct SlotGuard<'a> {
    shared: &'a Shared,
    id: u64,
}


impl Drop for SlotGuard<'_> {
    fn drop( &mut self ) {
        self.shared.release( self.id );
    }
}


/// Sequences playback sessions over the queue.
pub struct PlaybackOrchestrator {
    shared: Arc<Shared>,
    runner: Arc<dyn SessionRunner>,
    config: Arc<PlayerConfig>,
}


impl PlaybackOrchestrator {
    pub fn new( runner: Arc<dyn SessionRunner>, config: Arc<PlayerConfig> ) -> Self {
        Self {
            shared: Arc::new( Shared::default() ),
            runner,
            config,
        }
    }


    // Queue operations

    pub fn add( &self, track: Track ) {
        tracing::debug!( "Queued '{}'", track.title );
        lock( &self.shared.queue ).append( track );
    }


    pub fn add_all( &self, tracks: Vec<Track> ) {
        lock( &self.shared.queue ).extend( tracks );
    }


    /// Removes the track at `index` (0-based).
    pub fn remove( &self, index: usize ) -> Result<Track, QueueError> {
        lock( &self.shared.queue ).remove_at( index )
    }


    pub fn clear( &self ) {
        lock( &self.shared.queue ).clear();
    }


    pub fn replace( &self, tracks: Vec<Track> ) {
        lock( &self.shared.queue ).replace( tracks );
    }


    pub fn set_loop_mode( &self, mode: LoopMode ) {
        tracing::info!( "Loop mode set to {}", mode );
        lock( &self.shared.queue ).set_loop_mode( mode );
    }


    /// Steps to the next loop mode and returns it.
    pub fn cycle_loop_mode( &self ) -> LoopMode {
        let mut queue = lock( &self.shared.queue );
        let mode = queue.loop_mode().cycle();
        queue.set_loop_mode( mode );
        mode
    }


    pub fn loop_mode( &self ) -> LoopMode {
        lock( &self.shared.queue ).loop_mode()
    }


    /// Copy of the queued tracks and the cursor position.
    pub fn snapshot( &self ) -> ( Vec<Track>, usize ) {
        let queue = lock( &self.shared.queue );
        ( queue.tracks().to_vec(), queue.current_index() )
    }


    // Run control

    /// Plays the queue attached to `frontend` until it finishes or the user
    /// quits. Refused while any other run is active.
    pub async fn start_foreground( &self, frontend: &mut dyn Frontend ) -> Result<RunEnd, OrchestratorError> {
        if lock( &self.shared.queue ).is_empty() {
            return Ok( RunEnd::NothingToPlay );
        }

        let cancel = CancellationToken::new();
        let id = self.claim( RunMode::Foreground, cancel.clone() )?;
        let _guard = SlotGuard { shared: &self.shared, id };
        self.shared.rewind();

        tracing::info!( "Foreground run started" );
        let mut controls = Controls::new();
        let result = run_queue(
            &self.shared,
            self.runner.as_ref(),
            &self.config,
            frontend,
            &mut controls,
            cancel,
        ).await;
        tracing::info!( "Foreground run ended: {:?}", result );
        result
    }


    /// Starts playing the queue on a detached task and returns at once.
    /// Refused while any other run is active.
    pub fn start_background( &self ) -> Result<BackgroundStart, OrchestratorError> {
        if lock( &self.shared.queue ).is_empty() {
            return Ok( BackgroundStart::NothingToPlay );
        }

        let cancel = CancellationToken::new();
        let id = self.claim( RunMode::Background, cancel.clone() )?;
        *lock( &self.shared.last_error ) = None;
        self.shared.rewind();

        let shared = Arc::clone( &self.shared );
        let runner = Arc::clone( &self.runner );
        let config = Arc::clone( &self.config );

        let handle = tokio::spawn( async move {
            tracing::info!( "Background run started" );
            let mut controls = Controls::new();
            let result = run_queue( &shared, runner.as_ref(), &config, &mut Detached, &mut controls, cancel ).await;

            match result {
                Ok( ref end ) => tracing::info!( "Background run ended: {:?}", end ),
                Err( ref e ) => {
                    tracing::error!( "Background run failed: {}", e );
                    *lock( &shared.last_error ) = Some( e.to_string() );
                }
            }
            shared.release( id );
            result
        });

        if let Some( slot ) = lock( &self.shared.slot ).as_mut().filter( |s| s.id == id ) {
            slot.handle = Some( handle );
        }
        Ok( BackgroundStart::Started )
    }


    /// Stops the background run, tearing down its current session, and
    /// waits for it to wind down. Returns false when none was running.
    pub async fn stop_background( &self ) -> bool {
        let slot = {
            let mut slot = lock( &self.shared.slot );
            match slot.as_ref() {
                Some( s ) if s.mode == RunMode::Background => slot.take(),
                _ => None,
            }
        };

        let Some( slot ) = slot else {
            return false;
        };

        tracing::info!( "Stopping background run" );
        slot.cancel.cancel();
        *lock( &self.shared.current_title ) = None;

        if let Some( handle ) = slot.handle {
            match handle.await {
                Ok( result ) => tracing::debug!( "Background run joined: {:?}", result ),
                Err( e ) => tracing::warn!( "Background run task failed: {}", e ),
            }
        }
        true
    }


    pub fn is_background_active( &self ) -> bool {
        lock( &self.shared.slot ).as_ref().is_some_and( |slot| {
            slot.mode == RunMode::Background
                && slot.handle.as_ref().map_or( true, |h| !h.is_finished() )
        })
    }


    /// Title of the track currently being played by any run.
    pub fn current_track_title( &self ) -> Option<String> {
        lock( &self.shared.current_title ).clone()
    }


    /// Error that ended the last background run, if any. Cleared on read.
    pub fn take_last_error( &self ) -> Option<String> {
        lock( &self.shared.last_error ).take()
    }


    /// Reserves the single run slot.
    fn claim( &self, mode: RunMode, cancel: CancellationToken ) -> Result<u64, OrchestratorError> {
        let mut slot = lock( &self.shared.slot );
        if let Some( active ) = slot.as_ref() {
            let finished = active.handle.as_ref().is_some_and( JoinHandle::is_finished );
            if !finished {
                tracing::warn!( "Refusing {} run: {} run active", mode, active.mode );
                return Err( OrchestratorError::AlreadyActive( active.mode ) );
            }
        }

        let id = self.shared.next_run.fetch_add( 1, Ordering::Relaxed );
        *slot = Some( RunSlot { id, mode, cancel, handle: None } );
        Ok( id )
    }
}


/// Plays sessions until the loop-advance rule stops, the user quits, or
/// `cancel` fires.
async fn run_queue(
    shared: &Shared,
    runner: &dyn SessionRunner,
    config: &PlayerConfig,
    frontend: &mut dyn Frontend,
    controls: &mut Controls,
    cancel: CancellationToken,
) -> Result<RunEnd, OrchestratorError> {
    let mut volume = config.default_volume;

    loop {
        if cancel.is_cancelled() {
            return Ok( RunEnd::Stopped );
        }

        let ( track, ctx ) = {
            let queue = lock( &shared.queue );
            let Some( track ) = queue.current().cloned() else {
                shared.played_through.store( true, Ordering::Relaxed );
                return Ok( RunEnd::Finished );
            };
            let ctx = SessionContext {
                volume,
                loop_mode: queue.loop_mode(),
                position: queue.current_index(),
                queue_len: queue.len(),
                cancel: cancel.clone(),
            };
            ( track, ctx )
        };

        *lock( &shared.current_title ) = Some( track.title.clone() );
        let report = runner.play( track, ctx, frontend, controls ).await?;
        volume = report.volume;

        match report.outcome {
            SessionOutcome::Quit => return Ok( RunEnd::Quit ),
            SessionOutcome::Aborted => return Ok( RunEnd::Stopped ),
            SessionOutcome::Ended | SessionOutcome::Skipped => {}
        }

        if !lock( &shared.queue ).advance( report.outcome ) {
            shared.played_through.store( true, Ordering::Relaxed );
            return Ok( RunEnd::Finished );
        }

        tokio::select! {
            _ = tokio::time::sleep( config.inter_track_delay() ) => {}
            _ = cancel.cancelled() => return Ok( RunEnd::Stopped ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::session::SessionReport;


    enum Step {
        Finish( SessionOutcome ),
        SpawnFails,
        /// Plays until the run is cancelled.
        Hold,
        /// Ends once the test releases it.
        Gate( Arc<tokio::sync::Notify> ),
    }


    /// Runner that replays a fixed script of session outcomes.
    #[derive( Default )]
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        played: Mutex<Vec<( String, u8 )>>,
    }


    impl Scripted {
        fn new( steps: Vec<Step> ) -> Arc<Self> {
            Arc::new( Self { steps: Mutex::new( steps.into() ), ..Default::default() } )
        }


        fn played( &self ) -> Vec<String> {
            self.played.lock().unwrap().iter().map( |( id, _ )| id.clone() ).collect()
        }
    }


    #[async_trait]
    impl SessionRunner for Scripted {
        async fn play(
            &self,
            track: Track,
            ctx: SessionContext,
            _frontend: &mut dyn Frontend,
            _controls: &mut Controls,
        ) -> Result<SessionReport, SessionError> {
            self.played.lock().unwrap().push(( track.id.clone(), ctx.volume ));
            let step = self.steps.lock().unwrap().pop_front().unwrap_or( Step::Hold );
            let outcome = match step {
                Step::Finish( outcome ) => outcome,
                Step::SpawnFails => {
                    return Err( SessionError::SpawnFailed {
                        bin: "mpv".into(),
                        source: std::io::Error::new( std::io::ErrorKind::NotFound, "not found" ),
                    });
                }
                Step::Hold => {
                    ctx.cancel.cancelled().await;
                    SessionOutcome::Aborted
                }
                Step::Gate( gate ) => {
                    gate.notified().await;
                    SessionOutcome::Ended
                }
            };
            Ok( SessionReport { outcome, volume: ctx.volume.saturating_sub( 10 ) } )
        }
    }


    fn orchestrator( runner: Arc<Scripted>, ids: &[&str], mode: LoopMode ) -> PlaybackOrchestrator {
        let config = PlayerConfig { inter_track_delay_ms: 0, ..Default::default() };
        let orchestrator = PlaybackOrchestrator::new( runner, Arc::new( config ) );
        for id in ids {
            orchestrator.add( Track::new( *id, id.to_uppercase(), "Band", 180 ) );
        }
        orchestrator.set_loop_mode( mode );
        orchestrator
    }


    async fn wait_until_idle( orchestrator: &PlaybackOrchestrator ) {
        for _ in 0..100 {
            if !orchestrator.is_background_active() {
                return;
            }
            tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        }
    }


    async fn wait_for_title( orchestrator: &PlaybackOrchestrator ) -> Option<String> {
        for _ in 0..100 {
            if let Some( title ) = orchestrator.current_track_title() {
                return Some( title );
            }
            tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        }
        None
    }


    #[tokio::test]
    async fn test_loop_all_wraps_until_quit() {
        use SessionOutcome::*;
        let runner = Scripted::new( vec![
            Step::Finish( Ended ),
            Step::Finish( Ended ),
            Step::Finish( Ended ),
            Step::Finish( Quit ),
        ]);
        let orchestrator = orchestrator( runner.clone(), &[ "a", "b" ], LoopMode::All );

        let end = orchestrator.start_foreground( &mut Detached ).await.unwrap();

        assert_eq!( end, RunEnd::Quit );
        assert_eq!( runner.played(), vec![ "a", "b", "a", "b" ] );
        assert_eq!( orchestrator.snapshot().1, 1 );
        assert_eq!( orchestrator.current_track_title(), None );
    }


    #[tokio::test]
    async fn test_loop_one_replays_until_skip() {
        use SessionOutcome::*;
        let runner = Scripted::new( vec![
            Step::Finish( Ended ),
            Step::Finish( Ended ),
            Step::Finish( Ended ),
            Step::Finish( Skipped ),
        ]);
        let orchestrator = orchestrator( runner.clone(), &[ "a" ], LoopMode::One );

        let end = orchestrator.start_foreground( &mut Detached ).await.unwrap();

        assert_eq!( end, RunEnd::Finished );
        assert_eq!( runner.played(), vec![ "a", "a", "a", "a" ] );
    }


    #[tokio::test]
    async fn test_unplayable_track_advances() {
        // An unresolvable track comes back from its session as skipped.
        let runner = Scripted::new( vec![
            Step::Finish( SessionOutcome::Skipped ),
            Step::Finish( SessionOutcome::Ended ),
        ]);
        let orchestrator = orchestrator( runner.clone(), &[ "c", "d" ], LoopMode::None );

        let end = orchestrator.start_foreground( &mut Detached ).await.unwrap();

        assert_eq!( end, RunEnd::Finished );
        assert_eq!( runner.played(), vec![ "c", "d" ] );
    }


    #[tokio::test]
    async fn test_volume_carries_between_sessions() {
        let runner = Scripted::new( vec![
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Ended ),
        ]);
        let orchestrator = orchestrator( runner.clone(), &[ "a", "b" ], LoopMode::None );

        orchestrator.start_foreground( &mut Detached ).await.unwrap();

        let volumes: Vec<u8> = runner.played.lock().unwrap().iter().map( |( _, v )| *v ).collect();
        assert_eq!( volumes, vec![ 100, 90 ] );
    }


    #[tokio::test]
    async fn test_second_run_starts_from_the_top() {
        let runner = Scripted::new( vec![
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Ended ),
        ]);
        let orchestrator = orchestrator( runner.clone(), &[ "a", "b" ], LoopMode::None );

        assert_eq!( orchestrator.start_foreground( &mut Detached ).await.unwrap(), RunEnd::Finished );
        assert_eq!( orchestrator.start_foreground( &mut Detached ).await.unwrap(), RunEnd::Finished );

        assert_eq!( runner.played(), vec![ "a", "b", "a", "b" ] );
    }


    #[tokio::test]
    async fn test_quit_resumes_where_it_stopped() {
        let runner = Scripted::new( vec![
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Quit ),
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Ended ),
        ]);
        let orchestrator = orchestrator( runner.clone(), &[ "a", "b", "c" ], LoopMode::None );

        assert_eq!( orchestrator.start_foreground( &mut Detached ).await.unwrap(), RunEnd::Quit );
        assert_eq!( orchestrator.start_foreground( &mut Detached ).await.unwrap(), RunEnd::Finished );

        assert_eq!( runner.played(), vec![ "a", "b", "b", "c" ] );
    }


    #[tokio::test]
    async fn test_background_run_after_finish_starts_from_the_top() {
        let runner = Scripted::new( vec![
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Ended ),
            Step::Finish( SessionOutcome::Ended ),
        ]);
        let orchestrator = orchestrator( runner.clone(), &[ "a", "b" ], LoopMode::None );

        orchestrator.start_background().unwrap();
        wait_until_idle( &orchestrator ).await;
        orchestrator.start_background().unwrap();
        wait_until_idle( &orchestrator ).await;

        assert!( !orchestrator.is_background_active() );
        assert_eq!( runner.played(), vec![ "a", "b", "a", "b" ] );
    }


    #[tokio::test]
    async fn test_removing_playing_track_keeps_its_successor() {
        let gate = Arc::new( tokio::sync::Notify::new() );
        let runner = Scripted::new( vec![
            Step::Finish( SessionOutcome::Ended ),
            Step::Gate( Arc::clone( &gate ) ),
            Step::Finish( SessionOutcome::Ended ),
        ]);
        let orchestrator = orchestrator( runner.clone(), &[ "a", "b", "c" ], LoopMode::None );

        orchestrator.start_background().unwrap();
        for _ in 0..100 {
            if orchestrator.current_track_title().as_deref() == Some( "B" ) {
                break;
            }
            tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        }

        assert_eq!( orchestrator.remove( 1 ).unwrap().id, "b" );
        gate.notify_one();
        wait_until_idle( &orchestrator ).await;

        assert!( !orchestrator.is_background_active() );
        assert_eq!( runner.played(), vec![ "a", "b", "c" ] );
    }


    #[tokio::test]
    async fn test_empty_queue_is_nothing_to_play() {
        let orchestrator = orchestrator( Scripted::new( vec![] ), &[], LoopMode::All );
        assert_eq!( orchestrator.start_foreground( &mut Detached ).await.unwrap(), RunEnd::NothingToPlay );
        assert_eq!( orchestrator.start_background().unwrap(), BackgroundStart::NothingToPlay );
        assert!( !orchestrator.is_background_active() );
    }


    #[tokio::test]
    async fn test_spawn_failure_stops_run() {
        let runner = Scripted::new( vec![ Step::SpawnFails ] );
        let orchestrator = orchestrator( runner.clone(), &[ "a", "b" ], LoopMode::All );

        let result = orchestrator.start_foreground( &mut Detached ).await;

        assert!( matches!( result, Err( OrchestratorError::Spawn( _ ) ) ) );
        assert_eq!( runner.played(), vec![ "a" ] );
        assert_eq!( orchestrator.current_track_title(), None );
        assert!( !orchestrator.is_background_active() );
    }


    #[tokio::test]
    async fn test_foreground_refused_while_background_runs() {
        let runner = Scripted::new( vec![ Step::Hold ] );
        let orchestrator = orchestrator( runner.clone(), &[ "a" ], LoopMode::All );

        assert_eq!( orchestrator.start_background().unwrap(), BackgroundStart::Started );
        assert_eq!( wait_for_title( &orchestrator ).await.as_deref(), Some( "A" ) );
        assert!( orchestrator.is_background_active() );

        let refused = orchestrator.start_foreground( &mut Detached ).await;
        assert!( matches!( refused, Err( OrchestratorError::AlreadyActive( RunMode::Background ) ) ) );
        assert!( matches!( orchestrator.start_background(), Err( OrchestratorError::AlreadyActive( _ ) ) ) );
        assert!( orchestrator.is_background_active() );

        assert!( orchestrator.stop_background().await );
        assert!( !orchestrator.is_background_active() );
        assert_eq!( orchestrator.current_track_title(), None );
        assert!( !orchestrator.stop_background().await );
    }


    #[tokio::test]
    async fn test_background_failure_is_reported() {
        let runner = Scripted::new( vec![ Step::SpawnFails ] );
        let orchestrator = orchestrator( runner, &[ "a" ], LoopMode::None );

        orchestrator.start_background().unwrap();
        wait_until_idle( &orchestrator ).await;

        assert!( !orchestrator.is_background_active() );
        assert!( orchestrator.take_last_error().is_some_and( |e| e.contains( "mpv" ) ) );
        assert_eq!( orchestrator.take_last_error(), None );
    }


    #[test]
    fn test_queue_operations() {
        let orchestrator = orchestrator( Scripted::new( vec![] ), &[ "a", "b", "c" ], LoopMode::None );

        assert_eq!( orchestrator.remove( 1 ).unwrap().id, "b" );
        assert!( matches!( orchestrator.remove( 5 ), Err( QueueError::OutOfRange { index: 5, len: 2 } ) ) );
        assert_eq!( orchestrator.cycle_loop_mode(), LoopMode::All );

        orchestrator.clear();
        assert!( orchestrator.snapshot().0.is_empty() );
    }
}
