//! Line-oriented command shell
//!
//! Reads one command per line, runs it against the orchestrator, the
//! searcher, and the playlist store, and prints the result.

use std::io::{ self, Write };
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ anyhow, Context, Result };

use devdeck_core::{
    command::help_text,
    BackgroundStart, Command, LoopMode, PlaybackOrchestrator, PlayerRunner, RunEnd, Searcher,
    StreamResolver, Track,
};

use crate::frontend::{ format_time, TerminalFrontend };
use crate::playlists::PlaylistStore;
use crate::settings::Settings;


/// Whether the shell keeps reading commands.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Flow {
    Continue,
    Quit,
}


pub struct Shell {
    orchestrator: PlaybackOrchestrator,
    searcher: Searcher,
    store: Option<PlaylistStore>,
    settings: Settings,
    /// Where `loop` changes are persisted; `None` keeps them in memory.
    settings_path: Option<PathBuf>,
    search_limit: usize,
    last_results: Vec<Track>,
    output: Vec<String>,
}


impl Shell {
    pub fn new( settings: Settings, settings_path: Option<PathBuf>, store: Option<PlaylistStore> ) -> Self {
        let config = Arc::new( settings.player.clone() );
        let resolver = Arc::new( StreamResolver::from_config( &config ) );
        let runner = Arc::new( PlayerRunner::new( Arc::clone( &config ), resolver ) );

        let orchestrator = PlaybackOrchestrator::new( runner, Arc::clone( &config ) );
        orchestrator.set_loop_mode( settings.loop_mode );

        Self {
            orchestrator,
            searcher: Searcher::new( config.extractor_bin.clone(), config.resolve_timeout() ),
            store,
            search_limit: settings.search_limit.max( 1 ),
            settings,
            settings_path,
            last_results: Vec::new(),
            output: Vec::new(),
        }
    }


    pub fn orchestrator( &self ) -> &PlaybackOrchestrator {
        &self.orchestrator
    }


    /// Takes the lines produced since the last call.
    pub fn take_output( &mut self ) -> Vec<String> {
        std::mem::take( &mut self.output )
    }


    fn say( &mut self, line: impl Into<String> ) {
        self.output.push( line.into() );
    }


    fn remember_loop_mode( &mut self, mode: LoopMode ) {
        self.settings.loop_mode = mode;
        let Some( path ) = self.settings_path.as_deref() else {
            return;
        };
        if let Err( e ) = self.settings.save( path ) {
            tracing::warn!( "Failed to save settings to {}: {}", path.display(), e );
        }
    }


    fn store( &self ) -> Result<&PlaylistStore> {
        self.store.as_ref().ok_or_else( || anyhow!( "No data directory available for playlists" ) )
    }


    /// Reads and runs commands until `quit` or end of input.
    pub async fn run( &mut self ) -> Result<()> {
        println!( "devdeck ready. Type 'help' for commands." );

        loop {
            if let Some( error ) = self.orchestrator.take_last_error() {
                println!( "Background playback stopped: {}", error );
            }

            print!( "devdeck> " );
            io::stdout().flush()?;

            let line = tokio::task::spawn_blocking( || {
                let mut line = String::new();
                io::stdin().read_line( &mut line ).map( |n| ( n, line ) )
            })
            .await
            .context( "stdin reader failed" )??;

            if line.0 == 0 {
                println!();
                self.execute( Command::Quit ).await?;
                break;
            }

            let input = line.1.trim();
            if input.is_empty() {
                continue;
            }

            let flow = match Command::parse( input ) {
                Ok( command ) => self.dispatch( command ).await,
                Err( e ) => {
                    self.say( e.to_string() );
                    Flow::Continue
                }
            };

            for line in self.take_output() {
                println!( "{}", line );
            }

            if flow == Flow::Quit {
                break;
            }
        }

        Ok(())
    }


    /// Runs a command, reporting a failure as output instead of returning it.
    pub async fn dispatch( &mut self, command: Command ) -> Flow {
        let shown = format!( "{:?}", command );
        match self.execute( command ).await {
            Ok( flow ) => flow,
            Err( e ) => {
                tracing::warn!( "Command {} failed: {:#}", shown, e );
                self.say( format!( "Error: {:#}", e ) );
                Flow::Continue
            }
        }
    }


    /// Runs one parsed command.
    pub async fn execute( &mut self, command: Command ) -> Result<Flow> {
        tracing::debug!( "Executing {:?}", command );

        match command {
            Command::Search { query } => self.search( &query, false ).await?,
            Command::Artist { name } => self.search( &name, true ).await?,
            Command::Pick { choices } => {
                for choice in choices {
                    match choice.checked_sub( 1 ).and_then( |i| self.last_results.get( i ) ).cloned() {
                        Some( track ) => {
                            self.say( format!( "Queued: {}", track.title ) );
                            self.orchestrator.add( track );
                        }
                        None => self.say( format!( "No search result #{}", choice ) ),
                    }
                }
            }

            Command::Add { id } => {
                self.say( format!( "Queued: {}", id ) );
                self.orchestrator.add( Track::new( id.clone(), id, "Unknown", 0 ) );
            }
            Command::Remove { position } => {
                let index = position.checked_sub( 1 ).ok_or_else( || anyhow!( "Positions start at 1" ) )?;
                let removed = self.orchestrator.remove( index )?;
                self.say( format!( "Removed: {}", removed.title ) );
            }
            Command::Clear => {
                self.orchestrator.clear();
                self.say( "Queue cleared" );
            }
            Command::Queue => self.show_queue(),
            Command::Loop { mode } => {
                let mode = match mode {
                    Some( mode ) => {
                        self.orchestrator.set_loop_mode( mode );
                        mode
                    }
                    None => self.orchestrator.cycle_loop_mode(),
                };
                self.say( format!( "Loop: {}", mode.label() ) );
                self.remember_loop_mode( mode );
            }

            Command::Play => self.play_foreground().await?,
            Command::Background => match self.orchestrator.start_background()? {
                BackgroundStart::Started => self.say( "Playing in the background" ),
                BackgroundStart::NothingToPlay => self.say( "Nothing to play" ),
            },
            Command::Stop => {
                if self.orchestrator.stop_background().await {
                    self.say( "Stopped" );
                } else {
                    self.say( "Nothing is playing in the background" );
                }
            }
            Command::Status => self.show_status(),

            Command::Save { name } => {
                let ( tracks, _ ) = self.orchestrator.snapshot();
                let name = self.store()?.save( &name, &tracks )?;
                self.say( format!( "Saved '{}' ({} tracks)", name, tracks.len() ) );
            }
            Command::Load { name, append } => {
                let tracks = self.store()?.load( &name )?;
                let count = tracks.len();
                if append {
                    self.orchestrator.add_all( tracks );
                } else {
                    self.orchestrator.replace( tracks );
                }
                self.say( format!( "Loaded '{}' ({} tracks)", name, count ) );
            }
            Command::Playlists => {
                let playlists = self.store()?.list()?;
                if playlists.is_empty() {
                    self.say( "No saved playlists" );
                }
                for ( name, count ) in playlists {
                    self.say( format!( "  {} ({} tracks)", name, count ) );
                }
            }
            Command::Delete { name } => {
                self.store()?.delete( &name )?;
                self.say( format!( "Deleted '{}'", name ) );
            }
            Command::Import { url, name } => {
                let tracks = self.searcher.import_playlist( &url ).await?;
                if tracks.is_empty() {
                    return Err( anyhow!( "Playlist {} has no playable entries", url ) );
                }
                let name = self.store()?.save( &name, &tracks )?;
                self.say( format!( "Imported {} tracks as '{}'", tracks.len(), name ) );
            }

            Command::Help => self.say( help_text() ),
            Command::Quit => {
                self.orchestrator.stop_background().await;
                return Ok( Flow::Quit );
            }
        }

        Ok( Flow::Continue )
    }


    async fn search( &mut self, query: &str, artist: bool ) -> Result<()> {
        self.last_results = self.searcher.search( query, self.search_limit, artist ).await?;

        if self.last_results.is_empty() {
            self.say( "No results" );
            return Ok(());
        }

        let lines: Vec<String> = self.last_results
            .iter()
            .enumerate()
            .map( |( i, track )| format!( "{:>3}. {}", i + 1, describe( track ) ) )
            .collect();
        self.output.extend( lines );
        self.say( "Use 'pick <n...>' to queue results" );
        Ok(())
    }


    async fn play_foreground( &mut self ) -> Result<()> {
        if self.orchestrator.is_background_active() {
            self.say( "Background playback is active; 'stop' it first" );
            return Ok(());
        }

        let mut frontend = TerminalFrontend::enter().context( "Failed to take over the terminal" )?;
        let result = self.orchestrator.start_foreground( &mut frontend ).await;
        frontend.leave();

        match result? {
            RunEnd::NothingToPlay => self.say( "Nothing to play" ),
            RunEnd::Finished => self.say( "Reached the end of the queue" ),
            RunEnd::Quit | RunEnd::Stopped => self.say( "Playback stopped" ),
        }
        Ok(())
    }


    fn show_queue( &mut self ) {
        let ( tracks, current ) = self.orchestrator.snapshot();
        if tracks.is_empty() {
            self.say( "Queue is empty" );
            return;
        }

        let mode = self.orchestrator.loop_mode();
        self.say( format!( "Queue ({} tracks, loop {})", tracks.len(), mode.label() ) );
        for ( i, track ) in tracks.iter().enumerate() {
            let marker = if i == current { ">" } else { " " };
            self.say( format!( "{} {:>3}. {}", marker, i + 1, describe( track ) ) );
        }
    }


    fn show_status( &mut self ) {
        let ( tracks, _ ) = self.orchestrator.snapshot();
        let playing = match self.orchestrator.current_track_title() {
            Some( title ) if self.orchestrator.is_background_active() => format!( "Playing in background: {}", title ),
            Some( title ) => format!( "Playing: {}", title ),
            None => "Idle".to_string(),
        };
        self.say( playing );
        self.say( format!( "Queue: {} tracks, loop {}", tracks.len(), self.orchestrator.loop_mode().label() ) );
    }
}


fn describe( track: &Track ) -> String {
    if track.duration_secs > 0 {
        format!( "{} - {} ({})", track.title, track.author, format_time( track.duration_secs ) )
    } else {
        format!( "{} - {}", track.title, track.author )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn shell() -> ( tempfile::TempDir, Shell ) {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::new( dir.path().join( "playlists.json" ) );
        ( dir, Shell::new( Settings::default(), None, Some( store ) ) )
    }


    async fn run( shell: &mut Shell, line: &str ) -> Vec<String> {
        let command = Command::parse( line ).unwrap();
        assert_eq!( shell.execute( command ).await.unwrap(), Flow::Continue );
        shell.take_output()
    }


    #[tokio::test]
    async fn test_add_remove_and_queue() {
        let ( _dir, mut shell ) = shell();
        run( &mut shell, "add aaa" ).await;
        run( &mut shell, "add bbb" ).await;

        assert_eq!( run( &mut shell, "remove 1" ).await, vec![ "Removed: aaa" ] );
        let listing = run( &mut shell, "queue" ).await;
        assert_eq!( listing.len(), 2 );
        assert!( listing[ 1 ].contains( "bbb" ) );

        let err = shell.execute( Command::Remove { position: 5 } ).await;
        assert!( err.is_err() );
    }


    #[tokio::test]
    async fn test_loop_cycles_and_sets() {
        let ( _dir, mut shell ) = shell();
        assert_eq!( run( &mut shell, "loop" ).await, vec![ "Loop: All" ] );
        assert_eq!( run( &mut shell, "loop" ).await, vec![ "Loop: One" ] );
        assert_eq!( run( &mut shell, "loop none" ).await, vec![ "Loop: Off" ] );
        assert_eq!( shell.orchestrator().loop_mode(), LoopMode::None );
    }


    #[tokio::test]
    async fn test_loop_choice_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        let mut shell = Shell::new( Settings::default(), Some( path.clone() ), None );

        run( &mut shell, "loop one" ).await;

        assert_eq!( Settings::load( Some( &path ) ).loop_mode, LoopMode::One );
    }


    #[tokio::test]
    async fn test_failed_command_is_reported() {
        let ( _dir, mut shell ) = shell();
        assert_eq!( shell.dispatch( Command::Remove { position: 3 } ).await, Flow::Continue );
        let out = shell.take_output();
        assert_eq!( out.len(), 1 );
        assert!( out[ 0 ].starts_with( "Error:" ) );
    }


    #[tokio::test]
    async fn test_pick_from_last_results() {
        let ( _dir, mut shell ) = shell();
        shell.last_results = vec![
            Track::new( "a", "First", "Band", 200 ),
            Track::new( "b", "Second", "Band", 0 ),
        ];

        let out = run( &mut shell, "pick 2 9" ).await;
        assert_eq!( out, vec![ "Queued: Second", "No search result #9" ] );
        assert_eq!( shell.orchestrator().snapshot().0[ 0 ].id, "b" );
    }


    #[tokio::test]
    async fn test_save_and_load_playlists() {
        let ( _dir, mut shell ) = shell();
        run( &mut shell, "add aaa" ).await;
        run( &mut shell, "add bbb" ).await;
        assert_eq!( run( &mut shell, "save mix" ).await, vec![ "Saved 'mix' (2 tracks)" ] );

        run( &mut shell, "load mix append" ).await;
        assert_eq!( shell.orchestrator().snapshot().0.len(), 4 );

        run( &mut shell, "load mix" ).await;
        assert_eq!( shell.orchestrator().snapshot().0.len(), 2 );

        assert_eq!( run( &mut shell, "playlists" ).await, vec![ "  mix (2 tracks)" ] );
        run( &mut shell, "delete mix" ).await;
        assert_eq!( run( &mut shell, "playlists" ).await, vec![ "No saved playlists" ] );
    }


    #[tokio::test]
    async fn test_background_with_empty_queue() {
        let ( _dir, mut shell ) = shell();
        assert_eq!( run( &mut shell, "bg" ).await, vec![ "Nothing to play" ] );
        assert_eq!( run( &mut shell, "stop" ).await, vec![ "Nothing is playing in the background" ] );
        assert_eq!( run( &mut shell, "status" ).await[ 0 ], "Idle" );
    }


    #[tokio::test]
    async fn test_quit_ends_shell() {
        let ( _dir, mut shell ) = shell();
        assert_eq!( shell.execute( Command::Quit ).await.unwrap(), Flow::Quit );
    }


    #[test]
    fn test_describe_track() {
        assert_eq!( describe( &Track::new( "a", "Song", "Band", 75 ) ), "Song - Band (1:15)" );
        assert_eq!( describe( &Track::new( "a", "Song", "Band", 0 ) ), "Song - Band" );
    }
}
